use std::sync::{Arc, Mutex};

use super::{build_store, knowledge_base, BrokenEmbedder, HashedWordsEmbedder, FAQ};
use crate::assistant::{Assistant, ReplySource, APOLOGY, NO_GENERATOR_REPLY};
use crate::generate::{FallbackRequest, GenerationError, Generator, TextStream};
use crate::retrieval::{IndexBuilder, SearchError, Searcher};

/// Generator that replays a fixed script and records what it was asked.
struct ScriptedGenerator {
    script: Vec<Result<&'static str, &'static str>>,
    fail_to_start: bool,
    requests: Arc<Mutex<Vec<FallbackRequest>>>,
}

impl ScriptedGenerator {
    fn new(script: Vec<Result<&'static str, &'static str>>) -> Self {
        Self {
            script,
            fail_to_start: false,
            requests: Arc::new(Mutex::new(vec![])),
        }
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, request: &FallbackRequest) -> Result<TextStream, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail_to_start {
            return Err(GenerationError::Decode("upstream unavailable".to_string()));
        }

        let chunks: Vec<_> = self
            .script
            .iter()
            .map(|step| match step {
                Ok(text) => Ok(text.to_string()),
                Err(msg) => Err(GenerationError::Decode(msg.to_string())),
            })
            .collect();
        Ok(Box::new(chunks.into_iter()))
    }
}

fn assistant(generator: Option<ScriptedGenerator>) -> (Assistant, tempfile::TempDir) {
    let (store, tmp) = build_store(FAQ);
    let searcher = Searcher::open(&store, Box::new(HashedWordsEmbedder::new())).unwrap();
    let generator = generator.map(|g| Box::new(g) as Box<dyn Generator>);
    (Assistant::new(Arc::new(searcher), generator, 3), tmp)
}

#[test]
fn confident_match_answers_from_knowledge_base() {
    let (assistant, _tmp) = assistant(Some(ScriptedGenerator::new(vec![Ok("unused")])));

    let mut chunks = vec![];
    let reply = assistant
        .respond("refund policy", 0.3, |c| chunks.push(c.to_string()))
        .unwrap();

    assert_eq!(reply.text, "Contact support within 30 days.");
    match reply.source {
        ReplySource::KnowledgeBase { score, question } => {
            assert!(score >= 0.3);
            assert_eq!(question, "How do I get a refund?");
        }
        other => panic!("unexpected source {other:?}"),
    }
    assert!(chunks.is_empty());
}

#[test]
fn fallback_without_generator_uses_canned_reply() {
    let (assistant, _tmp) = assistant(None);

    let reply = assistant.respond("what's the weather", 0.6, |_| {}).unwrap();
    assert_eq!(reply.source, ReplySource::NoGenerator);
    assert_eq!(reply.text, NO_GENERATOR_REPLY);
}

#[test]
fn fallback_streams_generated_answer() {
    let generator = ScriptedGenerator::new(vec![Ok("It is "), Ok("sunny."), Ok("  ")]);
    let requests = generator.requests.clone();
    let (assistant, _tmp) = assistant(Some(generator));

    let mut chunks = vec![];
    let reply = assistant
        .respond("what's the weather", 0.6, |c| chunks.push(c.to_string()))
        .unwrap();

    assert_eq!(reply.source, ReplySource::Generated);
    assert_eq!(reply.text, "It is sunny.");
    assert_eq!(chunks, vec!["It is ", "sunny.", "  "]);

    // the top-K entries are handed over as context
    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].query, "what's the weather");
    assert_eq!(requests[0].context.len(), 3);
}

#[test]
fn generator_failure_at_start_becomes_apology() {
    let mut generator = ScriptedGenerator::new(vec![]);
    generator.fail_to_start = true;
    let (assistant, _tmp) = assistant(Some(generator));

    let reply = assistant.respond("what's the weather", 0.6, |_| {}).unwrap();
    assert_eq!(reply.source, ReplySource::Apology);
    assert_eq!(reply.text, APOLOGY);
}

#[test]
fn generator_failure_mid_stream_becomes_apology() {
    let generator = ScriptedGenerator::new(vec![Ok("Partial"), Err("connection reset"), Ok("never")]);
    let (assistant, _tmp) = assistant(Some(generator));

    let mut chunks = vec![];
    let reply = assistant
        .respond("what's the weather", 0.6, |c| chunks.push(c.to_string()))
        .unwrap();

    assert_eq!(reply.source, ReplySource::Apology);
    assert_eq!(reply.text, APOLOGY);
    assert_eq!(chunks, vec!["Partial"]);
}

#[test]
fn empty_generation_becomes_apology() {
    let (assistant, _tmp) = assistant(Some(ScriptedGenerator::new(vec![Ok(" "), Ok("\n")])));

    let reply = assistant.respond("what's the weather", 0.6, |_| {}).unwrap();
    assert_eq!(reply.source, ReplySource::Apology);
}

#[test]
fn threshold_is_per_call() {
    let (assistant, _tmp) = assistant(None);

    let lenient = assistant.respond("refund policy", 0.3, |_| {}).unwrap();
    let strict = assistant.respond("refund policy", 0.9, |_| {}).unwrap();

    assert!(matches!(lenient.source, ReplySource::KnowledgeBase { .. }));
    assert_eq!(strict.source, ReplySource::NoGenerator);
}

#[test]
fn search_errors_are_not_downgraded() {
    let bundle = IndexBuilder::new(&HashedWordsEmbedder::new())
        .build(&knowledge_base(FAQ))
        .unwrap();
    let searcher = Searcher::from_bundle(bundle, Box::new(BrokenEmbedder)).unwrap();
    let generator = ScriptedGenerator::new(vec![Ok("should not be used")]);
    let assistant = Assistant::new(Arc::new(searcher), Some(Box::new(generator)), 3);

    let result = assistant.respond("refund", 0.5, |_| {});
    assert!(matches!(result, Err(SearchError::Embedding(_))));
}
