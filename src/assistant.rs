//! Question answering on top of the retrieval core.
//!
//! Retrieves the top-K entries, applies the confidence policy, and either
//! returns the knowledge base answer or streams a generated one. Generation
//! failures degrade to a fixed apology; retrieval failures propagate.

use std::sync::Arc;

use serde::Serialize;

use crate::generate::{FallbackRequest, Generator};
use crate::retrieval::{decide, Decision, SearchError, Searcher};

pub const GREETING: &str = "Hi! Ask me anything about orders, refunds, shipping, and policies.";

pub const APOLOGY: &str = "Sorry, I'm having trouble right now. Please try again later.";

pub const NO_GENERATOR_REPLY: &str = "I couldn't find a confident answer in the knowledge base. \
Please provide more details (like your order ID or date).";

/// Where a reply came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplySource {
    KnowledgeBase { score: f32, question: String },
    Generated,
    /// Generation failed and the apology was substituted
    Apology,
    /// Fallback was needed but no generator is configured
    NoGenerator,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub text: String,
    pub source: ReplySource,
}

pub struct Assistant {
    searcher: Arc<Searcher>,
    generator: Option<Box<dyn Generator>>,
    top_k: usize,
}

impl Assistant {
    pub fn new(searcher: Arc<Searcher>, generator: Option<Box<dyn Generator>>, top_k: usize) -> Self {
        Self {
            searcher,
            generator,
            top_k,
        }
    }

    pub fn searcher(&self) -> &Searcher {
        &self.searcher
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    /// Answer `query` using the default top-K.
    ///
    /// `on_chunk` receives generated fragments as they arrive; it is not
    /// called for knowledge base answers or canned replies.
    pub fn respond<F>(&self, query: &str, threshold: f32, on_chunk: F) -> Result<Reply, SearchError>
    where
        F: FnMut(&str),
    {
        self.respond_with(query, threshold, self.top_k, on_chunk)
    }

    pub fn respond_with<F>(
        &self,
        query: &str,
        threshold: f32,
        top_k: usize,
        on_chunk: F,
    ) -> Result<Reply, SearchError>
    where
        F: FnMut(&str),
    {
        let results = self.searcher.search(query, top_k)?;

        match decide(&results, threshold) {
            Decision::KnowledgeBase { score, entry } => {
                log::debug!("answering from knowledge base (score={score:.3})");
                Ok(Reply {
                    text: entry.answer().to_string(),
                    source: ReplySource::KnowledgeBase {
                        score,
                        question: entry.question().to_string(),
                    },
                })
            }
            Decision::Fallback => {
                let Some(generator) = &self.generator else {
                    return Ok(Reply {
                        text: NO_GENERATOR_REPLY.to_string(),
                        source: ReplySource::NoGenerator,
                    });
                };

                let top = results.first().map(|r| r.score);
                log::debug!("falling back to generator (top score={top:?})");

                let request = FallbackRequest::new(query, &results);
                Ok(stream_reply(generator.as_ref(), &request, on_chunk))
            }
        }
    }
}

fn stream_reply<F>(generator: &dyn Generator, request: &FallbackRequest, mut on_chunk: F) -> Reply
where
    F: FnMut(&str),
{
    let apology = || Reply {
        text: APOLOGY.to_string(),
        source: ReplySource::Apology,
    };

    let stream = match generator.generate(request) {
        Ok(stream) => stream,
        Err(e) => {
            log::warn!("generation failed: {e}");
            return apology();
        }
    };

    let mut full = String::new();
    for chunk in stream {
        match chunk {
            Ok(text) => {
                on_chunk(&text);
                full.push_str(&text);
            }
            Err(e) => {
                log::warn!("generation stream failed: {e}");
                return apology();
            }
        }
    }

    let text = full.trim();
    if text.is_empty() {
        log::warn!("generator returned an empty answer");
        return apology();
    }

    Reply {
        text: text.to_string(),
        source: ReplySource::Generated,
    }
}
