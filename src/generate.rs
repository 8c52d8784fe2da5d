//! Generative fallback for queries the knowledge base cannot answer.
//!
//! The generator receives the user query plus the retrieved top-K
//! question/answer pairs and yields its answer as a lazy stream of text
//! fragments. `OpenAiGenerator` talks to any OpenAI-compatible
//! `/chat/completions` endpoint with server-sent events.

use std::io::{BufRead, BufReader};
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::config::GeneratorConfig;
use crate::retrieval::SearchResult;

pub const SYSTEM_PROMPT: &str = "You are a helpful support assistant. \
Answer concisely and ask for the order ID if the user asks about their order/refund. \
Use the provided knowledge base context if possible; otherwise say you are unsure.";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("generator returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("io error while streaming: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed stream event: {0}")]
    Decode(String),
}

/// Lazy, finite, non-restartable sequence of answer fragments.
pub type TextStream = Box<dyn Iterator<Item = Result<String, GenerationError>> + Send>;

pub trait Generator: Send + Sync {
    fn generate(&self, request: &FallbackRequest) -> Result<TextStream, GenerationError>;
}

/// Query plus the retrieved question/answer context handed to the generator.
#[derive(Debug, Clone)]
pub struct FallbackRequest {
    pub query: String,
    pub context: Vec<(String, String)>,
}

impl FallbackRequest {
    pub fn new(query: &str, results: &[SearchResult]) -> Self {
        Self {
            query: query.to_string(),
            context: results
                .iter()
                .map(|r| (r.entry.question().to_string(), r.entry.answer().to_string()))
                .collect(),
        }
    }

    /// `Q: ..\nA: ..` blocks separated by a blank line; empty without context.
    pub fn context_block(&self) -> String {
        self.context
            .iter()
            .map(|(q, a)| format!("Q: {q}\nA: {a}"))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn user_message(&self) -> String {
        format!(
            "User question: {}\n\nKnowledge base context (may be empty):\n{}",
            self.query,
            self.context_block()
        )
    }
}

pub struct OpenAiGenerator {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
}

impl OpenAiGenerator {
    pub fn new(settings: &GeneratorConfig, api_key: String) -> Result<Self, GenerationError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: settings.model.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            temperature: settings.temperature,
        })
    }

    /// Build a generator from OPENAI_API_KEY, or `None` if it is unset or the
    /// generator is disabled in config.
    pub fn from_env(settings: &GeneratorConfig) -> Result<Option<Self>, GenerationError> {
        if !settings.enabled {
            log::info!("Generative fallback disabled in config");
            return Ok(None);
        }

        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        match api_key {
            Some(key) => {
                let settings = settings.with_env_overrides();
                log::info!("Generative fallback enabled with model '{}'", settings.model);
                Self::new(&settings, key).map(Some)
            }
            None => {
                log::info!("OPENAI_API_KEY not set; generative fallback unavailable");
                Ok(None)
            }
        }
    }
}

impl Generator for OpenAiGenerator {
    fn generate(&self, request: &FallbackRequest) -> Result<TextStream, GenerationError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": request.user_message()},
            ],
            "stream": true,
            "temperature": self.temperature,
        });

        log::debug!("Requesting fallback completion from {}", self.base_url);

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            log::warn!("generator error: status={status} body={body}");
            return Err(GenerationError::Status { status, body });
        }

        Ok(Box::new(SseChunks::new(BufReader::new(resp))))
    }
}

#[derive(Deserialize, Default)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize, Default)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Iterator over content deltas in a chat-completions event stream.
pub struct SseChunks<R> {
    reader: R,
    done: bool,
}

impl<R: BufRead> SseChunks<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            done: false,
        }
    }

    fn fail(&mut self, err: GenerationError) -> Option<Result<String, GenerationError>> {
        self.done = true;
        Some(Err(err))
    }
}

impl<R: BufRead> Iterator for SseChunks<R> {
    type Item = Result<String, GenerationError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();
        while !self.done {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(_) => {}
                Err(e) => return self.fail(e.into()),
            }

            // comments, event names, and keep-alives carry no content
            let Some(payload) = line.trim().strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim();
            if payload == "[DONE]" {
                self.done = true;
                return None;
            }

            let chunk: StreamChunk = match serde_json::from_str(payload) {
                Ok(chunk) => chunk,
                Err(e) => return self.fail(GenerationError::Decode(e.to_string())),
            };

            let content: String = chunk
                .choices
                .into_iter()
                .filter_map(|c| c.delta.content)
                .collect();
            if !content.is_empty() {
                return Some(Ok(content));
            }
        }
        None
    }
}
