//! Routing between a knowledge-base answer and generative fallback.

use serde::Serialize;

use crate::knowledge::KnowledgeEntry;
use crate::retrieval::searcher::SearchResult;

/// Outcome of the confidence check for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    /// The top hit is confident enough to answer directly.
    KnowledgeBase { score: f32, entry: KnowledgeEntry },
    /// No confident hit; hand the query to the generator.
    Fallback,
}

/// Answer from the knowledge base iff the top-ranked score reaches `threshold`.
///
/// Only `results[0]` is consulted; lower ranks never influence routing.
pub fn decide(results: &[SearchResult], threshold: f32) -> Decision {
    match results.first() {
        Some(top) if top.score >= threshold => Decision::KnowledgeBase {
            score: top.score,
            entry: top.entry.clone(),
        },
        _ => Decision::Fallback,
    }
}
