//! Seams to the systems that live outside the engine: the document store,
//! the search backend, and progress reporting.

use citeres_core::error::{BackendError, EvalError};
use citeres_core::types::{Candidate, RetrievalModel, WeightVector};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Document metadata the pipeline needs from the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub guid: String,
    #[serde(default)]
    pub num_in_collection_references: u64,
    #[serde(default)]
    pub num_resolvable_citations: u64,
}

pub trait DocumentStore {
    fn metadata_by_guid(&self, guid: &str) -> Result<DocumentMetadata, BackendError>;
}

/// A loaded retrieval handle for one document (or the whole corpus).
pub trait SearchIndex {
    /// Runs `structured_query` against the index built for `guid` and
    /// returns up to `max_results` candidates with their field breakdowns.
    fn run_query(
        &self,
        structured_query: &serde_json::Value,
        weights: &WeightVector,
        guid: &str,
        max_results: usize,
    ) -> Result<Vec<Candidate>, BackendError>;
}

/// Opens per-document retrieval handles. Opening is the expensive step, so
/// the pipeline caches the handle for consecutive queries of one document.
pub trait RetrievalBackend {
    type Index: SearchIndex;

    fn open(&mut self, guid: &str, model: &RetrievalModel) -> Result<Self::Index, BackendError>;
}

pub trait ProgressReporter {
    fn report(&mut self, item: usize, total: usize);
}

/// Reporter for callers that do not track progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&mut self, _item: usize, _total: usize) {}
}

/// Logs progress every `every` items.
#[derive(Debug, Clone, Copy)]
pub struct LogProgress {
    pub every: usize,
}

impl ProgressReporter for LogProgress {
    fn report(&mut self, item: usize, total: usize) {
        if self.every > 0 && (item % self.every == 0 || item == total) {
            tracing::info!(item, total, "pipeline progress");
        }
    }
}

/// Calls `call` up to `max_attempts` times while it fails transiently.
/// Non-transient failures return immediately.
pub fn with_retry<T, F>(operation: &str, max_attempts: usize, mut call: F) -> Result<T, EvalError>
where
    F: FnMut() -> Result<T, BackendError>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match call() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                warn!(operation, attempt, max_attempts, error = %err, "transient backend failure; retrying");
                attempt += 1;
            }
            Err(err) => return Err(EvalError::from_backend(operation, attempt, err)),
        }
    }
}
