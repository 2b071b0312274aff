//! Offline backend that answers queries from precomputed retrievals.
//!
//! Stored candidates are keyed by `(file_guid, search payload)` and re-ranked
//! under the weights each query arrives with, so a full pipeline run can be
//! reproduced without the search engine that produced the candidates.

use crate::collaborators::{DocumentMetadata, DocumentStore, RetrievalBackend, SearchIndex};
use crate::formula::rank;
use crate::precomputed::PrecomputedQuery;
use citeres_core::constants::ALL_FILES_GUID;
use citeres_core::error::{BackendError, EvalError};
use citeres_core::types::{Candidate, FilesDict, RetrievalModel, WeightVector};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ReplayStore {
    entries: HashMap<(String, String), Vec<Candidate>>,
    guids: BTreeSet<String>,
}

impl ReplayStore {
    pub fn from_precomputed<'a>(queries: impl IntoIterator<Item = &'a PrecomputedQuery>) -> Self {
        let mut store = Self::default();
        for entry in queries {
            let key = (
                entry.query.file_guid.clone(),
                payload_key(&entry.query.search_payload()),
            );
            store.guids.insert(entry.query.file_guid.clone());
            store.entries.insert(key, entry.results.clone());
        }
        store
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_document(&self, guid: &str) -> bool {
        self.guids.contains(guid)
    }
}

/// Canonical text of a payload: object keys sorted at every level.
fn payload_key(payload: &serde_json::Value) -> String {
    match payload {
        serde_json::Value::Object(map) => {
            let mut fields: Vec<(&String, &serde_json::Value)> = map.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));
            let body = fields
                .into_iter()
                .map(|(key, value)| {
                    format!("{}:{}", serde_json::Value::from(key.as_str()), payload_key(value))
                })
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{body}}}")
        }
        serde_json::Value::Array(items) => {
            let body = items.iter().map(payload_key).collect::<Vec<_>>().join(",");
            format!("[{body}]")
        }
        other => other.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct ReplayBackend {
    store: Arc<ReplayStore>,
}

impl ReplayBackend {
    pub fn new(store: ReplayStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }
}

impl RetrievalBackend for ReplayBackend {
    type Index = ReplayIndex;

    fn open(&mut self, guid: &str, model: &RetrievalModel) -> Result<ReplayIndex, BackendError> {
        if guid != ALL_FILES_GUID && !self.store.contains_document(guid) {
            return Err(BackendError::unavailable(format!(
                "no precomputed retrievals for {guid}"
            )));
        }
        Ok(ReplayIndex {
            store: Arc::clone(&self.store),
            method: model.method.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ReplayIndex {
    store: Arc<ReplayStore>,
    method: String,
}

impl SearchIndex for ReplayIndex {
    fn run_query(
        &self,
        structured_query: &serde_json::Value,
        weights: &WeightVector,
        guid: &str,
        max_results: usize,
    ) -> Result<Vec<Candidate>, BackendError> {
        let key = (guid.to_string(), payload_key(structured_query));
        let Some(candidates) = self.store.entries.get(&key) else {
            return Ok(Vec::new());
        };
        let ranked = rank(candidates, weights).map_err(|e| match e {
            EvalError::InvalidWeightVector { field, available } => {
                BackendError::InvalidWeights { field, available }
            }
            other => BackendError::unavailable(format!("method {}: {other}", self.method)),
        })?;
        Ok(ranked
            .entries
            .into_iter()
            .take(max_results)
            .map(|entry| entry.candidate.clone())
            .collect())
    }
}

/// Document metadata served from `files_dict.json`.
pub struct FilesDictStore<'a> {
    files: &'a FilesDict,
}

impl<'a> FilesDictStore<'a> {
    pub fn new(files: &'a FilesDict) -> Self {
        Self { files }
    }
}

impl DocumentStore for FilesDictStore<'_> {
    fn metadata_by_guid(&self, guid: &str) -> Result<DocumentMetadata, BackendError> {
        let entry = self
            .files
            .get(guid)
            .ok_or_else(|| BackendError::unavailable(format!("unknown document {guid}")))?;
        Ok(DocumentMetadata {
            guid: guid.to_string(),
            num_in_collection_references: entry.in_collection_references.unwrap_or_default(),
            num_resolvable_citations: entry.resolvable_citations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use citeres_core::types::{FileEntry, Query};

    fn stored() -> PrecomputedQuery {
        let mut query = Query::new("c1", "d1", "window", "OWN", ["B"]);
        query.structured_query = serde_json::json!({"terms": ["parser", "tagging"], "boost": 1});
        PrecomputedQuery {
            query,
            results: vec![
                Candidate::new("A", [("AIM", 2.0), ("OWN", 1.0)]),
                Candidate::new("B", [("AIM", 1.0), ("OWN", 3.0)]),
            ],
        }
    }

    fn model() -> RetrievalModel {
        RetrievalModel {
            method: "az_1_ALL".to_string(),
            actual_dir: "/idx".to_string(),
        }
    }

    #[test]
    fn replay_reranks_under_query_weights() {
        let entry = stored();
        let mut backend = ReplayBackend::new(ReplayStore::from_precomputed([&entry]));
        let index = backend.open("d1", &model()).unwrap();

        let payload = serde_json::json!({"boost": 1, "terms": ["parser", "tagging"]});
        let ones = WeightVector::all_ones(["AIM", "OWN"]);
        let ranked = index.run_query(&payload, &ones, "d1", 10).unwrap();
        assert_eq!(ranked[0].guid, "B");

        let aim_heavy = WeightVector::from_pairs([("AIM", 5.0), ("OWN", 1.0)]);
        let ranked = index.run_query(&payload, &aim_heavy, "d1", 1).unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].guid, "A");
    }

    #[test]
    fn unknown_queries_and_documents() {
        let entry = stored();
        let mut backend = ReplayBackend::new(ReplayStore::from_precomputed([&entry]));
        assert!(backend.open("elsewhere", &model()).is_err());
        assert!(backend.open(ALL_FILES_GUID, &model()).is_ok());

        let index = backend.open("d1", &model()).unwrap();
        let ones = WeightVector::all_ones(["AIM", "OWN"]);
        let none = index
            .run_query(&serde_json::json!({"terms": []}), &ones, "d1", 10)
            .unwrap();
        assert!(none.is_empty());

        let wrong_fields = WeightVector::all_ones(["text"]);
        let payload = entry.query.search_payload();
        let err = index
            .run_query(&payload, &wrong_fields, "d1", 10)
            .expect_err("fields mismatch");
        assert!(matches!(err, BackendError::InvalidWeights { .. }));
    }

    #[test]
    fn files_dict_store_reports_reference_counts() {
        let files = FilesDict::from([(
            "d1".to_string(),
            FileEntry {
                resolvable_citations: 16,
                tfidf_models: Vec::new(),
                in_collection_references: Some(10),
            },
        )]);
        let store = FilesDictStore::new(&files);
        let metadata = store.metadata_by_guid("d1").unwrap();
        assert_eq!(metadata.num_in_collection_references, 10);
        assert_eq!(metadata.num_resolvable_citations, 16);
        assert!(store.metadata_by_guid("d2").is_err());
    }
}
