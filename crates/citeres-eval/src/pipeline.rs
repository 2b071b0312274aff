//! Live citation-resolution runs against a retrieval backend.
//!
//! Queries are processed in input order. Opening the indexes of a document
//! is the expensive step, so handles are cached for the current document
//! and only reopened when the next query belongs to a different one. With
//! `full_corpus` a single corpus-wide set of handles is opened up front.
//!
//! Failures are contained per unit: a document whose indexes cannot be
//! opened has its queries skipped and recorded, a query that still fails
//! after retries (or retrieves nothing) is logged as a zero row. Only
//! structural errors abort the run.

use crate::collaborators::{DocumentStore, ProgressReporter, RetrievalBackend, SearchIndex, with_retry};
use crate::score_logger::{AggregateRow, MetricSet, ResultRecord, ScoreLogger, record_outcome};
use citeres_core::config::Config;
use citeres_core::constants::ALL_FILES_GUID;
use citeres_core::error::EvalError;
use citeres_core::methods::TestingMethod;
use citeres_core::types::{FilesDict, Query, WeightVector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub max_results: usize,
    pub max_attempts: usize,
    pub full_corpus: bool,
    pub add_random_control: bool,
    pub max_queries: Option<usize>,
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_results: config.experiment.max_results_recall,
            max_attempts: config.backend.max_attempts,
            full_corpus: config.experiment.full_corpus,
            add_random_control: config.experiment.add_random_control_result,
            max_queries: config.experiment.max_queries_evaluated,
        }
    }
}

/// Tuned weights to use instead of all-ones. Zone-specific entries win over
/// method-wide ones.
#[derive(Debug, Clone, Default)]
pub struct WeightOverrides {
    zoned: BTreeMap<String, BTreeMap<String, WeightVector>>,
    global: BTreeMap<String, WeightVector>,
}

impl WeightOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds overrides from a `zone -> method -> weights` table.
    pub fn from_zone_table(table: BTreeMap<String, BTreeMap<String, WeightVector>>) -> Self {
        Self {
            zoned: table,
            global: BTreeMap::new(),
        }
    }

    pub fn set_for_zone(&mut self, zone: &str, method: &str, weights: WeightVector) {
        self.zoned
            .entry(zone.to_string())
            .or_default()
            .insert(method.to_string(), weights);
    }

    pub fn set_for_method(&mut self, method: &str, weights: WeightVector) {
        self.global.insert(method.to_string(), weights);
    }

    pub fn lookup(&self, zone: &str, method: &str) -> Option<&WeightVector> {
        self.zoned
            .get(zone)
            .and_then(|methods| methods.get(method))
            .or_else(|| self.global.get(method))
    }

    pub fn is_empty(&self) -> bool {
        self.zoned.is_empty() && self.global.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadFailure {
    pub guid: String,
    pub reason: String,
    pub skipped_queries: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub queries_total: usize,
    pub queries_processed: usize,
    pub rows_logged: usize,
    pub empty_retrievals: usize,
    pub failed_queries: usize,
    pub load_failures: Vec<LoadFailure>,
    pub total_citations: u64,
    pub rows: Vec<AggregateRow>,
}

enum DocumentHandles<I> {
    Ready(BTreeMap<String, I>),
    Failed,
}

struct HandleCache<I> {
    guid: Option<String>,
    handles: Option<DocumentHandles<I>>,
}

/// One pipeline invocation over a query list.
pub struct Pipeline<'a, B: RetrievalBackend> {
    pub backend: &'a mut B,
    pub files: &'a FilesDict,
    pub methods: &'a [TestingMethod],
    pub store: Option<&'a dyn DocumentStore>,
    pub overrides: &'a WeightOverrides,
    pub options: PipelineOptions,
}

impl<'a, B: RetrievalBackend> Pipeline<'a, B> {
    pub fn run<P: ProgressReporter>(
        &mut self,
        queries: &[Query],
        logger: &mut ScoreLogger,
        progress: &mut P,
    ) -> Result<PipelineSummary, EvalError> {
        let limit = self.options.max_queries.unwrap_or(queries.len());
        let queries = &queries[..limit.min(queries.len())];
        let mut summary = PipelineSummary {
            queries_total: queries.len(),
            ..PipelineSummary::default()
        };
        info!(
            queries = queries.len(),
            methods = self.methods.len(),
            full_corpus = self.options.full_corpus,
            "starting citation resolution"
        );

        let mut cache: HandleCache<B::Index> = HandleCache {
            guid: None,
            handles: None,
        };
        if self.options.full_corpus {
            let handles = self.open_document(ALL_FILES_GUID)?;
            cache.guid = Some(ALL_FILES_GUID.to_string());
            cache.handles = Some(DocumentHandles::Ready(handles));
        }

        let mut counted_documents = BTreeSet::new();
        for (idx, query) in queries.iter().enumerate() {
            progress.report(idx + 1, queries.len());
            let guid = query.file_guid.as_str();

            if counted_documents.insert(guid.to_string())
                && let Some(entry) = self.files.get(guid)
            {
                summary.total_citations += entry.resolvable_citations;
            }

            if !self.options.full_corpus && cache.guid.as_deref() != Some(guid) {
                cache.guid = Some(guid.to_string());
                cache.handles = Some(match self.open_document(guid) {
                    Ok(handles) => DocumentHandles::Ready(handles),
                    Err(err) if err.is_recoverable() => {
                        warn!(guid, error = %err, "failed to load retrieval models; skipping document");
                        summary.load_failures.push(LoadFailure {
                            guid: guid.to_string(),
                            reason: err.to_string(),
                            skipped_queries: 0,
                        });
                        DocumentHandles::Failed
                    }
                    Err(err) => return Err(err),
                });
            }

            let handles = match cache.handles.as_ref() {
                Some(DocumentHandles::Ready(handles)) => handles,
                _ => {
                    if let Some(failure) = summary.load_failures.last_mut() {
                        failure.skipped_queries += 1;
                    }
                    continue;
                }
            };

            for method in self.methods {
                let metrics = self.resolve_one(query, method, handles, &mut summary)?;
                logger.log(&ResultRecord::new(query, &method.name, metrics))?;
                summary.rows_logged += 1;
            }

            if self.options.add_random_control {
                match self.in_collection_references(guid) {
                    Some(count) => {
                        logger.log(&ResultRecord::random_control(query, count))?;
                        summary.rows_logged += 1;
                    }
                    None => debug!(guid, "no in-collection reference count; random control skipped"),
                }
            }
            summary.queries_processed += 1;
        }

        logger.total_citations += summary.total_citations;
        summary.rows = logger.aggregate();
        info!(
            processed = summary.queries_processed,
            rows = summary.rows_logged,
            empty = summary.empty_retrievals,
            failed = summary.failed_queries,
            load_failures = summary.load_failures.len(),
            "citation resolution finished"
        );
        Ok(summary)
    }

    fn open_document(&mut self, guid: &str) -> Result<BTreeMap<String, B::Index>, EvalError> {
        let entry = self
            .files
            .get(guid)
            .ok_or_else(|| EvalError::missing_data(format!("files_dict[{guid}]"), "no entry"))?;
        let mut handles = BTreeMap::new();
        for model in &entry.tfidf_models {
            let operation = format!("open {guid}/{}", model.method);
            let index = with_retry(&operation, self.options.max_attempts, || {
                self.backend.open(guid, model)
            })?;
            handles.insert(model.method.clone(), index);
        }
        debug!(guid, models = handles.len(), "opened retrieval models");
        Ok(handles)
    }

    fn resolve_one(
        &self,
        query: &Query,
        method: &TestingMethod,
        handles: &BTreeMap<String, B::Index>,
        summary: &mut PipelineSummary,
    ) -> Result<MetricSet, EvalError> {
        let Some(index) = handles.get(&method.name) else {
            warn!(guid = %query.file_guid, method = %method.name, "no retrieval model for method");
            summary.failed_queries += 1;
            return Ok(MetricSet::zero());
        };
        let default_weights;
        let weights = match self.overrides.lookup(&query.zone, &method.name) {
            Some(weights) => weights,
            None => {
                default_weights =
                    WeightVector::all_ones(method.runtime_parameters.iter().map(String::as_str));
                &default_weights
            }
        };

        let payload = query.search_payload();
        let operation = format!("run_query {}/{}", query.citation_id, method.name);
        let retrieved = with_retry(&operation, self.options.max_attempts, || {
            index.run_query(&payload, weights, &query.file_guid, self.options.max_results)
        });
        match retrieved {
            Ok(candidates) if candidates.is_empty() => {
                summary.empty_retrievals += 1;
                Ok(MetricSet::zero())
            }
            Ok(candidates) => Ok(record_outcome(
                query,
                candidates
                    .iter()
                    .take(self.options.max_results)
                    .map(|candidate| candidate.guid.as_str()),
            )),
            Err(err) if err.is_recoverable() => {
                warn!(citation = %query.citation_id, method = %method.name, error = %err, "query failed; logging zero row");
                summary.failed_queries += 1;
                Ok(MetricSet::zero())
            }
            Err(err) => Err(err),
        }
    }

    fn in_collection_references(&self, guid: &str) -> Option<u64> {
        if let Some(count) = self
            .files
            .get(guid)
            .and_then(|entry| entry.in_collection_references)
            .filter(|&count| count > 0)
        {
            return Some(count);
        }
        let store = self.store?;
        match with_retry(&format!("metadata {guid}"), self.options.max_attempts, || {
            store.metadata_by_guid(guid)
        }) {
            Ok(metadata) if metadata.num_in_collection_references > 0 => {
                Some(metadata.num_in_collection_references)
            }
            Ok(_) => None,
            Err(err) => {
                warn!(guid, error = %err, "document metadata unavailable");
                None
            }
        }
    }
}
