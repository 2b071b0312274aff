//! Loading experiment inputs and reweighting precomputed retrievals.

use crate::formula::rank;
use crate::score_logger::{AggregateRow, ResultRecord, ScoreLogger, record_outcome};
use citeres_core::error::EvalError;
use citeres_core::types::{Candidate, FilesDict, Metric, Query, WeightVector};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

/// A query together with the candidates retrieved for it, each carrying
/// its stored per-field score breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecomputedQuery {
    #[serde(flatten)]
    pub query: Query,
    #[serde(default)]
    pub results: Vec<Candidate>,
}

/// Aggregates from one reweighting run over a query set.
#[derive(Debug, Clone)]
pub struct ResolutionScores {
    pub rows: Vec<AggregateRow>,
    /// All queries of the run in one row; this is what optimisation targets.
    pub overall: AggregateRow,
}

impl ResolutionScores {
    pub fn value(&self, metric: Metric) -> f64 {
        self.overall.value(metric)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, EvalError> {
    let path_label = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            EvalError::missing_data(path_label.clone(), "file not found")
        } else {
            EvalError::io(path_label.clone(), e)
        }
    })?;
    serde_json::from_str(&raw).map_err(|e| EvalError::schema(path_label, e))
}

pub fn load_files_dict(path: &Path) -> Result<FilesDict, EvalError> {
    let files: FilesDict = read_json(path)?;
    debug!(path = %path.display(), documents = files.len(), "loaded files dict");
    Ok(files)
}

pub fn load_precomputed_queries(path: &Path) -> Result<Vec<Query>, EvalError> {
    let mut queries: Vec<Query> = read_json(path)?;
    for query in &mut queries {
        query.normalize_targets();
        query
            .validate()
            .map_err(|reason| EvalError::schema(path.display().to_string(), reason))?;
    }
    info!(path = %path.display(), queries = queries.len(), "loaded precomputed queries");
    Ok(queries)
}

/// Loads `prr_<classification>_<zone>.json`. Queries without a zone take
/// `zone`; every candidate must share the field set of the first one.
pub fn load_zone(path: &Path, zone: &str) -> Result<Vec<PrecomputedQuery>, EvalError> {
    let path_label = path.display().to_string();
    let mut entries: Vec<PrecomputedQuery> = read_json(path)?;
    let mut expected: Option<BTreeSet<String>> = None;

    for entry in &mut entries {
        if entry.query.zone.is_empty() {
            entry.query.zone = zone.to_string();
        }
        entry.query.normalize_targets();
        entry
            .query
            .validate()
            .map_err(|reason| EvalError::schema(path_label.clone(), reason))?;

        for candidate in &entry.results {
            candidate
                .validate()
                .map_err(|reason| EvalError::schema(path_label.clone(), reason))?;
            let found: BTreeSet<String> = candidate.contributions.keys().cloned().collect();
            match &expected {
                None => expected = Some(found),
                Some(fields) if *fields != found => {
                    return Err(EvalError::InconsistentFormulaFields {
                        guid: candidate.guid.clone(),
                        expected: join_fields(fields),
                        found: join_fields(&found),
                    });
                }
                Some(_) => {}
            }
        }
    }

    info!(path = %path_label, zone, queries = entries.len(), "loaded precomputed retrievals");
    Ok(entries)
}

fn join_fields(fields: &BTreeSet<String>) -> String {
    fields.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

/// Checks once per `(zone, method)` that `fields` are exactly the formula
/// fields of the stored candidates. `load_zone` has already made those
/// fields uniform, so the first candidate speaks for all of them.
pub fn ensure_formula_fields(
    queries: &[&PrecomputedQuery],
    fields: &[String],
) -> Result<(), EvalError> {
    let Some(candidate) = queries.iter().flat_map(|entry| entry.results.iter()).next() else {
        return Ok(());
    };
    let available = fields.join(",");
    if let Some(missing) = candidate
        .contributions
        .keys()
        .find(|field| !fields.contains(*field))
    {
        return Err(EvalError::InvalidWeightVector {
            field: missing.clone(),
            available,
        });
    }
    if let Some(extra) = fields
        .iter()
        .find(|field| !candidate.contributions.contains_key(field.as_str()))
    {
        return Err(EvalError::InvalidWeightVector {
            field: extra.clone(),
            available,
        });
    }
    Ok(())
}

/// Re-ranks every query's stored candidates under `weights` and aggregates
/// the resulting metrics under `doc_method`.
pub fn measure_precomputed_resolution(
    queries: &[&PrecomputedQuery],
    doc_method: &str,
    weights: &WeightVector,
    zone: &str,
) -> Result<ResolutionScores, EvalError> {
    let mut logger = ScoreLogger::new();
    for entry in queries {
        let ranked = rank(&entry.results, weights)?;
        let metrics = record_outcome(&entry.query, ranked.guids());
        logger.log(&ResultRecord::new(&entry.query, doc_method, metrics))?;
    }
    Ok(ResolutionScores {
        rows: logger.aggregate(),
        overall: logger.overall(doc_method, zone),
    })
}
