//! Per-query ranking metrics and streaming per-group aggregation.
//!
//! Every logged [`ResultRecord`] contributes to the running sums of its
//! `(query_method, doc_method, zone)` group; means are only computed when
//! [`ScoreLogger::aggregate`] is called, so memory stays proportional to the
//! number of groups, not the number of queries. An optional CSV sink receives
//! one line per record and is flushed after each line so partial results
//! survive an aborted run.

use crate::report::csv_line;
use citeres_core::constants::RANDOM_CONTROL_METHOD;
use citeres_core::error::EvalError;
use citeres_core::types::{Metric, Query};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Ranking metrics for one query under one method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    /// 1-based position of the first correct candidate, 0 if none was retrieved.
    pub rank: usize,
    pub mrr: f64,
    pub precision: f64,
    pub ndcg: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_result: Option<String>,
}

impl MetricSet {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn from_rank(rank: usize, first_result: Option<String>) -> Self {
        if rank == 0 {
            return Self {
                first_result,
                ..Self::default()
            };
        }
        Self {
            rank,
            mrr: 1.0 / rank as f64,
            precision: if rank == 1 { 1.0 } else { 0.0 },
            ndcg: 1.0 / (rank as f64 + 1.0).log2(),
            first_result,
        }
    }

    /// Expected metrics when `n` candidates are ranked uniformly at random.
    ///
    /// This is an expectation rather than an observed outcome: `rank` stays 0
    /// while `mrr` and `precision` are positive.
    pub fn random_chance(n: u64) -> Self {
        if n == 0 {
            return Self::zero();
        }
        let count = n as f64;
        let mrr = (1..=n).map(|i| (1.0 / count) * (1.0 / i as f64)).sum();
        Self {
            rank: 0,
            mrr,
            precision: 1.0 / count,
            ndcg: 0.0,
            first_result: None,
        }
    }
}

/// Scores a ranked list of guids against the query's correct targets.
/// An empty list yields the zero metric set.
pub fn record_outcome<'a>(
    query: &Query,
    ranked_guids: impl IntoIterator<Item = &'a str>,
) -> MetricSet {
    let mut first_result = None;
    for (idx, guid) in ranked_guids.into_iter().enumerate() {
        if idx == 0 {
            first_result = Some(guid.to_string());
        }
        if query.is_correct(guid) {
            return MetricSet::from_rank(idx + 1, first_result);
        }
    }
    MetricSet::from_rank(0, first_result)
}

/// One logged row: the query identity, the method it ran under, and its metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub file_guid: String,
    pub citation_id: String,
    pub doc_position: u64,
    pub query_method: String,
    pub doc_method: String,
    pub zone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cfc: Option<String>,
    pub match_guid: String,
    pub metrics: MetricSet,
}

impl ResultRecord {
    pub fn new(query: &Query, doc_method: impl Into<String>, metrics: MetricSet) -> Self {
        Self {
            file_guid: query.file_guid.clone(),
            citation_id: query.citation_id.clone(),
            doc_position: query.doc_position,
            query_method: query.query_method.clone(),
            doc_method: doc_method.into(),
            zone: query.zone.clone(),
            cfc: query.cfc.clone(),
            match_guid: query
                .correct_targets
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(";"),
            metrics,
        }
    }

    pub fn random_control(query: &Query, candidate_count: u64) -> Self {
        Self::new(
            query,
            RANDOM_CONTROL_METHOD,
            MetricSet::random_chance(candidate_count),
        )
    }

    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            query_method: self.query_method.clone(),
            doc_method: self.doc_method.clone(),
            zone: self.zone.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub query_method: String,
    pub doc_method: String,
    pub zone: String,
}

#[derive(Debug, Clone, Copy, Default)]
struct GroupSums {
    count: usize,
    mrr: f64,
    precision: f64,
    ndcg: f64,
}

impl GroupSums {
    fn add(&mut self, metrics: &MetricSet) {
        self.count += 1;
        self.mrr += metrics.mrr;
        self.precision += metrics.precision;
        self.ndcg += metrics.ndcg;
    }

    fn into_row(self, key: GroupKey) -> AggregateRow {
        let total = self.count.max(1) as f64;
        AggregateRow {
            query_method: key.query_method,
            doc_method: key.doc_method,
            zone: key.zone,
            count: self.count,
            avg_mrr: self.mrr / total,
            avg_precision: self.precision / total,
            avg_ndcg: self.ndcg / total,
            precision_total: self.precision,
        }
    }
}

/// Means of one group's metrics; `precision_total` is the sum, not the mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub query_method: String,
    pub doc_method: String,
    pub zone: String,
    pub count: usize,
    pub avg_mrr: f64,
    pub avg_precision: f64,
    pub avg_ndcg: f64,
    pub precision_total: f64,
}

impl AggregateRow {
    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Mrr => self.avg_mrr,
            Metric::Precision => self.avg_precision,
            Metric::Ndcg => self.avg_ndcg,
            Metric::PrecisionTotal => self.precision_total,
        }
    }
}

pub const RESULT_STREAM_HEADER: [&str; 13] = [
    "file_guid",
    "citation_id",
    "doc_position",
    "query_method",
    "doc_method",
    "az",
    "cfc",
    "match_guid",
    "mrr_score",
    "precision_score",
    "ndcg_score",
    "rank",
    "first_result",
];

struct ResultSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl ResultSink {
    fn create(path: &Path) -> Result<Self, EvalError> {
        let file = File::create(path).map_err(|e| EvalError::io(path.display().to_string(), e))?;
        let mut sink = Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        };
        let header: Vec<String> = RESULT_STREAM_HEADER.iter().map(ToString::to_string).collect();
        sink.write_line(&csv_line(&header))?;
        Ok(sink)
    }

    fn write_record(&mut self, record: &ResultRecord) -> Result<(), EvalError> {
        let fields = vec![
            record.file_guid.clone(),
            record.citation_id.clone(),
            record.doc_position.to_string(),
            record.query_method.clone(),
            record.doc_method.clone(),
            record.zone.clone(),
            record.cfc.clone().unwrap_or_default(),
            record.match_guid.clone(),
            format!("{:.6}", record.metrics.mrr),
            format!("{:.6}", record.metrics.precision),
            format!("{:.6}", record.metrics.ndcg),
            record.metrics.rank.to_string(),
            record.metrics.first_result.clone().unwrap_or_default(),
        ];
        self.write_line(&csv_line(&fields))
    }

    fn write_line(&mut self, line: &str) -> Result<(), EvalError> {
        writeln!(self.writer, "{line}")
            .and_then(|()| self.writer.flush())
            .map_err(|e| EvalError::io(self.path.display().to_string(), e))
    }
}

/// Accumulates [`ResultRecord`]s into per-group running sums.
#[derive(Default)]
pub struct ScoreLogger {
    groups: BTreeMap<GroupKey, GroupSums>,
    overall: GroupSums,
    sink: Option<ResultSink>,
    logged: usize,
    /// Citations the run could have resolved, tallied from `files_dict.json`.
    pub total_citations: u64,
}

impl ScoreLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A logger that also streams every record to a CSV file at `path`.
    pub fn with_result_stream(path: &Path) -> Result<Self, EvalError> {
        Ok(Self {
            sink: Some(ResultSink::create(path)?),
            ..Self::default()
        })
    }

    pub fn log(&mut self, record: &ResultRecord) -> Result<(), EvalError> {
        if let Some(sink) = self.sink.as_mut() {
            sink.write_record(record)?;
        }
        self.groups
            .entry(record.group_key())
            .or_default()
            .add(&record.metrics);
        if record.doc_method != RANDOM_CONTROL_METHOD {
            self.overall.add(&record.metrics);
        }
        self.logged += 1;
        Ok(())
    }

    pub fn logged(&self) -> usize {
        self.logged
    }

    /// Aggregate rows ordered by `(query_method, doc_method, zone)`.
    pub fn aggregate(&self) -> Vec<AggregateRow> {
        self.groups
            .iter()
            .map(|(key, sums)| sums.into_row(key.clone()))
            .collect()
    }

    /// One row over every non-control record regardless of group.
    pub fn overall(&self, doc_method: &str, zone: &str) -> AggregateRow {
        self.overall.into_row(GroupKey {
            query_method: "ALL".to_string(),
            doc_method: doc_method.to_string(),
            zone: zone.to_string(),
        })
    }
}
