use crate::crossval::{FoldComparison, FoldSummary, ZoneImprovementSummary};
use crate::score_logger::AggregateRow;
use citeres_core::config::format_weight_value;
use citeres_core::error::EvalError;
use citeres_core::types::{Metric, WeightVector};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const METRIC_COLUMNS: [&str; 4] = ["avg_mrr", "avg_precision", "avg_ndcg", "precision_total"];

/// Quotes a CSV field when it contains a separator, quote or line break.
pub fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn csv_line(fields: &[String]) -> String {
    fields
        .iter()
        .map(|field| csv_field(field))
        .collect::<Vec<_>>()
        .join(",")
}

fn metric_cells(row: &AggregateRow) -> Vec<String> {
    vec![
        format!("{:.6}", row.avg_mrr),
        format!("{:.6}", row.avg_precision),
        format!("{:.6}", row.avg_ndcg),
        format!("{:.6}", row.precision_total),
    ]
}

pub fn write_text(path: &Path, content: &str) -> Result<(), EvalError> {
    std::fs::write(path, content).map_err(|e| EvalError::io(path.display().to_string(), e))
}

pub fn render_aggregates_csv(rows: &[AggregateRow]) -> String {
    let mut header = vec![
        "query_method".to_string(),
        "doc_method".to_string(),
        "zone".to_string(),
        "count".to_string(),
    ];
    header.extend(METRIC_COLUMNS.iter().map(ToString::to_string));
    let mut lines = vec![csv_line(&header)];
    for row in rows {
        let mut cells = vec![
            row.query_method.clone(),
            row.doc_method.clone(),
            row.zone.clone(),
            row.count.to_string(),
        ];
        cells.extend(metric_cells(row));
        lines.push(csv_line(&cells));
    }
    lines.join("\n") + "\n"
}

/// One line of a weight-grid CSV: a combination and the aggregate it scored.
#[derive(Debug, Clone)]
pub struct GridRow {
    pub weights: WeightVector,
    pub scores: AggregateRow,
}

impl GridRow {
    fn cells(&self) -> Vec<String> {
        let mut cells = vec![
            self.scores.query_method.clone(),
            self.scores.doc_method.clone(),
            self.scores.zone.clone(),
        ];
        cells.extend(self.weights.iter().map(|(_, value)| format_weight_value(value)));
        cells.extend(metric_cells(&self.scores));
        cells
    }
}

fn grid_header(fields: &[String]) -> Vec<String> {
    let mut header = vec![
        "query_method".to_string(),
        "doc_method".to_string(),
        "zone".to_string(),
    ];
    header.extend(fields.iter().cloned());
    header.extend(METRIC_COLUMNS.iter().map(ToString::to_string));
    header
}

/// Streams grid rows to disk as they are produced, then rewrites the file
/// sorted by the chosen metric once the run completes.
pub struct GridWriter {
    path: PathBuf,
    fields: Vec<String>,
    writer: BufWriter<File>,
    rows: Vec<GridRow>,
}

impl GridWriter {
    pub fn create(path: &Path, fields: &[String]) -> Result<Self, EvalError> {
        let file = File::create(path).map_err(|e| EvalError::io(path.display().to_string(), e))?;
        let mut writer = Self {
            path: path.to_path_buf(),
            fields: fields.to_vec(),
            writer: BufWriter::new(file),
            rows: Vec::new(),
        };
        let header = csv_line(&grid_header(fields));
        writer.write_line(&header)?;
        Ok(writer)
    }

    pub fn append(&mut self, row: GridRow) -> Result<(), EvalError> {
        let line = csv_line(&row.cells());
        self.write_line(&line)?;
        self.rows.push(row);
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> Result<(), EvalError> {
        writeln!(self.writer, "{line}")
            .and_then(|()| self.writer.flush())
            .map_err(|e| EvalError::io(self.path.display().to_string(), e))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rewrites the file best-first by `metric` and returns the sorted rows.
    ///
    /// The sorted copy is staged next to the stream and renamed over it, so
    /// the streamed rows survive a failed rewrite.
    pub fn finish(self, metric: Metric) -> Result<Vec<GridRow>, EvalError> {
        let Self {
            path,
            fields,
            writer,
            mut rows,
        } = self;
        writer
            .into_inner()
            .map_err(|e| EvalError::io(path.display().to_string(), e.into_error()))?;
        // Stable: equal scores keep enumeration order.
        rows.sort_by(|a, b| b.scores.value(metric).total_cmp(&a.scores.value(metric)));
        let mut lines = vec![csv_line(&grid_header(&fields))];
        lines.extend(rows.iter().map(|row| csv_line(&row.cells())));

        let staged = staged_path(&path);
        write_text(&staged, &(lines.join("\n") + "\n"))?;
        if let Err(err) = std::fs::rename(&staged, &path) {
            let _ = std::fs::remove_file(&staged);
            return Err(EvalError::io(path.display().to_string(), err));
        }
        Ok(rows)
    }
}

fn staged_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".sorting");
    path.with_file_name(name)
}

/// One row per `(zone, fold, method, baseline|weight)`. Weight columns are the
/// union of all rows' fields in first-seen order.
pub fn render_improvements_csv(rows: &[FoldComparison]) -> String {
    let mut weight_fields: Vec<String> = Vec::new();
    for row in rows {
        for field in row.weights.fields() {
            if !weight_fields.iter().any(|known| known == field) {
                weight_fields.push(field.to_string());
            }
        }
    }

    let mut header: Vec<String> = [
        "zone_type",
        "fold",
        "method",
        "type",
        "score",
        "improvement",
        "pct_improvement",
        "num_data_points",
    ]
    .iter()
    .map(ToString::to_string)
    .collect();
    header.extend(METRIC_COLUMNS.iter().map(ToString::to_string));
    header.extend(weight_fields.iter().cloned());

    let mut lines = vec![csv_line(&header)];
    for row in rows {
        let mut cells = vec![
            row.zone.clone(),
            row.fold.to_string(),
            row.method.clone(),
            row.kind.as_str().to_string(),
            format!("{:.6}", row.score),
            row.improvement.map(|v| format!("{v:.6}")).unwrap_or_default(),
            row.pct_improvement
                .map(|v| format!("{v:.4}"))
                .unwrap_or_default(),
            row.num_data_points.to_string(),
        ];
        cells.extend(metric_cells(&row.metrics));
        cells.extend(weight_fields.iter().map(|field| {
            row.weights
                .get(field)
                .map(format_weight_value)
                .unwrap_or_default()
        }));
        lines.push(csv_line(&cells));
    }
    lines.join("\n") + "\n"
}

pub fn render_improvement_summary(
    experiment: &str,
    metric: Metric,
    zones: &[ZoneImprovementSummary],
    folds: &[FoldSummary],
) -> String {
    let mut output = String::new();
    output.push_str("Weight Training Summary\n");
    output.push_str("=======================\n");
    output.push_str(&format!("experiment={experiment} metric={metric}\n"));
    for fold in folds {
        output.push_str(&format!(
            "fold={} avg_improvement={:.6} better={}/{} better_zones=[{}]\n",
            fold.fold,
            fold.mean_weighted_improvement,
            fold.better,
            fold.total,
            fold.better_zones.join(",")
        ));
    }
    output.push_str("avg % improvement per zone:\n");
    for zone in zones {
        let std = zone
            .std_pct_improvement
            .map(|v| format!("{v:.2}"))
            .unwrap_or_else(|| "n/a".to_string());
        output.push_str(&format!(
            "  {:<6} mean={:>8.2} std={:>8} folds={}\n",
            zone.zone, zone.mean_pct_improvement, std, zone.folds
        ));
    }
    output
}
