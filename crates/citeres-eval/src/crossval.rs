//! k-fold training and baseline comparison of tuned weights.

use crate::folds::k_fold;
use crate::optimizer::{CoordinateAscent, Initialization, OptimizationOutcome};
use crate::precomputed::{PrecomputedQuery, ensure_formula_fields, measure_precomputed_resolution};
use crate::score_logger::AggregateRow;
use citeres_core::error::EvalError;
use citeres_core::methods::TestingMethod;
use citeres_core::types::{Metric, WeightVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Knobs shared by every `(zone, method)` training job.
#[derive(Debug, Clone)]
pub struct TrainingSettings {
    pub metric: Metric,
    pub folds: usize,
    pub optimizer: CoordinateAscent,
    pub initialization: Initialization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonKind {
    Baseline,
    Weight,
}

impl ComparisonKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Weight => "weight",
        }
    }
}

/// One `(zone, fold, method, baseline|weight)` row of the improvements table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldComparison {
    pub zone: String,
    pub fold: usize,
    pub method: String,
    pub kind: ComparisonKind,
    pub score: f64,
    pub improvement: Option<f64>,
    pub pct_improvement: Option<f64>,
    /// Size of the whole zone, not of the fold.
    pub num_data_points: usize,
    pub test_size: usize,
    pub metrics: AggregateRow,
    pub weights: WeightVector,
}

/// Tuned weights of one fold plus the optimizer diagnostics behind them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedFold {
    pub zone: String,
    pub fold: usize,
    pub method: String,
    pub train_size: usize,
    pub outcome: OptimizationOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct CrossValidationRun {
    pub comparisons: Vec<FoldComparison>,
    pub trained: Vec<TrainedFold>,
}

impl CrossValidationRun {
    pub fn extend(&mut self, other: CrossValidationRun) {
        self.comparisons.extend(other.comparisons);
        self.trained.extend(other.trained);
    }

    /// `fold -> zone -> method -> weights`.
    pub fn weights_by_fold(&self) -> BTreeMap<usize, BTreeMap<String, BTreeMap<String, WeightVector>>> {
        let mut out: BTreeMap<usize, BTreeMap<String, BTreeMap<String, WeightVector>>> =
            BTreeMap::new();
        for trained in &self.trained {
            out.entry(trained.fold)
                .or_default()
                .entry(trained.zone.clone())
                .or_default()
                .insert(trained.method.clone(), trained.outcome.weights.clone());
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneImprovementSummary {
    pub zone: String,
    pub folds: usize,
    pub mean_pct_improvement: f64,
    /// Sample standard deviation; absent with fewer than two folds.
    pub std_pct_improvement: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldSummary {
    pub fold: usize,
    /// Mean improvement, each weighted by its fold's share of the zone.
    pub mean_weighted_improvement: f64,
    pub better: usize,
    pub total: usize,
    pub better_zones: Vec<String>,
}

/// Runs the optimizer on `train` for one testing method.
pub fn train_weights(
    train: &[&PrecomputedQuery],
    zone: &str,
    method: &TestingMethod,
    settings: &TrainingSettings,
) -> Result<OptimizationOutcome, EvalError> {
    if train.is_empty() {
        return Err(EvalError::empty_training_set(zone, &method.name));
    }
    ensure_formula_fields(train, &method.runtime_parameters)?;
    let initial = settings
        .initialization
        .initial_weights(&method.runtime_parameters);
    settings.optimizer.optimize(initial, |weights| {
        measure_precomputed_resolution(train, &method.name, weights, zone)
            .map(|scores| scores.value(settings.metric))
    })
}

/// Scores all-ones and `tuned` weights on `test`, returning the baseline row
/// followed by the tuned row.
pub fn compare_fold_scores(
    test: &[&PrecomputedQuery],
    zone: &str,
    fold: usize,
    method: &TestingMethod,
    tuned: &WeightVector,
    metric: Metric,
    num_data_points: usize,
) -> Result<[FoldComparison; 2], EvalError> {
    let baseline_weights = WeightVector::all_ones(method.runtime_parameters.iter().map(String::as_str));
    let baseline = measure_precomputed_resolution(test, &method.name, &baseline_weights, zone)?;
    let tuned_scores = measure_precomputed_resolution(test, &method.name, tuned, zone)?;

    let baseline_score = baseline.value(metric);
    let tuned_score = tuned_scores.value(metric);
    let improvement = tuned_score - baseline_score;
    let pct_improvement = if baseline_score != 0.0 {
        100.0 * improvement / baseline_score
    } else {
        0.0
    };

    Ok([
        FoldComparison {
            zone: zone.to_string(),
            fold,
            method: method.name.clone(),
            kind: ComparisonKind::Baseline,
            score: baseline_score,
            improvement: None,
            pct_improvement: None,
            num_data_points,
            test_size: test.len(),
            metrics: baseline.overall,
            weights: baseline_weights,
        },
        FoldComparison {
            zone: zone.to_string(),
            fold,
            method: method.name.clone(),
            kind: ComparisonKind::Weight,
            score: tuned_score,
            improvement: Some(improvement),
            pct_improvement: Some(pct_improvement),
            num_data_points,
            test_size: test.len(),
            metrics: tuned_scores.overall,
            weights: tuned.clone(),
        },
    ])
}

/// Trains on each fold's train split and compares against all-ones on its
/// test split.
pub fn cross_validate(
    data: &[PrecomputedQuery],
    zone: &str,
    method: &TestingMethod,
    settings: &TrainingSettings,
) -> Result<CrossValidationRun, EvalError> {
    let mut run = CrossValidationRun::default();
    for fold in k_fold(data, settings.folds)? {
        info!(
            zone,
            method = %method.name,
            fold = fold.index,
            train = fold.train.len(),
            total = data.len(),
            "training weights"
        );
        let outcome = train_weights(&fold.train, zone, method, settings)?;
        info!(
            zone,
            method = %method.name,
            fold = fold.index,
            score = outcome.score,
            initial = outcome.initial_score,
            passes = outcome.trajectory.len(),
            "weights found"
        );
        let comparisons = compare_fold_scores(
            &fold.test,
            zone,
            fold.index,
            method,
            &outcome.weights,
            settings.metric,
            data.len(),
        )?;
        run.comparisons.extend(comparisons);
        run.trained.push(TrainedFold {
            zone: zone.to_string(),
            fold: fold.index,
            method: method.name.clone(),
            train_size: fold.train.len(),
            outcome,
        });
    }
    Ok(run)
}

/// Mean and sample standard deviation of `pct_improvement` per zone,
/// highest mean first.
pub fn summarize_improvements(rows: &[FoldComparison]) -> Vec<ZoneImprovementSummary> {
    let mut by_zone: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for row in rows {
        if let Some(pct) = row.pct_improvement {
            by_zone.entry(row.zone.as_str()).or_default().push(pct);
        }
    }
    let mut summaries: Vec<ZoneImprovementSummary> = by_zone
        .into_iter()
        .map(|(zone, values)| {
            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let std = (values.len() >= 2).then(|| {
                let variance =
                    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
                variance.sqrt()
            });
            ZoneImprovementSummary {
                zone: zone.to_string(),
                folds: values.len(),
                mean_pct_improvement: mean,
                std_pct_improvement: std,
            }
        })
        .collect();
    summaries.sort_by(|a, b| {
        b.mean_pct_improvement
            .total_cmp(&a.mean_pct_improvement)
            .then_with(|| a.zone.cmp(&b.zone))
    });
    summaries
}

pub fn summarize_folds(rows: &[FoldComparison]) -> Vec<FoldSummary> {
    let mut by_fold: BTreeMap<usize, Vec<&FoldComparison>> = BTreeMap::new();
    for row in rows.iter().filter(|row| row.kind == ComparisonKind::Weight) {
        by_fold.entry(row.fold).or_default().push(row);
    }
    by_fold
        .into_iter()
        .map(|(fold, rows)| {
            let weighted: Vec<f64> = rows
                .iter()
                .map(|row| {
                    let share = row.test_size as f64 / row.num_data_points.max(1) as f64;
                    row.improvement.unwrap_or_default() * share
                })
                .collect();
            let mut better_zones: Vec<String> = rows
                .iter()
                .filter(|row| row.improvement.unwrap_or_default() > 0.0)
                .map(|row| row.zone.clone())
                .collect();
            better_zones.dedup();
            FoldSummary {
                fold,
                mean_weighted_improvement: weighted.iter().sum::<f64>()
                    / weighted.len().max(1) as f64,
                better: weighted.iter().filter(|&&value| value > 0.0).count(),
                total: weighted.len(),
                better_zones,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use citeres_core::methods::{MethodKind, MethodParameter};
    use citeres_core::types::{Candidate, Query};

    fn method() -> TestingMethod {
        TestingMethod {
            name: "az_1_ALL".to_string(),
            base_method: "az".to_string(),
            kind: MethodKind::AnnotatedBoost,
            parameter: MethodParameter::Int(1),
            ilc_parameter: None,
            index_filename: "az_1".to_string(),
            runtime_parameters: vec!["AIM".to_string(), "OWN".to_string()],
        }
    }

    /// Target always has the larger AIM contribution and the smaller OWN one.
    fn aim_favoring(id: usize) -> PrecomputedQuery {
        PrecomputedQuery {
            query: Query::new(format!("c{id}"), "doc", "window", "OWN", ["T"]),
            results: vec![
                Candidate::new("D", [("AIM", 0.5), ("OWN", 3.0)]),
                Candidate::new("T", [("AIM", 2.0), ("OWN", 1.0)]),
            ],
        }
    }

    fn settings() -> TrainingSettings {
        TrainingSettings {
            metric: Metric::Mrr,
            folds: 2,
            optimizer: CoordinateAscent::default(),
            initialization: Initialization::Ones,
        }
    }

    #[test]
    fn empty_training_set_is_fatal() {
        let err = train_weights(&[], "OWN", &method(), &settings()).expect_err("empty");
        assert!(matches!(err, EvalError::EmptyTrainingSet { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn runtime_fields_absent_from_the_zone_are_fatal() {
        let mut phantom = method();
        phantom.runtime_parameters.push("BAS".to_string());
        let data: Vec<PrecomputedQuery> = (0..2).map(aim_favoring).collect();
        let refs: Vec<&PrecomputedQuery> = data.iter().collect();
        let err = train_weights(&refs, "OWN", &phantom, &settings()).expect_err("BAS not stored");
        assert!(matches!(err, EvalError::InvalidWeightVector { ref field, .. } if field == "BAS"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn cross_validation_improves_over_baseline() {
        let data: Vec<PrecomputedQuery> = (0..4).map(aim_favoring).collect();
        let run = cross_validate(&data, "OWN", &method(), &settings()).unwrap();
        assert_eq!(run.comparisons.len(), 4);
        assert_eq!(run.trained.len(), 2);

        for pair in run.comparisons.chunks(2) {
            assert_eq!(pair[0].kind, ComparisonKind::Baseline);
            assert!((pair[0].score - 0.5).abs() < 1e-12);
            assert_eq!(pair[1].kind, ComparisonKind::Weight);
            assert!((pair[1].score - 1.0).abs() < 1e-12);
            assert_eq!(pair[1].pct_improvement, Some(100.0));
            assert_eq!(pair[1].num_data_points, 4);
        }

        let by_fold = run.weights_by_fold();
        assert_eq!(by_fold.len(), 2);
        assert!(by_fold[&0]["OWN"].contains_key("az_1_ALL"));
    }

    #[test]
    fn zero_baseline_reports_zero_percent() {
        let data = vec![PrecomputedQuery {
            query: Query::new("c1", "doc", "window", "OWN", ["missing"]),
            results: vec![Candidate::new("D", [("AIM", 1.0), ("OWN", 1.0)])],
        }];
        let refs: Vec<&PrecomputedQuery> = data.iter().collect();
        let tuned = WeightVector::from_pairs([("AIM", 3.0), ("OWN", 1.0)]);
        let [baseline, weight] =
            compare_fold_scores(&refs, "OWN", 0, &method(), &tuned, Metric::Mrr, 1).unwrap();
        assert_eq!(baseline.score, 0.0);
        assert_eq!(baseline.pct_improvement, None);
        assert_eq!(weight.pct_improvement, Some(0.0));
    }

    fn weight_row(zone: &str, fold: usize, pct: f64) -> FoldComparison {
        FoldComparison {
            zone: zone.to_string(),
            fold,
            method: "m".to_string(),
            kind: ComparisonKind::Weight,
            score: 0.0,
            improvement: Some(pct / 100.0),
            pct_improvement: Some(pct),
            num_data_points: 10,
            test_size: 5,
            metrics: AggregateRow {
                query_method: "ALL".to_string(),
                doc_method: "m".to_string(),
                zone: zone.to_string(),
                count: 5,
                avg_mrr: 0.0,
                avg_precision: 0.0,
                avg_ndcg: 0.0,
                precision_total: 0.0,
            },
            weights: WeightVector::all_ones(["AIM"]),
        }
    }

    #[test]
    fn improvement_summary_uses_sample_deviation() {
        let rows = vec![
            weight_row("OWN", 0, 10.0),
            weight_row("OWN", 1, 20.0),
            weight_row("AIM", 0, 50.0),
        ];
        let summary = summarize_improvements(&rows);
        assert_eq!(summary[0].zone, "AIM");
        assert_eq!(summary[0].std_pct_improvement, None);
        assert_eq!(summary[1].zone, "OWN");
        assert!((summary[1].mean_pct_improvement - 15.0).abs() < 1e-12);
        let std = summary[1].std_pct_improvement.unwrap();
        assert!((std - 50.0_f64.sqrt()).abs() < 1e-9);

        let folds = summarize_folds(&rows);
        assert_eq!(folds.len(), 2);
        assert_eq!(folds[0].total, 2);
        assert_eq!(folds[0].better, 2);
        assert_eq!(folds[0].better_zones, vec!["OWN".to_string(), "AIM".to_string()]);
    }
}
