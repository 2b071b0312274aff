use crate::grid::WeightGrid;
use crate::precomputed::{PrecomputedQuery, ensure_formula_fields, measure_precomputed_resolution};
use crate::report::{GridRow, GridWriter};
use citeres_core::error::EvalError;
use citeres_core::methods::TestingMethod;
use citeres_core::types::Metric;
use tracing::{debug, info};

/// Scores every weight combination of `grid` for one testing method, streaming
/// one row per `(combination, query_method)` group to `writer`.
///
/// Refuses spaces larger than `max_combinations`.
pub fn exhaustive_search(
    data: &[&PrecomputedQuery],
    zone: &str,
    method: &TestingMethod,
    grid: &WeightGrid,
    max_combinations: u64,
    writer: &mut GridWriter,
) -> Result<usize, EvalError> {
    let total = grid.total_combinations();
    if total > max_combinations {
        return Err(EvalError::invalid_input(format!(
            "weight grid for {zone}/{} has {total} combinations, above the limit of {max_combinations}",
            method.name
        )));
    }
    ensure_formula_fields(data, &method.runtime_parameters)?;
    info!(zone, method = %method.name, combinations = total, queries = data.len(), "grid search");

    let mut evaluated = 0usize;
    for weights in grid.combinations() {
        let scores = measure_precomputed_resolution(data, &method.name, &weights, zone)?;
        for row in scores.rows {
            writer.append(GridRow {
                weights: weights.clone(),
                scores: row,
            })?;
        }
        evaluated += 1;
        if evaluated % 1000 == 0 {
            debug!(zone, evaluated, total, "grid progress");
        }
    }
    Ok(evaluated)
}

/// Best-scoring row of a finished grid, if any.
pub fn best_row(rows: &[GridRow], metric: Metric) -> Option<&GridRow> {
    rows.iter()
        .max_by(|a, b| a.scores.value(metric).total_cmp(&b.scores.value(metric)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use citeres_core::methods::{MethodKind, MethodParameter};
    use citeres_core::types::{Candidate, Query};
    use tempfile::tempdir;

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

    fn data() -> Vec<PrecomputedQuery> {
        vec![PrecomputedQuery {
            query: Query::new("c1", "d1", "window", "OWN", ["T"]),
            results: vec![
                Candidate::new("D", [("AIM", 0.5), ("OWN", 2.0)]),
                Candidate::new("T", [("AIM", 2.0), ("OWN", 1.0)]),
            ],
        }]
    }

    #[test]
    fn every_combination_is_scored_and_sorted() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("weights_OWN_1-3-5.csv");
        let method = method();
        let grid = WeightGrid::new(method.runtime_parameters.clone(), &[1.0, 3.0, 5.0]).unwrap();
        let mut writer = GridWriter::create(&path, &method.runtime_parameters).unwrap();
        let entries = data();
        let refs: Vec<&PrecomputedQuery> = entries.iter().collect();

        let evaluated =
            exhaustive_search(&refs, "OWN", &method, &grid, 100, &mut writer).unwrap();
        assert_eq!(evaluated, 9);
        assert_eq!(writer.len(), 9);

        let rows = writer.finish(Metric::Mrr).unwrap();
        let best = best_row(&rows, Metric::Mrr).unwrap();
        assert!((best.scores.avg_mrr - 1.0).abs() < 1e-12);
        assert!((rows[0].scores.avg_mrr - 1.0).abs() < 1e-12);
        assert!((rows[8].scores.avg_mrr - 0.5).abs() < 1e-12);
    }

    #[test]
    fn grid_fields_must_match_the_stored_formula() {
        let temp = tempdir().unwrap();
        let mut method = method();
        method.runtime_parameters = vec!["AIM".to_string(), "OWN".to_string(), "BAS".to_string()];
        let grid = WeightGrid::new(method.runtime_parameters.clone(), &[1.0, 3.0]).unwrap();
        let mut writer =
            GridWriter::create(&temp.path().join("w.csv"), &method.runtime_parameters).unwrap();
        let entries = data();
        let refs: Vec<&PrecomputedQuery> = entries.iter().collect();
        let err = exhaustive_search(&refs, "OWN", &method, &grid, 100, &mut writer)
            .expect_err("BAS is not a formula field");
        assert!(matches!(err, EvalError::InvalidWeightVector { ref field, .. } if field == "BAS"));
        assert_eq!(writer.len(), 0);
    }

    #[test]
    fn oversized_grids_are_refused() {
        let temp = tempdir().unwrap();
        let method = method();
        let grid = WeightGrid::new(method.runtime_parameters.clone(), &[1.0, 3.0, 5.0]).unwrap();
        let mut writer =
            GridWriter::create(&temp.path().join("w.csv"), &method.runtime_parameters).unwrap();
        let err = exhaustive_search(&[], "OWN", &method, &grid, 8, &mut writer)
            .expect_err("9 > 8");
        assert!(matches!(err, EvalError::InvalidInput(_)));
    }
}
