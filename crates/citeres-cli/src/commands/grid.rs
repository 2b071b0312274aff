use super::{ensure_exp_dir, load_zone_or_skip, selected_zones, trainable_methods};
use anyhow::{Context, Result};
use citeres_core::config::Config;
use citeres_eval::folds::half_split;
use citeres_eval::grid::WeightGrid;
use citeres_eval::grid_search::{best_row, exhaustive_search};
use citeres_eval::precomputed::PrecomputedQuery;
use citeres_eval::report::GridWriter;
use tracing::{info, warn};

pub fn run(config: &Config, zones: &[String]) -> Result<()> {
    let methods = trainable_methods(config)?;
    let fields = methods[0].runtime_parameters.clone();
    // every method of a run shares the zone file, so the weight columns must agree
    if let Some(other) = methods.iter().find(|method| method.runtime_parameters != fields) {
        anyhow::bail!(
            "doc method {} weights fields [{}] but {} weights [{}]; run them in separate experiments",
            methods[0].name,
            fields.join(","),
            other.name,
            other.runtime_parameters.join(",")
        );
    }
    ensure_exp_dir(config)?;
    let metric = config.experiment.metric;

    for zone in selected_zones(config, zones) {
        let Some(data) = load_zone_or_skip(config, zone)? else {
            continue;
        };
        let selected: &[PrecomputedQuery] = match config.grid.split_set {
            Some(split) => half_split(&data, split)?,
            None => &data,
        };
        if selected.is_empty() {
            warn!(zone = %zone, "no precomputed queries; skipping zone");
            continue;
        }
        let refs: Vec<&PrecomputedQuery> = selected.iter().collect();

        let output = config.grid_output_path(zone);
        let mut writer = GridWriter::create(&output, &fields)?;
        for method in &methods {
            let grid = WeightGrid::new(fields.clone(), &config.experiment.weight_values)?;
            let evaluated = exhaustive_search(
                &refs,
                zone,
                method,
                &grid,
                config.grid.max_combinations,
                &mut writer,
            )
            .with_context(|| format!("grid search failed for {zone}/{}", method.name))?;
            info!(zone = %zone, method = %method.name, evaluated, "grid search finished");
        }

        let rows = writer.finish(metric)?;
        println!("grid: {} ({} rows)", output.display(), rows.len());
        if let Some(best) = best_row(&rows, metric) {
            let weights = best
                .weights
                .iter()
                .map(|(field, value)| format!("{field}={value}"))
                .collect::<Vec<_>>()
                .join(" ");
            println!(
                "  best {}={:.6} method={} query_method={} {weights}",
                metric,
                best.scores.value(metric),
                best.scores.doc_method,
                best.scores.query_method
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixture::{boost, experiment, mrr_for};
    use tempfile::tempdir;

    #[test]
    fn grid_writes_every_combination_best_first() {
        let temp = tempdir().unwrap();
        let config = experiment(temp.path());

        run(&config, &[]).unwrap();

        let output = config.grid_output_path("OWN");
        assert_eq!(
            output.file_name().and_then(|n| n.to_str()),
            Some("weights_OWN_1-3.csv")
        );
        let written = std::fs::read_to_string(&output).unwrap();
        // two methods x four combinations, one query method
        assert_eq!(written.lines().count(), 9);
        assert!(written.lines().nth(1).unwrap().contains(",OWN,3,1,1.000000"));
        assert!((mrr_for(&written, "az_2_ALL") - 1.0).abs() < 1e-12);
        assert!(written.lines().last().unwrap().contains(",0.500000"));
        assert!(!config.grid_output_path("AIM").exists());
    }

    #[test]
    fn methods_weighting_different_fields_are_refused() {
        let temp = tempdir().unwrap();
        let mut config = experiment(temp.path());
        config.doc_methods.insert("bas".to_string(), boost(&["AIM", "BAS"]));

        let err = run(&config, &[]).expect_err("fields differ");
        assert!(err.to_string().contains("separate experiments"), "{err:#}");
        assert!(!config.grid_output_path("OWN").exists());
    }

    #[test]
    fn fields_missing_from_the_zone_file_are_refused() {
        let temp = tempdir().unwrap();
        let mut config = experiment(temp.path());
        config.doc_methods.insert("az".to_string(), boost(&["AIM", "OWN", "BAS"]));

        let err = run(&config, &["OWN".to_string()]).expect_err("BAS is not stored");
        let message = format!("{err:#}");
        assert!(message.contains("grid search failed for OWN/az_1_ALL"), "{message}");
        assert!(message.contains("BAS"), "{message}");
    }
}
