use super::{ensure_exp_dir, load_zone_or_skip, selected_zones, trainable_methods};
use anyhow::{Context, Result};
use citeres_core::config::Config;
use citeres_core::methods::TestingMethod;
use citeres_eval::crossval::{
    CrossValidationRun, TrainingSettings, cross_validate, summarize_folds, summarize_improvements,
};
use citeres_eval::optimizer::{CoordinateAscent, Initialization};
use citeres_eval::precomputed::PrecomputedQuery;
use citeres_eval::report::{render_improvement_summary, render_improvements_csv, write_text};
use rayon::prelude::*;
use tracing::{info, warn};

pub fn run(config: &Config, zones: &[String]) -> Result<()> {
    let methods = trainable_methods(config)?;
    let settings = TrainingSettings {
        metric: config.experiment.metric,
        folds: config.experiment.cross_validation_folds,
        optimizer: CoordinateAscent::from_config(&config.experiment),
        initialization: Initialization::from_config(&config.experiment),
    };

    let mut zone_data: Vec<(String, Vec<PrecomputedQuery>)> = Vec::new();
    for zone in selected_zones(config, zones) {
        let Some(data) = load_zone_or_skip(config, zone)? else {
            continue;
        };
        if data.len() < settings.folds {
            warn!(
                zone = %zone,
                queries = data.len(),
                folds = settings.folds,
                "fewer queries than folds; skipping zone"
            );
            continue;
        }
        zone_data.push((zone.clone(), data));
    }
    if zone_data.is_empty() {
        anyhow::bail!("no zone has enough precomputed queries to train on");
    }

    let jobs: Vec<(&str, &[PrecomputedQuery], &TestingMethod)> = zone_data
        .iter()
        .flat_map(|(zone, data)| {
            methods
                .iter()
                .map(move |method| (zone.as_str(), data.as_slice(), method))
        })
        .collect();
    info!(
        jobs = jobs.len(),
        folds = settings.folds,
        metric = %settings.metric,
        "training weights"
    );

    let outcomes: Vec<_> = jobs
        .par_iter()
        .map(|(zone, data, method)| cross_validate(data, zone, method, &settings))
        .collect();

    let mut run = CrossValidationRun::default();
    for ((zone, _, method), outcome) in jobs.iter().zip(outcomes) {
        let outcome =
            outcome.with_context(|| format!("training failed for {zone}/{}", method.name))?;
        run.extend(outcome);
    }

    ensure_exp_dir(config)?;
    let improvements_path = config.improvements_path();
    write_text(&improvements_path, &render_improvements_csv(&run.comparisons))?;
    println!("improvements: {}", improvements_path.display());

    let weights_path = config.weights_json_path();
    let weights_json = serde_json::to_string_pretty(&run.weights_by_fold())?;
    write_text(&weights_path, &weights_json)?;
    println!("weights: {}", weights_path.display());

    let zone_summary = summarize_improvements(&run.comparisons);
    let fold_summary = summarize_folds(&run.comparisons);
    println!(
        "{}",
        render_improvement_summary(
            &config.experiment.name,
            settings.metric,
            &zone_summary,
            &fold_summary
        )
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixture::experiment;
    use citeres_core::types::WeightVector;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn training_writes_improvements_and_weights_per_fold() {
        let temp = tempdir().unwrap();
        let config = experiment(temp.path());

        run(&config, &[]).unwrap();

        let improvements = std::fs::read_to_string(config.improvements_path()).unwrap();
        // header plus baseline and weight rows for 2 folds x 2 methods
        assert_eq!(improvements.lines().count(), 9);
        assert!(improvements.contains("az_1_ALL"));
        assert!(improvements.contains("az_2_ALL"));

        let raw = std::fs::read_to_string(config.weights_json_path()).unwrap();
        let by_fold: BTreeMap<usize, BTreeMap<String, BTreeMap<String, WeightVector>>> =
            serde_json::from_str(&raw).unwrap();
        assert_eq!(by_fold.len(), 2);
        for zones in by_fold.values() {
            assert_eq!(zones.keys().collect::<Vec<_>>(), ["OWN"]);
            let tuned = &zones["OWN"]["az_1_ALL"];
            assert!(tuned.get("AIM").unwrap() * 1.5 > tuned.get("OWN").unwrap() * 2.0);
            assert!(zones["OWN"].contains_key("az_2_ALL"));
        }
    }

    #[test]
    fn zones_smaller_than_the_fold_count_are_not_trained() {
        let temp = tempdir().unwrap();
        let mut config = experiment(temp.path());
        config.experiment.cross_validation_folds = 5;

        let err = run(&config, &[]).expect_err("four queries, five folds");
        assert!(err.to_string().contains("enough precomputed queries"));
        assert!(!config.weights_json_path().exists());
    }
}
