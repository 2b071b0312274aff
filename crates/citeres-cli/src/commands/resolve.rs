use super::ensure_exp_dir;
use anyhow::{Context, Result};
use citeres_core::config::{Config, zones_for_classification};
use citeres_core::types::WeightVector;
use citeres_eval::collaborators::LogProgress;
use citeres_eval::pipeline::{Pipeline, PipelineOptions, WeightOverrides};
use citeres_eval::precomputed::{load_files_dict, load_precomputed_queries, load_zone};
use citeres_eval::replay::{FilesDictStore, ReplayBackend, ReplayStore};
use citeres_eval::report::{render_aggregates_csv, write_text};
use citeres_eval::score_logger::ScoreLogger;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

const PROGRESS_EVERY: usize = 100;

pub fn run(config: &Config, weights: Option<&Path>, fold: usize) -> Result<()> {
    let files = load_files_dict(&config.files_dict_path())?;
    let queries = load_precomputed_queries(&config.precomputed_queries_path())?;

    let mut stored = Vec::new();
    for zone in zones_for_classification(&config.experiment.queries_classification) {
        let path = config.prr_path(zone);
        match load_zone(&path, zone) {
            Ok(entries) => stored.extend(entries),
            Err(err) if err.is_recoverable() => {
                debug!(zone, path = %path.display(), "no stored retrievals for zone");
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to load {}", path.display()));
            }
        }
    }
    if stored.is_empty() {
        anyhow::bail!(
            "no prr_{}_<zone>.json files under {}",
            config.experiment.queries_classification,
            config.exp_dir().display()
        );
    }
    let mut backend = ReplayBackend::new(ReplayStore::from_precomputed(&stored));

    let overrides = match weights {
        Some(path) => load_overrides(path, fold)?,
        None => WeightOverrides::new(),
    };
    info!(
        queries = queries.len(),
        stored = stored.len(),
        tuned = !overrides.is_empty(),
        "resolving citations"
    );

    ensure_exp_dir(config)?;
    let methods = config.testing_methods();
    let store = FilesDictStore::new(&files);
    let results_path = config.results_path();
    let mut logger = ScoreLogger::with_result_stream(&results_path)?;
    let summary = Pipeline {
        backend: &mut backend,
        files: &files,
        methods: &methods,
        store: Some(&store),
        overrides: &overrides,
        options: PipelineOptions::from_config(config),
    }
    .run(
        &queries,
        &mut logger,
        &mut LogProgress {
            every: PROGRESS_EVERY,
        },
    )?;

    let aggregates_path = config.aggregates_path();
    write_text(&aggregates_path, &render_aggregates_csv(&summary.rows))?;
    println!("results: {}", results_path.display());
    println!("aggregates: {}", aggregates_path.display());
    println!(
        "processed {}/{} queries, {} rows, {} empty, {} failed, {} documents skipped, {} resolvable citations",
        summary.queries_processed,
        summary.queries_total,
        summary.rows_logged,
        summary.empty_retrievals,
        summary.failed_queries,
        summary.load_failures.len(),
        summary.total_citations
    );
    Ok(())
}

/// Reads the `fold -> zone -> method -> weights` file written by `train`.
fn load_overrides(path: &Path, fold: usize) -> Result<WeightOverrides> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read weights {}", path.display()))?;
    let mut by_fold: BTreeMap<usize, BTreeMap<String, BTreeMap<String, WeightVector>>> =
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse weights {}", path.display()))?;
    let table = by_fold
        .remove(&fold)
        .with_context(|| format!("fold {fold} not found in {}", path.display()))?;
    Ok(WeightOverrides::from_zone_table(table))
}
