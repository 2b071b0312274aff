pub mod grid;
pub mod resolve;
pub mod train;

use anyhow::{Context, Result};
use citeres_core::config::Config;
use citeres_core::methods::TestingMethod;
use citeres_eval::precomputed::{PrecomputedQuery, load_zone};
use tracing::warn;

/// Zones named on the command line, else the configured training zones.
fn selected_zones<'a>(config: &'a Config, requested: &'a [String]) -> &'a [String] {
    if requested.is_empty() {
        &config.experiment.train_weights_for
    } else {
        requested
    }
}

fn trainable_methods(config: &Config) -> Result<Vec<TestingMethod>> {
    let methods: Vec<TestingMethod> = config
        .testing_methods()
        .into_iter()
        .filter(|method| method.kind.is_weight_trainable())
        .collect();
    if methods.is_empty() {
        anyhow::bail!(
            "no weight-trainable doc methods configured; add an annotated_boost or ilc_annotated_boost entry under [doc_methods]"
        );
    }
    Ok(methods)
}

/// Loads a zone file; a missing file is warned about and yields `None`.
fn load_zone_or_skip(config: &Config, zone: &str) -> Result<Option<Vec<PrecomputedQuery>>> {
    let path = config.prr_path(zone);
    match load_zone(&path, zone) {
        Ok(data) => Ok(Some(data)),
        Err(err) if err.is_recoverable() => {
            warn!(zone, path = %path.display(), error = %err, "skipping zone");
            Ok(None)
        }
        Err(err) => Err(err).with_context(|| format!("failed to load {}", path.display())),
    }
}

fn ensure_exp_dir(config: &Config) -> Result<()> {
    let dir = config.exp_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create experiment directory {}", dir.display()))
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn requested_zones_override_configured_ones() {
        let mut config = Config::default();
        config.experiment.train_weights_for = vec!["AIM".to_string(), "OWN".to_string()];
        assert_eq!(selected_zones(&config, &[]), ["AIM", "OWN"]);
        let requested = vec!["BKG".to_string()];
        assert_eq!(selected_zones(&config, &requested), ["BKG"]);
    }

    #[test]
    fn missing_zone_files_are_skipped() {
        let temp = tempdir().unwrap();
        let mut config = Config::default();
        config.experiment.exp_dir = temp.path().to_string_lossy().to_string();
        assert!(load_zone_or_skip(&config, "OWN").unwrap().is_none());

        std::fs::write(config.prr_path("OWN"), "{not json").unwrap();
        assert!(load_zone_or_skip(&config, "OWN").is_err());
    }

    #[test]
    fn methods_without_boost_fields_are_not_trainable() {
        let config = Config::default();
        assert!(trainable_methods(&config).is_err());
    }
}
