mod commands;

use anyhow::Context;
use citeres_core::config::Config;
use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, reload};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

#[derive(Parser)]
#[command(
    name = "citeres",
    version,
    about = "Citation resolution evaluation and per-zone weight training",
    long_about = "citeres scores precomputed retrieval candidates for citation contexts,\n\
        aggregates ranking metrics per query method, doc method and zone, and trains\n\
        per-field weights per rhetorical zone with k-fold cross-validation.\n\n\
        Quick start:\n  \
        citeres --exp-dir experiments/w_all grid\n  \
        citeres --exp-dir experiments/w_all train\n  \
        citeres --exp-dir experiments/w_all resolve --weights w_all_weights.json"
)]
struct Cli {
    /// Enable verbose logging (set log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to config file (default: <exp-dir>/.citeres/config.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Experiment directory (default: current directory)
    #[arg(long, global = true)]
    exp_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score every combination of weight values per zone
    ///
    /// Reads prr_<classification>_<zone>.json, enumerates the weight grid of
    /// each annotated-boost method and writes weights_<zone>_<values>.csv,
    /// sorted by the configured metric.
    ///
    /// Examples:
    ///   citeres grid
    ///   citeres grid --zone OWN --zone AIM
    Grid {
        /// Zone to search (repeatable; default: experiment.train_weights_for)
        #[arg(long = "zone")]
        zones: Vec<String>,
    },
    /// Train weights per zone with coordinate ascent and k-fold cross-validation
    ///
    /// Writes <name>_improvements.csv and <name>_weights.json and prints the
    /// per-zone improvement summary.
    ///
    /// Examples:
    ///   citeres train
    ///   citeres train --zone BKG
    Train {
        /// Zone to train (repeatable; default: experiment.train_weights_for)
        #[arg(long = "zone")]
        zones: Vec<String>,
    },
    /// Run the resolution pipeline over precomputed queries
    ///
    /// Replays stored retrievals, streams one row per query and method to the
    /// results file and writes <name>_aggregates.csv.
    ///
    /// Examples:
    ///   citeres resolve
    ///   citeres resolve --weights w_all_weights.json --fold 2
    Resolve {
        /// Tuned weights JSON written by `train`
        #[arg(long)]
        weights: Option<String>,

        /// Fold whose tuned weights to apply
        #[arg(long, default_value = "0")]
        fold: usize,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_filter = init_tracing(cli.verbose);

    let exp_root = resolve_path(cli.exp_dir)?;
    let config_file = cli.config.as_deref().map(std::path::Path::new);
    let config = Config::load_with_file(Some(&exp_root), config_file)
        .with_context(|| format!("failed to load configuration for {}", exp_root.display()))?;
    apply_configured_level(&log_filter, cli.verbose, &config.logging.level)?;

    match cli.command {
        Commands::Grid { zones } => commands::grid::run(&config, &zones)?,
        Commands::Train { zones } => commands::train::run(&config, &zones)?,
        Commands::Resolve { weights, fold } => {
            commands::resolve::run(&config, weights.as_deref().map(std::path::Path::new), fold)?
        }
    }

    Ok(())
}

/// Installs the subscriber before the config is read so normalisation
/// warnings reach stderr. `logging.level` is applied later through the handle.
fn init_tracing(verbose: bool) -> FilterHandle {
    let startup = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    let (filter, handle) = reload::Layer::new(startup);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
    handle
}

/// `RUST_LOG` and `--verbose` take precedence over the configured level.
fn apply_configured_level(handle: &FilterHandle, verbose: bool, level: &str) -> anyhow::Result<()> {
    if verbose || std::env::var_os("RUST_LOG").is_some() {
        return Ok(());
    }
    handle
        .reload(EnvFilter::new(level))
        .with_context(|| format!("failed to apply logging.level '{level}'"))
}

fn resolve_path(path: Option<String>) -> anyhow::Result<std::path::PathBuf> {
    match path {
        Some(p) => Ok(std::path::PathBuf::from(p)),
        None => Ok(std::env::current_dir()?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn config_warnings_are_logged_before_the_configured_level_applies() {
        let temp = tempdir().unwrap();
        let config_path = temp.path().join("config.toml");
        std::fs::write(
            &config_path,
            "[experiment]\nmax_queries_evaluated = 0\n\n[logging]\nlevel = \"error\"\n",
        )
        .unwrap();

        let captured = Captured::default();
        let sink = captured.clone();
        let (filter, handle) = reload::Layer::new(EnvFilter::new("info"));
        let subscriber = tracing_subscriber::registry().with(filter).with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(move || sink.clone()),
        );

        tracing::subscriber::with_default(subscriber, || {
            let config = Config::load_with_file(Some(temp.path()), Some(&config_path)).unwrap();
            assert_eq!(config.logging.level, "error");
            handle.reload(EnvFilter::new(&config.logging.level)).unwrap();
            tracing::warn!("suppressed after reload");
        });

        let logged = captured.text();
        assert!(logged.contains("zero query limit ignored"), "{logged}");
        assert!(!logged.contains("suppressed after reload"), "{logged}");
    }
}
