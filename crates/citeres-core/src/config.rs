use crate::constants;
use crate::error::ConfigError;
use crate::methods::{DocMethodSpec, TestingMethod, expand_doc_methods};
use crate::types::Metric;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub experiment: ExperimentConfig,
    #[serde(default)]
    pub doc_methods: BTreeMap<String, DocMethodSpec>,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default = "default_experiment_name")]
    pub name: String,
    /// Directory holding the experiment inputs and receiving its outputs.
    #[serde(default = "default_exp_dir")]
    pub exp_dir: String,
    /// Zone scheme of the precomputed files: `AZ` or `CSC`.
    #[serde(default = "default_queries_classification")]
    pub queries_classification: String,
    /// Zones to train weights for; empty means every zone of the scheme.
    #[serde(default)]
    pub train_weights_for: Vec<String>,
    #[serde(default)]
    pub metric: Metric,
    #[serde(default = "default_weight_values")]
    pub weight_values: Vec<f64>,
    #[serde(default = "default_movements")]
    pub movements: Vec<f64>,
    #[serde(default = "default_cross_validation_folds")]
    pub cross_validation_folds: usize,
    #[serde(default)]
    pub smooth_weights: bool,
    #[serde(default)]
    pub initialization: WeightInitialization,
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,
    #[serde(default = "default_max_passes")]
    pub max_passes: usize,
    #[serde(default = "default_max_results_recall")]
    pub max_results_recall: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_queries_evaluated: Option<usize>,
    #[serde(default)]
    pub add_random_control_result: bool,
    /// Query a single corpus-wide index instead of one index per document.
    #[serde(default)]
    pub full_corpus: bool,
    #[serde(default = "default_files_dict_filename")]
    pub files_dict_filename: String,
    #[serde(default = "default_precomputed_queries_filename")]
    pub precomputed_queries_filename: String,
    #[serde(default = "default_output_filename")]
    pub output_filename: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightInitialization {
    #[default]
    Ones,
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default = "default_max_combinations")]
    pub max_combinations: u64,
    /// Legacy half-split selection: 1 = first half, 2 = second half.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_set: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_experiment_name() -> String {
    "experiment".into()
}
fn default_exp_dir() -> String {
    ".".into()
}
fn default_queries_classification() -> String {
    "AZ".into()
}
fn default_weight_values() -> Vec<f64> {
    constants::DEFAULT_WEIGHT_VALUES.to_vec()
}
fn default_movements() -> Vec<f64> {
    constants::DEFAULT_MOVEMENTS.to_vec()
}
fn default_cross_validation_folds() -> usize {
    constants::DEFAULT_CROSS_VALIDATION_FOLDS
}
fn default_random_seed() -> u64 {
    42
}
fn default_max_passes() -> usize {
    constants::DEFAULT_MAX_OPTIMIZER_PASSES
}
fn default_max_results_recall() -> usize {
    constants::DEFAULT_MAX_RESULTS_RECALL
}
fn default_files_dict_filename() -> String {
    constants::DEFAULT_FILES_DICT_FILE.into()
}
fn default_precomputed_queries_filename() -> String {
    constants::DEFAULT_PRECOMPUTED_QUERIES_FILE.into()
}
fn default_output_filename() -> String {
    constants::DEFAULT_RESULTS_FILE.into()
}
fn default_max_combinations() -> u64 {
    constants::DEFAULT_MAX_GRID_COMBINATIONS
}
fn default_max_attempts() -> usize {
    constants::DEFAULT_BACKEND_ATTEMPTS
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            name: default_experiment_name(),
            exp_dir: default_exp_dir(),
            queries_classification: default_queries_classification(),
            train_weights_for: Vec::new(),
            metric: Metric::default(),
            weight_values: default_weight_values(),
            movements: default_movements(),
            cross_validation_folds: default_cross_validation_folds(),
            smooth_weights: false,
            initialization: WeightInitialization::default(),
            random_seed: default_random_seed(),
            max_passes: default_max_passes(),
            max_results_recall: default_max_results_recall(),
            max_queries_evaluated: None,
            add_random_control_result: false,
            full_corpus: false,
            files_dict_filename: default_files_dict_filename(),
            precomputed_queries_filename: default_precomputed_queries_filename(),
            output_filename: default_output_filename(),
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            max_combinations: default_max_combinations(),
            split_set: None,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with layered precedence:
    /// 1. Environment variables `CITERES_<SECTION>_<KEY>` (highest priority)
    /// 2. Explicit config file (from `--config`)
    /// 3. Project config: `<exp_root>/.citeres/config.toml`
    /// 4. Global config: `~/.citeres/config.toml`
    /// 5. Built-in defaults (lowest priority)
    ///
    /// Only fields explicitly set in a higher-priority file override lower layers.
    pub fn load(exp_root: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_file(exp_root, None)
    }

    pub fn load_with_file(
        exp_root: Option<&Path>,
        config_file: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let mut merged = toml::Value::Table(toml::map::Map::new());

        if let Some(home) = dirs::home_dir() {
            let global_path = home.join(constants::DEFAULT_DATA_DIR).join("config.toml");
            if global_path.exists() {
                let raw = load_toml_value(&global_path)?;
                merge_toml_values(&mut merged, &raw);
            }
        }

        if let Some(root) = exp_root {
            let project_path = root.join(constants::PROJECT_CONFIG_FILE);
            if project_path.exists() {
                let raw = load_toml_value(&project_path)?;
                merge_toml_values(&mut merged, &raw);
            }
        }

        if let Some(cf) = config_file {
            if !cf.exists() {
                return Err(ConfigError::NotFound {
                    path: cf.display().to_string(),
                });
            }
            let raw = load_toml_value(cf)?;
            merge_toml_values(&mut merged, &raw);
        }

        let config_str =
            toml::to_string(&merged).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        let mut config: Config =
            toml::from_str(&config_str).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        apply_env_overrides(&mut config)?;
        config.normalize()?;

        // A relative exp_dir is anchored at the experiment root when one is given.
        let exp_dir = expand_tilde(&config.experiment.exp_dir);
        config.experiment.exp_dir = match exp_root {
            Some(root) if Path::new(&exp_dir).is_relative() => {
                root.join(&exp_dir).to_string_lossy().into_owned()
            }
            _ => exp_dir,
        };

        Ok(config)
    }

    fn normalize(&mut self) -> Result<(), ConfigError> {
        let exp = &mut self.experiment;
        exp.cross_validation_folds = clamp_min_usize_with_warning(
            exp.cross_validation_folds,
            2,
            default_cross_validation_folds(),
            "experiment.cross_validation_folds",
        );
        exp.max_passes = clamp_min_usize_with_warning(
            exp.max_passes,
            constants::MIN_OPTIMIZER_PASSES,
            constants::MIN_OPTIMIZER_PASSES,
            "experiment.max_passes",
        );
        exp.weight_values = normalize_finite_list(
            &exp.weight_values,
            default_weight_values(),
            "experiment.weight_values",
        );
        exp.movements =
            normalize_finite_list(&exp.movements, default_movements(), "experiment.movements");
        exp.queries_classification = exp.queries_classification.trim().to_ascii_uppercase();
        if exp.train_weights_for.is_empty() {
            exp.train_weights_for = zones_for_classification(&exp.queries_classification)
                .iter()
                .map(ToString::to_string)
                .collect();
        }
        if exp.max_queries_evaluated == Some(0) {
            tracing::warn!(
                field = "experiment.max_queries_evaluated",
                "zero query limit ignored; evaluating every query"
            );
            exp.max_queries_evaluated = None;
        }

        self.grid.max_combinations = self.grid.max_combinations.max(1);
        if let Some(split) = self.grid.split_set
            && !(1..=2).contains(&split)
        {
            return Err(ConfigError::invalid_value(
                "grid.split_set",
                format!("expected 1 or 2, got {split}"),
            ));
        }
        self.backend.max_attempts = clamp_min_usize_with_warning(
            self.backend.max_attempts,
            1,
            1,
            "backend.max_attempts",
        );

        for (name, spec) in &self.doc_methods {
            spec.validate(name)
                .map_err(|reason| ConfigError::invalid_value(format!("doc_methods.{name}"), reason))?;
        }
        Ok(())
    }

    pub fn exp_dir(&self) -> PathBuf {
        PathBuf::from(&self.experiment.exp_dir)
    }

    /// Testing methods expanded from `[doc_methods]`.
    pub fn testing_methods(&self) -> Vec<TestingMethod> {
        expand_doc_methods(&self.doc_methods)
    }

    /// `prr_<classification>_<zone>.json`
    pub fn prr_path(&self, zone: &str) -> PathBuf {
        self.exp_dir().join(format!(
            "prr_{}_{}.json",
            self.experiment.queries_classification, zone
        ))
    }

    pub fn files_dict_path(&self) -> PathBuf {
        self.exp_dir().join(&self.experiment.files_dict_filename)
    }

    pub fn precomputed_queries_path(&self) -> PathBuf {
        self.exp_dir().join(&self.experiment.precomputed_queries_filename)
    }

    pub fn results_path(&self) -> PathBuf {
        self.exp_dir().join(&self.experiment.output_filename)
    }

    pub fn aggregates_path(&self) -> PathBuf {
        self.exp_dir()
            .join(format!("{}_aggregates.csv", self.experiment.name))
    }

    pub fn improvements_path(&self) -> PathBuf {
        self.exp_dir()
            .join(format!("{}_improvements.csv", self.experiment.name))
    }

    pub fn weights_json_path(&self) -> PathBuf {
        self.exp_dir()
            .join(format!("{}_weights.json", self.experiment.name))
    }

    /// `weights_<zone>_<values><suffix>.csv`, values rendered as `1-3-5`.
    pub fn grid_output_path(&self, zone: &str) -> PathBuf {
        let values = self
            .experiment
            .weight_values
            .iter()
            .map(|value| format_weight_value(*value))
            .collect::<Vec<_>>()
            .join("-");
        let suffix = match self.grid.split_set {
            Some(split) => format!("_s{split}"),
            None => String::new(),
        };
        self.exp_dir()
            .join(format!("weights_{zone}_{values}{suffix}.csv"))
    }
}

/// Zone labels for a classification scheme; unknown schemes fall back to AZ.
pub fn zones_for_classification(classification: &str) -> &'static [&'static str] {
    match classification {
        "CSC" | "CORESC" => &constants::CORESC_ZONES,
        "AZ" => &constants::AZ_ZONES,
        other => {
            tracing::warn!(
                classification = other,
                "unknown zone classification; using AZ zones"
            );
            &constants::AZ_ZONES
        }
    }
}

/// Integral weights render without a fractional part (`3`, not `3.0`).
pub fn format_weight_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

fn load_toml_value(path: &Path) -> Result<toml::Value, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    content
        .parse::<toml::Value>()
        .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))
}

/// Deep-merge `overlay` into `base`. Only keys present in `overlay` are written.
fn merge_toml_values(base: &mut toml::Value, overlay: &toml::Value) {
    if let (toml::Value::Table(base_map), toml::Value::Table(overlay_map)) = (base, overlay) {
        for (key, overlay_val) in overlay_map {
            if let Some(base_val) = base_map.get_mut(key) {
                if base_val.is_table() && overlay_val.is_table() {
                    merge_toml_values(base_val, overlay_val);
                } else {
                    *base_val = overlay_val.clone();
                }
            } else {
                base_map.insert(key.clone(), overlay_val.clone());
            }
        }
    }
}

/// Convention: `CITERES_<SECTION>_<KEY>` in UPPER_SNAKE_CASE.
fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    let exp = &mut config.experiment;
    if let Ok(v) = std::env::var("CITERES_EXPERIMENT_NAME") {
        exp.name = v;
    }
    if let Ok(v) = std::env::var("CITERES_EXPERIMENT_EXP_DIR") {
        exp.exp_dir = v;
    }
    if let Ok(v) = std::env::var("CITERES_EXPERIMENT_QUERIES_CLASSIFICATION") {
        exp.queries_classification = v;
    }
    if let Ok(v) = std::env::var("CITERES_EXPERIMENT_TRAIN_WEIGHTS_FOR") {
        exp.train_weights_for = parse_csv_env_list(&v);
    }
    if let Ok(v) = std::env::var("CITERES_EXPERIMENT_METRIC") {
        exp.metric = v
            .parse()
            .map_err(|reason: String| ConfigError::invalid_value("experiment.metric", reason))?;
    }
    if let Ok(v) = std::env::var("CITERES_EXPERIMENT_WEIGHT_VALUES") {
        exp.weight_values = parse_csv_env_f64_list(&v);
    }
    if let Ok(v) = std::env::var("CITERES_EXPERIMENT_MOVEMENTS") {
        exp.movements = parse_csv_env_f64_list(&v);
    }
    if let Ok(v) = std::env::var("CITERES_EXPERIMENT_CROSS_VALIDATION_FOLDS")
        && let Ok(n) = v.parse()
    {
        exp.cross_validation_folds = n;
    }
    if let Ok(v) = std::env::var("CITERES_EXPERIMENT_SMOOTH_WEIGHTS")
        && let Some(parsed) = parse_env_bool(&v)
    {
        exp.smooth_weights = parsed;
    }
    if let Ok(v) = std::env::var("CITERES_EXPERIMENT_INITIALIZATION") {
        exp.initialization = match v.trim().to_ascii_lowercase().as_str() {
            "ones" => WeightInitialization::Ones,
            "random" => WeightInitialization::Random,
            other => {
                return Err(ConfigError::invalid_value(
                    "experiment.initialization",
                    format!("unknown initialization '{other}'"),
                ));
            }
        };
    }
    if let Ok(v) = std::env::var("CITERES_EXPERIMENT_RANDOM_SEED")
        && let Ok(n) = v.parse()
    {
        exp.random_seed = n;
    }
    if let Ok(v) = std::env::var("CITERES_EXPERIMENT_MAX_RESULTS_RECALL")
        && let Ok(n) = v.parse()
    {
        exp.max_results_recall = n;
    }
    if let Ok(v) = std::env::var("CITERES_EXPERIMENT_MAX_QUERIES_EVALUATED")
        && let Ok(n) = v.parse()
    {
        exp.max_queries_evaluated = Some(n);
    }
    if let Ok(v) = std::env::var("CITERES_EXPERIMENT_ADD_RANDOM_CONTROL_RESULT")
        && let Some(parsed) = parse_env_bool(&v)
    {
        exp.add_random_control_result = parsed;
    }
    if let Ok(v) = std::env::var("CITERES_EXPERIMENT_FULL_CORPUS")
        && let Some(parsed) = parse_env_bool(&v)
    {
        exp.full_corpus = parsed;
    }
    if let Ok(v) = std::env::var("CITERES_GRID_MAX_COMBINATIONS")
        && let Ok(n) = v.parse()
    {
        config.grid.max_combinations = n;
    }
    if let Ok(v) = std::env::var("CITERES_BACKEND_MAX_ATTEMPTS")
        && let Ok(n) = v.parse()
    {
        config.backend.max_attempts = n;
    }
    if let Ok(v) = std::env::var("CITERES_LOGGING_LEVEL") {
        config.logging.level = v;
    }
    Ok(())
}

fn parse_csv_env_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_csv_env_f64_list(raw: &str) -> Vec<f64> {
    parse_csv_env_list(raw)
        .iter()
        .filter_map(|value| value.parse().ok())
        .collect()
}

fn parse_env_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn normalize_finite_list(values: &[f64], fallback: Vec<f64>, field: &str) -> Vec<f64> {
    let kept: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if kept.len() != values.len() {
        tracing::warn!(
            field,
            dropped = values.len() - kept.len(),
            "dropped non-finite config values"
        );
    }
    if kept.is_empty() {
        tracing::warn!(field, "empty config list; falling back to default");
        return fallback;
    }
    kept
}

fn clamp_min_usize_with_warning(value: usize, min: usize, fallback: usize, field: &str) -> usize {
    if value < min {
        tracing::warn!(
            field,
            value,
            min,
            fallback,
            "config value below minimum; falling back to default"
        );
        fallback
    } else {
        value
    }
}

fn expand_tilde(path: &str) -> String {
    if path.starts_with('~')
        && let Some(home) = dirs::home_dir()
    {
        return path.replacen('~', &home.to_string_lossy(), 1);
    }
    path.to_string()
}
