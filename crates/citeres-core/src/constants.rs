/// Argumentative Zoning labels.
pub const AZ_ZONES: [&str; 7] = ["AIM", "BAS", "BKG", "CTR", "OTH", "OWN", "TXT"];

/// Core Scientific Concept labels.
pub const CORESC_ZONES: [&str; 11] = [
    "Hyp", "Mot", "Bac", "Goa", "Obj", "Met", "Exp", "Mod", "Obs", "Res", "Con",
];

/// Pseudo-guid under which a corpus-wide merged index is registered in `files_dict.json`.
pub const ALL_FILES_GUID: &str = "ALL_FILES";

/// `doc_method` label of the analytical random-chance control row.
pub const RANDOM_CONTROL_METHOD: &str = "RANDOM";

/// Default data directory name under home.
pub const DEFAULT_DATA_DIR: &str = ".citeres";

/// Project config file name, relative to the experiment root.
pub const PROJECT_CONFIG_FILE: &str = ".citeres/config.toml";

pub const DEFAULT_FILES_DICT_FILE: &str = "files_dict.json";
pub const DEFAULT_PRECOMPUTED_QUERIES_FILE: &str = "precomputed_queries.json";
pub const DEFAULT_RESULTS_FILE: &str = "results.csv";

/// Default discrete values for the exhaustive weight grid.
pub const DEFAULT_WEIGHT_VALUES: [f64; 3] = [1.0, 3.0, 5.0];

/// Default coordinate-ascent step sizes, applied in this order.
pub const DEFAULT_MOVEMENTS: [f64; 3] = [-1.0, 4.0, -2.0];

/// Passes the optimizer always performs before checking for convergence.
pub const MIN_OPTIMIZER_PASSES: usize = 3;

/// Upper bound on optimizer passes.
pub const DEFAULT_MAX_OPTIMIZER_PASSES: usize = 100;

/// Attempts made against the search backend before a unit is skipped.
pub const DEFAULT_BACKEND_ATTEMPTS: usize = 3;

/// Retrieval window used when scoring live retrievals.
pub const DEFAULT_MAX_RESULTS_RECALL: usize = 200;

pub const DEFAULT_CROSS_VALIDATION_FOLDS: usize = 2;

/// Largest weight grid a brute-force run will enumerate.
pub const DEFAULT_MAX_GRID_COMBINATIONS: u64 = 1_000_000;

/// Bounds for seeded random weight initialisation.
pub const RANDOM_INIT_MIN: i64 = -10;
pub const RANDOM_INIT_MAX: i64 = 10;
