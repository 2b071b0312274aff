pub mod collaborators;
pub mod crossval;
pub mod folds;
pub mod formula;
pub mod grid;
pub mod grid_search;
pub mod optimizer;
pub mod pipeline;
pub mod precomputed;
pub mod replay;
pub mod report;
pub mod score_logger;
