use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    NotFound { path: String },

    #[error("failed to parse config: {0}")]
    ParseError(String),

    #[error("invalid config value: {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Failures reported by the external search/document collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Timeouts and dropped connections; worth another attempt.
    #[error("transient backend failure: {0}")]
    Transient(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The weights handed to the backend do not fit its formula fields.
    #[error("weights rejected by backend: field '{field}' (weights: [{available}])")]
    InvalidWeights { field: String, available: String },
}

impl BackendError {
    pub fn transient<E: std::fmt::Display>(e: E) -> Self {
        Self::Transient(e.to_string())
    }

    pub fn unavailable<E: std::fmt::Display>(e: E) -> Self {
        Self::Unavailable(e.to_string())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("missing data: {what}: {reason}")]
    MissingData { what: String, reason: String },

    #[error("transient backend error during {operation} after {attempts} attempt(s): {reason}")]
    TransientBackend {
        operation: String,
        attempts: usize,
        reason: String,
    },

    #[error("invalid weight vector: field '{field}' does not match the formula fields (weights: [{available}])")]
    InvalidWeightVector { field: String, available: String },

    #[error("empty training set for zone={zone}, method={method}")]
    EmptyTrainingSet { zone: String, method: String },

    #[error(
        "inconsistent formula fields for candidate {guid}: expected [{expected}], found [{found}]"
    )]
    InconsistentFormulaFields {
        guid: String,
        expected: String,
        found: String,
    },

    #[error("malformed input {path}: {reason}")]
    Schema { path: String, reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

impl EvalError {
    /// Per-unit failures that the pipeline converts into skipped units or zero rows.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MissingData { .. } | Self::TransientBackend { .. })
    }

    pub fn missing_data(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MissingData {
            what: what.into(),
            reason: reason.into(),
        }
    }

    pub fn schema(path: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Schema {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput(reason.into())
    }

    pub fn empty_training_set(zone: impl Into<String>, method: impl Into<String>) -> Self {
        Self::EmptyTrainingSet {
            zone: zone.into(),
            method: method.into(),
        }
    }

    /// Converts an exhausted backend failure into the error the pipeline reports.
    pub fn from_backend(operation: impl Into<String>, attempts: usize, err: BackendError) -> Self {
        match err {
            BackendError::Transient(reason) => Self::TransientBackend {
                operation: operation.into(),
                attempts,
                reason,
            },
            BackendError::Unavailable(reason) => Self::MissingData {
                what: operation.into(),
                reason,
            },
            BackendError::InvalidWeights { field, available } => {
                Self::InvalidWeightVector { field, available }
            }
        }
    }
}
