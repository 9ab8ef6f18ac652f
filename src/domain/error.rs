//! Domain error types.

/// Top-level error type for slicetrader.
///
/// Nothing in the simulation core treats these as fatal: ledger errors abort a
/// single action, persistence errors are retried at the next checkpoint, and
/// execution errors are only logged.
#[derive(Debug, thiserror::Error)]
pub enum SlicetraderError {
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("position not found: {id}")]
    NotFound { id: String },

    #[error("position already closed: {id}")]
    AlreadyClosed { id: String },

    #[error("insufficient cash in slice {strategy}: need {required:.4}, have {available:.4}")]
    InsufficientFunds {
        strategy: String,
        required: f64,
        available: f64,
    },

    #[error("state file {path} is corrupt: {reason}")]
    Corruption { path: String, reason: String },

    #[error("failed to persist state to {path}: {reason}")]
    Persistence { path: String, reason: String },

    #[error("order for {symbol} rejected: {reason}")]
    ExternalExecution {
        symbol: String,
        reason: String,
        retryable: bool,
    },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("no data for {symbol}")]
    NoData { symbol: String },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("sink error: {reason}")]
    Sink { reason: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SlicetraderError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        SlicetraderError::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Whether an external order that failed with this error may be resubmitted.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SlicetraderError::ExternalExecution {
                retryable: true,
                ..
            }
        )
    }
}

impl From<&SlicetraderError> for std::process::ExitCode {
    fn from(err: &SlicetraderError) -> Self {
        let code: u8 = match err {
            SlicetraderError::Io(_) => 1,
            SlicetraderError::ConfigParse { .. }
            | SlicetraderError::ConfigMissing { .. }
            | SlicetraderError::ConfigInvalid { .. } => 2,
            SlicetraderError::NoData { .. }
            | SlicetraderError::Data { .. }
            | SlicetraderError::Sink { .. } => 3,
            SlicetraderError::Corruption { .. }
            | SlicetraderError::Persistence { .. }
            | SlicetraderError::Json(_) => 4,
            SlicetraderError::InvalidInput { .. }
            | SlicetraderError::NotFound { .. }
            | SlicetraderError::AlreadyClosed { .. }
            | SlicetraderError::InsufficientFunds { .. }
            | SlicetraderError::ExternalExecution { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
