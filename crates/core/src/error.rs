//! Error types for federated regression.

/// Errors that can occur while partitioning, solving or training.
#[derive(Debug, thiserror::Error)]
pub enum FedError {
    /// Invalid parameter provided.
    #[error("invalid parameter: {msg}")]
    InvalidParameters {
        /// Human-readable error description.
        msg: String,
    },

    /// Input data that cannot be processed without producing NaN/Inf.
    #[error("degenerate input: {msg}")]
    DegenerateInput {
        /// Human-readable error description.
        msg: String,
    },

    /// Feature, label or weight dimensions disagree.
    #[error("shape mismatch in {context}: expected {expected}, found {found}")]
    ShapeMismatch {
        /// Operation that detected the mismatch.
        context: String,
        /// Expected length.
        expected: usize,
        /// Observed length.
        found: usize,
    },

    /// Numerical computation error.
    #[error("numerical error: {msg}")]
    NumericalError {
        /// Human-readable error description.
        msg: String,
    },

    /// Configuration error.
    #[error("configuration error: {msg}")]
    ConfigError {
        /// Human-readable error description.
        msg: String,
    },
}

/// Result type for federated regression operations.
pub type Result<T> = std::result::Result<T, FedError>;

impl FedError {
    /// Create an invalid parameter error.
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        Self::InvalidParameters { msg: msg.into() }
    }

    /// Create a degenerate input error.
    pub fn degenerate<S: Into<String>>(msg: S) -> Self {
        Self::DegenerateInput { msg: msg.into() }
    }

    /// Create a shape mismatch error.
    pub fn shape<S: Into<String>>(context: S, expected: usize, found: usize) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
            expected,
            found,
        }
    }

    /// Create a numerical error.
    pub fn numerical<S: Into<String>>(msg: S) -> Self {
        Self::NumericalError { msg: msg.into() }
    }

    /// Create a configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError { msg: msg.into() }
    }
}
