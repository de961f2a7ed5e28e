//! Error types for changemap

use thiserror::Error;

/// Main error type for changemap operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    /// Input artifacts that must share a shape do not.
    ///
    /// Shapes are reported as `(rows, cols, bands)`.
    #[error("[{stage}] shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        stage: &'static str,
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },

    /// Block covariance could not be decomposed, even after ridge regularization.
    #[error(
        "[{stage}] degenerate covariance ({dim}x{dim} from {samples} blocks, ridge {ridge:e}): {reason}"
    )]
    DegenerateCovariance {
        stage: &'static str,
        dim: usize,
        samples: usize,
        ridge: f64,
        reason: String,
    },

    /// A cluster stayed empty after every allowed reinitialization.
    #[error("[{stage}] cluster emptied at iteration {iteration} after {retries} reinitializations")]
    EmptyCluster {
        stage: &'static str,
        iteration: usize,
        retries: usize,
    },

    #[error("[{stage}] timed out after {elapsed_secs:.3}s")]
    Timeout { stage: &'static str, elapsed_secs: f64 },

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for an [`Error::InvalidParameter`]
    pub fn invalid_parameter(
        name: &'static str,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Error::InvalidParameter {
            name,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for changemap operations
pub type Result<T> = std::result::Result<T, Error>;
