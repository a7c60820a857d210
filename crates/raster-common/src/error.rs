//! Error types for the raster engine.

use thiserror::Error;

use crate::kind::ScalarKind;

/// Result type alias using RasterError.
pub type RasterResult<T> = Result<T, RasterError>;

/// Primary error type for raster operations.
#[derive(Debug, Error)]
pub enum RasterError {
    // === Grid State Errors ===
    #[error("Raster not initialized: {0}")]
    NotInitialized(String),

    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Header incomplete: {0}")]
    HeaderIncomplete(String),

    #[error("Mask does not overlap raster: {0}")]
    MaskMismatch(String),

    #[error("{count} value(s) cannot be represented as {kind}")]
    TypeConversionOverflow { kind: ScalarKind, count: usize },

    #[error("Inconsistent subsets: {0}")]
    SubsetInconsistent(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown scalar kind: {0}")]
    UnknownKind(String),

    // === Backend Errors ===
    #[error("Backend failure: {message}")]
    BackendFailure { message: String, transient: bool },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Invalid metadata: {0}")]
    Metadata(String),
}

impl RasterError {
    /// Create a NotInitialized error.
    pub fn not_initialized(msg: impl Into<String>) -> Self {
        Self::NotInitialized(msg.into())
    }

    /// Create an OutOfRange error.
    pub fn out_of_range(msg: impl Into<String>) -> Self {
        Self::OutOfRange(msg.into())
    }

    /// Create a HeaderIncomplete error.
    pub fn header_incomplete(msg: impl Into<String>) -> Self {
        Self::HeaderIncomplete(msg.into())
    }

    /// Create a MaskMismatch error.
    pub fn mask_mismatch(msg: impl Into<String>) -> Self {
        Self::MaskMismatch(msg.into())
    }

    /// Create a SubsetInconsistent error.
    pub fn subset_inconsistent(msg: impl Into<String>) -> Self {
        Self::SubsetInconsistent(msg.into())
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a BackendFailure that may succeed when retried.
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::BackendFailure {
            message: msg.into(),
            transient: true,
        }
    }

    /// Create a BackendFailure that will not succeed when retried.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::BackendFailure {
            message: msg.into(),
            transient: false,
        }
    }

    /// Whether retrying the failed operation may help.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BackendFailure { transient: true, .. })
    }

    /// Short machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized(_) => "NotInitialized",
            Self::OutOfRange(_) => "OutOfRange",
            Self::HeaderIncomplete(_) => "HeaderIncomplete",
            Self::MaskMismatch(_) => "MaskMismatch",
            Self::TypeConversionOverflow { .. } => "TypeConversionOverflow",
            Self::SubsetInconsistent(_) => "SubsetInconsistent",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::UnknownKind(_) => "UnknownKind",
            Self::BackendFailure { .. } => "BackendFailure",
            Self::Io(_) => "Io",
            Self::Metadata(_) => "Metadata",
        }
    }
}

impl From<std::io::Error> for RasterError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for RasterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Metadata(err.to_string())
    }
}
