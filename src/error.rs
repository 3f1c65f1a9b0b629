//! Error types for the orchestration layer.
//!
//! Every failure is classified by kind so that callers can decide between
//! propagating immediately (configuration, resolution), rolling back
//! (storage, backend) or reporting a misuse. [`Error::pretty`] renders the
//! structured form shown to operators.

use serde::Serialize;
use std::fmt;

/// Result type alias for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while staging volumes or launching workloads.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Missing or malformed backend configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A name or reference could not be mapped to a concrete type.
    #[error("could not resolve '{reference}', options are: {}", .options.join(", "))]
    Resolution {
        reference: String,
        options: Vec<String>,
    },

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Volume or file staging failure.
    #[error("storage error: {0}")]
    Storage(String),

    // =========================================================================
    // Backend Errors
    // =========================================================================
    /// Engine or orchestrator API failure.
    #[error("{backend} failed to {operation}: {reason}")]
    Backend {
        backend: String,
        operation: String,
        reason: String,
    },

    // =========================================================================
    // Usage Errors
    // =========================================================================
    /// Operation invoked in an invalid state.
    #[error("misusage: {0}")]
    Misusage(String),

    // =========================================================================
    // Timeout Errors
    // =========================================================================
    /// A bounded wait ran out.
    #[error("operation timed out after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: std::time::Duration,
    },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Builds an engine backend error.
    pub fn engine(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Backend {
            backend: "docker".to_string(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Builds an orchestrator backend error.
    pub fn cluster(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Backend {
            backend: "kubernetes".to_string(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Name of the error kind, as shown to operators.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "ConfigurationError",
            Error::Resolution { .. } => "ResolutionError",
            Error::Storage(_) => "StorageError",
            Error::Backend { .. } => "BackendError",
            Error::Misusage(_) => "MisusageError",
            Error::Timeout { .. } => "TimeoutError",
            Error::Io(_) => "IoError",
            Error::Serialization(_) => "SerializationError",
        }
    }

    /// Returns true for failures worth waiting out (backend API hiccups).
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Backend { .. })
    }

    /// Structured rendering: kind, message and the chain of causes.
    pub fn pretty(&self) -> PrettyError {
        let mut cause = Vec::new();
        let mut source = std::error::Error::source(self);

        while let Some(err) = source {
            cause.push(err.to_string());
            source = err.source();
        }

        PrettyError {
            error: self.kind().to_string(),
            message: self.to_string(),
            cause,
        }
    }
}

/// Operator-facing view of an [`Error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrettyError {
    /// Error kind.
    pub error: String,
    /// Rendered message.
    pub message: String,
    /// Root cause chain, outermost first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cause: Vec<String>,
}

impl fmt::Display for PrettyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Error: {}", self.error)?;
        write!(f, "Message: {}", self.message)?;

        for c in &self.cause {
            write!(f, "\nCause: {c}")?;
        }

        Ok(())
    }
}
