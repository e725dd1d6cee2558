//! Error types for archsim.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! the exact failure. Admission rejections are not errors: they travel
//! through the request reply protocol. Broken engine invariants (double
//! reply, double release) panic instead of producing a value here.

use thiserror::Error;

/// Errors in an architecture description, found while building the
/// simulation or on the first evaluation that needs the missing piece.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("Unbound symbol '{symbol}'")]
    UnboundSymbol {
        symbol: String,
    },

    #[error("Operation '{operation}' is not defined on service '{service}'")]
    UndefinedOperation {
        service: String,
        operation: String,
    },

    #[error("Service '{service}' is not defined")]
    UndefinedService {
        service: String,
    },

    #[error("Symbol '{symbol}' is bound to a {found}, expected a {expected}")]
    TypeMismatch {
        symbol: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Malformed node: {reason}")]
    MalformedNode {
        reason: String,
    },
}

/// Validation errors raised on untrusted input (deserialized programs,
/// configuration files).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid identifier '{name}'")]
    InvalidIdentifier {
        name: String,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        field: String,
        reason: String,
    },
}

/// Top-level error type for archsim.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl SimError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns the configuration error, if this is one.
    #[must_use]
    pub const fn as_configuration(&self) -> Option<&ConfigurationError> {
        match self {
            Self::Configuration(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type alias for archsim operations.
pub type SimResult<T> = Result<T, SimError>;
