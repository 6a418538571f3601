//! Core error types shared across the workspace.

use std::fmt;

/// Result alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in the shared kernel.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A timestamp could not be parsed or converted.
    #[error("Invalid timestamp: {message}")]
    InvalidTimestamp {
        /// Description of the timestamp problem.
        message: String,
    },

    /// A serialization or deserialization step failed.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization problem.
        message: String,
    },

    /// An event hook aborted the operation.
    #[error("Operation aborted by hook '{hook}': {message}")]
    HookAborted {
        /// Name of the aborting hook.
        hook: String,
        /// Reason given by the hook.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl CoreError {
    /// Creates a new `InvalidTimestamp` error.
    #[must_use]
    pub fn invalid_timestamp(message: impl Into<String>) -> Self {
        Self::InvalidTimestamp {
            message: message.into(),
        }
    }

    /// Creates a new `Serialization` error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new `HookAborted` error.
    #[must_use]
    pub fn hook_aborted(hook: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HookAborted {
            hook: hook.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if the error was caused by a pre-hook abort.
    #[must_use]
    pub fn is_hook_abort(&self) -> bool {
        matches!(self, Self::HookAborted { .. })
    }

    /// Returns the error category for logging.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidTimestamp { .. } => ErrorCategory::Validation,
            Self::Serialization { .. } => ErrorCategory::Serialization,
            Self::HookAborted { .. } => ErrorCategory::Hook,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Categories of core errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Input validation errors.
    Validation,
    /// Serialization errors.
    Serialization,
    /// Event hook errors.
    Hook,
    /// Internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Serialization => write!(f, "serialization"),
            Self::Hook => write!(f, "hook"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::invalid_timestamp("year out of range");
        assert_eq!(err.to_string(), "Invalid timestamp: year out of range");

        let err = CoreError::hook_aborted("quota", "tenant over limit");
        assert_eq!(
            err.to_string(),
            "Operation aborted by hook 'quota': tenant over limit"
        );
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            CoreError::invalid_timestamp("x").category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            CoreError::hook_aborted("h", "m").category(),
            ErrorCategory::Hook
        );
        assert!(CoreError::hook_aborted("h", "m").is_hook_abort());
        assert!(!CoreError::internal("x").is_hook_abort());
    }
}
