//! Provider error types.
//!
//! Three families share one enum so every path can answer two questions:
//! which OAuth registry code does the wire see, and is the condition
//! retriable. Protocol errors map onto RFC 6749/OIDC registry codes;
//! flow-local errors surface through the UI contract; operational errors are
//! passed through unchanged so callers can retry with backoff.

use std::fmt;

/// Type alias for provider results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors that can occur during authorization, authentication, and token
/// operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    // ------------------------------------------------------------------
    // Protocol errors (OAuth / OIDC registries)
    // ------------------------------------------------------------------
    /// The request is malformed or missing a required parameter.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// Client authentication failed or the client is unknown.
    #[error("Invalid client: {message}")]
    InvalidClient {
        /// Description of why the client is invalid.
        message: String,
    },

    /// The grant (code, refresh token, device code) is invalid, expired,
    /// consumed, or bound to a different client.
    #[error("Invalid grant: {message}")]
    InvalidGrant {
        /// Description of why the grant is invalid.
        message: String,
    },

    /// The client may not use this grant type.
    #[error("Unauthorized client: {message}")]
    UnauthorizedClient {
        /// Description of the restriction.
        message: String,
    },

    /// The grant type is not supported by this server.
    #[error("Unsupported grant type: {grant_type}")]
    UnsupportedGrantType {
        /// The unsupported grant type.
        grant_type: String,
    },

    /// The requested scope exceeds what policy allows.
    #[error("Invalid scope: {message}")]
    InvalidScope {
        /// Description of the scope problem.
        message: String,
    },

    /// The resource owner or policy denied the request.
    #[error("Access denied: {message}")]
    AccessDenied {
        /// Description of the denial.
        message: String,
    },

    /// The presented token is invalid, expired, or revoked.
    #[error("Invalid token: {message}")]
    InvalidToken {
        /// Description of the token problem.
        message: String,
    },

    /// A `request_uri` could not be loaded or has been consumed.
    #[error("Invalid request_uri: {message}")]
    InvalidRequestUri {
        /// Description of the failure.
        message: String,
    },

    /// An unexpected server-side failure.
    #[error("Server error: {message}")]
    ServerError {
        /// Description of the failure.
        message: String,
    },

    // ------------------------------------------------------------------
    // Grant-coordination errors (CIBA / device / interactive)
    // ------------------------------------------------------------------
    /// The user has not yet approved the backchannel/device request.
    #[error("Authorization pending")]
    AuthorizationPending,

    /// The client polled faster than the minimum interval.
    #[error("Slow down")]
    SlowDown,

    /// The backchannel/device grant expired before approval.
    #[error("Expired token")]
    ExpiredToken,

    /// Interaction is required but `prompt=none` was requested.
    #[error("Login required")]
    LoginRequired,

    /// Consent is required but `prompt=none` was requested.
    #[error("Consent required")]
    ConsentRequired,

    // ------------------------------------------------------------------
    // Flow-local errors (surface via the UI contract)
    // ------------------------------------------------------------------
    /// The referenced challenge does not exist.
    #[error("Challenge not found")]
    ChallengeNotFound,

    /// The challenge exists but its TTL elapsed.
    #[error("Challenge expired")]
    ChallengeExpired,

    /// The challenge was already consumed.
    #[error("Challenge consumed")]
    ChallengeConsumed,

    /// The event is not valid in the current flow state.
    #[error("Invalid event '{event}' in state '{state}'")]
    InvalidTransition {
        /// The offending event.
        event: String,
        /// The state it arrived in.
        state: String,
    },

    /// Submitted data failed validation.
    #[error("Validation failed: {message}")]
    ValidationFailed {
        /// Description of the validation failure.
        message: String,
    },

    /// A passkey assertion presented a non-increasing signature counter.
    #[error("Suspected replay: authenticator counter did not increase")]
    SuspectedReplay,

    // ------------------------------------------------------------------
    // Operational errors (retriable, passed through unchanged)
    // ------------------------------------------------------------------
    /// An insert found the ID already present.
    #[error("Conflict: {resource} already exists")]
    Conflict {
        /// The conflicting resource.
        resource: String,
    },

    /// A per-tenant resource cap was hit at insert time.
    #[error("Resource exhausted: {resource}")]
    ResourceExhausted {
        /// The exhausted resource.
        resource: String,
    },

    /// The client contract references a stale tenant contract version.
    #[error("Policy stale: client pinned to tenant contract v{expected}, current is v{actual}")]
    PolicyStale {
        /// Version the client contract references.
        expected: u32,
        /// Current tenant contract version.
        actual: u32,
    },

    /// A CAS update lost too many races.
    #[error("Contention on {resource}")]
    Contention {
        /// The contended resource.
        resource: String,
    },

    /// A serialized operation (key rotation) is already in progress.
    #[error("Try again: {message}")]
    TryAgain {
        /// Description of the transient condition.
        message: String,
    },

    /// Too many requests within the current window.
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the window resets.
        retry_after_secs: i64,
    },

    /// A storage backend failed.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// The provider configuration is invalid or incomplete.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration failure.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidClient` error.
    #[must_use]
    pub fn invalid_client(message: impl Into<String>) -> Self {
        Self::InvalidClient {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidGrant` error.
    #[must_use]
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::InvalidGrant {
            message: message.into(),
        }
    }

    /// Creates a new `UnauthorizedClient` error.
    #[must_use]
    pub fn unauthorized_client(message: impl Into<String>) -> Self {
        Self::UnauthorizedClient {
            message: message.into(),
        }
    }

    /// Creates a new `UnsupportedGrantType` error.
    #[must_use]
    pub fn unsupported_grant_type(grant_type: impl Into<String>) -> Self {
        Self::UnsupportedGrantType {
            grant_type: grant_type.into(),
        }
    }

    /// Creates a new `InvalidScope` error.
    #[must_use]
    pub fn invalid_scope(message: impl Into<String>) -> Self {
        Self::InvalidScope {
            message: message.into(),
        }
    }

    /// Creates a new `AccessDenied` error.
    #[must_use]
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::AccessDenied {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidToken` error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidRequestUri` error.
    #[must_use]
    pub fn invalid_request_uri(message: impl Into<String>) -> Self {
        Self::InvalidRequestUri {
            message: message.into(),
        }
    }

    /// Creates a new `ServerError`.
    #[must_use]
    pub fn server_error(message: impl Into<String>) -> Self {
        Self::ServerError {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidTransition` error.
    #[must_use]
    pub fn invalid_transition(event: impl Into<String>, state: impl Into<String>) -> Self {
        Self::InvalidTransition {
            event: event.into(),
            state: state.into(),
        }
    }

    /// Creates a new `ValidationFailed` error.
    #[must_use]
    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            message: message.into(),
        }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(resource: impl Into<String>) -> Self {
        Self::Conflict {
            resource: resource.into(),
        }
    }

    /// Creates a new `ResourceExhausted` error.
    #[must_use]
    pub fn resource_exhausted(resource: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            resource: resource.into(),
        }
    }

    /// Creates a new `Contention` error.
    #[must_use]
    pub fn contention(resource: impl Into<String>) -> Self {
        Self::Contention {
            resource: resource.into(),
        }
    }

    /// Creates a new `TryAgain` error.
    #[must_use]
    pub fn try_again(message: impl Into<String>) -> Self {
        Self::TryAgain {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns `true` if the caller may retry (per the returned interval or
    /// with backoff).
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::AuthorizationPending
                | Self::SlowDown
                | Self::Contention { .. }
                | Self::TryAgain { .. }
                | Self::RateLimited { .. }
        )
    }

    /// Returns `true` if this error surfaces through the UI contract rather
    /// than an HTTP error body.
    #[must_use]
    pub fn is_flow_local(&self) -> bool {
        matches!(
            self,
            Self::ChallengeNotFound
                | Self::ChallengeExpired
                | Self::ChallengeConsumed
                | Self::InvalidTransition { .. }
                | Self::ValidationFailed { .. }
                | Self::SuspectedReplay
        )
    }

    /// Returns the OAuth 2.0 / OIDC registry error code.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } | Self::ValidationFailed { .. } => "invalid_request",
            Self::InvalidClient { .. } => "invalid_client",
            Self::InvalidGrant { .. } | Self::SuspectedReplay => "invalid_grant",
            Self::UnauthorizedClient { .. } => "unauthorized_client",
            Self::UnsupportedGrantType { .. } => "unsupported_grant_type",
            Self::InvalidScope { .. } => "invalid_scope",
            Self::AccessDenied { .. } => "access_denied",
            Self::InvalidToken { .. } => "invalid_token",
            Self::InvalidRequestUri { .. } => "invalid_request_uri",
            Self::AuthorizationPending => "authorization_pending",
            Self::SlowDown => "slow_down",
            Self::ExpiredToken => "expired_token",
            Self::LoginRequired => "login_required",
            Self::ConsentRequired => "consent_required",
            Self::ChallengeNotFound | Self::ChallengeExpired | Self::ChallengeConsumed => {
                "invalid_request"
            }
            Self::InvalidTransition { .. } => "invalid_request",
            Self::Conflict { .. } => "invalid_request",
            Self::ResourceExhausted { .. } | Self::RateLimited { .. } => "temporarily_unavailable",
            Self::PolicyStale { .. } => "invalid_client",
            Self::Contention { .. } | Self::TryAgain { .. } => "temporarily_unavailable",
            Self::Storage { .. } | Self::Configuration { .. } | Self::ServerError { .. } => {
                "server_error"
            }
        }
    }

    /// Returns the HTTP status for non-redirect surfaces.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidClient { .. } | Self::InvalidToken { .. } => 401,
            Self::AccessDenied { .. } => 403,
            Self::ChallengeNotFound => 404,
            Self::Conflict { .. } => 409,
            Self::ResourceExhausted { .. } | Self::RateLimited { .. } => 429,
            Self::Storage { .. } | Self::Configuration { .. } | Self::ServerError { .. } => 500,
            Self::Contention { .. } | Self::TryAgain { .. } => 503,
            _ => 400,
        }
    }

    /// Returns the error category for logging.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRequest { .. }
            | Self::InvalidScope { .. }
            | Self::UnsupportedGrantType { .. }
            | Self::InvalidRequestUri { .. }
            | Self::ValidationFailed { .. } => ErrorCategory::Validation,
            Self::InvalidClient { .. }
            | Self::InvalidGrant { .. }
            | Self::InvalidToken { .. }
            | Self::SuspectedReplay => ErrorCategory::Authentication,
            Self::UnauthorizedClient { .. }
            | Self::AccessDenied { .. }
            | Self::LoginRequired
            | Self::ConsentRequired => ErrorCategory::Authorization,
            Self::AuthorizationPending | Self::SlowDown | Self::ExpiredToken => {
                ErrorCategory::GrantCoordination
            }
            Self::ChallengeNotFound
            | Self::ChallengeExpired
            | Self::ChallengeConsumed
            | Self::InvalidTransition { .. } => ErrorCategory::Flow,
            Self::Conflict { .. }
            | Self::ResourceExhausted { .. }
            | Self::PolicyStale { .. }
            | Self::Contention { .. }
            | Self::TryAgain { .. }
            | Self::RateLimited { .. } => ErrorCategory::Operational,
            Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Configuration { .. } | Self::ServerError { .. } => ErrorCategory::Internal,
        }
    }
}

/// Categories of provider errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Request validation errors.
    Validation,
    /// Identity verification errors.
    Authentication,
    /// Permission errors.
    Authorization,
    /// Async-grant coordination signals.
    GrantCoordination,
    /// Flow-local errors.
    Flow,
    /// Retriable operational conditions.
    Operational,
    /// Storage backend failures.
    Infrastructure,
    /// Internal server errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Authentication => write!(f, "authentication"),
            Self::Authorization => write!(f, "authorization"),
            Self::GrantCoordination => write!(f, "grant_coordination"),
            Self::Flow => write!(f, "flow"),
            Self::Operational => write!(f, "operational"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

impl From<oxidp_core::CoreError> for AuthError {
    fn from(err: oxidp_core::CoreError) -> Self {
        match err {
            oxidp_core::CoreError::HookAborted { hook, message } => Self::AccessDenied {
                message: format!("aborted by hook '{hook}': {message}"),
            },
            other => Self::ServerError {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oauth_error_codes() {
        assert_eq!(
            AuthError::invalid_grant("used twice").oauth_error_code(),
            "invalid_grant"
        );
        assert_eq!(AuthError::SlowDown.oauth_error_code(), "slow_down");
        assert_eq!(
            AuthError::AuthorizationPending.oauth_error_code(),
            "authorization_pending"
        );
        assert_eq!(AuthError::LoginRequired.oauth_error_code(), "login_required");
        assert_eq!(AuthError::SuspectedReplay.oauth_error_code(), "invalid_grant");
        assert_eq!(
            AuthError::PolicyStale {
                expected: 3,
                actual: 4
            }
            .oauth_error_code(),
            "invalid_client"
        );
    }

    #[test]
    fn test_retriable_predicate() {
        assert!(AuthError::SlowDown.is_retriable());
        assert!(AuthError::AuthorizationPending.is_retriable());
        assert!(AuthError::contention("challenge").is_retriable());
        assert!(AuthError::try_again("rotation in progress").is_retriable());
        assert!(!AuthError::invalid_grant("x").is_retriable());
        assert!(!AuthError::ExpiredToken.is_retriable());
    }

    #[test]
    fn test_flow_local_predicate() {
        assert!(AuthError::ChallengeExpired.is_flow_local());
        assert!(AuthError::invalid_transition("SUBMIT", "complete").is_flow_local());
        assert!(AuthError::SuspectedReplay.is_flow_local());
        assert!(!AuthError::invalid_client("x").is_flow_local());
    }

    #[test]
    fn test_http_status() {
        assert_eq!(AuthError::invalid_client("x").http_status(), 401);
        assert_eq!(AuthError::invalid_grant("x").http_status(), 400);
        assert_eq!(AuthError::resource_exhausted("sessions").http_status(), 429);
        assert_eq!(AuthError::storage("down").http_status(), 500);
        assert_eq!(AuthError::try_again("rotating").http_status(), 503);
    }

    #[test]
    fn test_display() {
        let err = AuthError::PolicyStale {
            expected: 2,
            actual: 5,
        };
        assert_eq!(
            err.to_string(),
            "Policy stale: client pinned to tenant contract v2, current is v5"
        );
        assert_eq!(
            AuthError::invalid_transition("APPROVE", "validating").to_string(),
            "Invalid event 'APPROVE' in state 'validating'"
        );
    }
}
