//! Error types for session, register, and identity provider operations.

use wru_storage::StorageError;

/// Errors that can occur in the wru core.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The session token is absent, stale, or tampered with. Callers convert
    /// this into the start-over flow rather than surfacing it.
    #[error("invalid session token")]
    InvalidToken,

    /// No user matches the lookup key.
    #[error("user not found: {user}")]
    UserNotFound {
        /// The user id or federated account that was searched.
        user: String,
    },

    /// A handshake with an external identity provider failed.
    #[error("identity provider error: {provider} - {message}")]
    IdentityProvider {
        /// The identity provider tag.
        provider: String,
        /// Description of the failure.
        message: String,
    },

    /// A session data directive could not be parsed.
    #[error("invalid directive: {message}")]
    InvalidDirective {
        /// The offending directive text.
        message: String,
    },

    /// The document store failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// The configuration is invalid. Fatal at startup only.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `UserNotFound` error.
    #[must_use]
    pub fn user_not_found(user: impl Into<String>) -> Self {
        Self::UserNotFound { user: user.into() }
    }

    /// Creates a new `IdentityProvider` error.
    #[must_use]
    pub fn identity_provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IdentityProvider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Creates a new `InvalidDirective` error.
    #[must_use]
    pub fn invalid_directive(message: impl Into<String>) -> Self {
        Self::InvalidDirective {
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

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this error should become a 4xx response.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidToken
                | Self::UserNotFound { .. }
                | Self::IdentityProvider { .. }
                | Self::InvalidDirective { .. }
        )
    }

    /// Returns `true` if this error should become a 5xx response.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. }
        )
    }

    /// Returns `true` if the session token should be treated as gone.
    #[must_use]
    pub fn is_invalid_token(&self) -> bool {
        matches!(self, Self::InvalidToken)
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Serialization { message } => Self::Internal { message },
            other => Self::Storage {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(AuthError::InvalidToken.to_string(), "invalid session token");
        assert_eq!(
            AuthError::user_not_found("u1").to_string(),
            "user not found: u1"
        );
        assert_eq!(
            AuthError::identity_provider("github", "state mismatch").to_string(),
            "identity provider error: github - state mismatch"
        );
    }

    #[test]
    fn test_error_predicates() {
        assert!(AuthError::InvalidToken.is_client_error());
        assert!(AuthError::InvalidToken.is_invalid_token());
        assert!(!AuthError::InvalidToken.is_server_error());

        assert!(AuthError::storage("down").is_server_error());
        assert!(!AuthError::storage("down").is_client_error());
    }

    #[test]
    fn test_from_storage_error() {
        let err: AuthError = StorageError::internal("backend down").into();
        assert!(err.is_server_error());
    }
}
