//! Error taxonomy for session and profile operations.
//!
//! `Display` strings double as the user-facing messages surfaced through
//! the read model's `error` field, so they are written for a human reading
//! an inline form banner, not for a log file.

use thiserror::Error;

/// Failure modes for auth and profile operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The email/password pair was rejected by the auth provider.
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// Network or remote-platform outage. The inner string carries the
    /// transport detail (status code, connect error) for logs.
    #[error("Connection problem — please try again ({0})")]
    Transport(String),

    /// Authenticated, but no profile row exists for the account.
    /// A data inconsistency: signup always creates the row.
    #[error("No profile found for this account")]
    ProfileNotFound(String),

    /// The operation requires a signed-in user and none is present.
    #[error("Not signed in")]
    NotAuthenticated,

    /// Malformed input rejected by the remote platform (e.g. duplicate
    /// signup email). Form-level validation runs upstream of this crate;
    /// this variant covers what only the server can check.
    #[error("{0}")]
    Validation(String),
}

impl AuthError {
    /// Whether retrying the same call without changing input can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_user_facing() {
        assert_eq!(
            AuthError::InvalidCredentials.to_string(),
            "Invalid email or password"
        );
        assert_eq!(
            AuthError::ProfileNotFound("u1".into()).to_string(),
            "No profile found for this account"
        );
        assert_eq!(AuthError::NotAuthenticated.to_string(), "Not signed in");
    }

    #[test]
    fn transport_message_carries_detail() {
        let err = AuthError::Transport("503 Service Unavailable".into());
        assert!(err.to_string().contains("503"));
        assert!(err.is_retryable());
    }

    #[test]
    fn only_transport_is_retryable() {
        assert!(!AuthError::InvalidCredentials.is_retryable());
        assert!(!AuthError::NotAuthenticated.is_retryable());
        assert!(!AuthError::Validation("nope".into()).is_retryable());
    }
}
