//! Auth provider boundary.
//!
//! The session store treats the remote platform (auth endpoints + profile
//! table) as a single opaque capability behind [`AuthProvider`]. Two
//! implementations ship with the crate:
//! - [`supabase::SupabaseProvider`] — the production backend (GoTrue +
//!   PostgREST over HTTP)
//! - [`memory::MemoryProvider`] — a deterministic in-memory double for
//!   tests and demos
//!
//! Besides the request/response calls, a provider exposes a push channel
//! of [`AuthEvent`]s. Events are delivered in emission order and may fire
//! concurrently with any imperative call — the store's reconciliation
//! logic, not the provider, is responsible for making that safe.

pub mod memory;
pub mod supabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::AuthError;
use crate::profile::{NewProfile, Profile, ProfileUpdate};

/// The authenticated account reference issued by the auth provider.
///
/// Immutable once issued for a given login; replaced wholesale on
/// re-login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Provider-assigned account id (UUID).
    pub id: String,
    /// Email the account was registered with.
    pub email: String,
}

/// Bearer credential plus expiry metadata.
///
/// Never constructed by this crate's consumers — only the provider mints
/// sessions, and only a token refresh replaces one in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    /// Bearer token for authenticated requests.
    pub access_token: String,
    /// Opaque token used to obtain a fresh access token.
    pub refresh_token: String,
    /// When the access token stops being accepted.
    pub expires_at: DateTime<Utc>,
}

impl AuthSession {
    /// Whether the access token has passed its expiry.
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Push notification from the auth provider, delivered on a channel
/// independent of the imperative calls.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    /// A session became active — password login, signup, or an
    /// out-of-band trigger such as a magic-link sign-in.
    SignedIn {
        identity: Identity,
        session: AuthSession,
    },
    /// The session ended, locally or server-side.
    SignedOut,
    /// The access token was rotated; identity is unchanged.
    TokenRefreshed { session: AuthSession },
}

/// Capability contract for the remote auth/data platform.
///
/// Every method suspends for unbounded time and may fail with a
/// transport error at any point; callers own timeout policy.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Authenticate with email + password.
    async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(Identity, AuthSession), AuthError>;

    /// Create a new account. The profile draft travels as signup
    /// metadata; the profile *row* is written separately via
    /// [`write_profile`](Self::write_profile).
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        draft: &NewProfile,
    ) -> Result<(Identity, AuthSession), AuthError>;

    /// End the current session. A failure here must not block local
    /// cleanup on the caller's side.
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// The session persisted from a previous run, if any.
    async fn get_current_session(&self) -> Result<Option<(Identity, AuthSession)>, AuthError>;

    /// Subscribe to pushed auth events. Each receiver sees events in
    /// emission order from the moment it subscribes.
    fn subscribe_events(&self) -> broadcast::Receiver<AuthEvent>;

    /// Fetch the profile row for an account.
    async fn read_profile(&self, account_id: &str) -> Result<Profile, AuthError>;

    /// Insert a freshly minted profile row (signup only).
    async fn write_profile(&self, row: &Profile) -> Result<(), AuthError>;

    /// Apply a partial update to an account's profile row.
    async fn patch_profile(
        &self,
        account_id: &str,
        updates: &ProfileUpdate,
    ) -> Result<(), AuthError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn session_expiry_check() {
        let live = AuthSession {
            access_token: "t".into(),
            refresh_token: "r".into(),
            expires_at: Utc::now() + Duration::hours(1),
        };
        assert!(!live.is_expired());

        let stale = AuthSession {
            expires_at: Utc::now() - Duration::seconds(1),
            ..live
        };
        assert!(stale.is_expired());
    }
}
