//! Supabase-backed auth provider.
//!
//! Implements [`AuthProvider`] against a Supabase project:
//! - GoTrue (`/auth/v1/*`) for sign-in, signup, sign-out, token refresh
//! - PostgREST (`/rest/v1/profiles`) for the profile table
//!
//! ## Design
//! - HTTP client (reqwest) with a bounded request timeout
//! - Anon-key authentication; the user's access token rides as the
//!   bearer once a session exists (RLS-compatible read/write paths)
//! - The current session is cached in-process; `get_current_session`
//!   transparently refreshes an expired one via the refresh token
//! - Imperative calls emit their matching [`AuthEvent`]s (sign-in emits
//!   `SignedIn`, refresh emits `TokenRefreshed`), the same double
//!   delivery the hosted platform produces

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::broadcast;

use super::{AuthEvent, AuthProvider, AuthSession, Identity};
use crate::error::AuthError;
use crate::profile::{NewProfile, Profile, ProfileUpdate};

/// Request timeout for all provider calls.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Capacity of the auth-event channel. Events are tiny and consumers
/// drain promptly; lagging receivers get a `Lagged` error, not a stall.
const EVENT_CHANNEL_CAPACITY: usize = 32;

// ── Configuration ────────────────────────────────────────────────

/// Supabase connection configuration.
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    /// Project URL (e.g., https://xxxx.supabase.co).
    pub url: String,
    /// Publishable anon key; per-user authorization is enforced by RLS.
    pub anon_key: String,
}

impl SupabaseConfig {
    /// Load from `SUPABASE_URL` / `SUPABASE_ANON_KEY` environment variables.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("SUPABASE_URL").ok()?;
        let anon_key = std::env::var("SUPABASE_ANON_KEY").ok()?;

        if url.is_empty() || anon_key.is_empty() {
            return None;
        }

        Some(Self { url, anon_key })
    }
}

// ── Wire types ───────────────────────────────────────────────────

/// GoTrue token/signup response body.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    /// Lifetime of the access token in seconds.
    expires_in: i64,
    user: RemoteUser,
}

/// The `user` object embedded in GoTrue responses.
#[derive(Debug, Deserialize)]
struct RemoteUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl TokenResponse {
    fn into_parts(self) -> (Identity, AuthSession) {
        let identity = Identity {
            id: self.user.id,
            email: self.user.email.unwrap_or_default(),
        };
        let session = AuthSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: Utc::now() + Duration::seconds(self.expires_in),
        };
        (identity, session)
    }
}

// ── Provider ─────────────────────────────────────────────────────

/// Supabase HTTP client implementing the [`AuthProvider`] boundary.
pub struct SupabaseProvider {
    config: SupabaseConfig,
    http: reqwest::Client,
    /// Session cached from the last successful sign-in/refresh.
    session: Mutex<Option<(Identity, AuthSession)>>,
    events: broadcast::Sender<AuthEvent>,
}

impl SupabaseProvider {
    /// Create a new provider with no active session.
    pub fn new(config: SupabaseConfig) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            http,
            session: Mutex::new(None),
            events,
        })
    }

    /// Create a provider seeded with a session persisted from a previous
    /// run (e.g. restored from the device keychain).
    pub fn with_persisted_session(
        config: SupabaseConfig,
        identity: Identity,
        session: AuthSession,
    ) -> Result<Self, AuthError> {
        let provider = Self::new(config)?;
        *provider.session.lock() = Some((identity, session));
        Ok(provider)
    }

    /// Build the GoTrue URL for an auth endpoint.
    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.config.url, path)
    }

    /// Build the PostgREST URL for a table.
    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.url, table)
    }

    /// Base headers for an authenticated request. The bearer is the
    /// user's access token when a session exists, otherwise the anon key.
    fn auth_headers(&self) -> Vec<(&'static str, String)> {
        let bearer = self
            .session
            .lock()
            .as_ref()
            .map(|(_, s)| s.access_token.clone())
            .unwrap_or_else(|| self.config.anon_key.clone());

        vec![
            ("apikey", self.config.anon_key.clone()),
            ("Authorization", format!("Bearer {bearer}")),
        ]
    }

    fn apply_headers(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (key, value) in self.auth_headers() {
            request = request.header(key, value);
        }
        request
    }

    /// Exchange credentials (or a refresh token) at a GoTrue token
    /// endpoint and cache the resulting session.
    async fn token_request(
        &self,
        path: &str,
        payload: serde_json::Value,
    ) -> Result<(Identity, AuthSession), AuthError> {
        let request = self.http.post(self.auth_url(path)).json(&payload);
        let resp = self
            .apply_headers(request)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(map_auth_failure(status, &body));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        let (identity, session) = token.into_parts();

        *self.session.lock() = Some((identity.clone(), session.clone()));
        Ok((identity, session))
    }

    /// Rotate the access token using the cached refresh token.
    ///
    /// Emits [`AuthEvent::TokenRefreshed`] on success.
    pub async fn refresh_session(&self) -> Result<AuthSession, AuthError> {
        let refresh_token = self
            .session
            .lock()
            .as_ref()
            .map(|(_, s)| s.refresh_token.clone())
            .ok_or(AuthError::NotAuthenticated)?;

        let (_, session) = self
            .token_request(
                "token?grant_type=refresh_token",
                serde_json::json!({ "refresh_token": refresh_token }),
            )
            .await?;

        tracing::debug!("Access token refreshed");
        let _ = self.events.send(AuthEvent::TokenRefreshed {
            session: session.clone(),
        });
        Ok(session)
    }
}

#[async_trait::async_trait]
impl AuthProvider for SupabaseProvider {
    async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(Identity, AuthSession), AuthError> {
        let (identity, session) = self
            .token_request(
                "token?grant_type=password",
                serde_json::json!({ "email": email.trim(), "password": password }),
            )
            .await?;

        tracing::info!(account = %identity.id, "Signed in");
        let _ = self.events.send(AuthEvent::SignedIn {
            identity: identity.clone(),
            session: session.clone(),
        });
        Ok((identity, session))
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        draft: &NewProfile,
    ) -> Result<(Identity, AuthSession), AuthError> {
        let (identity, session) = self
            .token_request(
                "signup",
                serde_json::json!({
                    "email": email.trim(),
                    "password": password,
                    "data": { "full_name": draft.full_name },
                }),
            )
            .await?;

        tracing::info!(account = %identity.id, "Account created");
        let _ = self.events.send(AuthEvent::SignedIn {
            identity: identity.clone(),
            session: session.clone(),
        });
        Ok((identity, session))
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        // Build the request before dropping the cached session so the
        // bearer is still the user's token.
        let request = self.apply_headers(self.http.post(self.auth_url("logout")));

        // The local session ends regardless of what the server says.
        *self.session.lock() = None;
        let _ = self.events.send(AuthEvent::SignedOut);

        let resp = request
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::Transport(format!("logout failed ({status}): {body}")));
        }

        Ok(())
    }

    async fn get_current_session(&self) -> Result<Option<(Identity, AuthSession)>, AuthError> {
        let cached = self.session.lock().clone();
        match cached {
            None => Ok(None),
            Some((identity, session)) if !session.is_expired() => Ok(Some((identity, session))),
            Some((identity, _)) => {
                // Expired access token but a refresh token on hand.
                let session = self.refresh_session().await?;
                Ok(Some((identity, session)))
            }
        }
    }

    fn subscribe_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn read_profile(&self, account_id: &str) -> Result<Profile, AuthError> {
        let url = format!(
            "{}?id=eq.{}&select=*",
            self.table_url("profiles"),
            account_id
        );

        let resp = self
            .apply_headers(self.http.get(&url))
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::Transport(format!(
                "profile read failed ({status}): {body}"
            )));
        }

        let rows: Vec<Profile> = resp
            .json()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        rows.into_iter()
            .next()
            .ok_or_else(|| AuthError::ProfileNotFound(account_id.to_string()))
    }

    async fn write_profile(&self, row: &Profile) -> Result<(), AuthError> {
        let request = self
            .http
            .post(self.table_url("profiles"))
            .json(row)
            .header("Prefer", "return=minimal");

        let resp = self
            .apply_headers(request)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::Transport(format!(
                "profile insert failed ({status}): {body}"
            )));
        }

        Ok(())
    }

    async fn patch_profile(
        &self,
        account_id: &str,
        updates: &ProfileUpdate,
    ) -> Result<(), AuthError> {
        if updates.is_empty() {
            return Ok(());
        }

        let url = format!("{}?id=eq.{}", self.table_url("profiles"), account_id);
        let resp = self
            .apply_headers(self.http.patch(&url).json(updates))
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::Transport(format!(
                "profile update failed ({status}): {body}"
            )));
        }

        Ok(())
    }
}

/// Map a GoTrue error response to the taxonomy.
///
/// GoTrue reports rejected credentials as 400/401 and unprocessable
/// signups (duplicate email, weak password) as 422.
fn map_auth_failure(status: reqwest::StatusCode, body: &str) -> AuthError {
    match status.as_u16() {
        400 | 401 => AuthError::InvalidCredentials,
        422 => AuthError::Validation(extract_error_message(body)),
        _ => AuthError::Transport(format!("auth request failed ({status}): {body}")),
    }
}

/// Pull the human-readable message out of a GoTrue error body, falling
/// back to the raw body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("msg")
                .or_else(|| v.get("message"))
                .or_else(|| v.get("error_description"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

// ── Tests ────────────────────────────────────────────────────────
