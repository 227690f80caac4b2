//! Process-wide session store.
//!
//! [`SessionStore`] owns the identity state of the app: who is signed
//! in, their session credential, and their profile row. It reconciles
//! three sources of truth that fire independently:
//! - imperative calls from the UI (`login`, `signup`, `logout`, ...)
//! - the remote platform's answer to the startup session probe
//! - pushed auth events (`SignedIn`, `SignedOut`, `TokenRefreshed`)
//!
//! ## Reconciliation model
//!
//! Every mutation, imperative or event-driven, funnels through one
//! private commit function backed by a `tokio::sync::watch` channel.
//! Each commit replaces the read model in a single `send_modify`, so an
//! observer can never see a partial transition (identity from one
//! account, profile from another). There is no lock around whole
//! operations: concurrent operations are not serialized against each
//! other, and the last commit wins.
//!
//! Rules that keep every interleaving safe:
//! - `SignedIn` always re-fetches the profile before committing; it may
//!   fire from a trigger that bypassed `login` entirely (magic link).
//! - `SignedOut` clears unconditionally; an already-clear model is fine.
//! - `TokenRefreshed` replaces the session only, and only while a user
//!   is set, so it can never clobber a racing profile update or violate
//!   the identity/session pairing.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::error::AuthError;
use crate::profile::{NewProfile, Profile, ProfileUpdate};
use crate::provider::{AuthEvent, AuthProvider, AuthSession, Identity};

/// Upper bound on the startup session probe. An unreachable platform at
/// startup resolves to logged-out instead of an endless splash screen.
const INIT_TIMEOUT_SECS: u64 = 10;

/// Snapshot of store state exposed to observers.
///
/// Invariants, preserved by every commit:
/// - `user` and `session` are both present or both absent
/// - when `user` and `profile` are both present they belong to the
///   same account
/// - `is_initialized` transitions false→true exactly once and never
///   reverts
#[derive(Debug, Clone, Default)]
pub struct ReadModel {
    /// Authenticated account, if any.
    pub user: Option<Identity>,
    /// Bearer credential paired with `user`.
    pub session: Option<AuthSession>,
    /// Application profile row for `user`.
    pub profile: Option<Profile>,
    /// True while an operation is in flight.
    pub is_loading: bool,
    /// True once the startup session probe has settled (or failed).
    pub is_initialized: bool,
    /// Human-readable message from the last failed login/signup.
    pub error: Option<String>,
}

impl ReadModel {
    /// Whether a user is currently signed in.
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some() && self.session.is_some()
    }

    fn clear_auth(&mut self) {
        self.user = None;
        self.session = None;
        self.profile = None;
    }
}

/// Process-wide session/identity store.
///
/// Constructed once at process start via [`SessionStore::new`], handed
/// to whatever owns the UI tree, and torn down with
/// [`SessionStore::shutdown`] (or by dropping the last `Arc`), which
/// stops the event listener.
pub struct SessionStore {
    provider: Arc<dyn AuthProvider>,
    read_model: watch::Sender<ReadModel>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionStore {
    /// Create the store and start listening for provider auth events.
    pub fn new(provider: Arc<dyn AuthProvider>) -> Arc<Self> {
        let (read_model, _) = watch::channel(ReadModel::default());
        let store = Arc::new(Self {
            provider,
            read_model,
            listener: Mutex::new(None),
        });

        let events = store.provider.subscribe_events();
        let handle = tokio::spawn(listen(Arc::downgrade(&store), events));
        *store.listener.lock() = Some(handle);

        store
    }

    /// Stop the event listener. Idempotent.
    pub fn shutdown(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
    }

    // ── Read side ───────────────────────────────────────────────

    /// Subscribe to read-model changes.
    pub fn subscribe(&self) -> watch::Receiver<ReadModel> {
        self.read_model.subscribe()
    }

    /// Current read-model snapshot.
    pub fn snapshot(&self) -> ReadModel {
        self.read_model.borrow().clone()
    }

    /// Whether a user is currently signed in.
    pub fn is_authenticated(&self) -> bool {
        self.read_model.borrow().is_authenticated()
    }

    /// The only code path that mutates the read model. One call, one
    /// atomic transition from the observers' point of view.
    fn commit(&self, apply: impl FnOnce(&mut ReadModel)) {
        self.read_model.send_modify(apply);
    }

    // ── Imperative operations ───────────────────────────────────

    /// Probe the platform for a persisted session and settle the read
    /// model. Idempotent: once initialized, returns without a remote
    /// call. Never leaves the store loading — a probe failure, profile
    /// failure, or timeout all resolve to logged-out with no error
    /// (the user just lands on the login screen).
    pub async fn initialize(&self) {
        let already = self.read_model.borrow().is_initialized;
        if already {
            return;
        }

        self.commit(|m| m.is_loading = true);

        let probe = tokio::time::timeout(
            std::time::Duration::from_secs(INIT_TIMEOUT_SECS),
            self.provider.get_current_session(),
        )
        .await;

        let restored = match probe {
            Ok(Ok(Some((identity, session)))) => {
                match self.provider.read_profile(&identity.id).await {
                    Ok(profile) => Some((identity, session, profile)),
                    Err(err) => {
                        tracing::warn!(error = %err, "Session restore: profile fetch failed, treating as logged out");
                        None
                    }
                }
            }
            Ok(Ok(None)) => None,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "Session probe failed, treating as logged out");
                None
            }
            Err(_) => {
                tracing::warn!("Session probe timed out after {INIT_TIMEOUT_SECS}s, treating as logged out");
                None
            }
        };

        match restored {
            Some((identity, session, profile)) => {
                tracing::info!(account = %identity.id, "Session restored");
                self.commit(move |m| {
                    m.user = Some(identity);
                    m.session = Some(session);
                    m.profile = Some(profile);
                    m.is_loading = false;
                    m.is_initialized = true;
                });
            }
            None => self.commit(|m| {
                m.clear_auth();
                m.is_loading = false;
                m.is_initialized = true;
            }),
        }
    }

    /// Sign in with email + password.
    ///
    /// Resolves in all cases; failure is observed through the read
    /// model's `error`, never as a rejection. A failure of any step —
    /// credentials, transport, profile fetch — leaves the previous
    /// identity/session/profile untouched.
    pub async fn login(&self, email: &str, password: &str) {
        self.commit(|m| {
            m.is_loading = true;
            m.error = None;
        });

        let outcome = async {
            let (identity, session) = self.provider.sign_in(email, password).await?;
            let profile = self.provider.read_profile(&identity.id).await?;
            Ok::<_, AuthError>((identity, session, profile))
        }
        .await;

        match outcome {
            Ok((identity, session, profile)) => {
                tracing::info!(account = %identity.id, "Login succeeded");
                self.commit(move |m| {
                    m.user = Some(identity);
                    m.session = Some(session);
                    m.profile = Some(profile);
                    m.is_loading = false;
                    m.is_initialized = true;
                    m.error = None;
                });
            }
            Err(err) => {
                tracing::info!(error = %err, "Login failed");
                self.commit(move |m| {
                    m.error = Some(err.to_string());
                    m.is_loading = false;
                    m.is_initialized = true;
                });
            }
        }
    }

    /// Create an account, write its profile row, and sign in.
    ///
    /// If the account is created but the profile insert fails, the
    /// operation reports failure and commits no local auth state;
    /// the orphaned remote account is an accepted edge case the user
    /// resolves by retrying.
    pub async fn signup(&self, email: &str, password: &str, draft: NewProfile) {
        self.commit(|m| {
            m.is_loading = true;
            m.error = None;
        });

        let outcome = async {
            let (identity, session) = self.provider.sign_up(email, password, &draft).await?;
            let row = draft.into_row(&identity.id);
            self.provider.write_profile(&row).await?;
            Ok::<_, AuthError>((identity, session, row))
        }
        .await;

        match outcome {
            Ok((identity, session, profile)) => {
                tracing::info!(account = %identity.id, "Signup succeeded");
                self.commit(move |m| {
                    m.user = Some(identity);
                    m.session = Some(session);
                    m.profile = Some(profile);
                    m.is_loading = false;
                    m.is_initialized = true;
                    m.error = None;
                });
            }
            Err(err) => {
                tracing::info!(error = %err, "Signup failed");
                self.commit(move |m| {
                    m.error = Some(err.to_string());
                    m.is_loading = false;
                    m.is_initialized = true;
                });
            }
        }
    }

    /// Sign out. The remote call is best-effort: a stuck "logged in"
    /// screen is worse than an un-synced remote session, so local state
    /// clears no matter what the platform answers.
    pub async fn logout(&self) {
        if let Err(err) = self.provider.sign_out().await {
            tracing::warn!(error = %err, "Remote sign-out failed, clearing local state anyway");
        }

        self.commit(|m| {
            m.clear_auth();
            m.is_loading = false;
            m.is_initialized = true;
            m.error = None;
        });
    }

    /// Patch the signed-in user's profile remotely, then merge the same
    /// fields into the local row without a re-fetch round trip.
    ///
    /// Unlike login/signup this surfaces failure to the caller — the
    /// edit form shows its own inline error — and a remote rejection
    /// leaves the local profile unmodified.
    pub async fn update_profile(&self, updates: ProfileUpdate) -> Result<(), AuthError> {
        let account_id = self
            .read_model
            .borrow()
            .user
            .as_ref()
            .map(|u| u.id.clone())
            .ok_or(AuthError::NotAuthenticated)?;

        self.provider.patch_profile(&account_id, &updates).await?;

        self.commit(move |m| {
            // The signed-in account may have changed while the patch
            // was in flight (pushed sign-in); only merge into the row
            // the patch was addressed to.
            if m.user.as_ref().map(|u| u.id.as_str()) != Some(account_id.as_str()) {
                return;
            }
            if let Some(profile) = m.profile.as_mut() {
                profile.apply(&updates);
            }
        });
        Ok(())
    }

    /// Clear the shared error message. No other side effect.
    pub fn clear_error(&self) {
        self.commit(|m| m.error = None);
    }

    // ── Pushed-event reconciliation ─────────────────────────────

    /// Apply one provider event to the read model. This is the same
    /// commit path the imperative operations use, so whichever producer
    /// fires, observers only ever see whole transitions.
    async fn apply_event(&self, event: AuthEvent) {
        match event {
            AuthEvent::SignedIn { identity, session } => {
                tracing::debug!(account = %identity.id, "SignedIn event");
                // Always re-fetch: this event may come from a sign-in
                // that never went through login(), and even when it
                // didn't, the fetched row is at least as fresh as the
                // one a racing login committed.
                match self.provider.read_profile(&identity.id).await {
                    Ok(profile) => self.commit(move |m| {
                        m.user = Some(identity);
                        m.session = Some(session);
                        m.profile = Some(profile);
                        m.is_loading = false;
                        m.is_initialized = true;
                    }),
                    Err(err) => {
                        tracing::warn!(account = %identity.id, error = %err,
                            "SignedIn event but profile fetch failed, clearing auth state");
                        self.commit(move |m| {
                            m.clear_auth();
                            m.is_loading = false;
                            m.is_initialized = true;
                            m.error = Some(err.to_string());
                        });
                    }
                }
            }
            AuthEvent::SignedOut => {
                tracing::debug!("SignedOut event");
                self.commit(|m| {
                    m.clear_auth();
                    m.is_loading = false;
                    m.is_initialized = true;
                    m.error = None;
                });
            }
            AuthEvent::TokenRefreshed { session } => {
                tracing::debug!("TokenRefreshed event");
                self.commit(move |m| {
                    // Only meaningful while signed in; a refresh that
                    // raced a logout is dropped to keep user/session
                    // paired.
                    if m.user.is_some() {
                        m.session = Some(session);
                    }
                });
            }
        }
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Event-listener loop. Holds only a `Weak` back-reference so the task
/// cannot keep the store alive past its owner.
async fn listen(store: Weak<SessionStore>, mut events: broadcast::Receiver<AuthEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let Some(store) = store.upgrade() else { break };
                store.apply_event(event).await;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Auth event receiver lagged, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::memory::MemoryProvider;
    use chrono::NaiveDate;
    use std::time::Duration;

    const EMAIL: &str = "a@x.com";
    const PASSWORD: &str = "secret1";

    fn draft() -> NewProfile {
        NewProfile {
            full_name: "Alex Kim".into(),
            sobriety_start_date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            interest_tags: vec!["mindfulness".into()],
            preferences: serde_json::json!({"daily_reminder": true}),
        }
    }

    /// Provider with one registered account + profile row.
    fn seeded_provider() -> Arc<MemoryProvider> {
        let provider = MemoryProvider::new();
        provider.register_with_profile(EMAIL, PASSWORD, draft());
        Arc::new(provider)
    }

    /// Wait until the read model satisfies `pred`, with a hard timeout
    /// so a broken listener fails the test instead of hanging it.
    async fn settle(
        rx: &mut watch::Receiver<ReadModel>,
        pred: impl FnMut(&ReadModel) -> bool,
    ) -> ReadModel {
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(pred))
            .await
            .expect("read model did not settle in time")
            .expect("store dropped")
            .clone()
    }

    // ── initialize ──────────────────────────────────────────────

    #[tokio::test]
    async fn initialize_without_session_settles_logged_out() {
        let store = SessionStore::new(Arc::new(MemoryProvider::new()));
        store.initialize().await;

        let m = store.snapshot();
        assert!(m.user.is_none());
        assert!(m.session.is_none());
        assert!(m.profile.is_none());
        assert!(!m.is_loading);
        assert!(m.is_initialized);
        assert!(m.error.is_none());
    }

    #[tokio::test]
    async fn initialize_restores_persisted_session() {
        let provider = seeded_provider();
        let (identity, session) = provider.mint_session(EMAIL);
        provider.seed_session(identity.clone(), session);

        let store = SessionStore::new(provider);
        store.initialize().await;

        let m = store.snapshot();
        assert_eq!(m.user.as_ref().unwrap().id, identity.id);
        assert!(m.session.is_some());
        assert_eq!(m.profile.as_ref().unwrap().full_name, "Alex Kim");
        assert!(m.is_initialized);
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let provider = seeded_provider();
        let store = SessionStore::new(provider.clone());

        store.initialize().await;
        store.initialize().await;

        assert_eq!(provider.session_probe_calls(), 1);
        assert!(store.snapshot().is_initialized);
    }

    #[tokio::test]
    async fn initialize_survives_probe_failure() {
        let provider = seeded_provider();
        provider.fail_session_probe(true);

        let store = SessionStore::new(provider);
        store.initialize().await;

        let m = store.snapshot();
        assert!(!m.is_loading);
        assert!(m.is_initialized);
        assert!(m.user.is_none());
        // Startup failures are invisible: the user just sees the login screen.
        assert!(m.error.is_none());
    }

    #[tokio::test]
    async fn initialize_survives_profile_fetch_failure() {
        let provider = seeded_provider();
        let (identity, session) = provider.mint_session(EMAIL);
        provider.seed_session(identity, session);
        provider.fail_profile_reads(true);

        let store = SessionStore::new(provider);
        store.initialize().await;

        let m = store.snapshot();
        assert!(m.user.is_none());
        assert!(m.session.is_none());
        assert!(m.is_initialized);
        assert!(m.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_timeout_settles_logged_out() {
        let provider = seeded_provider();
        let (identity, session) = provider.mint_session(EMAIL);
        provider.seed_session(identity, session);
        // The platform accepts the probe and never answers.
        provider.hang_session_probe(true);

        let store = SessionStore::new(provider);
        store.initialize().await;

        let m = store.snapshot();
        assert!(m.user.is_none());
        assert!(m.session.is_none());
        assert!(!m.is_loading);
        assert!(m.is_initialized);
        assert!(m.error.is_none());
    }

    // ── login ───────────────────────────────────────────────────

    #[tokio::test]
    async fn login_populates_read_model() {
        let store = SessionStore::new(seeded_provider());
        store.login(EMAIL, PASSWORD).await;

        let m = store.snapshot();
        assert!(m.is_authenticated());
        assert_eq!(m.user.as_ref().unwrap().email, EMAIL);
        assert_eq!(m.profile.as_ref().unwrap().id, m.user.as_ref().unwrap().id);
        assert!(!m.is_loading);
        assert!(m.is_initialized);
        assert!(m.error.is_none());
    }

    #[tokio::test]
    async fn login_with_bad_credentials_sets_error() {
        let store = SessionStore::new(seeded_provider());
        store.login(EMAIL, "wrong-password").await;

        let m = store.snapshot();
        assert!(!m.is_authenticated());
        assert_eq!(m.error.as_deref(), Some("Invalid email or password"));
        assert!(!m.is_loading);
        assert!(m.is_initialized);
    }

    #[tokio::test]
    async fn login_with_missing_profile_does_not_half_authenticate() {
        let provider = MemoryProvider::new();
        provider.register(EMAIL, PASSWORD); // account but no profile row
        let store = SessionStore::new(Arc::new(provider));

        store.login(EMAIL, PASSWORD).await;

        let m = store.snapshot();
        assert!(m.user.is_none());
        assert!(m.session.is_none());
        assert!(m.profile.is_none());
        assert_eq!(m.error.as_deref(), Some("No profile found for this account"));
        assert!(m.is_initialized);
    }

    #[tokio::test]
    async fn failed_relogin_keeps_previous_identity() {
        let store = SessionStore::new(seeded_provider());
        store.login(EMAIL, PASSWORD).await;
        let before = store.snapshot();

        store.login("other@x.com", "whatever").await;

        let m = store.snapshot();
        assert_eq!(m.user, before.user);
        assert_eq!(m.session, before.session);
        assert_eq!(m.profile, before.profile);
        assert!(m.error.is_some());
    }

    #[tokio::test]
    async fn login_clears_stale_error() {
        let store = SessionStore::new(seeded_provider());
        store.login(EMAIL, "wrong").await;
        assert!(store.snapshot().error.is_some());

        store.login(EMAIL, PASSWORD).await;
        assert!(store.snapshot().error.is_none());
    }

    // ── signup ──────────────────────────────────────────────────

    #[tokio::test]
    async fn signup_creates_profile_and_authenticates() {
        let provider = Arc::new(MemoryProvider::new());
        let store = SessionStore::new(provider.clone());

        store.signup("new@x.com", "fresh-pw", draft()).await;

        let m = store.snapshot();
        assert!(m.is_authenticated());
        let profile = m.profile.unwrap();
        assert_eq!(profile.full_name, "Alex Kim");
        assert_eq!(profile.id, m.user.unwrap().id);
        // The row reached the remote table too.
        assert!(provider.stored_profile(&profile.id).is_some());
    }

    #[tokio::test]
    async fn signup_profile_write_failure_leaves_no_local_state() {
        let provider = Arc::new(MemoryProvider::new());
        provider.fail_profile_writes(true);
        let store = SessionStore::new(provider.clone());

        store.signup("new@x.com", "fresh-pw", draft()).await;

        let m = store.snapshot();
        assert!(m.user.is_none());
        assert!(m.session.is_none());
        assert!(m.profile.is_none());
        assert!(m.error.is_some());
        assert!(!m.is_loading);
    }

    #[tokio::test]
    async fn signup_duplicate_email_sets_error() {
        let store = SessionStore::new(seeded_provider());
        store.signup(EMAIL, "another-pw", draft()).await;

        let m = store.snapshot();
        assert!(!m.is_authenticated());
        assert!(m.error.as_deref().unwrap().contains("already exists"));
    }

    // ── logout ──────────────────────────────────────────────────

    #[tokio::test]
    async fn logout_clears_state() {
        let store = SessionStore::new(seeded_provider());
        store.login(EMAIL, PASSWORD).await;
        assert!(store.is_authenticated());

        store.logout().await;

        let m = store.snapshot();
        assert!(!m.is_authenticated());
        assert!(m.profile.is_none());
        assert!(m.error.is_none());
        assert!(m.is_initialized);
    }

    #[tokio::test]
    async fn logout_clears_even_when_remote_sign_out_fails() {
        let provider = seeded_provider();
        let store = SessionStore::new(provider.clone());
        store.login(EMAIL, PASSWORD).await;

        provider.fail_sign_out(true);
        store.logout().await;

        let m = store.snapshot();
        assert!(!m.is_authenticated());
        assert!(m.error.is_none());
    }

    // ── update_profile ──────────────────────────────────────────

    #[tokio::test]
    async fn update_profile_requires_authentication() {
        let store = SessionStore::new(seeded_provider());
        let err = store
            .update_profile(ProfileUpdate {
                full_name: Some("B".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::NotAuthenticated);
    }

    #[tokio::test]
    async fn update_profile_merges_locally_without_refetch() {
        let provider = seeded_provider();
        let store = SessionStore::new(provider.clone());
        store.login(EMAIL, PASSWORD).await;
        let reads_before = provider.profile_read_calls();

        store
            .update_profile(ProfileUpdate {
                full_name: Some("Alex K.".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let m = store.snapshot();
        assert_eq!(m.profile.as_ref().unwrap().full_name, "Alex K.");
        // Optimistic merge: no re-fetch round trip.
        assert_eq!(provider.profile_read_calls(), reads_before);
    }

    #[tokio::test]
    async fn update_profile_remote_failure_keeps_local_row() {
        let provider = seeded_provider();
        let store = SessionStore::new(provider.clone());
        store.login(EMAIL, PASSWORD).await;
        let before = store.snapshot().profile.unwrap();

        provider.fail_patches(true);
        let result = store
            .update_profile(ProfileUpdate {
                full_name: Some("Changed".into()),
                ..Default::default()
            })
            .await;

        assert!(result.is_err());
        assert_eq!(store.snapshot().profile.unwrap(), before);
    }

    #[tokio::test]
    async fn update_profile_racing_account_switch_does_not_cross_merge() {
        let provider = seeded_provider();
        let second = provider.register_with_profile(
            "b@x.com",
            "secret2",
            NewProfile {
                full_name: "Brooke Lee".into(),
                ..draft()
            },
        );
        let first = provider.mint_session(EMAIL).0.id;
        let store = SessionStore::new(provider.clone());
        store.login(EMAIL, PASSWORD).await;

        // Freeze the patch mid-flight, after the remote call started
        // but before the local merge commits.
        provider.hold_patches(true);
        let patch = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .update_profile(ProfileUpdate {
                        full_name: Some("Alex K.".into()),
                        ..Default::default()
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        // A different account signs in while the patch is parked.
        let (identity, session) = provider.mint_session("b@x.com");
        store.apply_event(AuthEvent::SignedIn { identity, session }).await;

        provider.release_patches();
        patch.await.unwrap().unwrap();

        // The first account's edit reached its remote row...
        assert_eq!(
            provider.stored_profile(&first).unwrap().full_name,
            "Alex K."
        );
        // ...but never merged into the account now signed in.
        let m = store.snapshot();
        assert_eq!(m.user.as_ref().unwrap().id, second);
        assert_eq!(m.profile.as_ref().unwrap().full_name, "Brooke Lee");
    }

    // ── clear_error ─────────────────────────────────────────────

    #[tokio::test]
    async fn clear_error_resets_only_the_error() {
        let store = SessionStore::new(seeded_provider());
        store.login(EMAIL, "wrong").await;
        assert!(store.snapshot().error.is_some());

        store.clear_error();

        let m = store.snapshot();
        assert!(m.error.is_none());
        assert!(m.is_initialized);
    }

    // ── pushed events ───────────────────────────────────────────

    #[tokio::test]
    async fn signed_out_event_clears_read_model() {
        let provider = seeded_provider();
        let store = SessionStore::new(provider.clone());
        store.login(EMAIL, PASSWORD).await;
        let mut rx = store.subscribe();

        provider.push_signed_out();

        let m = settle(&mut rx, |m| m.user.is_none()).await;
        assert!(m.session.is_none());
        assert!(m.profile.is_none());
        assert!(m.error.is_none());
    }

    #[tokio::test]
    async fn signed_in_event_fetches_profile_without_login() {
        // Magic-link style sign-in: the event is the only trigger.
        let provider = seeded_provider();
        let store = SessionStore::new(provider.clone());
        let mut rx = store.subscribe();

        let (identity, session) = provider.mint_session(EMAIL);
        provider.push_signed_in(identity.clone(), session);

        let m = settle(&mut rx, |m| m.user.is_some()).await;
        assert_eq!(m.user.as_ref().unwrap().id, identity.id);
        assert_eq!(m.profile.as_ref().unwrap().id, identity.id);
        assert!(m.is_initialized);
        assert!(provider.profile_read_calls() >= 1);
    }

    #[tokio::test]
    async fn signed_in_event_with_failing_profile_fetch_clears_and_errors() {
        let provider = seeded_provider();
        let store = SessionStore::new(provider.clone());
        let (identity, session) = provider.mint_session(EMAIL);

        provider.fail_profile_reads(true);
        store
            .apply_event(AuthEvent::SignedIn { identity, session })
            .await;

        let m = store.snapshot();
        assert!(m.user.is_none());
        assert!(m.session.is_none());
        assert!(m.error.is_some());
        assert!(m.is_initialized);
    }

    #[tokio::test]
    async fn token_refresh_replaces_session_only() {
        let provider = seeded_provider();
        let store = SessionStore::new(provider.clone());
        store.login(EMAIL, PASSWORD).await;

        let before = store.snapshot();
        let (_, fresh) = provider.mint_session(EMAIL);
        store
            .apply_event(AuthEvent::TokenRefreshed {
                session: fresh.clone(),
            })
            .await;

        let m = store.snapshot();
        assert_eq!(m.session.unwrap(), fresh);
        assert_eq!(m.user, before.user);
        // Profile is bit-for-bit what it was.
        assert_eq!(m.profile, before.profile);
    }

    #[tokio::test]
    async fn token_refresh_while_logged_out_is_ignored() {
        let provider = seeded_provider();
        let store = SessionStore::new(provider.clone());
        store.initialize().await;

        let (_, fresh) = provider.mint_session(EMAIL);
        store
            .apply_event(AuthEvent::TokenRefreshed { session: fresh })
            .await;

        let m = store.snapshot();
        assert!(m.session.is_none());
        assert!(m.user.is_none());
    }

    #[tokio::test]
    async fn signed_out_event_on_clear_model_is_harmless() {
        let store = SessionStore::new(seeded_provider());
        store.initialize().await;

        store.apply_event(AuthEvent::SignedOut).await;

        let m = store.snapshot();
        assert!(m.user.is_none());
        assert!(m.is_initialized);
    }

    // ── atomicity ───────────────────────────────────────────────

    #[tokio::test]
    async fn observers_never_see_partial_commits() {
        let store = SessionStore::new(seeded_provider());
        let mut rx = store.subscribe();

        let observer = tokio::spawn(async move {
            let mut states = Vec::new();
            loop {
                if rx.changed().await.is_err() {
                    break;
                }
                let m = rx.borrow().clone();
                let done = !m.is_loading && m.is_authenticated();
                states.push(m);
                if done {
                    break;
                }
            }
            states
        });

        store.initialize().await;
        store.login(EMAIL, PASSWORD).await;

        let states = tokio::time::timeout(Duration::from_secs(2), observer)
            .await
            .expect("observer did not finish")
            .unwrap();

        assert!(!states.is_empty());
        for m in &states {
            // Identity and session appear and disappear together.
            assert_eq!(m.user.is_some(), m.session.is_some());
            // A visible profile always belongs to the visible user.
            if let (Some(user), Some(profile)) = (&m.user, &m.profile) {
                assert_eq!(profile.id, user.id);
            }
        }
        assert!(states.last().unwrap().is_authenticated());
    }

    #[tokio::test]
    async fn loading_flag_clears_after_every_operation() {
        let store = SessionStore::new(seeded_provider());

        store.initialize().await;
        assert!(!store.snapshot().is_loading);

        store.login(EMAIL, "wrong").await;
        assert!(!store.snapshot().is_loading);

        store.login(EMAIL, PASSWORD).await;
        assert!(!store.snapshot().is_loading);

        store.logout().await;
        assert!(!store.snapshot().is_loading);
    }

    #[tokio::test]
    async fn shutdown_stops_the_listener() {
        let provider = seeded_provider();
        let store = SessionStore::new(provider.clone());
        store.login(EMAIL, PASSWORD).await;

        store.shutdown();
        // Events pushed after shutdown no longer reach the store.
        provider.push_signed_out();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(store.is_authenticated());
    }
}
