//! Deterministic in-memory auth provider.
//!
//! Stands in for the hosted platform in tests and local demos: accounts
//! and profile rows live in HashMaps, sessions are minted locally, and
//! pushed events only fire when a test calls one of the `push_*`
//! helpers — never spontaneously — so interleavings are fully under the
//! test's control.
//!
//! Per-call failure toggles (`fail_*`) simulate outages at exact
//! points: the session probe at startup, profile reads after a
//! successful auth, profile inserts during signup, patches, sign-out.
//! Two suspension controls go further than a fast error:
//! `hang_session_probe` parks the probe forever (startup-timeout
//! tests), and `hold_patches`/`release_patches` freeze a patch
//! mid-flight so a test can interleave a pushed event with it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};

use super::{AuthEvent, AuthProvider, AuthSession, Identity};
use crate::error::AuthError;
use crate::profile::{NewProfile, Profile, ProfileUpdate};

/// Minted session lifetime.
const SESSION_TTL_HOURS: i64 = 1;

/// Event channel capacity; tests push a handful of events at most.
const EVENT_CHANNEL_CAPACITY: usize = 32;

struct StoredAccount {
    id: String,
    password: String,
}

/// In-memory implementation of [`AuthProvider`].
pub struct MemoryProvider {
    /// Registered accounts, keyed by email.
    accounts: Mutex<HashMap<String, StoredAccount>>,
    /// Profile rows, keyed by account id.
    profiles: Mutex<HashMap<String, Profile>>,
    /// The session a previous "run" left behind, returned by
    /// `get_current_session`.
    session: Mutex<Option<(Identity, AuthSession)>>,
    events: broadcast::Sender<AuthEvent>,

    /// How many times `get_current_session` has been called.
    session_probe_calls: AtomicUsize,
    /// How many times `read_profile` has been called.
    profile_read_calls: AtomicUsize,

    fail_session_probe: AtomicBool,
    fail_profile_reads: AtomicBool,
    fail_profile_writes: AtomicBool,
    fail_patches: AtomicBool,
    fail_sign_out: AtomicBool,

    /// When set, `get_current_session` never resolves.
    hang_session_probe: AtomicBool,
    /// When set, `patch_profile` parks until [`release_patches`](Self::release_patches).
    hold_patches: AtomicBool,
    patch_release: Notify,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    /// Create an empty provider: no accounts, no profiles, no session.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            accounts: Mutex::new(HashMap::new()),
            profiles: Mutex::new(HashMap::new()),
            session: Mutex::new(None),
            events,
            session_probe_calls: AtomicUsize::new(0),
            profile_read_calls: AtomicUsize::new(0),
            fail_session_probe: AtomicBool::new(false),
            fail_profile_reads: AtomicBool::new(false),
            fail_profile_writes: AtomicBool::new(false),
            fail_patches: AtomicBool::new(false),
            fail_sign_out: AtomicBool::new(false),
            hang_session_probe: AtomicBool::new(false),
            hold_patches: AtomicBool::new(false),
            patch_release: Notify::new(),
        }
    }

    // ── Seeding ─────────────────────────────────────────────────

    /// Register an account and return its minted id.
    pub fn register(&self, email: &str, password: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.accounts.lock().insert(
            email.to_string(),
            StoredAccount {
                id: id.clone(),
                password: password.to_string(),
            },
        );
        id
    }

    /// Register an account and seed its profile row in one step.
    pub fn register_with_profile(&self, email: &str, password: &str, draft: NewProfile) -> String {
        let id = self.register(email, password);
        self.insert_profile(draft.into_row(&id));
        id
    }

    /// Insert or replace a profile row directly.
    pub fn insert_profile(&self, row: Profile) {
        self.profiles.lock().insert(row.id.clone(), row);
    }

    /// Read back a profile row (test assertions on the remote side).
    pub fn stored_profile(&self, account_id: &str) -> Option<Profile> {
        self.profiles.lock().get(account_id).cloned()
    }

    /// Seed the session that `get_current_session` will report, as if
    /// a previous run had persisted it.
    pub fn seed_session(&self, identity: Identity, session: AuthSession) {
        *self.session.lock() = Some((identity, session));
    }

    /// Mint a session for a registered email without going through
    /// `sign_in` (used to build pushed-event payloads).
    pub fn mint_session(&self, email: &str) -> (Identity, AuthSession) {
        let accounts = self.accounts.lock();
        let account = accounts.get(email).expect("email not registered");
        let identity = Identity {
            id: account.id.clone(),
            email: email.to_string(),
        };
        (identity, new_session())
    }

    // ── Failure toggles ─────────────────────────────────────────

    pub fn fail_session_probe(&self, fail: bool) {
        self.fail_session_probe.store(fail, Ordering::Relaxed);
    }

    pub fn fail_profile_reads(&self, fail: bool) {
        self.fail_profile_reads.store(fail, Ordering::Relaxed);
    }

    pub fn fail_profile_writes(&self, fail: bool) {
        self.fail_profile_writes.store(fail, Ordering::Relaxed);
    }

    pub fn fail_patches(&self, fail: bool) {
        self.fail_patches.store(fail, Ordering::Relaxed);
    }

    pub fn fail_sign_out(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::Relaxed);
    }

    /// Make `get_current_session` suspend forever (a hung platform at
    /// startup, as opposed to a fast error).
    pub fn hang_session_probe(&self, hang: bool) {
        self.hang_session_probe.store(hang, Ordering::Relaxed);
    }

    /// Park the next `patch_profile` call until
    /// [`release_patches`](Self::release_patches).
    pub fn hold_patches(&self, hold: bool) {
        self.hold_patches.store(hold, Ordering::Relaxed);
    }

    /// Let parked `patch_profile` calls proceed.
    pub fn release_patches(&self) {
        self.hold_patches.store(false, Ordering::Relaxed);
        self.patch_release.notify_waiters();
    }

    // ── Counters ────────────────────────────────────────────────

    pub fn session_probe_calls(&self) -> usize {
        self.session_probe_calls.load(Ordering::Relaxed)
    }

    pub fn profile_read_calls(&self) -> usize {
        self.profile_read_calls.load(Ordering::Relaxed)
    }

    // ── Event push (the test is the remote emitter) ─────────────

    pub fn push_signed_in(&self, identity: Identity, session: AuthSession) {
        let _ = self.events.send(AuthEvent::SignedIn { identity, session });
    }

    pub fn push_signed_out(&self) {
        let _ = self.events.send(AuthEvent::SignedOut);
    }

    pub fn push_token_refreshed(&self, session: AuthSession) {
        let _ = self.events.send(AuthEvent::TokenRefreshed { session });
    }
}

fn new_session() -> AuthSession {
    AuthSession {
        access_token: format!("access-{}", uuid::Uuid::new_v4()),
        refresh_token: format!("refresh-{}", uuid::Uuid::new_v4()),
        expires_at: Utc::now() + Duration::hours(SESSION_TTL_HOURS),
    }
}

#[async_trait::async_trait]
impl AuthProvider for MemoryProvider {
    async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(Identity, AuthSession), AuthError> {
        let identity = {
            let accounts = self.accounts.lock();
            let account = accounts
                .get(email.trim())
                .ok_or(AuthError::InvalidCredentials)?;
            if account.password != password {
                return Err(AuthError::InvalidCredentials);
            }
            Identity {
                id: account.id.clone(),
                email: email.trim().to_string(),
            }
        };

        let session = new_session();
        *self.session.lock() = Some((identity.clone(), session.clone()));
        Ok((identity, session))
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        _draft: &NewProfile,
    ) -> Result<(Identity, AuthSession), AuthError> {
        let email = email.trim();
        let mut accounts = self.accounts.lock();
        if accounts.contains_key(email) {
            return Err(AuthError::Validation(
                "An account with this email already exists".into(),
            ));
        }

        let id = uuid::Uuid::new_v4().to_string();
        accounts.insert(
            email.to_string(),
            StoredAccount {
                id: id.clone(),
                password: password.to_string(),
            },
        );
        drop(accounts);

        let identity = Identity {
            id,
            email: email.to_string(),
        };
        let session = new_session();
        *self.session.lock() = Some((identity.clone(), session.clone()));
        Ok((identity, session))
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        *self.session.lock() = None;
        if self.fail_sign_out.load(Ordering::Relaxed) {
            return Err(AuthError::Transport("sign-out rejected".into()));
        }
        Ok(())
    }

    async fn get_current_session(&self) -> Result<Option<(Identity, AuthSession)>, AuthError> {
        self.session_probe_calls.fetch_add(1, Ordering::Relaxed);
        if self.hang_session_probe.load(Ordering::Relaxed) {
            std::future::pending::<()>().await;
        }
        if self.fail_session_probe.load(Ordering::Relaxed) {
            return Err(AuthError::Transport("session probe failed".into()));
        }
        Ok(self.session.lock().clone())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn read_profile(&self, account_id: &str) -> Result<Profile, AuthError> {
        self.profile_read_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_profile_reads.load(Ordering::Relaxed) {
            return Err(AuthError::Transport("profile read failed".into()));
        }
        self.profiles
            .lock()
            .get(account_id)
            .cloned()
            .ok_or_else(|| AuthError::ProfileNotFound(account_id.to_string()))
    }

    async fn write_profile(&self, row: &Profile) -> Result<(), AuthError> {
        if self.fail_profile_writes.load(Ordering::Relaxed) {
            return Err(AuthError::Transport("profile insert failed".into()));
        }
        self.profiles.lock().insert(row.id.clone(), row.clone());
        Ok(())
    }

    async fn patch_profile(
        &self,
        account_id: &str,
        updates: &ProfileUpdate,
    ) -> Result<(), AuthError> {
        while self.hold_patches.load(Ordering::Relaxed) {
            self.patch_release.notified().await;
        }
        if self.fail_patches.load(Ordering::Relaxed) {
            return Err(AuthError::Transport("profile update failed".into()));
        }
        let mut profiles = self.profiles.lock();
        let row = profiles
            .get_mut(account_id)
            .ok_or_else(|| AuthError::ProfileNotFound(account_id.to_string()))?;
        row.apply(updates);
        Ok(())
    }
}
