//! Session and identity core for the Sunrise recovery companion app.
//!
//! The mobile client is mostly thin CRUD screens over a hosted
//! platform; the one piece with real design stakes lives here: a
//! process-wide [`SessionStore`] that reconciles imperative user
//! actions (login, signup, logout, profile edits), the platform's
//! startup session probe, and pushed auth events that can interleave
//! with all of the above.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use sunrise_session::{SessionStore, SupabaseConfig, SupabaseProvider};
//!
//! # async fn run() -> Result<(), sunrise_session::AuthError> {
//! let config = SupabaseConfig::from_env().expect("SUPABASE_URL / SUPABASE_ANON_KEY");
//! let provider = Arc::new(SupabaseProvider::new(config)?);
//! let store = SessionStore::new(provider);
//!
//! // Settle the startup session probe, then watch for changes.
//! store.initialize().await;
//! let read_model = store.subscribe();
//!
//! store.login("a@x.com", "password").await;
//! if let Some(error) = &read_model.borrow().error {
//!     eprintln!("login failed: {error}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! UI layers observe the store through [`SessionStore::subscribe`] and
//! never mutate its fields directly. Swap
//! [`provider::memory::MemoryProvider`] in for tests.

pub mod error;
pub mod profile;
pub mod provider;
pub mod session;

pub use error::AuthError;
pub use profile::{NewProfile, Profile, ProfileUpdate, Role};
pub use provider::supabase::{SupabaseConfig, SupabaseProvider};
pub use provider::{AuthEvent, AuthProvider, AuthSession, Identity};
pub use session::{ReadModel, SessionStore};
