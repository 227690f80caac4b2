//! Session state management.

pub mod store;

pub use store::{ReadModel, SessionStore};
