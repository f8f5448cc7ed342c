//! # circle-store
//!
//! Local storage for the Circle application, backed by SQLite.
//!
//! A synchronous [`Database`] wraps a `rusqlite::Connection` and provides
//! typed helpers for chat history and preferences. [`SqliteStore`] and
//! [`MemoryStore`] expose them through the async storage bridges the
//! controller and client consume, and [`Preferences`] layers typed,
//! observable settings on top of any preference store.

pub mod database;
pub mod memory;
pub mod messages;
pub mod migrations;
pub mod preferences;
pub mod sqlite;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use preferences::{Preferences, PreferencesSnapshot};
pub use sqlite::SqliteStore;
