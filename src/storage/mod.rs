//! Persisted feed/subscription state on SQLite.
//!
//! `registry.rs` holds the subscription registry and watermark store,
//! `settings.rs` the small key/value table for runtime overrides.

mod registry;
mod schema;
mod settings;
mod types;

pub use schema::Database;
pub use types::{DatabaseError, Feed, RoomFeed, Subscription, WatchOutcome};
