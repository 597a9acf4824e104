//! Durable mutation queue for repsync.
//!
//! Writes made while offline are recorded here before they are replayed
//! against the remote API.
//!
//! # Design Principles
//! - Durability: records survive process restarts
//! - Segmentation: one queue segment per mutation kind, each with its own
//!   never-reused ascending id sequence
//! - Per-record atomicity: lifecycle updates are single conditional
//!   statements, and a synced record is never reverted to unsynced
//! - Versioned schema: migrations run once when the store is opened

pub mod migrations;
pub mod queue;
pub mod sqlite;

pub use queue::{MutationQueue, PendingMutation};
pub use sqlite::SqliteQueue;
