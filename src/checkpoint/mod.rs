//! Durable progress cursor for the unlock processor
//!
//! Handles:
//! - Restart recovery of the last fully processed ledger height
//! - Crash-safe replacement of the persisted value

mod store;

pub use store::CheckpointStore;
