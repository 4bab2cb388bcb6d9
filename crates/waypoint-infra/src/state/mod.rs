//! Versioned run-state snapshots on the local filesystem.

pub mod cleanup;
pub mod codec;
pub mod migration;
pub mod store;

pub use store::FileStateStore;
