//! Shared domain types for waypoint.
//!
//! This crate contains the data model used across the engine: workflow
//! definitions, run state, step execution records, checkpoint and cleanup
//! configuration, and the persistence error type.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod workflow;
