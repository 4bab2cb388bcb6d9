//! Infrastructure layer for waypoint.
//!
//! Contains the filesystem implementation of the `StateStore` trait defined in
//! `waypoint-core` (versioned, checksummed, optionally gzipped snapshots with
//! schema migration and retention cleanup), SHA-256 content hashing, and the
//! `config.toml` loader.

pub mod config;
pub mod crypto;
pub mod state;
