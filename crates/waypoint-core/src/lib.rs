//! Business logic and port definitions for waypoint.
//!
//! This crate defines the "ports" (`StateStore`, `StepWorker`) that the
//! infrastructure layer and the embedding application implement, plus the
//! scheduling core that drives them. It depends only on `waypoint-types` --
//! never on `waypoint-infra` or any filesystem code.

pub mod repository;
pub mod workflow;
