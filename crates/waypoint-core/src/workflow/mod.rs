//! Workflow engine core: readiness, parallel execution and durable checkpointing.
//!
//! This module contains the "brain" of the engine:
//! - `resolver` -- which steps may run now, and who depends on whom
//! - `validation` -- graph checks performed before a run starts
//! - `worker` -- the collaborator contract for executing one step
//! - `retry` -- retry decisions and exponential backoff
//! - `executor` -- bounded-parallel batch execution with timeouts
//! - `checkpoint` -- the checkpoint policy engine
//! - `engine` -- the resumable execution loop
//! - `health` -- run health reporting

pub mod checkpoint;
pub mod engine;
pub mod executor;
pub mod health;
pub mod resolver;
pub mod retry;
pub mod validation;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;
