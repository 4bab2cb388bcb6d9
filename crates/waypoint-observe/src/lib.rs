//! Observability setup for waypoint: the global tracing subscriber.

pub mod tracing_setup;
