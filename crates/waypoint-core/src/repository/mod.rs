//! Storage port definitions.

pub mod state;
