// ABOUTME: Library root for hms-mirror
// ABOUTME: Exports the location translation engine, strategies and the migration pipeline

pub mod config;
pub mod error;
pub mod gateway;
pub mod location;
pub mod messages;
pub mod model;
pub mod pipeline;
pub mod strategy;

#[cfg(test)]
pub mod testing;

pub use config::Config;
pub use error::MirrorError;
pub use pipeline::{Coordinator, RunOutcome};
