// ABOUTME: Error categories raised by the migration core
// ABOUTME: Each variant maps to one failure class the pipeline reacts to differently

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorError {
    /// Detected before the run starts; the run never begins.
    Configuration(String),
    /// An environment could not be reached.
    Connection(String),
    /// Warehouse or location facts needed for a decision are absent.
    MissingDataPoint(String),
    /// A location can't be reconciled against the location map.
    Mismatch(String),
    /// A stage was asked to move backwards or re-enter a state.
    Stage(String),
    /// A statement failed while being applied to an environment.
    Execution(String),
}

impl MirrorError {
    /// Whether a table unit hitting this error should take the whole run down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MirrorError::Connection(_))
    }
}

impl fmt::Display for MirrorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MirrorError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            MirrorError::Connection(msg) => write!(f, "Connection error: {}", msg),
            MirrorError::MissingDataPoint(msg) => write!(f, "Missing data point: {}", msg),
            MirrorError::Mismatch(msg) => write!(f, "Location mismatch: {}", msg),
            MirrorError::Stage(msg) => write!(f, "Stage error: {}", msg),
            MirrorError::Execution(msg) => write!(f, "Execution error: {}", msg),
        }
    }
}

impl std::error::Error for MirrorError {}

/// Pulls the [`MirrorError`] category out of an `anyhow` chain, if there is one.
/// A fatal cause anywhere in the chain outranks the outer categories.
pub fn category(err: &anyhow::Error) -> Option<&MirrorError> {
    let mut categories = err.chain().filter_map(|cause| cause.downcast_ref::<MirrorError>());
    let first = categories.next()?;
    if first.is_fatal() {
        return Some(first);
    }
    Some(categories.find(|c| c.is_fatal()).unwrap_or(first))
}
