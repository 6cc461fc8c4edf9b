// ABOUTME: What a table unit of work gets handed, and what it hands back
// ABOUTME: Units report SUCCESS/ERROR/FATAL/SKIP instead of propagating errors

use std::sync::Arc;

use crate::config::Config;
use crate::error;
use crate::gateway::Gateways;
use crate::location::Translator;
use crate::model::RunStatus;
use crate::strategy::DataStrategy;

use super::discovery::TableFilter;

/// Read-only inputs shared by every table unit of one run.
#[derive(Clone)]
pub struct UnitContext {
    pub config: Arc<Config>,
    pub status: Arc<RunStatus>,
    pub gateways: Gateways,
    pub strategy: Arc<dyn DataStrategy>,
    pub translator: Arc<Translator>,
    pub filter: Arc<TableFilter>,
    /// Tables come from a pre-loaded conversion; nothing is read live.
    pub preloaded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitResult {
    Success,
    /// The table is excluded; the run goes on.
    Error(String),
    /// The whole run fails.
    Fatal(String),
    Skip(String),
}

impl UnitResult {
    pub fn from_error(err: &anyhow::Error) -> Self {
        let message = format!("{:#}", err);
        match error::category(err) {
            Some(category) if category.is_fatal() => UnitResult::Fatal(message),
            _ => UnitResult::Error(message),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UnitResult::Success)
    }
}
