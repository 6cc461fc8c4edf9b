// ABOUTME: Per-run mutable state: stage statuses, coded errors/warnings and operation counters
// ABOUTME: Shared across units as Arc<RunStatus>; stage transitions only move forward

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::MirrorError;
use crate::messages::{MessageCode, Messages};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    ValidateConfig,
    ValidateConnections,
    Connect,
    GatherDatabases,
    LoadEnvironmentVars,
    CollectDatabases,
    CollectTables,
    BuildGlm,
    BuildDatabaseDdl,
    LoadTableMetadata,
    BuildTableDdl,
    ValidateEnvironmentSets,
    ExecuteDatabaseDdl,
    ExecuteTableDdl,
    SaveReports,
}

impl Stage {
    pub const ALL: [Stage; 15] = [
        Stage::ValidateConfig,
        Stage::ValidateConnections,
        Stage::Connect,
        Stage::GatherDatabases,
        Stage::LoadEnvironmentVars,
        Stage::CollectDatabases,
        Stage::CollectTables,
        Stage::BuildGlm,
        Stage::BuildDatabaseDdl,
        Stage::LoadTableMetadata,
        Stage::BuildTableDdl,
        Stage::ValidateEnvironmentSets,
        Stage::ExecuteDatabaseDdl,
        Stage::ExecuteTableDdl,
        Stage::SaveReports,
    ];

    /// Stages that only make sense against live environments.
    pub fn needs_connection(&self) -> bool {
        matches!(
            self,
            Stage::ValidateConnections
                | Stage::Connect
                | Stage::GatherDatabases
                | Stage::LoadEnvironmentVars
                | Stage::CollectDatabases
                | Stage::CollectTables
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Errored,
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Completed | StageStatus::Errored | StageStatus::Skipped
        )
    }

    fn can_move_to(&self, next: StageStatus) -> bool {
        match (self, next) {
            (StageStatus::NotStarted, StageStatus::InProgress) => true,
            (StageStatus::NotStarted, StageStatus::Skipped) => true,
            (StageStatus::InProgress, next) => next.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct Counter {
    count: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    skipped: AtomicU64,
    issues: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub count: u64,
    pub successes: u64,
    pub failures: u64,
    pub skipped: u64,
    pub issues: u64,
}

impl Counter {
    pub fn incr_count(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_issues(&self) {
        self.issues.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            count: self.count.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            issues: self.issues.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
pub struct OperationStatistics {
    pub databases: Counter,
    pub tables: Counter,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    pub databases: CounterSnapshot,
    pub tables: CounterSnapshot,
}

impl OperationStatistics {
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            databases: self.databases.snapshot(),
            tables: self.tables.snapshot(),
        }
    }
}

#[derive(Debug, Default)]
pub struct RunStatus {
    stages: Mutex<BTreeMap<Stage, StageStatus>>,
    errors: Mutex<Messages>,
    warnings: Mutex<Messages>,
    pub statistics: OperationStatistics,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunStatusReport {
    pub stages: BTreeMap<Stage, StageStatus>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub statistics: StatisticsSnapshot,
    pub return_code: i128,
}

impl RunStatus {
    pub fn new() -> Self {
        let stages = Stage::ALL
            .iter()
            .map(|stage| (*stage, StageStatus::NotStarted))
            .collect();
        Self {
            stages: Mutex::new(stages),
            ..Default::default()
        }
    }

    pub fn stage(&self, stage: Stage) -> StageStatus {
        self.stages
            .lock()
            .map(|stages| stages.get(&stage).copied().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Moves a stage forward; re-entering or moving back is rejected.
    pub fn set_stage(&self, stage: Stage, status: StageStatus) -> Result<(), MirrorError> {
        let mut stages = self
            .stages
            .lock()
            .map_err(|_| MirrorError::Stage("stage map lock poisoned".to_string()))?;
        let current = stages.get(&stage).copied().unwrap_or_default();
        if !current.can_move_to(status) {
            return Err(MirrorError::Stage(format!(
                "{:?} cannot move from {:?} to {:?}",
                stage, current, status
            )));
        }
        stages.insert(stage, status);
        Ok(())
    }

    pub fn any_stage_errored(&self) -> bool {
        self.stages
            .lock()
            .map(|stages| stages.values().any(|s| *s == StageStatus::Errored))
            .unwrap_or(true)
    }

    pub fn add_error(&self, code: MessageCode, args: Vec<String>) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.set(code, args);
        }
    }

    pub fn add_warning(&self, code: MessageCode, args: Vec<String>) {
        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.set(code, args);
        }
    }

    pub fn has_error(&self, code: MessageCode) -> bool {
        self.errors.lock().map(|e| e.contains(code)).unwrap_or(false)
    }

    pub fn has_warning(&self, code: MessageCode) -> bool {
        self.warnings.lock().map(|w| w.contains(code)).unwrap_or(false)
    }

    pub fn has_errors(&self) -> bool {
        self.errors.lock().map(|e| !e.is_empty()).unwrap_or(true)
    }

    pub fn return_code(&self) -> i128 {
        self.errors.lock().map(|e| e.return_code()).unwrap_or(-1)
    }

    pub fn report(&self) -> RunStatusReport {
        let stages = self.stages.lock().map(|s| s.clone()).unwrap_or_default();
        let errors = self.errors.lock().map(|e| e.messages()).unwrap_or_default();
        let warnings = self.warnings.lock().map(|w| w.messages()).unwrap_or_default();
        RunStatusReport {
            stages,
            errors,
            warnings,
            statistics: self.statistics.snapshot(),
            return_code: self.return_code(),
        }
    }
}
