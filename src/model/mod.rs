// ABOUTME: Run and conversion state model
// ABOUTME: Entity tree for databases/tables plus the per-run status and counters

pub mod conversion;
pub mod run_status;

pub use conversion::{
    Conversion, DBMirror, EnvironmentTable, Environment, PhaseState, SqlPair, TableMirror,
    TableStatistics, TableType,
};
pub use run_status::{OperationStatistics, RunStatus, RunStatusReport, Stage, StageStatus};
