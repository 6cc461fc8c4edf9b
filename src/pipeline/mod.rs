// ABOUTME: The staged migration pipeline and its per-table units of work
// ABOUTME: Discovery, database and table DDL, validation, execution and report output

pub mod context;
pub mod coordinator;
pub mod database;
pub mod discovery;
pub mod reports;
pub mod table;

pub use context::{UnitContext, UnitResult};
pub use coordinator::{Coordinator, RunOutcome};
pub use discovery::TableFilter;
