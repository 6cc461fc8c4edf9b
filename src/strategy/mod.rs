// ABOUTME: Data movement strategies behind one trait, selected once per run
// ABOUTME: Each builds target definitions and statements per environment, then applies them

pub mod ddl;
pub mod dump;
pub mod export_import;
pub mod hybrid;
pub mod linked;
pub mod schema_only;
pub mod sql;
pub mod storage_migration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{Config, DataStrategyKind};
use crate::error::MirrorError;
use crate::gateway::SqlGateway;
use crate::location::Translator;
use crate::model::{DBMirror, Environment, TableMirror};

pub use dump::DumpStrategy;
pub use export_import::ExportImportStrategy;
pub use hybrid::HybridStrategy;
pub use linked::{CommonStrategy, ConvertLinkedStrategy, LinkedStrategy};
pub use schema_only::SchemaOnlyStrategy;
pub use sql::SqlStrategy;
pub use storage_migration::StorageMigrationStrategy;

/// Order statements are applied in: staging on LEFT, then the RIGHT shadow, then RIGHT.
pub const EXECUTION_ORDER: [Environment; 4] = [
    Environment::Left,
    Environment::Transfer,
    Environment::Shadow,
    Environment::Right,
];

/// Read-only inputs for one table's build.
pub struct TableContext<'a> {
    pub config: &'a Config,
    pub translator: &'a Translator,
    pub database: &'a DBMirror,
}

impl TableContext<'_> {
    pub fn target_database(&self) -> String {
        self.config.resolve_database_name(&self.database.name)
    }

    pub fn left_namespace(&self) -> String {
        self.config
            .namespace(Environment::Left)
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string()
    }
}

#[async_trait]
pub trait DataStrategy: Send + Sync {
    fn kind(&self) -> DataStrategyKind;

    /// Derives the target-side definitions (RIGHT, TRANSFER, SHADOW) from LEFT facts.
    fn build_definition(&self, ctx: &TableContext<'_>, table: &mut TableMirror) -> Result<()>;

    /// Fills the statement lists per environment.
    fn build_sql(&self, ctx: &TableContext<'_>, table: &mut TableMirror) -> Result<()>;

    /// Applies the statements, one session per environment.
    async fn execute(&self, sql: &dyn SqlGateway, table: &mut TableMirror) -> Result<()> {
        apply_statements(sql, table).await
    }
}

pub fn select(config: &Config) -> Arc<dyn DataStrategy> {
    match config.data_strategy {
        DataStrategyKind::SchemaOnly => Arc::new(SchemaOnlyStrategy),
        DataStrategyKind::Sql => Arc::new(SqlStrategy),
        DataStrategyKind::ExportImport => Arc::new(ExportImportStrategy),
        DataStrategyKind::Hybrid => Arc::new(HybridStrategy::new(config.hybrid.export_import_partition_limit)),
        DataStrategyKind::StorageMigration => Arc::new(StorageMigrationStrategy),
        DataStrategyKind::Dump => Arc::new(DumpStrategy),
        DataStrategyKind::Linked => Arc::new(LinkedStrategy),
        DataStrategyKind::Common => Arc::new(CommonStrategy),
        DataStrategyKind::ConvertLinked => Arc::new(ConvertLinkedStrategy),
    }
}

/// The LEFT definition every strategy starts from.
pub(crate) fn require_left(table: &TableMirror) -> Result<()> {
    match table.left() {
        Some(left) if left.is_defined() => Ok(()),
        _ => Err(anyhow::Error::new(MirrorError::MissingDataPoint(format!(
            "no LEFT definition for {}.{}",
            table.database, table.name
        )))),
    }
}

/// Runs each environment's statements in [`EXECUTION_ORDER`], then the clean-up lists.
/// A failing statement marks its environment failed and stops the table.
pub async fn apply_statements(sql: &dyn SqlGateway, table: &mut TableMirror) -> Result<()> {
    for environment in EXECUTION_ORDER {
        let statements = match table.environment_table(environment) {
            Some(et) if !et.sql.is_empty() => et.sql.clone(),
            _ => continue,
        };
        let mut session = sql
            .session(environment.cluster())
            .await
            .with_context(|| format!("Failed to open a {} session for {}", environment, table.name))?;
        for pair in statements {
            debug!(table = %table.name, environment = %environment, action = %pair.action, "Applying statement");
            if let Err(e) = session.execute(&pair.action).await {
                let message = format!("{}: {:#}", pair.description, e);
                let et = table.environment_table_mut(environment);
                et.failed = true;
                et.errors.push(message.clone());
                return Err(e.context(MirrorError::Execution(format!(
                    "{} on {}: {}",
                    table.name, environment, pair.description
                ))));
            }
        }
    }

    for environment in EXECUTION_ORDER {
        let statements = match table.environment_table(environment) {
            Some(et) if !et.cleanup_sql.is_empty() => et.cleanup_sql.clone(),
            _ => continue,
        };
        let mut session = sql
            .session(environment.cluster())
            .await
            .with_context(|| format!("Failed to open a {} clean-up session for {}", environment, table.name))?;
        for pair in statements {
            if let Err(e) = session.execute(&pair.action).await {
                warn!(table = %table.name, environment = %environment, error = %e, "Clean-up statement failed");
                table.add_issue(environment, format!("Clean-up `{}` failed: {}", pair.action, e));
            }
        }
    }
    Ok(())
}
