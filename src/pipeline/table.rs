// ABOUTME: Per-table units of work: metadata load, definition/SQL build and execution
// ABOUTME: Plus the cross-table checks that run once every build is in

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::context::{UnitContext, UnitResult};
use crate::config::{Config, DataStrategyKind};
use crate::gateway::queries::PART_LOCATIONS;
use crate::gateway::QueryDefinitions;
use crate::location::paths;
use crate::messages::MessageCode;
use crate::model::{Conversion, DBMirror, Environment, PhaseState, TableMirror};
use crate::strategy::TableContext;

async fn show_create(ctx: &UnitContext, environment: Environment, qualified: &str) -> Result<Vec<String>> {
    let sql = ctx.gateways.sql()?;
    let mut session = sql
        .session(environment)
        .await
        .with_context(|| format!("Failed to open a {} session", environment))?;
    let rows = session
        .execute(&format!("SHOW CREATE TABLE {}", qualified))
        .await
        .with_context(|| format!("Failed to read the {} definition of {}", environment, qualified))?;
    Ok(rows.into_iter().filter_map(|r| r.into_iter().next()).collect())
}

/// Partition name to location: from the metastore when one is wired in, else listed
/// through SQL and placed under the table location.
async fn load_partitions(ctx: &UnitContext, table: &TableMirror) -> Result<BTreeMap<String, String>> {
    if let Some(metastore) = &ctx.gateways.metastore {
        let backend = ctx
            .config
            .cluster(Environment::Left)
            .and_then(|c| c.metastore_backend)
            .unwrap_or_default();
        let queries = QueryDefinitions::for_backend(backend);
        if let Some(definition) = queries.get(PART_LOCATIONS) {
            let rows = metastore
                .query(
                    Environment::Left,
                    definition,
                    &[table.database.clone(), table.name.clone()],
                )
                .await
                .with_context(|| format!("Failed to load partitions of {}.{}", table.database, table.name))?;
            return Ok(rows
                .into_iter()
                .filter_map(|row| match row.as_slice() {
                    [name, location, ..] => Some((name.clone(), location.clone())),
                    _ => None,
                })
                .collect());
        }
    }

    let base = table.left().and_then(|l| l.location()).unwrap_or_default();
    let sql = ctx.gateways.sql()?;
    let mut session = sql.session(Environment::Left).await?;
    let rows = session
        .execute(&format!("SHOW PARTITIONS {}.{}", table.database, table.name))
        .await
        .with_context(|| format!("Failed to list partitions of {}.{}", table.database, table.name))?;
    Ok(rows
        .into_iter()
        .filter_map(|r| r.into_iter().next())
        .map(|spec| {
            let location = paths::join(&base, &spec);
            (spec, location)
        })
        .collect())
}

async fn load_live(ctx: &UnitContext, table: &mut TableMirror) -> Result<()> {
    let qualified = format!("{}.{}", table.database, table.name);
    let definition = show_create(ctx, Environment::Left, &qualified).await?;
    if definition.is_empty() {
        anyhow::bail!("{} has no definition on LEFT", qualified);
    }
    let left = table.environment_table_mut(Environment::Left);
    left.exists = true;
    left.definition = definition;

    if table.left().map(|l| l.is_partitioned()).unwrap_or(false) {
        let partitions = load_partitions(ctx, table).await?;
        table.environment_table_mut(Environment::Left).partitions = partitions;
    }

    let right_exists = table
        .environment_table(Environment::Right)
        .map(|r| r.exists)
        .unwrap_or(false);
    if right_exists {
        let target = format!("{}.{}", ctx.config.resolve_database_name(&table.database), table.name);
        let definition = show_create(ctx, Environment::Right, &target).await?;
        table.environment_table_mut(Environment::Right).definition = definition;
    }
    Ok(())
}

/// Loads LEFT (and existing RIGHT) facts for one table and decides whether it takes part.
pub async fn load_metadata(ctx: UnitContext, mut table: TableMirror) -> (TableMirror, UnitResult) {
    ctx.status.statistics.tables.incr_count();
    if !ctx.filter.accepts(&table.name) {
        return (table, UnitResult::Skip("filtered out".to_string()));
    }
    if !ctx.preloaded {
        if let Err(e) = load_live(&ctx, &mut table).await {
            return (table, UnitResult::from_error(&e));
        }
    }

    let Some(left) = table.left() else {
        return (table, UnitResult::Error("no LEFT facts".to_string()));
    };
    if left.is_view() {
        return (table, UnitResult::Skip("views are not migrated".to_string()));
    }
    if left.is_transactional() && !ctx.config.migrate_acid {
        return (table, UnitResult::Skip("transactional table and `migrate_acid` is off".to_string()));
    }

    if ctx.config.collect_stats {
        if let (Some(probe), Some(location)) = (&ctx.gateways.probe, left.location()) {
            match probe.content_summary(&location).await {
                Ok(stats) => table.environment_table_mut(Environment::Left).statistics = Some(stats),
                Err(e) => {
                    warn!(table = %table.name, error = %e, "Could not collect statistics");
                    table.add_issue(Environment::Left, format!("Statistics unavailable: {}", e));
                }
            }
        }
    }
    debug!(database = %table.database, table = %table.name, "Metadata loaded");
    (table, UnitResult::Success)
}

/// Builds target definitions and statements for one table.
pub async fn build(ctx: UnitContext, database: Arc<DBMirror>, mut table: TableMirror) -> (TableMirror, UnitResult) {
    table.phase_state = PhaseState::CalculatingSql;
    let table_ctx = TableContext {
        config: &ctx.config,
        translator: &ctx.translator,
        database: &database,
    };
    let result = ctx
        .strategy
        .build_definition(&table_ctx, &mut table)
        .and_then(|_| ctx.strategy.build_sql(&table_ctx, &mut table));
    match result {
        Ok(()) => {
            if table.remapped {
                table.add_issue(Environment::Right, MessageCode::TableLocationRemapped.template());
            }
            table.phase_state = PhaseState::CalculatedSql;
            (table, UnitResult::Success)
        }
        Err(e) => {
            table.phase_state = PhaseState::Error;
            (table, UnitResult::from_error(&e))
        }
    }
}

/// Applies one table's statements.
pub async fn execute(ctx: UnitContext, mut table: TableMirror) -> (TableMirror, UnitResult) {
    let sql = match ctx.gateways.sql() {
        Ok(sql) => sql.clone(),
        Err(e) => return (table, UnitResult::from_error(&e)),
    };
    table.phase_state = PhaseState::ApplyingSql;
    match ctx.strategy.execute(sql.as_ref(), &mut table).await {
        Ok(()) => {
            table.phase_state = PhaseState::Processed;
            (table, UnitResult::Success)
        }
        Err(e) => {
            table.phase_state = PhaseState::Error;
            (table, UnitResult::from_error(&e))
        }
    }
}

/// Every built table needs a target definition and no two may land on the same
/// location. Offending tables get errors and are excluded. Returns the collision count.
pub fn validate_environment_sets(config: &Config, conversion: &mut Conversion) -> usize {
    let strategy = config.data_strategy;
    let check_collisions = strategy != DataStrategyKind::Dump && !strategy.keeps_location();

    let mut claims: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
    for db in conversion.databases.values_mut() {
        for table in db.tables.values_mut().filter(|t| t.is_active()) {
            let et = table.environment_table(Environment::Right);
            if strategy != DataStrategyKind::Dump && !et.map(|et| et.is_defined()).unwrap_or(false) {
                table.add_error(Environment::Right, "No target definition was built");
                table.exclude("no target definition");
                continue;
            }
            if !check_collisions {
                continue;
            }
            let Some(et) = et else { continue };
            let mut locations: Vec<String> = et.partitions.values().cloned().collect();
            locations.extend(et.location());
            for location in locations {
                claims
                    .entry(location)
                    .or_default()
                    .push((db.name.clone(), table.name.clone()));
            }
        }
    }

    let mut collisions = 0;
    for (location, owners) in claims {
        let mut distinct = owners.clone();
        distinct.sort();
        distinct.dedup();
        if distinct.len() < 2 {
            continue;
        }
        collisions += 1;
        warn!(location = %location, tables = distinct.len(), "Target location claimed by more than one table");
        for (db, name) in distinct {
            if let Some(table) = conversion.database_mut(&db).and_then(|d| d.tables.get_mut(&name)) {
                table.add_error(Environment::Right, format!("Target location {} is shared with another table", location));
                table.exclude("target location collision");
            }
        }
    }
    collisions
}
