// ABOUTME: SCHEMA_ONLY: recreate the table on RIGHT at its translated location
// ABOUTME: Data is moved separately (distcp plans) or not at all

use anyhow::Result;
use async_trait::async_trait;

use super::{ddl, require_left, DataStrategy, TableContext};
use crate::config::DataStrategyKind;
use crate::model::{Environment, TableMirror};

pub struct SchemaOnlyStrategy;

/// RIGHT definition from LEFT with the translated table and partition locations.
pub(crate) fn build_right_definition(ctx: &TableContext<'_>, table: &mut TableMirror) -> Result<()> {
    require_left(table)?;
    let definition = match table.left() {
        Some(left) => ddl::target_definition(ctx, left),
        None => Vec::new(),
    };
    let location = ddl::translate_table_location(ctx, table)?;
    let partitions = if ctx.config.evaluate_partition_location || ctx.config.is_distcp() {
        ddl::translate_partitions(ctx, table)?
    } else {
        Vec::new()
    };

    let right = table.environment_table_mut(Environment::Right);
    right.definition = definition;
    if let Some(location) = location {
        right.set_location(&location);
    }
    right.partitions = partitions.into_iter().collect();
    Ok(())
}

/// `USE`, `CREATE`, then partitions: explicit when evaluated, discovered otherwise.
pub(crate) fn build_right_sql(ctx: &TableContext<'_>, table: &mut TableMirror) -> Result<()> {
    if !ddl::begin_right_sql(ctx, table) {
        return Ok(());
    }
    let name = table.name.clone();
    let evaluate = ctx.config.evaluate_partition_location;
    let right = table.environment_table_mut(Environment::Right);
    let create = right.create_statement();
    right.add_sql("Creating table", create);
    if right.is_partitioned() {
        if evaluate && !right.partitions.is_empty() {
            let adds: Vec<String> = right
                .partitions
                .iter()
                .map(|(spec, location)| ddl::add_partition(&name, spec, location))
                .collect();
            for add in adds {
                right.add_sql("Adding partition", add);
            }
        } else {
            right.add_sql("Discovering partitions", ddl::msck_repair(&name));
        }
    }
    Ok(())
}

#[async_trait]
impl DataStrategy for SchemaOnlyStrategy {
    fn kind(&self) -> DataStrategyKind {
        DataStrategyKind::SchemaOnly
    }

    fn build_definition(&self, ctx: &TableContext<'_>, table: &mut TableMirror) -> Result<()> {
        build_right_definition(ctx, table)
    }

    fn build_sql(&self, ctx: &TableContext<'_>, table: &mut TableMirror) -> Result<()> {
        build_right_sql(ctx, table)
    }
}
