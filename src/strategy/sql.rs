// ABOUTME: SQL: RIGHT reads LEFT data through a shadow table and copies it with INSERT
// ABOUTME: Transactional sources are first staged into an external transfer table on LEFT

use anyhow::Result;
use async_trait::async_trait;

use super::{ddl, require_left, DataStrategy, TableContext};
use crate::config::DataStrategyKind;
use crate::model::{Environment, EnvironmentTable, TableMirror};

pub struct SqlStrategy;

fn export_location(ctx: &TableContext<'_>, table: &str) -> String {
    format!(
        "{}{}{}/{}",
        ctx.left_namespace(),
        ctx.config.transfer.export_base_dir,
        ctx.database.name,
        table
    )
}

/// External, non-purging copy of `definition` named `name` at `location`.
fn external_copy(definition: &[String], from: &str, name: &str, location: &str) -> EnvironmentTable {
    let mut et = EnvironmentTable::named(name);
    et.definition = definition.to_vec();
    et.convert_to_external();
    ddl::rename_in_definition(&mut et.definition, from, name);
    ddl::remove_property(&mut et.definition, "transactional");
    ddl::remove_property(&mut et.definition, "transactional_properties");
    ddl::upsert_property(&mut et.definition, ddl::EXTERNAL_PURGE, "false");
    if !et.set_location(location) {
        et.definition.push("LOCATION".to_string());
        et.definition.push(format!("  '{}'", location));
    }
    et
}

#[async_trait]
impl DataStrategy for SqlStrategy {
    fn kind(&self) -> DataStrategyKind {
        DataStrategyKind::Sql
    }

    fn build_definition(&self, ctx: &TableContext<'_>, table: &mut TableMirror) -> Result<()> {
        require_left(table)?;
        let left = table.left().cloned().unwrap_or_default();
        let name = table.name.clone();

        let definition = ddl::target_definition(ctx, &left);
        let location = ddl::translate_table_location(ctx, table)?;
        let right = table.environment_table_mut(Environment::Right);
        right.definition = definition;
        if let Some(location) = location {
            right.set_location(&location);
        }

        let shadow_name = format!("{}{}", ctx.config.transfer.shadow_prefix, name);
        let source_location = if left.is_transactional() {
            let transfer_name = format!("{}{}", ctx.config.transfer.transfer_prefix, name);
            let staged = export_location(ctx, &name);
            let transfer = external_copy(&left.definition, &name, &transfer_name, &staged);
            table.environments.insert(Environment::Transfer, transfer);
            staged
        } else {
            left.location().unwrap_or_default()
        };

        let mut shadow = external_copy(&left.definition, &name, &shadow_name, &source_location);
        if !left.is_transactional() {
            shadow.partitions = left.partitions.clone();
        }
        table.environments.insert(Environment::Shadow, shadow);
        Ok(())
    }

    fn build_sql(&self, ctx: &TableContext<'_>, table: &mut TableMirror) -> Result<()> {
        if !ddl::begin_right_sql(ctx, table) {
            return Ok(());
        }
        let name = table.name.clone();
        let source_db = ctx.database.name.clone();
        let target_db = ctx.target_database();
        let left_def = table.left().map(|l| l.definition.clone()).unwrap_or_default();
        let columns = ddl::partition_columns(&left_def);

        if let Some(transfer) = table.environments.get_mut(&Environment::Transfer) {
            let transfer_name = transfer.name.clone();
            transfer.add_sql("Selecting database", ddl::use_database(&source_db));
            let create = transfer.create_statement();
            transfer.add_sql("Creating transfer table", create);
            if !columns.is_empty() {
                transfer.add_sql(
                    "Allowing dynamic partitions",
                    "SET hive.exec.dynamic.partition.mode=nonstrict",
                );
            }
            transfer.add_sql(
                "Staging transactional data",
                ddl::insert_overwrite(&transfer_name, &name, &columns),
            );
            transfer.add_cleanup_sql("Selecting database", ddl::use_database(&source_db));
            transfer.add_cleanup_sql("Dropping transfer table", ddl::drop_table(&transfer_name));
        }

        let shadow_name = match table.environments.get_mut(&Environment::Shadow) {
            Some(shadow) => {
                let shadow_name = shadow.name.clone();
                shadow.add_sql("Selecting database", ddl::use_database(&target_db));
                let create = shadow.create_statement();
                shadow.add_sql("Creating shadow table", create);
                if !columns.is_empty() {
                    if shadow.partitions.is_empty() {
                        shadow.add_sql("Discovering shadow partitions", ddl::msck_repair(&shadow_name));
                    } else {
                        let adds: Vec<String> = shadow
                            .partitions
                            .iter()
                            .map(|(spec, loc)| ddl::add_partition(&shadow_name, spec, loc))
                            .collect();
                        for add in adds {
                            shadow.add_sql("Adding shadow partition", add);
                        }
                    }
                }
                shadow.add_cleanup_sql("Selecting database", ddl::use_database(&target_db));
                shadow.add_cleanup_sql("Dropping shadow table", ddl::drop_table(&shadow_name));
                shadow_name
            }
            None => format!("{}{}", ctx.config.transfer.shadow_prefix, name),
        };

        let right = table.environment_table_mut(Environment::Right);
        let create = right.create_statement();
        right.add_sql("Creating table", create);
        if !columns.is_empty() {
            right.add_sql(
                "Allowing dynamic partitions",
                "SET hive.exec.dynamic.partition.mode=nonstrict",
            );
        }
        right.add_sql("Copying data", ddl::insert_overwrite(&name, &shadow_name, &columns));
        Ok(())
    }
}
