// ABOUTME: EXPORT_IMPORT: EXPORT on LEFT to a staging directory, IMPORT on RIGHT from it

use anyhow::Result;
use async_trait::async_trait;

use super::{ddl, require_left, DataStrategy, TableContext};
use crate::config::DataStrategyKind;
use crate::model::{Environment, TableMirror, TableType};

pub struct ExportImportStrategy;

fn export_dir(ctx: &TableContext<'_>, table: &str) -> String {
    format!("{}{}/{}", ctx.config.transfer.export_base_dir, ctx.database.name, table)
}

#[async_trait]
impl DataStrategy for ExportImportStrategy {
    fn kind(&self) -> DataStrategyKind {
        DataStrategyKind::ExportImport
    }

    fn build_definition(&self, ctx: &TableContext<'_>, table: &mut TableMirror) -> Result<()> {
        require_left(table)?;
        let definition = table
            .left()
            .map(|left| ddl::target_definition(ctx, left))
            .unwrap_or_default();
        let location = ddl::translate_table_location(ctx, table)?;
        let right = table.environment_table_mut(Environment::Right);
        right.definition = definition;
        if let Some(location) = location {
            right.set_location(&location);
        }
        Ok(())
    }

    fn build_sql(&self, ctx: &TableContext<'_>, table: &mut TableMirror) -> Result<()> {
        if !ddl::begin_right_sql(ctx, table) {
            return Ok(());
        }
        let name = table.name.clone();
        let dir = export_dir(ctx, &name);

        let left = table.environment_table_mut(Environment::Left);
        left.add_sql("Selecting database", ddl::use_database(&ctx.database.name));
        left.add_sql("Exporting table", format!("EXPORT TABLE {} TO '{}'", name, dir));

        let source = format!("{}{}", ctx.left_namespace(), dir);
        let right = table.environment_table_mut(Environment::Right);
        let import = match (right.table_type(), right.location()) {
            (TableType::External, Some(location)) => format!(
                "IMPORT EXTERNAL TABLE {} FROM '{}' LOCATION '{}'",
                name, source, location
            ),
            (TableType::External, None) => format!("IMPORT EXTERNAL TABLE {} FROM '{}'", name, source),
            // Managed tables land in the database's managed directory.
            (TableType::Managed, _) => format!("IMPORT TABLE {} FROM '{}'", name, source),
        };
        right.add_sql("Importing table", import);
        Ok(())
    }
}
