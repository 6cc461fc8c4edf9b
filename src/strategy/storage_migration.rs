// ABOUTME: STORAGE_MIGRATION: move a table's data to new storage within the LEFT cluster
// ABOUTME: With distcp only metadata is repointed; otherwise data is rewritten through SQL

use anyhow::Result;
use async_trait::async_trait;

use super::{ddl, require_left, DataStrategy, TableContext};
use crate::config::DataStrategyKind;
use crate::model::{Environment, TableMirror};

pub struct StorageMigrationStrategy;

#[async_trait]
impl DataStrategy for StorageMigrationStrategy {
    fn kind(&self) -> DataStrategyKind {
        DataStrategyKind::StorageMigration
    }

    /// RIGHT holds the target state (same cluster, new storage); TRANSFER the staging copy.
    fn build_definition(&self, ctx: &TableContext<'_>, table: &mut TableMirror) -> Result<()> {
        require_left(table)?;
        let definition = table.left().map(|l| l.definition.clone()).unwrap_or_default();
        let location = ddl::translate_table_location(ctx, table)?;
        let partitions = if ctx.config.evaluate_partition_location || ctx.config.is_distcp() {
            ddl::translate_partitions(ctx, table)?
        } else {
            Vec::new()
        };

        let right = table.environment_table_mut(Environment::Right);
        right.definition = definition.clone();
        if let Some(location) = &location {
            right.set_location(location);
        }
        right.partitions = partitions.into_iter().collect();

        if !ctx.config.is_distcp() {
            let staged = format!("{}{}", table.name, ctx.config.transfer.storage_migration_postfix);
            let name = table.name.clone();
            let transfer = table.environment_table_mut(Environment::Transfer);
            transfer.name = staged.clone();
            transfer.definition = definition;
            ddl::rename_in_definition(&mut transfer.definition, &name, &staged);
            if let Some(location) = &location {
                transfer.set_location(location);
            }
        }
        Ok(())
    }

    fn build_sql(&self, ctx: &TableContext<'_>, table: &mut TableMirror) -> Result<()> {
        let db = ctx.database.name.clone();
        let name = table.name.clone();
        let target = table
            .environment_table(Environment::Right)
            .cloned()
            .unwrap_or_default();

        if ctx.config.is_distcp() {
            let left = table.environment_table_mut(Environment::Left);
            left.add_sql("Selecting database", ddl::use_database(&db));
            if let Some(location) = target.location() {
                left.add_sql("Moving table location", ddl::set_location(&name, &location));
            }
            for (spec, location) in &target.partitions {
                left.add_sql("Moving partition location", ddl::set_partition_location(&name, spec, location));
            }
            return Ok(());
        }

        let archived = format!("{}{}", ctx.config.transfer.transfer_prefix, name);
        let transfer = table.environment_table_mut(Environment::Transfer);
        let staged = transfer.name.clone();
        let columns = ddl::partition_columns(&transfer.definition);
        transfer.add_sql("Selecting database", ddl::use_database(&db));
        let create = transfer.create_statement();
        transfer.add_sql("Creating table at the new location", create);
        if !columns.is_empty() {
            transfer.add_sql(
                "Allowing dynamic partitions",
                "SET hive.exec.dynamic.partition.mode=nonstrict",
            );
        }
        transfer.add_sql("Copying data", ddl::insert_overwrite(&staged, &name, &columns));
        transfer.add_sql("Archiving original table", ddl::rename_table(&name, &archived));
        transfer.add_sql("Swapping in migrated table", ddl::rename_table(&staged, &name));
        transfer.add_cleanup_sql("Selecting database", ddl::use_database(&db));
        transfer.add_cleanup_sql("Dropping archived table", ddl::drop_table(&archived));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslationType;
    use crate::location::{GlobalLocationMap, TranslationEntry};
    use crate::model::{DBMirror, TableType};
    use crate::testing;

    fn storage_config(distcp: bool) -> crate::config::Config {
        let mut config = testing::config(DataStrategyKind::StorageMigration);
        config.transfer.target_namespace = Some("ofs://ozone1".to_string());
        config.transfer.storage_migration.translation_type = TranslationType::Aligned;
        config.transfer.storage_migration.distcp = distcp;
        config
    }

    #[test]
    fn test_distcp_repoints_left() {
        let config = storage_config(true);
        let (translator, recorder) = testing::translator(&config, GlobalLocationMap::default());
        let db = DBMirror::new("sales");
        let ctx = TableContext {
            config: &config,
            translator: &translator,
            database: &db,
        };
        let mut table = testing::external_table("sales", "orders", "hdfs://ns1/data/orders");
        StorageMigrationStrategy.build_definition(&ctx, &mut table).unwrap();
        StorageMigrationStrategy.build_sql(&ctx, &mut table).unwrap();

        let left = table.left().unwrap();
        assert_eq!(
            left.sql[1].action,
            "ALTER TABLE orders SET LOCATION 'ofs://ozone1/wh/ext/sales.db/orders'"
        );
        assert_eq!(recorder.levels("sales", Environment::Left).len(), 1);
        assert!(table.environment_table(Environment::Transfer).is_none());
    }

    #[test]
    fn test_sql_rewrite_through_staging_table() {
        let config = storage_config(false);
        let mut glm = GlobalLocationMap::default();
        glm.set_auto(vec![TranslationEntry {
            source: "/data".to_string(),
            target: "/lake".to_string(),
            table_type: TableType::External,
        }]);
        let (translator, _) = testing::translator(&config, glm);
        let db = DBMirror::new("sales");
        let ctx = TableContext {
            config: &config,
            translator: &translator,
            database: &db,
        };
        let mut table = testing::external_table("sales", "orders", "hdfs://ns1/data/orders");
        StorageMigrationStrategy.build_definition(&ctx, &mut table).unwrap();
        StorageMigrationStrategy.build_sql(&ctx, &mut table).unwrap();
        assert!(table.remapped);

        let transfer = table.environment_table(Environment::Transfer).unwrap();
        assert_eq!(transfer.location().as_deref(), Some("ofs://ozone1/lake/orders"));
        let actions: Vec<&str> = transfer.sql.iter().map(|p| p.action.as_str()).collect();
        assert!(actions[1].starts_with("CREATE EXTERNAL TABLE `orders_storage_migration`"));
        assert_eq!(actions[2], "INSERT OVERWRITE TABLE orders_storage_migration SELECT * FROM orders");
        assert_eq!(actions[3], "ALTER TABLE orders RENAME TO hms_mirror_transfer_orders");
        assert_eq!(actions[4], "ALTER TABLE orders_storage_migration RENAME TO orders");
        assert_eq!(transfer.cleanup_sql[1].action, "DROP TABLE IF EXISTS hms_mirror_transfer_orders");
    }
}
