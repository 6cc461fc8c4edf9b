// ABOUTME: Strategies that share storage with LEFT: LINKED, COMMON and CONVERT_LINKED
// ABOUTME: LINKED/COMMON keep locations; CONVERT_LINKED moves an existing linked table

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::schema_only::{build_right_definition, build_right_sql};
use super::{ddl, require_left, DataStrategy, TableContext};
use crate::config::DataStrategyKind;
use crate::error::MirrorError;
use crate::model::{Environment, TableMirror};

/// RIGHT reads LEFT data in place and must never purge it.
pub struct LinkedStrategy;

/// Both clusters sit on the same storage; RIGHT owns the table at the same location.
pub struct CommonStrategy;

/// Turns a previously LINKED RIGHT table into one that owns data at its translated location.
pub struct ConvertLinkedStrategy;

#[async_trait]
impl DataStrategy for LinkedStrategy {
    fn kind(&self) -> DataStrategyKind {
        DataStrategyKind::Linked
    }

    fn build_definition(&self, ctx: &TableContext<'_>, table: &mut TableMirror) -> Result<()> {
        require_left(table)?;
        if table.left().map(|l| l.is_transactional()).unwrap_or(false) {
            bail!("{} is transactional and can't be linked", table.name);
        }
        build_right_definition(ctx, table)?;
        let right = table.environment_table_mut(Environment::Right);
        right.convert_to_external();
        ddl::upsert_property(&mut right.definition, ddl::EXTERNAL_PURGE, "false");
        // Partitions stay where LEFT has them.
        if let Some(left) = table.left().cloned() {
            table.environment_table_mut(Environment::Right).partitions = left.partitions;
        }
        Ok(())
    }

    fn build_sql(&self, ctx: &TableContext<'_>, table: &mut TableMirror) -> Result<()> {
        if !ddl::begin_right_sql(ctx, table) {
            return Ok(());
        }
        let name = table.name.clone();
        let right = table.environment_table_mut(Environment::Right);
        let create = right.create_statement();
        right.add_sql("Creating linked table", create);
        if right.is_partitioned() {
            if right.partitions.is_empty() {
                right.add_sql("Discovering partitions", ddl::msck_repair(&name));
            } else {
                let adds: Vec<String> = right
                    .partitions
                    .iter()
                    .map(|(spec, location)| ddl::add_partition(&name, spec, location))
                    .collect();
                for add in adds {
                    right.add_sql("Linking partition", add);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DataStrategy for CommonStrategy {
    fn kind(&self) -> DataStrategyKind {
        DataStrategyKind::Common
    }

    fn build_definition(&self, ctx: &TableContext<'_>, table: &mut TableMirror) -> Result<()> {
        build_right_definition(ctx, table)
    }

    fn build_sql(&self, ctx: &TableContext<'_>, table: &mut TableMirror) -> Result<()> {
        build_right_sql(ctx, table)
    }
}

#[async_trait]
impl DataStrategy for ConvertLinkedStrategy {
    fn kind(&self) -> DataStrategyKind {
        DataStrategyKind::ConvertLinked
    }

    fn build_definition(&self, ctx: &TableContext<'_>, table: &mut TableMirror) -> Result<()> {
        require_left(table)?;
        let right_exists = table
            .environment_table(Environment::Right)
            .map(|r| r.exists && r.is_defined())
            .unwrap_or(false);
        if !right_exists {
            return Err(anyhow::Error::new(MirrorError::MissingDataPoint(format!(
                "{} has no linked table on RIGHT to convert",
                table.name
            ))));
        }
        let location = ddl::translate_table_location(ctx, table)?;
        let partitions = if ctx.config.evaluate_partition_location {
            ddl::translate_partitions(ctx, table)?
        } else {
            Vec::new()
        };
        let right = table.environment_table_mut(Environment::Right);
        if let Some(location) = location {
            right.set_location(&location);
        }
        ddl::upsert_property(&mut right.definition, ddl::EXTERNAL_PURGE, "true");
        right.partitions = partitions.into_iter().collect();
        Ok(())
    }

    fn build_sql(&self, ctx: &TableContext<'_>, table: &mut TableMirror) -> Result<()> {
        let name = table.name.clone();
        let target_db = ctx.target_database();
        let evaluate = ctx.config.evaluate_partition_location;
        let right = table.environment_table_mut(Environment::Right);
        let Some(location) = right.location() else {
            bail!("RIGHT definition of {} has no location", name);
        };
        right.add_sql("Selecting database", ddl::use_database(&target_db));
        right.add_sql("Moving table location", ddl::set_location(&name, &location));
        right.add_sql(
            "Taking ownership of the data",
            ddl::set_property(&name, ddl::EXTERNAL_PURGE, "true"),
        );
        if evaluate {
            let moves: Vec<String> = right
                .partitions
                .iter()
                .map(|(spec, loc)| ddl::set_partition_location(&name, spec, loc))
                .collect();
            for stmt in moves {
                right.add_sql("Moving partition location", stmt);
            }
        } else if right.is_partitioned() {
            right.add_sql("Discovering partitions", ddl::msck_repair(&name));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::GlobalLocationMap;
    use crate::model::DBMirror;
    use crate::testing;

    #[test]
    fn test_linked_keeps_location_and_disables_purge() {
        let config = testing::config(DataStrategyKind::Linked);
        let (translator, recorder) = testing::translator(&config, GlobalLocationMap::default());
        let db = DBMirror::new("sales");
        let ctx = TableContext {
            config: &config,
            translator: &translator,
            database: &db,
        };
        let mut table = testing::external_table("sales", "orders", "hdfs://ns1/data/orders");
        LinkedStrategy.build_definition(&ctx, &mut table).unwrap();
        LinkedStrategy.build_sql(&ctx, &mut table).unwrap();

        let right = table.environment_table(Environment::Right).unwrap();
        assert_eq!(right.location().as_deref(), Some("hdfs://ns1/data/orders"));
        assert!(right
            .definition
            .iter()
            .any(|l| l.contains("'external.table.purge'='false'")));
        assert!(recorder.recorded().is_empty());
    }

    #[test]
    fn test_linked_rejects_acid() {
        let mut config = testing::config(DataStrategyKind::Linked);
        config.migrate_acid = true;
        let (translator, _) = testing::translator(&config, GlobalLocationMap::default());
        let db = DBMirror::new("sales");
        let ctx = TableContext {
            config: &config,
            translator: &translator,
            database: &db,
        };
        let mut table = testing::managed_table("sales", "acid", "hdfs://ns1/wh/sales.db/acid", true);
        assert!(LinkedStrategy.build_definition(&ctx, &mut table).is_err());
    }

    #[test]
    fn test_convert_linked_moves_location() {
        let config = testing::config(DataStrategyKind::ConvertLinked);
        let (translator, _) = testing::translator(&config, GlobalLocationMap::default());
        let db = DBMirror::new("sales");
        let ctx = TableContext {
            config: &config,
            translator: &translator,
            database: &db,
        };
        let mut table = testing::external_table("sales", "orders", "hdfs://ns1/data/orders");
        let left = table.left().cloned().unwrap();
        let right = table.environment_table_mut(Environment::Right);
        right.definition = left.definition;
        right.exists = true;

        ConvertLinkedStrategy.build_definition(&ctx, &mut table).unwrap();
        ConvertLinkedStrategy.build_sql(&ctx, &mut table).unwrap();
        let right = table.environment_table(Environment::Right).unwrap();
        assert_eq!(
            right.sql[1].action,
            "ALTER TABLE orders SET LOCATION 'hdfs://ns2/data/orders'"
        );
    }

    #[test]
    fn test_convert_linked_needs_right_table() {
        let config = testing::config(DataStrategyKind::ConvertLinked);
        let (translator, _) = testing::translator(&config, GlobalLocationMap::default());
        let db = DBMirror::new("sales");
        let ctx = TableContext {
            config: &config,
            translator: &translator,
            database: &db,
        };
        let mut table = testing::external_table("sales", "orders", "hdfs://ns1/data/orders");
        assert!(ConvertLinkedStrategy.build_definition(&ctx, &mut table).is_err());
    }
}
