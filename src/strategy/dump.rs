// ABOUTME: DUMP: capture LEFT definitions as a replayable script; nothing is applied

use anyhow::Result;
use async_trait::async_trait;

use super::{ddl, require_left, DataStrategy, TableContext};
use crate::config::DataStrategyKind;
use crate::gateway::SqlGateway;
use crate::model::{Environment, TableMirror};

pub struct DumpStrategy;

#[async_trait]
impl DataStrategy for DumpStrategy {
    fn kind(&self) -> DataStrategyKind {
        DataStrategyKind::Dump
    }

    fn build_definition(&self, _ctx: &TableContext<'_>, table: &mut TableMirror) -> Result<()> {
        require_left(table)
    }

    fn build_sql(&self, ctx: &TableContext<'_>, table: &mut TableMirror) -> Result<()> {
        let db = ctx.database.name.clone();
        let left = table.environment_table_mut(Environment::Left);
        left.add_sql("Selecting database", ddl::use_database(&db));
        let create = left.create_statement();
        left.add_sql("Creating table", create);
        Ok(())
    }

    async fn execute(&self, _sql: &dyn SqlGateway, _table: &mut TableMirror) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::GlobalLocationMap;
    use crate::model::DBMirror;
    use crate::testing;

    #[tokio::test]
    async fn test_dump_builds_left_only_and_applies_nothing() {
        let config = testing::config(DataStrategyKind::Dump);
        let (translator, _) = testing::translator(&config, GlobalLocationMap::default());
        let db = DBMirror::new("sales");
        let ctx = TableContext {
            config: &config,
            translator: &translator,
            database: &db,
        };
        let mut table = testing::external_table("sales", "orders", "hdfs://ns1/data/orders");
        DumpStrategy.build_definition(&ctx, &mut table).unwrap();
        DumpStrategy.build_sql(&ctx, &mut table).unwrap();
        assert!(table.environment_table(Environment::Right).is_none());
        assert_eq!(table.left().unwrap().sql.len(), 2);

        let sql = testing::InMemorySql::default();
        DumpStrategy.execute(&sql, &mut table).await.unwrap();
        assert!(sql.executed().is_empty());
    }
}
