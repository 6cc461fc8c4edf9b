// ABOUTME: HYBRID: per table, EXPORT_IMPORT for small tables and SQL for large or transactional ones

use anyhow::Result;
use async_trait::async_trait;

use super::{DataStrategy, ExportImportStrategy, SqlStrategy, TableContext};
use crate::config::DataStrategyKind;
use crate::gateway::SqlGateway;
use crate::model::TableMirror;

pub struct HybridStrategy {
    partition_limit: usize,
    sql: SqlStrategy,
    export_import: ExportImportStrategy,
}

impl HybridStrategy {
    pub fn new(partition_limit: usize) -> Self {
        Self {
            partition_limit,
            sql: SqlStrategy,
            export_import: ExportImportStrategy,
        }
    }

    fn choose(&self, table: &TableMirror) -> DataStrategyKind {
        let Some(left) = table.left() else {
            return DataStrategyKind::ExportImport;
        };
        if left.is_transactional() || left.partitions.len() > self.partition_limit {
            DataStrategyKind::Sql
        } else {
            DataStrategyKind::ExportImport
        }
    }

    fn delegate(&self, table: &TableMirror) -> &dyn DataStrategy {
        match table.strategy {
            Some(DataStrategyKind::Sql) => &self.sql,
            _ => &self.export_import,
        }
    }
}

#[async_trait]
impl DataStrategy for HybridStrategy {
    fn kind(&self) -> DataStrategyKind {
        DataStrategyKind::Hybrid
    }

    fn build_definition(&self, ctx: &TableContext<'_>, table: &mut TableMirror) -> Result<()> {
        table.strategy = Some(self.choose(table));
        self.delegate(table).build_definition(ctx, table)
    }

    fn build_sql(&self, ctx: &TableContext<'_>, table: &mut TableMirror) -> Result<()> {
        self.delegate(table).build_sql(ctx, table)
    }

    async fn execute(&self, sql: &dyn SqlGateway, table: &mut TableMirror) -> Result<()> {
        self.delegate(table).execute(sql, table).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::GlobalLocationMap;
    use crate::model::{DBMirror, Environment};
    use crate::testing;

    #[test]
    fn test_partition_limit_picks_sql() {
        let config = testing::config(DataStrategyKind::Hybrid);
        let (translator, _) = testing::translator(&config, GlobalLocationMap::default());
        let db = DBMirror::new("sales");
        let ctx = TableContext {
            config: &config,
            translator: &translator,
            database: &db,
        };
        let hybrid = HybridStrategy::new(1);

        let mut small = testing::partitioned_table(
            "sales",
            "small",
            "hdfs://ns1/data/small",
            &[("dt=1", "hdfs://ns1/data/small/dt=1")],
        );
        hybrid.build_definition(&ctx, &mut small).unwrap();
        assert_eq!(small.strategy, Some(DataStrategyKind::ExportImport));

        let mut large = testing::partitioned_table(
            "sales",
            "large",
            "hdfs://ns1/data/large",
            &[
                ("dt=1", "hdfs://ns1/data/large/dt=1"),
                ("dt=2", "hdfs://ns1/data/large/dt=2"),
            ],
        );
        hybrid.build_definition(&ctx, &mut large).unwrap();
        hybrid.build_sql(&ctx, &mut large).unwrap();
        assert_eq!(large.strategy, Some(DataStrategyKind::Sql));
        assert!(large.environment_table(Environment::Shadow).is_some());
    }
}
