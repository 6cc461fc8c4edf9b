// ABOUTME: Live discovery against the environments: databases, hive variables, tables and sources
// ABOUTME: Every call opens its own session and drops it before returning

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::config::Config;
use crate::gateway::queries::{DATABASE_PARTITION_LOCATIONS, DATABASE_TABLE_LOCATIONS};
use crate::gateway::{MetastoreGateway, QueryDefinitions, Row, SqlGateway};
use crate::location::GlmBuilder;
use crate::model::conversion::{COMMENT, DB_LOCATION, DB_MANAGED_LOCATION, DB_NAME, OWNER_NAME, OWNER_TYPE};
use crate::model::{DBMirror, Environment, TableType};

/// Decides which table names take part in the run.
#[derive(Debug, Clone)]
pub struct TableFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
    ignored_prefixes: Vec<String>,
    ignored_postfix: String,
}

fn compile(pattern: &Option<String>) -> Result<Option<Regex>> {
    match pattern.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        Some(p) => Ok(Some(
            Regex::new(p).with_context(|| format!("Invalid table filter `{}`", p))?,
        )),
        None => Ok(None),
    }
}

impl TableFilter {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            include: compile(&config.table_regex)?,
            exclude: compile(&config.table_exclude_regex)?,
            ignored_prefixes: [&config.transfer.transfer_prefix, &config.transfer.shadow_prefix]
                .into_iter()
                .filter(|p| !p.is_empty())
                .cloned()
                .collect(),
            ignored_postfix: config.transfer.storage_migration_postfix.clone(),
        })
    }

    pub fn accepts(&self, table: &str) -> bool {
        if self.ignored_prefixes.iter().any(|p| table.starts_with(p.as_str())) {
            return false;
        }
        if !self.ignored_postfix.is_empty() && table.ends_with(&self.ignored_postfix) {
            return false;
        }
        if let Some(include) = &self.include {
            if !include.is_match(table) {
                return false;
            }
        }
        match &self.exclude {
            Some(exclude) => !exclude.is_match(table),
            None => true,
        }
    }
}

async fn query(sql: &dyn SqlGateway, environment: Environment, statement: &str) -> Result<Vec<Row>> {
    let mut session = sql
        .session(environment)
        .await
        .with_context(|| format!("Failed to open a {} session", environment))?;
    session
        .execute(statement)
        .await
        .with_context(|| format!("`{}` failed on {}", statement, environment))
}

fn first_column(rows: Vec<Row>) -> Vec<String> {
    rows.into_iter()
        .filter_map(|row| row.into_iter().next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Configured databases, or every LEFT database matching `db_regex`.
pub async fn gather_databases(config: &Config, sql: &dyn SqlGateway) -> Result<Vec<String>> {
    if !config.databases.is_empty() {
        return Ok(config.databases.clone());
    }
    let Some(pattern) = config.db_regex.as_deref().filter(|p| !p.trim().is_empty()) else {
        return Ok(Vec::new());
    };
    let filter = Regex::new(pattern).with_context(|| format!("Invalid database filter `{}`", pattern))?;
    let names = first_column(query(sql, Environment::Left, "SHOW DATABASES").await?);
    let matched: Vec<String> = names.into_iter().filter(|n| filter.is_match(n)).collect();
    info!(filter = %pattern, count = matched.len(), "Databases matched filter");
    Ok(matched)
}

/// Parses `SET -v` output (`key=value` per row).
pub async fn load_environment_vars(sql: &dyn SqlGateway, environment: Environment) -> Result<BTreeMap<String, String>> {
    let rows = query(sql, environment, "SET -v").await?;
    Ok(first_column(rows)
        .into_iter()
        .filter_map(|line| {
            line.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .collect())
}

/// `{a=1, b=2}` as printed by `DESCRIBE DATABASE EXTENDED`.
fn parse_parameters(raw: &str) -> BTreeMap<String, String> {
    raw.trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .split(", ")
        .filter_map(|kv| kv.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

/// Newer metastores add a managed location column after the location.
fn describe_properties(row: &[String]) -> BTreeMap<String, String> {
    let column = |idx: usize| row.get(idx).map(|v| v.trim().to_string()).unwrap_or_default();
    let mut properties = BTreeMap::new();
    let (params_idx, owner_idx) = if row.len() >= 7 {
        properties.insert(DB_MANAGED_LOCATION.to_string(), column(3));
        (6, 4)
    } else {
        (5, 3)
    };
    properties.insert(DB_NAME.to_string(), column(0));
    properties.insert(COMMENT.to_string(), column(1));
    properties.insert(DB_LOCATION.to_string(), column(2));
    properties.insert(OWNER_NAME.to_string(), column(owner_idx));
    properties.insert(OWNER_TYPE.to_string(), column(owner_idx + 1));
    properties.extend(parse_parameters(&column(params_idx)));
    properties
}

/// Loads LEFT database properties and, when reachable, the RIGHT target database's.
pub async fn collect_database(config: &Config, sql: &dyn SqlGateway, db: &mut DBMirror, right_connected: bool) -> Result<()> {
    let statement = format!("DESCRIBE DATABASE EXTENDED {}", db.name);
    let rows = query(sql, Environment::Left, &statement).await?;
    let row = rows
        .first()
        .with_context(|| format!("Database {} not found on LEFT", db.name))?;
    *db.properties_mut(Environment::Left) = describe_properties(row);

    if right_connected && config.data_strategy.requires_right() {
        let target = config.resolve_database_name(&db.name);
        match query(sql, Environment::Right, &format!("DESCRIBE DATABASE EXTENDED {}", target)).await {
            Ok(rows) => {
                if let Some(row) = rows.first() {
                    *db.properties_mut(Environment::Right) = describe_properties(row);
                }
            }
            Err(e) => debug!(database = %target, error = %e, "Database not present on RIGHT"),
        }
    }
    Ok(())
}

/// Adds the accepted LEFT tables and flags the ones that already exist on RIGHT.
/// Returns how many tables were added.
pub async fn collect_tables(
    config: &Config,
    sql: &dyn SqlGateway,
    filter: &TableFilter,
    db: &mut DBMirror,
    right_connected: bool,
) -> Result<usize> {
    let names = first_column(query(sql, Environment::Left, &format!("SHOW TABLES IN {}", db.name)).await?);
    let mut added = 0;
    for name in names {
        if !filter.accepts(&name) {
            debug!(database = %db.name, table = %name, "Table filtered out");
            continue;
        }
        db.add_table(&name).environment_table_mut(Environment::Left).exists = true;
        added += 1;
    }

    if right_connected && config.data_strategy.requires_right() {
        let target = config.resolve_database_name(&db.name);
        let existing: BTreeSet<String> =
            match query(sql, Environment::Right, &format!("SHOW TABLES IN {}", target)).await {
                Ok(rows) => first_column(rows).into_iter().collect(),
                Err(e) => {
                    debug!(database = %target, error = %e, "No RIGHT tables listed");
                    BTreeSet::new()
                }
            };
        for table in db.tables.values_mut() {
            if existing.contains(&table.name) {
                table.environment_table_mut(Environment::Right).exists = true;
            }
        }
    }
    info!(database = %db.name, tables = added, "Collected tables");
    Ok(added)
}

/// Table and partition locations for one database, straight from the LEFT metastore.
pub async fn load_source_locations(
    config: &Config,
    metastore: &dyn MetastoreGateway,
    builder: &mut GlmBuilder,
    database: &str,
) -> Result<()> {
    let backend = config
        .cluster(Environment::Left)
        .and_then(|c| c.metastore_backend)
        .unwrap_or_default();
    let queries = QueryDefinitions::for_backend(backend);
    let params = vec![database.to_string()];

    if let Some(definition) = queries.get(DATABASE_TABLE_LOCATIONS) {
        let rows = metastore
            .query(Environment::Left, definition, &params)
            .await
            .with_context(|| format!("Failed to load table locations for {}", database))?;
        for row in rows {
            let [table, tbl_type, location, ..] = row.as_slice() else {
                continue;
            };
            if let Some(table_type) = TableType::from_metastore(tbl_type) {
                builder.add_table_source(database, table, table_type, location);
            }
        }
    }

    if let Some(definition) = queries.get(DATABASE_PARTITION_LOCATIONS) {
        let rows = metastore
            .query(Environment::Left, definition, &params)
            .await
            .with_context(|| format!("Failed to load partition locations for {}", database))?;
        for row in rows {
            let [table, tbl_type, table_location, part_name, part_location, ..] = row.as_slice() else {
                continue;
            };
            if let Some(table_type) = TableType::from_metastore(tbl_type) {
                builder.add_partition_source(database, table, table_type, table_location, part_name, part_location);
            }
        }
    }
    builder.mark_gathered(database);
    Ok(())
}

/// Same collection from tables already in the tree (pre-loaded runs).
pub fn sources_from_database(builder: &mut GlmBuilder, db: &DBMirror) {
    for table in db.active_tables() {
        let Some(left) = table.left() else { continue };
        let Some(location) = left.location() else { continue };
        let table_type = left.table_type();
        builder.add_table_source(&db.name, &table.name, table_type, &location);
        for (spec, part_location) in &left.partitions {
            builder.add_partition_source(&db.name, &table.name, table_type, &location, spec, part_location);
        }
    }
    builder.mark_gathered(&db.name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataStrategyKind;
    use crate::testing::{self, CatalogDatabase, InMemoryMetastore, InMemorySql};

    #[test]
    fn test_table_filter() {
        let mut config = testing::config(DataStrategyKind::SchemaOnly);
        config.table_regex = Some("^ord".to_string());
        config.table_exclude_regex = Some("_bak$".to_string());
        let filter = TableFilter::from_config(&config).unwrap();
        assert!(filter.accepts("orders"));
        assert!(!filter.accepts("orders_bak"));
        assert!(!filter.accepts("returns"));
        assert!(!filter.accepts("hms_mirror_transfer_orders"));
        assert!(!filter.accepts("orders_storage_migration"));
    }

    #[test]
    fn test_describe_properties_layouts() {
        let row: Vec<String> = ["sales", "Sales data", "hdfs://ns1/wh/sales.db", "hdfs://ns1/mgd/sales.db", "hive", "USER", "{owner=ops, tier=gold}"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let props = describe_properties(&row);
        assert_eq!(props[DB_MANAGED_LOCATION], "hdfs://ns1/mgd/sales.db");
        assert_eq!(props[OWNER_TYPE], "USER");
        assert_eq!(props["tier"], "gold");

        let legacy: Vec<String> = ["sales", "", "hdfs://ns1/wh/sales.db", "hive", "USER", ""]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let props = describe_properties(&legacy);
        assert!(!props.contains_key(DB_MANAGED_LOCATION));
        assert_eq!(props[OWNER_NAME], "hive");
    }

    #[tokio::test]
    async fn test_gather_by_regex() {
        let mut config = testing::config(DataStrategyKind::SchemaOnly);
        config.databases.clear();
        config.db_regex = Some("^sa".to_string());
        let sql = InMemorySql::default()
            .with_database(Environment::Left, "sales", CatalogDatabase::default())
            .with_database(Environment::Left, "hr", CatalogDatabase::default());
        assert_eq!(gather_databases(&config, &sql).await.unwrap(), vec!["sales".to_string()]);
    }

    #[tokio::test]
    async fn test_collect_marks_existing_right_tables() {
        let config = testing::config(DataStrategyKind::SchemaOnly);
        let left = CatalogDatabase::located("hdfs://ns1/wh/sales.db")
            .with_table("orders", testing::external_definition("orders", "hdfs://ns1/data/orders"))
            .with_table("returns", testing::external_definition("returns", "hdfs://ns1/data/returns"));
        let right = CatalogDatabase::located("hdfs://ns2/wh/sales.db")
            .with_table("orders", testing::external_definition("orders", "hdfs://ns2/data/orders"));
        let sql = InMemorySql::default()
            .with_database(Environment::Left, "sales", left)
            .with_database(Environment::Right, "sales", right);

        let filter = TableFilter::from_config(&config).unwrap();
        let mut db = DBMirror::new("sales");
        collect_database(&config, &sql, &mut db, true).await.unwrap();
        assert_eq!(db.property(Environment::Right, DB_LOCATION), Some("hdfs://ns2/wh/sales.db"));

        let added = collect_tables(&config, &sql, &filter, &mut db, true).await.unwrap();
        assert_eq!(added, 2);
        assert!(db.tables["orders"].environment_table(Environment::Right).unwrap().exists);
        assert!(db.tables["returns"].environment_table(Environment::Right).is_none());
    }

    #[tokio::test]
    async fn test_source_locations_from_metastore() {
        let config = testing::config(DataStrategyKind::SchemaOnly);
        let metastore = InMemoryMetastore::default()
            .with_rows(
                Environment::Left,
                DATABASE_TABLE_LOCATIONS,
                &["sales"],
                vec![
                    vec!["orders", "EXTERNAL_TABLE", "hdfs://ns1/data/sales/orders"],
                    vec!["hms_mirror_transfer_orders", "EXTERNAL_TABLE", "hdfs://ns1/tmp/x"],
                ],
            )
            .with_rows(
                Environment::Left,
                DATABASE_PARTITION_LOCATIONS,
                &["sales"],
                vec![vec!["events", "MANAGED_TABLE", "hdfs://ns1/data/events", "dt=1", "hdfs://ns1/archive/events/dt=1"]],
            );
        let mut builder = GlmBuilder::new(1, false, "hms_mirror_transfer_", "_storage_migration");
        load_source_locations(&config, &metastore, &mut builder, "sales").await.unwrap();

        let sources = builder.sources("sales").unwrap();
        assert_eq!(sources.sources(TableType::External).collect::<Vec<_>>(), vec!["/data/sales"]);
        assert_eq!(sources.sources(TableType::Managed).collect::<Vec<_>>(), vec!["/archive"]);
        assert!(builder.is_gathered("sales"));
    }
}
