// ABOUTME: Test-only fixtures and in-memory doubles for the gateway traits
// ABOUTME: The SQL double answers the catalog statements discovery issues and records the rest

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use crate::config::{ClusterConfig, Config, DataStrategyKind, WarehouseConfig};
use crate::error::MirrorError;
use crate::gateway::{MetastoreGateway, QueryDefinition, Row, SqlGateway, SqlSession, StorageProbe};
use crate::location::{GlobalLocationMap, TranslationRecorder, Translator, Warehouse, WarehouseSource};
use crate::model::{Environment, TableMirror, TableStatistics};

/// LEFT `hdfs://ns1` (non-legacy), RIGHT `hdfs://ns2`, database `sales` with a warehouse plan.
pub fn config(strategy: DataStrategyKind) -> Config {
    let mut config = Config {
        data_strategy: strategy,
        databases: vec!["sales".to_string()],
        ..Default::default()
    };
    config.clusters.insert(
        Environment::Left,
        ClusterConfig {
            namespace: "hdfs://ns1".to_string(),
            ..Default::default()
        },
    );
    config.clusters.insert(
        Environment::Right,
        ClusterConfig {
            namespace: "hdfs://ns2".to_string(),
            ..Default::default()
        },
    );
    config.warehouse_plans.insert(
        "sales".to_string(),
        WarehouseConfig {
            external_directory: Some("/wh/ext".to_string()),
            managed_directory: Some("/wh/mgd".to_string()),
        },
    );
    config
}

pub fn translator(config: &Config, glm: GlobalLocationMap) -> (Translator, Arc<TranslationRecorder>) {
    let mut warehouses = BTreeMap::new();
    if let Ok(warehouse) = Warehouse::new("/wh/ext", "/wh/mgd", WarehouseSource::Plan) {
        warehouses.insert("sales".to_string(), warehouse);
    }
    let recorder = Arc::new(TranslationRecorder::default());
    let translator = Translator::new(
        Arc::new(config.clone()),
        Arc::new(glm),
        Arc::new(warehouses),
        recorder.clone(),
    );
    (translator, recorder)
}

pub fn external_definition(name: &str, location: &str) -> Vec<String> {
    vec![
        format!("CREATE EXTERNAL TABLE `{}`(", name),
        "  `id` int)".to_string(),
        "LOCATION".to_string(),
        format!("  '{}'", location),
    ]
}

pub fn external_table(database: &str, name: &str, location: &str) -> TableMirror {
    let mut table = TableMirror::new(database, name);
    let left = table.environment_table_mut(Environment::Left);
    left.exists = true;
    left.definition = external_definition(name, location);
    table
}

pub fn partitioned_definition(name: &str, location: &str) -> Vec<String> {
    vec![
        format!("CREATE EXTERNAL TABLE `{}`(", name),
        "  `id` int)".to_string(),
        "PARTITIONED BY (".to_string(),
        "  `dt` string)".to_string(),
        "LOCATION".to_string(),
        format!("  '{}'", location),
    ]
}

pub fn partitioned_table(database: &str, name: &str, location: &str, partitions: &[(&str, &str)]) -> TableMirror {
    let mut table = TableMirror::new(database, name);
    let left = table.environment_table_mut(Environment::Left);
    left.exists = true;
    left.definition = partitioned_definition(name, location);
    left.partitions = partitions
        .iter()
        .map(|(spec, loc)| (spec.to_string(), loc.to_string()))
        .collect();
    table
}

pub fn managed_definition(name: &str, location: &str, acid: bool) -> Vec<String> {
    let mut definition = vec![
        format!("CREATE TABLE `{}`(", name),
        "  `id` int)".to_string(),
        "LOCATION".to_string(),
        format!("  '{}'", location),
    ];
    if acid {
        definition.push("TBLPROPERTIES (".to_string());
        definition.push("  'transactional'='true')".to_string());
    }
    definition
}

pub fn managed_table(database: &str, name: &str, location: &str, acid: bool) -> TableMirror {
    let mut table = TableMirror::new(database, name);
    let left = table.environment_table_mut(Environment::Left);
    left.exists = true;
    left.definition = managed_definition(name, location, acid);
    table
}

#[derive(Debug, Clone, Default)]
pub struct CatalogTable {
    pub definition: Vec<String>,
    pub partitions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogDatabase {
    pub comment: String,
    pub location: String,
    pub managed_location: String,
    pub parameters: BTreeMap<String, String>,
    pub tables: BTreeMap<String, CatalogTable>,
}

impl CatalogDatabase {
    pub fn located(location: &str) -> Self {
        Self {
            location: location.to_string(),
            ..Default::default()
        }
    }

    pub fn with_table(mut self, name: &str, definition: Vec<String>) -> Self {
        self.tables.insert(
            name.to_string(),
            CatalogTable {
                definition,
                partitions: BTreeMap::new(),
            },
        );
        self
    }

    pub fn with_partition(mut self, table: &str, spec: &str, location: &str) -> Self {
        self.tables
            .entry(table.to_string())
            .or_default()
            .partitions
            .insert(spec.to_string(), location.to_string());
        self
    }
}

#[derive(Debug, Default)]
struct SqlState {
    catalogs: BTreeMap<Environment, BTreeMap<String, CatalogDatabase>>,
    vars: BTreeMap<Environment, BTreeMap<String, String>>,
    executed: Vec<(Environment, String)>,
    failing: Vec<String>,
    dropping: Vec<String>,
    unreachable: BTreeSet<Environment>,
}

/// Catalog per environment plus a log of every applied (non-catalog) statement.
#[derive(Debug, Clone, Default)]
pub struct InMemorySql {
    state: Arc<Mutex<SqlState>>,
}

impl InMemorySql {
    fn update(self, f: impl FnOnce(&mut SqlState)) -> Self {
        if let Ok(mut state) = self.state.lock() {
            f(&mut state);
        }
        self
    }

    pub fn with_database(self, environment: Environment, name: &str, database: CatalogDatabase) -> Self {
        self.update(|s| {
            s.catalogs
                .entry(environment)
                .or_default()
                .insert(name.to_string(), database);
        })
    }

    pub fn with_var(self, environment: Environment, key: &str, value: &str) -> Self {
        self.update(|s| {
            s.vars
                .entry(environment)
                .or_default()
                .insert(key.to_string(), value.to_string());
        })
    }

    /// Any statement containing `fragment` fails.
    pub fn fail_on(self, fragment: &str) -> Self {
        self.update(|s| s.failing.push(fragment.to_string()))
    }

    /// Any statement containing `fragment` loses the connection.
    pub fn drop_on(self, fragment: &str) -> Self {
        self.update(|s| s.dropping.push(fragment.to_string()))
    }

    /// Sessions for `environment` can't be opened.
    pub fn unreachable(self, environment: Environment) -> Self {
        self.update(|s| {
            s.unreachable.insert(environment);
        })
    }

    pub fn executed(&self) -> Vec<(Environment, String)> {
        self.state.lock().map(|s| s.executed.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SqlGateway for InMemorySql {
    async fn session(&self, environment: Environment) -> Result<Box<dyn SqlSession>> {
        let unreachable = self
            .state
            .lock()
            .map(|s| s.unreachable.contains(&environment))
            .unwrap_or(true);
        if unreachable {
            return Err(anyhow::Error::new(MirrorError::Connection(format!(
                "{} is unreachable",
                environment
            ))));
        }
        Ok(Box::new(InMemorySession {
            environment,
            state: self.state.clone(),
        }))
    }
}

struct InMemorySession {
    environment: Environment,
    state: Arc<Mutex<SqlState>>,
}

fn single(values: impl IntoIterator<Item = String>) -> Vec<Row> {
    values.into_iter().map(|v| vec![v]).collect()
}

fn split_qualified(name: &str) -> (&str, &str) {
    name.split_once('.').unwrap_or(("", name))
}

impl InMemorySession {
    fn answer(&self, state: &SqlState, statement: &str) -> Result<Option<Vec<Row>>> {
        let empty = BTreeMap::new();
        let catalog = state.catalogs.get(&self.environment).unwrap_or(&empty);
        let words: Vec<&str> = statement.split_whitespace().collect();
        let upper: Vec<String> = words.iter().map(|w| w.to_ascii_uppercase()).collect();
        let upper: Vec<&str> = upper.iter().map(String::as_str).collect();

        let rows = match upper.as_slice() {
            ["SHOW", "DATABASES"] => single(catalog.keys().cloned()),
            ["SHOW", "TABLES", "IN", _] => {
                let db = catalog
                    .get(words[3])
                    .ok_or_else(|| anyhow!("Database {} does not exist", words[3]))?;
                single(db.tables.keys().cloned())
            }
            ["SHOW", "CREATE", "TABLE", _] => {
                let (db, table) = split_qualified(words[3]);
                let table = catalog
                    .get(db)
                    .and_then(|d| d.tables.get(table))
                    .ok_or_else(|| anyhow!("Table {} not found", words[3]))?;
                single(table.definition.iter().cloned())
            }
            ["SHOW", "PARTITIONS", _] => {
                let (db, table) = split_qualified(words[2]);
                let table = catalog
                    .get(db)
                    .and_then(|d| d.tables.get(table))
                    .ok_or_else(|| anyhow!("Table {} not found", words[2]))?;
                single(table.partitions.keys().cloned())
            }
            ["DESCRIBE", "DATABASE", "EXTENDED", _] => {
                let db = catalog
                    .get(words[3])
                    .ok_or_else(|| anyhow!("Database {} does not exist", words[3]))?;
                let params = db
                    .parameters
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join(", ");
                vec![vec![
                    words[3].to_string(),
                    db.comment.clone(),
                    db.location.clone(),
                    db.managed_location.clone(),
                    "hive".to_string(),
                    "USER".to_string(),
                    format!("{{{}}}", params),
                ]]
            }
            ["SET", "-V"] => single(
                state
                    .vars
                    .get(&self.environment)
                    .into_iter()
                    .flatten()
                    .map(|(k, v)| format!("{}={}", k, v)),
            ),
            _ => return Ok(None),
        };
        Ok(Some(rows))
    }
}

#[async_trait]
impl SqlSession for InMemorySession {
    async fn execute(&mut self, statement: &str) -> Result<Vec<Row>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("in-memory catalog lock poisoned"))?;
        if state.dropping.iter().any(|f| statement.contains(f.as_str())) {
            return Err(anyhow::Error::new(MirrorError::Connection(format!(
                "{} connection reset",
                self.environment
            ))));
        }
        if state.failing.iter().any(|f| statement.contains(f.as_str())) {
            bail!("Statement rejected: {}", statement);
        }
        match self.answer(&state, statement)? {
            Some(rows) => Ok(rows),
            None => {
                state.executed.push((self.environment, statement.to_string()));
                Ok(Vec::new())
            }
        }
    }
}

/// Canned rows per environment, query name and parameter list.
#[derive(Debug, Default)]
pub struct InMemoryMetastore {
    rows: BTreeMap<(Environment, &'static str, Vec<String>), Vec<Row>>,
}

impl InMemoryMetastore {
    pub fn with_rows(mut self, environment: Environment, query: &'static str, params: &[&str], rows: Vec<Vec<&str>>) -> Self {
        self.rows.insert(
            (environment, query, params.iter().map(|p| p.to_string()).collect()),
            rows.into_iter()
                .map(|r| r.into_iter().map(str::to_string).collect())
                .collect(),
        );
        self
    }
}

#[async_trait]
impl MetastoreGateway for InMemoryMetastore {
    async fn query(&self, environment: Environment, query: &QueryDefinition, params: &[String]) -> Result<Vec<Row>> {
        Ok(self
            .rows
            .get(&(environment, query.name, params.to_vec()))
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryProbe {
    pub summaries: BTreeMap<String, TableStatistics>,
    pub unreachable: Vec<String>,
}

#[async_trait]
impl StorageProbe for InMemoryProbe {
    async fn exists(&self, location: &str) -> Result<bool> {
        Ok(self.summaries.contains_key(location))
    }

    async fn content_summary(&self, location: &str) -> Result<TableStatistics> {
        self.summaries
            .get(location)
            .cloned()
            .ok_or_else(|| anyhow!("{} does not exist", location))
    }

    async fn link_test(&self, namespaces: &[String]) -> Result<()> {
        match namespaces.iter().find(|ns| self.unreachable.contains(ns)) {
            Some(ns) => bail!("{} is not reachable", ns),
            None => Ok(()),
        }
    }
}
