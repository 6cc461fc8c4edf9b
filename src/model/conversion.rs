// ABOUTME: The in-memory entity tree of one migration run (databases, tables, per-environment facts)
// ABOUTME: Conversion owns DBMirrors which own TableMirrors; tables find their parent by name

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::config::DataStrategyKind;

pub const DB_LOCATION: &str = "LOCATION";
pub const DB_MANAGED_LOCATION: &str = "MANAGEDLOCATION";
pub const COMMENT: &str = "COMMENT";
pub const DB_NAME: &str = "DB_NAME";
pub const OWNER_NAME: &str = "OWNER_NAME";
pub const OWNER_TYPE: &str = "OWNER_TYPE";

/// Database properties that are never copied as plain parameters.
pub const RESERVED_DB_PROPERTIES: [&str; 6] =
    [DB_LOCATION, DB_MANAGED_LOCATION, COMMENT, DB_NAME, OWNER_NAME, OWNER_TYPE];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Environment {
    Left,
    Right,
    /// Staging table on LEFT that owns data for a later pickup.
    Transfer,
    /// Temporary table on RIGHT that points at LEFT data.
    Shadow,
}

impl Environment {
    /// Cluster an environment's statements run on.
    pub fn cluster(&self) -> Environment {
        match self {
            Environment::Left | Environment::Transfer => Environment::Left,
            Environment::Right | Environment::Shadow => Environment::Right,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Environment::Left => "LEFT",
            Environment::Right => "RIGHT",
            Environment::Transfer => "TRANSFER",
            Environment::Shadow => "SHADOW",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TableType {
    External,
    Managed,
}

impl TableType {
    /// Parses the metastore's `TBL_TYPE` column.
    pub fn from_metastore(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "EXTERNAL_TABLE" | "EXTERNAL" => Some(TableType::External),
            "MANAGED_TABLE" | "MANAGED" => Some(TableType::Managed),
            _ => None,
        }
    }
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TableType::External => write!(f, "EXTERNAL"),
            TableType::Managed => write!(f, "MANAGED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseState {
    #[default]
    Init,
    CalculatingSql,
    CalculatedSql,
    ApplyingSql,
    Processed,
    Error,
}

/// One statement plus a human description of what it does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlPair {
    pub description: String,
    pub action: String,
}

impl SqlPair {
    pub fn new(description: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            action: action.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableStatistics {
    pub file_count: u64,
    pub dir_count: u64,
    pub data_size: u64,
    pub avg_file_size: f64,
}

impl TableStatistics {
    pub fn new(file_count: u64, dir_count: u64, data_size: u64) -> Self {
        let avg_file_size = if file_count > 0 {
            data_size as f64 / file_count as f64
        } else {
            0.0
        };
        Self {
            file_count,
            dir_count,
            data_size,
            avg_file_size,
        }
    }
}

/// A table as seen in one environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentTable {
    pub name: String,
    #[serde(default)]
    pub exists: bool,
    /// Raw `SHOW CREATE TABLE` lines.
    #[serde(default)]
    pub definition: Vec<String>,
    /// Partition name (`a=1/b=2`) to location.
    #[serde(default)]
    pub partitions: BTreeMap<String, String>,
    #[serde(default)]
    pub statistics: Option<TableStatistics>,
    #[serde(default)]
    pub sql: Vec<SqlPair>,
    #[serde(default)]
    pub cleanup_sql: Vec<SqlPair>,
    #[serde(default)]
    pub add_properties: BTreeMap<String, String>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    /// Set when applying this environment's statements failed.
    #[serde(default)]
    pub failed: bool,
}

impl EnvironmentTable {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn is_defined(&self) -> bool {
        !self.definition.is_empty()
    }

    pub fn is_view(&self) -> bool {
        self.definition
            .iter()
            .any(|line| line.trim_start().to_ascii_uppercase().starts_with("CREATE VIEW"))
    }

    pub fn is_external(&self) -> bool {
        self.definition
            .iter()
            .any(|line| line.trim_start().to_ascii_uppercase().starts_with("CREATE EXTERNAL TABLE"))
    }

    pub fn is_transactional(&self) -> bool {
        self.definition.iter().any(|line| {
            let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
            compact.to_ascii_lowercase().contains("'transactional'='true'")
        })
    }

    pub fn is_partitioned(&self) -> bool {
        !self.partitions.is_empty()
            || self
                .definition
                .iter()
                .any(|line| line.trim_start().to_ascii_uppercase().starts_with("PARTITIONED BY"))
    }

    pub fn table_type(&self) -> TableType {
        if self.is_external() {
            TableType::External
        } else {
            TableType::Managed
        }
    }

    fn location_line(&self) -> Option<usize> {
        self.definition
            .iter()
            .position(|line| line.trim().eq_ignore_ascii_case("LOCATION"))
            .map(|idx| idx + 1)
            .filter(|idx| *idx < self.definition.len())
    }

    /// The table `LOCATION` from the definition, without quotes.
    pub fn location(&self) -> Option<String> {
        self.location_line().map(|idx| {
            self.definition[idx]
                .trim()
                .trim_matches(|c| c == '\'' || c == '"')
                .to_string()
        })
    }

    /// Rewrites the `LOCATION` clause; returns false when the definition carries none.
    pub fn set_location(&mut self, location: &str) -> bool {
        match self.location_line() {
            Some(idx) => {
                self.definition[idx] = format!("  '{}'", location);
                true
            }
            None => false,
        }
    }

    /// Drops the `LOCATION` clause so the table lands in the database default.
    pub fn strip_location(&mut self) {
        if let Some(idx) = self.location_line() {
            self.definition.drain(idx - 1..=idx);
        }
    }

    /// Turns a managed definition into an external one.
    pub fn convert_to_external(&mut self) {
        for line in self.definition.iter_mut() {
            let upper = line.trim_start().to_ascii_uppercase();
            if upper.starts_with("CREATE TABLE") {
                *line = line.replacen("CREATE TABLE", "CREATE EXTERNAL TABLE", 1);
                break;
            }
        }
    }

    pub fn add_sql(&mut self, description: impl Into<String>, action: impl Into<String>) {
        self.sql.push(SqlPair::new(description, action));
    }

    pub fn add_cleanup_sql(&mut self, description: impl Into<String>, action: impl Into<String>) {
        self.cleanup_sql.push(SqlPair::new(description, action));
    }

    pub fn create_statement(&self) -> String {
        self.definition.join("\n")
    }
}

/// One source table and its facts across environments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableMirror {
    pub name: String,
    /// Name of the owning database; resolved through [`Conversion::parent_of`].
    pub database: String,
    #[serde(default)]
    pub environments: BTreeMap<Environment, EnvironmentTable>,
    #[serde(default)]
    pub remove: bool,
    #[serde(default)]
    pub remove_reason: Option<String>,
    #[serde(default)]
    pub phase_state: PhaseState,
    #[serde(default)]
    pub remapped: bool,
    /// Strategy picked for this table when the run strategy delegates (HYBRID).
    #[serde(default)]
    pub strategy: Option<DataStrategyKind>,
}

impl TableMirror {
    pub fn new(database: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        let mut environments = BTreeMap::new();
        environments.insert(Environment::Left, EnvironmentTable::named(name.clone()));
        Self {
            name,
            database: database.into(),
            environments,
            ..Default::default()
        }
    }

    pub fn environment_table(&self, environment: Environment) -> Option<&EnvironmentTable> {
        self.environments.get(&environment)
    }

    pub fn environment_table_mut(&mut self, environment: Environment) -> &mut EnvironmentTable {
        let name = self.name.clone();
        self.environments
            .entry(environment)
            .or_insert_with(|| EnvironmentTable::named(name))
    }

    pub fn left(&self) -> Option<&EnvironmentTable> {
        self.environment_table(Environment::Left)
    }

    pub fn add_issue(&mut self, environment: Environment, issue: impl Into<String>) {
        self.environment_table_mut(environment).issues.push(issue.into());
    }

    pub fn add_error(&mut self, environment: Environment, error: impl Into<String>) {
        self.environment_table_mut(environment).errors.push(error.into());
    }

    /// Drops the table from every later stage.
    pub fn exclude(&mut self, reason: impl Into<String>) {
        self.remove = true;
        self.remove_reason = Some(reason.into());
    }

    pub fn has_errors(&self) -> bool {
        self.environments.values().any(|et| !et.errors.is_empty())
    }

    /// True once any environment failed while applying statements.
    pub fn is_unsuccessful(&self) -> bool {
        self.environments.values().any(|et| et.failed)
    }

    pub fn is_active(&self) -> bool {
        !self.remove
    }
}

/// One source database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DBMirror {
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<Environment, BTreeMap<String, String>>,
    #[serde(default)]
    pub tables: BTreeMap<String, TableMirror>,
    #[serde(default)]
    pub issues: BTreeMap<Environment, Vec<String>>,
    #[serde(default)]
    pub sql: BTreeMap<Environment, Vec<SqlPair>>,
}

impl DBMirror {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn property(&self, environment: Environment, key: &str) -> Option<&str> {
        self.properties
            .get(&environment)
            .and_then(|props| props.get(key))
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn properties_mut(&mut self, environment: Environment) -> &mut BTreeMap<String, String> {
        self.properties.entry(environment).or_default()
    }

    pub fn set_property(&mut self, environment: Environment, key: &str, value: impl Into<String>) {
        self.properties_mut(environment)
            .insert(key.to_string(), value.into());
    }

    pub fn add_issue(&mut self, environment: Environment, issue: impl Into<String>) {
        self.issues.entry(environment).or_default().push(issue.into());
    }

    pub fn add_sql(&mut self, environment: Environment, description: impl Into<String>, action: impl Into<String>) {
        self.sql
            .entry(environment)
            .or_default()
            .push(SqlPair::new(description, action));
    }

    pub fn sql_for(&self, environment: Environment) -> &[SqlPair] {
        self.sql.get(&environment).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn add_table(&mut self, name: &str) -> &mut TableMirror {
        let database = self.name.clone();
        self.tables
            .entry(name.to_string())
            .or_insert_with(|| TableMirror::new(database, name))
    }

    pub fn active_tables(&self) -> impl Iterator<Item = &TableMirror> {
        self.tables.values().filter(|t| t.is_active())
    }
}

/// Root of one migration run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversion {
    #[serde(default)]
    pub databases: BTreeMap<String, DBMirror>,
}

impl Conversion {
    /// Reads a serialized conversion used in place of live discovery.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read test data file {}", path.display()))?;
        let mut conversion: Conversion = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse test data file {}", path.display()))?;
        conversion.relink();
        Ok(conversion)
    }

    /// Restores the table-to-database links after deserialization.
    pub fn relink(&mut self) {
        for (db_name, db) in self.databases.iter_mut() {
            db.name = db_name.clone();
            for (tbl_name, table) in db.tables.iter_mut() {
                table.name = tbl_name.clone();
                table.database = db_name.clone();
            }
        }
    }

    pub fn add_database(&mut self, name: &str) -> &mut DBMirror {
        self.databases
            .entry(name.to_string())
            .or_insert_with(|| DBMirror::new(name))
    }

    pub fn database(&self, name: &str) -> Option<&DBMirror> {
        self.databases.get(name)
    }

    pub fn database_mut(&mut self, name: &str) -> Option<&mut DBMirror> {
        self.databases.get_mut(name)
    }

    pub fn parent_of(&self, table: &TableMirror) -> Option<&DBMirror> {
        self.databases.get(&table.database)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableMirror> {
        self.databases.values().flat_map(|db| db.tables.values())
    }

    /// Takes the active tables out of the tree so units can own them while they run.
    pub fn take_active_tables(&mut self) -> Vec<TableMirror> {
        let mut taken = Vec::new();
        for db in self.databases.values_mut() {
            let names: Vec<String> = db
                .tables
                .iter()
                .filter(|(_, t)| t.is_active())
                .map(|(name, _)| name.clone())
                .collect();
            for name in names {
                if let Some(table) = db.tables.remove(&name) {
                    taken.push(table);
                }
            }
        }
        taken
    }

    /// Puts a table handed out by [`Conversion::take_active_tables`] back under its parent.
    pub fn restore_table(&mut self, table: TableMirror) {
        let db = self.add_database(&table.database.clone());
        db.tables.insert(table.name.clone(), table);
    }

    /// Structured snapshot of one database for the reporting layer.
    pub fn snapshot(&self, database: &str) -> Result<String> {
        let db = self
            .databases
            .get(database)
            .with_context(|| format!("Database {} is not part of this run", database))?;
        serde_json::to_string_pretty(db).context("Failed to serialize database snapshot")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders_definition() -> Vec<String> {
        vec![
            "CREATE EXTERNAL TABLE `orders`(".to_string(),
            "  `id` int)".to_string(),
            "PARTITIONED BY (".to_string(),
            "  `dt` string)".to_string(),
            "LOCATION".to_string(),
            "  'hdfs://ns1/data/sales/orders'".to_string(),
            "TBLPROPERTIES (".to_string(),
            "  'external.table.purge'='true')".to_string(),
        ]
    }

    #[test]
    fn test_definition_facts() {
        let mut et = EnvironmentTable::named("orders");
        et.definition = orders_definition();
        assert!(et.is_external());
        assert!(et.is_partitioned());
        assert!(!et.is_transactional());
        assert_eq!(et.table_type(), TableType::External);
        assert_eq!(et.location().as_deref(), Some("hdfs://ns1/data/sales/orders"));
    }

    #[test]
    fn test_set_and_strip_location() {
        let mut et = EnvironmentTable::named("orders");
        et.definition = orders_definition();
        assert!(et.set_location("hdfs://ns2/wh/ext/orders"));
        assert_eq!(et.location().as_deref(), Some("hdfs://ns2/wh/ext/orders"));
        et.strip_location();
        assert_eq!(et.location(), None);
        assert_eq!(et.definition.len(), 6);
    }

    #[test]
    fn test_transactional_detection_ignores_spacing() {
        let mut et = EnvironmentTable::named("t");
        et.definition = vec![
            "CREATE TABLE `t`(`id` int)".to_string(),
            "TBLPROPERTIES ( 'transactional' = 'true')".to_string(),
        ];
        assert!(et.is_transactional());
        assert_eq!(et.table_type(), TableType::Managed);
        et.convert_to_external();
        assert!(et.is_external());
    }

    #[test]
    fn test_take_and_restore_tables() {
        let mut conversion = Conversion::default();
        conversion.add_database("sales").add_table("orders");
        conversion.add_database("sales").add_table("returns").exclude("filtered");

        let taken = conversion.take_active_tables();
        assert_eq!(taken.len(), 1);
        assert_eq!(conversion.database("sales").unwrap().tables.len(), 1);

        for table in taken {
            assert_eq!(conversion.parent_of(&table).unwrap().name, "sales");
            conversion.restore_table(table);
        }
        assert_eq!(conversion.database("sales").unwrap().tables.len(), 2);
    }

    #[test]
    fn test_load_relinks_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sales.json");
        std::fs::write(
            &path,
            r#"{"databases":{"sales":{"name":"","tables":{"orders":{"name":"","database":""}}}}}"#,
        )
        .unwrap();
        let conversion = Conversion::load(&path).unwrap();
        let table = &conversion.database("sales").unwrap().tables["orders"];
        assert_eq!(table.name, "orders");
        assert_eq!(table.database, "sales");
    }

    #[test]
    fn test_snapshot_unknown_database() {
        let conversion = Conversion::default();
        assert!(conversion.snapshot("missing").is_err());
    }
}
