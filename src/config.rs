// ABOUTME: Resolved run configuration loaded from TOML
// ABOUTME: Normalized once before a run, validated into coded messages, then shared read-only

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::messages::{MessageCode, Messages};
use crate::model::Environment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataStrategyKind {
    #[default]
    SchemaOnly,
    Sql,
    ExportImport,
    Hybrid,
    StorageMigration,
    Dump,
    Linked,
    Common,
    ConvertLinked,
}

impl DataStrategyKind {
    /// Strategies that leave table locations exactly where they are.
    pub fn keeps_location(&self) -> bool {
        matches!(self, DataStrategyKind::Linked | DataStrategyKind::Common)
    }

    /// Strategies that can hand data movement to distcp.
    pub fn supports_distcp(&self) -> bool {
        matches!(
            self,
            DataStrategyKind::SchemaOnly | DataStrategyKind::StorageMigration | DataStrategyKind::Dump
        )
    }

    pub fn requires_right(&self) -> bool {
        !matches!(self, DataStrategyKind::StorageMigration | DataStrategyKind::Dump)
    }
}

impl std::fmt::Display for DataStrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            DataStrategyKind::SchemaOnly => "SCHEMA_ONLY",
            DataStrategyKind::Sql => "SQL",
            DataStrategyKind::ExportImport => "EXPORT_IMPORT",
            DataStrategyKind::Hybrid => "HYBRID",
            DataStrategyKind::StorageMigration => "STORAGE_MIGRATION",
            DataStrategyKind::Dump => "DUMP",
            DataStrategyKind::Linked => "LINKED",
            DataStrategyKind::Common => "COMMON",
            DataStrategyKind::ConvertLinked => "CONVERT_LINKED",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TranslationType {
    /// Keep the original sub-path, swapping namespace and database name.
    #[default]
    Relative,
    /// Force locations under the resolved warehouse directories.
    Aligned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataFlow {
    Push,
    #[default]
    Pull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetastoreBackend {
    #[default]
    Mysql,
    Postgres,
    Oracle,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Storage namespace, e.g. `hdfs://ns1`.
    pub namespace: String,
    pub legacy_hive: bool,
    /// Connection failures are downgraded to warnings.
    pub disconnected: bool,
    pub metastore_backend: Option<MetastoreBackend>,
    /// Hive variables known up front; live `SET -v` output is layered on top.
    pub hive_vars: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub external_directory: Option<String>,
    pub managed_directory: Option<String>,
}

impl WarehouseConfig {
    pub fn is_defined(&self) -> bool {
        let present = |d: &Option<String>| d.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false);
        present(&self.external_directory) && present(&self.managed_directory)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageMigrationConfig {
    pub translation_type: TranslationType,
    pub distcp: bool,
    pub data_flow: DataFlow,
    pub consolidate_tables_for_distcp: bool,
}

impl Default for StorageMigrationConfig {
    fn default() -> Self {
        Self {
            translation_type: TranslationType::Relative,
            distcp: false,
            data_flow: DataFlow::Pull,
            consolidate_tables_for_distcp: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub transfer_prefix: String,
    pub shadow_prefix: String,
    pub storage_migration_postfix: String,
    pub export_base_dir: String,
    pub target_namespace: Option<String>,
    pub common_storage: Option<String>,
    pub warehouse: WarehouseConfig,
    pub storage_migration: StorageMigrationConfig,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            transfer_prefix: "hms_mirror_transfer_".to_string(),
            shadow_prefix: "hms_mirror_shadow_".to_string(),
            storage_migration_postfix: "_storage_migration".to_string(),
            export_base_dir: "/apps/hive/warehouse/export_".to_string(),
            target_namespace: None,
            common_storage: None,
            warehouse: WarehouseConfig::default(),
            storage_migration: StorageMigrationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridConfig {
    pub export_import_partition_limit: usize,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            export_import_partition_limit: 100,
        }
    }
}

/// A user-declared location map entry; at least one target must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationMapEntry {
    pub source: String,
    pub external: Option<String>,
    pub managed: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_strategy: DataStrategyKind,
    pub databases: Vec<String>,
    pub db_regex: Option<String>,
    pub table_regex: Option<String>,
    pub table_exclude_regex: Option<String>,
    pub db_prefix: Option<String>,
    pub db_rename: Option<String>,
    pub clusters: BTreeMap<Environment, ClusterConfig>,
    pub transfer: TransferConfig,
    pub warehouse_plans: BTreeMap<String, WarehouseConfig>,
    pub global_location_map: Vec<LocationMapEntry>,
    pub consolidation_level: usize,
    pub partition_level_mismatch: bool,
    pub evaluate_partition_location: bool,
    pub migrate_acid: bool,
    pub database_only: bool,
    pub flip: bool,
    /// Set once `normalize` has swapped LEFT and RIGHT for `flip`.
    #[serde(skip)]
    pub flipped: bool,
    pub execute: bool,
    pub sync: bool,
    pub collect_stats: bool,
    pub link_test: bool,
    pub hybrid: HybridConfig,
    pub concurrency: usize,
    pub transfer_concurrency: usize,
    pub stage_timeout_secs: Option<u64>,
    pub output_dir: Option<PathBuf>,
    pub load_test_data: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_strategy: DataStrategyKind::SchemaOnly,
            databases: Vec::new(),
            db_regex: None,
            table_regex: None,
            table_exclude_regex: None,
            db_prefix: None,
            db_rename: None,
            clusters: BTreeMap::new(),
            transfer: TransferConfig::default(),
            warehouse_plans: BTreeMap::new(),
            global_location_map: Vec::new(),
            consolidation_level: 1,
            partition_level_mismatch: false,
            evaluate_partition_location: false,
            migrate_acid: false,
            database_only: false,
            flip: false,
            flipped: false,
            execute: false,
            sync: false,
            collect_stats: false,
            link_test: false,
            hybrid: HybridConfig::default(),
            concurrency: 10,
            transfer_concurrency: 10,
            stage_timeout_secs: None,
            output_dir: None,
            load_test_data: None,
        }
    }
}

/// Outcome of [`Config::validate`].
#[derive(Debug, Default)]
pub struct ConfigReport {
    pub errors: Messages,
    pub warnings: Messages,
}

impl ConfigReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map(|s| s.trim().is_empty()).unwrap_or(true)
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Invalid configuration")
    }

    pub fn cluster(&self, environment: Environment) -> Option<&ClusterConfig> {
        self.clusters.get(&environment)
    }

    pub fn namespace(&self, environment: Environment) -> Option<&str> {
        self.cluster(environment)
            .map(|c| c.namespace.trim())
            .filter(|ns| !ns.is_empty())
    }

    pub fn translation_type(&self) -> TranslationType {
        self.transfer.storage_migration.translation_type
    }

    /// Whether data moves through distcp plans rather than SQL.
    pub fn is_distcp(&self) -> bool {
        self.transfer.storage_migration.distcp && self.data_strategy != DataStrategyKind::Sql
    }

    pub fn is_table_filtered(&self) -> bool {
        !blank(&self.table_regex) || !blank(&self.table_exclude_regex)
    }

    /// Namespace every translated location is re-prefixed with.
    pub fn target_namespace(&self) -> Option<String> {
        if let Some(ns) = self.transfer.target_namespace.as_ref().filter(|s| !s.trim().is_empty()) {
            return Some(ns.trim().trim_end_matches('/').to_string());
        }
        if let Some(ns) = self.transfer.common_storage.as_ref().filter(|s| !s.trim().is_empty()) {
            return Some(ns.trim().trim_end_matches('/').to_string());
        }
        let env = if self.data_strategy == DataStrategyKind::StorageMigration {
            Environment::Left
        } else {
            Environment::Right
        };
        self.namespace(env)
            .map(|ns| ns.trim_end_matches('/').to_string())
    }

    /// Legacy managed tables become external when moving to a non-legacy cluster.
    pub fn conversions_possible(&self) -> bool {
        let left_legacy = self.cluster(Environment::Left).map(|c| c.legacy_hive).unwrap_or(false);
        let right_legacy = self
            .cluster(Environment::Right)
            .map(|c| c.legacy_hive)
            .unwrap_or(left_legacy);
        left_legacy && !right_legacy
    }

    /// Name a source database gets on the target side.
    pub fn resolve_database_name(&self, database: &str) -> String {
        if let Some(rename) = self.db_rename.as_ref().filter(|s| !s.trim().is_empty()) {
            return rename.trim().to_string();
        }
        match self.db_prefix.as_ref().filter(|s| !s.trim().is_empty()) {
            Some(prefix) => format!("{}{}", prefix.trim(), database),
            None => database.to_string(),
        }
    }

    /// Fills strategy-implied defaults. Returns the warnings raised while doing so.
    pub fn normalize(&mut self) -> Messages {
        let mut warnings = Messages::default();

        match self.data_strategy {
            DataStrategyKind::StorageMigration => {
                if !self.clusters.contains_key(&Environment::Right) {
                    if let Some(left) = self.cluster(Environment::Left).cloned() {
                        self.clusters.insert(Environment::Right, left);
                    }
                }
                if blank(&self.transfer.target_namespace) && blank(&self.transfer.common_storage) {
                    if let Some(left_ns) = self.namespace(Environment::Left).map(str::to_string) {
                        warnings.set(MessageCode::StorageMigrationNamespaceLeft, vec![left_ns.clone()]);
                        self.transfer.target_namespace = Some(left_ns);
                    }
                }
            }
            DataStrategyKind::Dump => {
                if self.flip {
                    if let Some(right) = self.clusters.remove(&Environment::Right) {
                        self.clusters.insert(Environment::Left, right);
                        warnings.set(MessageCode::DumpEnvFlip, vec![]);
                    }
                    self.flip = false;
                }
                self.clusters.remove(&Environment::Right);
                self.transfer.storage_migration.distcp = false;
            }
            DataStrategyKind::Linked | DataStrategyKind::Common | DataStrategyKind::Sql => {
                self.transfer.storage_migration.distcp = false;
            }
            _ => {}
        }

        for plan in self.warehouse_plans.values_mut() {
            normalize_dir(&mut plan.external_directory);
            normalize_dir(&mut plan.managed_directory);
        }
        normalize_dir(&mut self.transfer.warehouse.external_directory);
        normalize_dir(&mut self.transfer.warehouse.managed_directory);

        self.concurrency = self.concurrency.max(1);
        self.transfer_concurrency = self.transfer_concurrency.max(1);

        // `flip` stays set: later decisions (distcp recording direction) still read it.
        if self.flip && !self.flipped && self.clusters.contains_key(&Environment::Right) {
            let left = self.clusters.remove(&Environment::Left);
            if let Some(right) = self.clusters.remove(&Environment::Right) {
                self.clusters.insert(Environment::Left, right);
            }
            if let Some(left) = left {
                self.clusters.insert(Environment::Right, left);
            }
            self.flipped = true;
        }

        warnings
    }

    pub fn validate(&self) -> ConfigReport {
        let mut report = ConfigReport::default();
        let errors = &mut report.errors;
        let warnings = &mut report.warnings;

        if self.namespace(Environment::Left).is_none() {
            errors.set(
                MessageCode::ConfigurationInvalid,
                vec!["the LEFT cluster needs a namespace".to_string()],
            );
        }

        if self.data_strategy.requires_right() && !self.clusters.contains_key(&Environment::Right) {
            errors.set(MessageCode::RightDefinitionMissing, vec![]);
        }

        if self.flip && !self.clusters.contains_key(&Environment::Right) {
            errors.set(MessageCode::FlipWithoutRight, vec![]);
        }

        if !blank(&self.db_rename) && self.databases.len() != 1 {
            errors.set(MessageCode::DbRenameOnlyWithSingleDb, vec![]);
        }

        if self.databases.is_empty() && blank(&self.db_regex) && self.load_test_data.is_none() {
            errors.set(MessageCode::NoDatabases, vec![]);
        }

        for filter in [&self.db_regex, &self.table_regex, &self.table_exclude_regex]
            .into_iter()
            .flatten()
        {
            if let Err(e) = Regex::new(filter) {
                errors.set(MessageCode::InvalidFilter, vec![filter.clone(), e.to_string()]);
            }
        }

        if self.transfer.storage_migration.distcp && !self.data_strategy.supports_distcp() {
            errors.set(
                MessageCode::DistcpValidStrategy,
                vec![self.data_strategy.to_string()],
            );
        }

        if self.evaluate_partition_location
            && !matches!(
                self.data_strategy,
                DataStrategyKind::SchemaOnly | DataStrategyKind::Dump | DataStrategyKind::StorageMigration
            )
        {
            errors.set(MessageCode::EvaluatePartitionLocationUse, vec![]);
        }

        let mut warehouses: Vec<&WarehouseConfig> = self.warehouse_plans.values().collect();
        warehouses.push(&self.transfer.warehouse);
        for wh in warehouses {
            if let (Some(ext), Some(mgd)) = (&wh.external_directory, &wh.managed_directory) {
                if !ext.trim().is_empty() && ext.trim() == mgd.trim() {
                    errors.set(MessageCode::WarehouseDirsSameDir, vec![ext.clone(), mgd.clone()]);
                }
            }
        }

        let has_warehouse = self.transfer.warehouse.is_defined() || !self.warehouse_plans.is_empty();

        if self.data_strategy == DataStrategyKind::StorageMigration {
            if self.target_namespace().is_none() {
                errors.set(MessageCode::StorageMigrationRequiredNamespace, vec![]);
            }
            if self.translation_type() == TranslationType::Aligned && !has_warehouse {
                errors.set(MessageCode::StorageMigrationRequiredWarehouseOptions, vec![]);
            }
            let same_namespace = self.target_namespace().as_deref() == self.namespace(Environment::Left);
            if same_namespace
                && self.translation_type() == TranslationType::Relative
                && self.global_location_map.is_empty()
            {
                warnings.set(MessageCode::StorageMigrationNamespaceLeftMissingRdlGlm, vec![]);
            }
        }

        if self.is_distcp() {
            if self.translation_type() == TranslationType::Aligned && !has_warehouse {
                warnings.set(MessageCode::DistcpRdlWithoutWarehouseDir, vec![]);
            }
            if self.is_table_filtered() {
                warnings.set(MessageCode::DistcpWithTableFilters, vec![]);
            } else {
                warnings.set(MessageCode::DistcpWithoutTableFilters, vec![]);
            }
        }

        for entry in &self.global_location_map {
            if entry.source.trim().is_empty() || (blank(&entry.external) && blank(&entry.managed)) {
                errors.set(
                    MessageCode::ConfigurationInvalid,
                    vec![format!("location map entry `{}` needs a source and a target", entry.source)],
                );
            }
        }

        for env in [Environment::Left, Environment::Right] {
            if let Some(cluster) = self.cluster(env) {
                if cluster.disconnected {
                    warnings.set(MessageCode::EnvironmentDisconnected, vec![env.to_string()]);
                }
            }
        }

        report
    }
}

fn normalize_dir(dir: &mut Option<String>) {
    if let Some(value) = dir.as_mut() {
        let trimmed = value.trim().trim_end_matches('/');
        *value = if trimmed.is_empty() || trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const BASE: &str = r#"
data_strategy = "SCHEMA_ONLY"
databases = ["sales"]

[clusters.LEFT]
namespace = "hdfs://ns1"
legacy_hive = true

[clusters.RIGHT]
namespace = "hdfs://ns2"

[warehouse_plans.sales]
external_directory = "wh/ext/"
managed_directory = "/wh/mgd"
"#;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(BASE.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.data_strategy, DataStrategyKind::SchemaOnly);
        assert_eq!(config.consolidation_level, 1);
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.namespace(Environment::Right), Some("hdfs://ns2"));
        assert!(config.conversions_possible());
    }

    #[test]
    fn test_normalize_fixes_plan_directories() {
        let mut config = Config::from_toml(BASE).unwrap();
        config.normalize();
        let plan = &config.warehouse_plans["sales"];
        assert_eq!(plan.external_directory.as_deref(), Some("/wh/ext"));
        assert!(config.validate().is_valid());
    }

    #[test]
    fn test_storage_migration_clones_left() {
        let mut config = Config::from_toml(BASE).unwrap();
        config.data_strategy = DataStrategyKind::StorageMigration;
        config.clusters.remove(&Environment::Right);
        let warnings = config.normalize();
        assert!(warnings.contains(MessageCode::StorageMigrationNamespaceLeft));
        assert_eq!(config.namespace(Environment::Right), Some("hdfs://ns1"));
        assert_eq!(config.target_namespace().as_deref(), Some("hdfs://ns1"));
    }

    #[test]
    fn test_dump_flip_moves_right_to_left() {
        let mut config = Config::from_toml(BASE).unwrap();
        config.data_strategy = DataStrategyKind::Dump;
        config.flip = true;
        let warnings = config.normalize();
        assert!(warnings.contains(MessageCode::DumpEnvFlip));
        assert_eq!(config.namespace(Environment::Left), Some("hdfs://ns2"));
        assert!(config.cluster(Environment::Right).is_none());
    }

    #[test]
    fn test_flip_swaps_once_and_is_kept() {
        let mut config = Config::from_toml(BASE).unwrap();
        config.flip = true;
        config.normalize();
        assert!(config.flip);
        assert_eq!(config.namespace(Environment::Left), Some("hdfs://ns2"));
        assert_eq!(config.namespace(Environment::Right), Some("hdfs://ns1"));

        config.normalize();
        assert_eq!(config.namespace(Environment::Left), Some("hdfs://ns2"));
        assert!(config.validate().errors.is_empty());
    }

    #[test]
    fn test_validate_collects_codes() {
        let mut config = Config::from_toml(BASE).unwrap();
        config.data_strategy = DataStrategyKind::Sql;
        config.transfer.storage_migration.distcp = true;
        config.table_regex = Some("(".to_string());
        config.db_rename = Some("other".to_string());
        config.databases = vec!["a".to_string(), "b".to_string()];
        config.warehouse_plans.insert(
            "a".to_string(),
            WarehouseConfig {
                external_directory: Some("/same".to_string()),
                managed_directory: Some("/same".to_string()),
            },
        );

        let report = config.validate();
        assert!(!report.is_valid());
        for code in [
            MessageCode::DistcpValidStrategy,
            MessageCode::InvalidFilter,
            MessageCode::DbRenameOnlyWithSingleDb,
            MessageCode::WarehouseDirsSameDir,
        ] {
            assert!(report.errors.contains(code), "missing {}", code);
        }
    }

    #[test]
    fn test_right_required_for_schema_only() {
        let mut config = Config::from_toml(BASE).unwrap();
        config.clusters.remove(&Environment::Right);
        assert!(config.validate().errors.contains(MessageCode::RightDefinitionMissing));
    }

    #[test]
    fn test_resolve_database_name() {
        let mut config = Config::default();
        assert_eq!(config.resolve_database_name("sales"), "sales");
        config.db_prefix = Some("mig_".to_string());
        assert_eq!(config.resolve_database_name("sales"), "mig_sales");
        config.db_rename = Some("archive".to_string());
        assert_eq!(config.resolve_database_name("sales"), "archive");
    }

    #[test]
    fn test_target_namespace_precedence() {
        let mut config = Config::from_toml(BASE).unwrap();
        assert_eq!(config.target_namespace().as_deref(), Some("hdfs://ns2"));
        config.transfer.common_storage = Some("s3a://bucket/".to_string());
        assert_eq!(config.target_namespace().as_deref(), Some("s3a://bucket"));
        config.transfer.target_namespace = Some("ofs://ozone1".to_string());
        assert_eq!(config.target_namespace().as_deref(), Some("ofs://ozone1"));
    }
}
