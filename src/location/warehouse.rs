// ABOUTME: Warehouse directories per database and the precedence resolver over them
// ABOUTME: Plan beats global config beats the RIGHT environment defaults

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

use crate::config::{Config, DataStrategyKind, TranslationType, WarehouseConfig};
use crate::error::MirrorError;
use crate::model::TableType;

pub const EXTERNAL_WAREHOUSE_VAR: &str = "hive.metastore.warehouse.external.dir";
pub const MANAGED_WAREHOUSE_VAR: &str = "hive.metastore.warehouse.dir";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WarehouseSource {
    Plan,
    Global,
    Env,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warehouse {
    pub external_directory: String,
    pub managed_directory: String,
    pub source: WarehouseSource,
}

fn normalize(dir: &str) -> String {
    let trimmed = dir.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

impl Warehouse {
    /// Fails when either directory is blank or both are the same.
    pub fn new(external: &str, managed: &str, source: WarehouseSource) -> Result<Self, MirrorError> {
        if external.trim().is_empty() || managed.trim().is_empty() {
            return Err(MirrorError::Configuration(
                "warehouse needs both an external and a managed directory".to_string(),
            ));
        }
        let external_directory = normalize(external);
        let managed_directory = normalize(managed);
        if external_directory == managed_directory {
            return Err(MirrorError::Configuration(format!(
                "external and managed warehouse directories can't both be {}",
                external_directory
            )));
        }
        Ok(Self {
            external_directory,
            managed_directory,
            source,
        })
    }

    fn from_config(config: &WarehouseConfig, source: WarehouseSource) -> Option<Self> {
        match (&config.external_directory, &config.managed_directory) {
            (Some(ext), Some(mgd)) => Warehouse::new(ext, mgd, source).ok(),
            _ => None,
        }
    }

    pub fn directory_for(&self, table_type: TableType) -> &str {
        match table_type {
            TableType::External => &self.external_directory,
            TableType::Managed => &self.managed_directory,
        }
    }
}

/// Per-database warehouse plans. Any change flips `dirty` so the location map gets rebuilt.
#[derive(Debug, Clone, Default)]
pub struct WarehousePlans {
    plans: BTreeMap<String, Warehouse>,
    dirty: bool,
}

impl WarehousePlans {
    pub fn from_config(config: &Config) -> Result<Self, MirrorError> {
        let mut plans = Self::default();
        for (db, wh) in &config.warehouse_plans {
            let ext = wh.external_directory.clone().unwrap_or_default();
            let mgd = wh.managed_directory.clone().unwrap_or_default();
            plans.add(db, &ext, &mgd)?;
        }
        plans.mark_clean();
        Ok(plans)
    }

    /// Adds or replaces a plan. A trailing `/<db>.db` on either directory is dropped.
    pub fn add(&mut self, database: &str, external: &str, managed: &str) -> Result<&Warehouse, MirrorError> {
        let db_dir = format!("/{}.db", database);
        let strip = |dir: &str| -> String {
            let dir = dir.trim().trim_end_matches('/');
            match dir.strip_suffix(db_dir.as_str()) {
                Some(parent) => {
                    warn!(database = %database, directory = %dir, "Warehouse plan included the database directory; using its parent");
                    parent.to_string()
                }
                None => dir.to_string(),
            }
        };
        let warehouse = Warehouse::new(&strip(external), &strip(managed), WarehouseSource::Plan)?;
        self.plans.insert(database.to_string(), warehouse);
        self.dirty = true;
        Ok(&self.plans[database])
    }

    pub fn remove(&mut self, database: &str) -> Option<Warehouse> {
        let removed = self.plans.remove(database);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn get(&self, database: &str) -> Option<&Warehouse> {
        self.plans.get(database)
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

/// Resolves a database's warehouse from plans, global config and environment defaults.
#[derive(Debug, Clone)]
pub struct WarehouseResolver {
    plans: WarehousePlans,
    global: Option<Warehouse>,
    environment: Option<Warehouse>,
    strategy: DataStrategyKind,
    translation: TranslationType,
}

impl WarehouseResolver {
    /// `right_vars` are the RIGHT environment's hive variables.
    pub fn new(config: &Config, plans: WarehousePlans, right_vars: &BTreeMap<String, String>) -> Self {
        let environment = match (right_vars.get(EXTERNAL_WAREHOUSE_VAR), right_vars.get(MANAGED_WAREHOUSE_VAR)) {
            (Some(ext), Some(mgd)) => Warehouse::new(
                crate::location::paths::strip_namespace(ext),
                crate::location::paths::strip_namespace(mgd),
                WarehouseSource::Env,
            )
            .ok(),
            _ => None,
        };
        Self {
            plans,
            global: Warehouse::from_config(&config.transfer.warehouse, WarehouseSource::Global),
            environment,
            strategy: config.data_strategy,
            translation: config.translation_type(),
        }
    }

    fn requires_alignment(&self) -> bool {
        self.translation == TranslationType::Aligned || self.strategy == DataStrategyKind::StorageMigration
    }

    /// Plan, then global, then RIGHT defaults. `Ok(None)` when nothing is found and
    /// the run does not need aligned locations.
    pub fn resolve(&self, database: &str) -> Result<Option<Warehouse>, MirrorError> {
        if let Some(plan) = self.plans.get(database) {
            return Ok(Some(plan.clone()));
        }
        if let Some(global) = &self.global {
            return Ok(Some(global.clone()));
        }
        let env_allowed = !matches!(
            self.strategy,
            DataStrategyKind::Dump | DataStrategyKind::StorageMigration
        );
        if env_allowed {
            if let Some(env) = &self.environment {
                return Ok(Some(env.clone()));
            }
        }
        if self.strategy == DataStrategyKind::Dump || !self.requires_alignment() {
            return Ok(None);
        }
        Err(MirrorError::MissingDataPoint(format!(
            "no warehouse plan, global warehouse or RIGHT environment default for database {}",
            database
        )))
    }
}
