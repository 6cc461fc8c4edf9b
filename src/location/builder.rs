// ABOUTME: Collects per-database source locations and derives auto location map entries
// ABOUTME: Sources outside the resolved warehouse directory get a rule pointing into it

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::glm::TranslationEntry;
use super::paths;
use super::warehouse::Warehouse;
use crate::model::TableType;

/// Consolidated source directory -> tables that contributed it, per table type.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceLocationMap {
    pub locations: BTreeMap<TableType, BTreeMap<String, BTreeSet<String>>>,
}

impl SourceLocationMap {
    pub fn add(&mut self, table_type: TableType, location: String, table: &str) {
        self.locations
            .entry(table_type)
            .or_default()
            .entry(location)
            .or_default()
            .insert(table.to_string());
    }

    pub fn sources(&self, table_type: TableType) -> impl Iterator<Item = &str> {
        self.locations
            .get(&table_type)
            .into_iter()
            .flat_map(|m| m.keys().map(String::as_str))
    }

    pub fn is_empty(&self) -> bool {
        self.locations.values().all(|m| m.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct GlmBuilder {
    sources: BTreeMap<String, SourceLocationMap>,
    gathered: BTreeSet<String>,
    consolidation_level: usize,
    partition_level_mismatch: bool,
    transfer_prefix: String,
    storage_migration_postfix: String,
}

impl GlmBuilder {
    pub fn new(
        consolidation_level: usize,
        partition_level_mismatch: bool,
        transfer_prefix: impl Into<String>,
        storage_migration_postfix: impl Into<String>,
    ) -> Self {
        Self {
            sources: BTreeMap::new(),
            gathered: BTreeSet::new(),
            consolidation_level,
            partition_level_mismatch,
            transfer_prefix: transfer_prefix.into(),
            storage_migration_postfix: storage_migration_postfix.into(),
        }
    }

    /// Leftovers from earlier runs are never treated as sources.
    pub fn is_ignored(&self, table: &str) -> bool {
        (!self.transfer_prefix.is_empty() && table.starts_with(&self.transfer_prefix))
            || (!self.storage_migration_postfix.is_empty() && table.ends_with(&self.storage_migration_postfix))
    }

    pub fn is_gathered(&self, database: &str) -> bool {
        self.gathered.contains(database)
    }

    pub fn mark_gathered(&mut self, database: &str) {
        self.gathered.insert(database.to_string());
    }

    /// Forgets a database's sources so they can be collected again.
    pub fn reset(&mut self, database: &str) {
        self.gathered.remove(database);
        self.sources.remove(database);
    }

    pub fn add_table_source(&mut self, database: &str, table: &str, table_type: TableType, location: &str) {
        if self.is_ignored(table) || location.trim().is_empty() {
            return;
        }
        let reduced = paths::reduce_url_by(paths::strip_namespace(location), self.consolidation_level);
        debug!(database = %database, table = %table, source = %reduced, "Recorded table source");
        self.sources
            .entry(database.to_string())
            .or_default()
            .add(table_type, reduced, table);
    }

    /// Partitions under their table location are covered by the table entry.
    pub fn add_partition_source(
        &mut self,
        database: &str,
        table: &str,
        table_type: TableType,
        table_location: &str,
        partition_spec: &str,
        partition_location: &str,
    ) {
        if self.is_ignored(table) || partition_location.trim().is_empty() {
            return;
        }
        let table_path = paths::strip_namespace(table_location);
        let partition_path = paths::strip_namespace(partition_location);
        if paths::is_under(partition_path, table_path) {
            return;
        }
        let levels = if self.partition_level_mismatch {
            self.consolidation_level
        } else {
            paths::partition_depth(partition_spec) + self.consolidation_level
        };
        let reduced = paths::reduce_url_by(partition_path, levels);
        self.sources
            .entry(database.to_string())
            .or_default()
            .add(table_type, reduced, table);
    }

    pub fn sources(&self, database: &str) -> Option<&SourceLocationMap> {
        self.sources.get(database)
    }

    /// Databases whose sources have been collected.
    pub fn gathered(&self) -> Vec<String> {
        self.gathered.iter().cloned().collect()
    }

    /// Derives the auto entries. Same inputs always give the same entries in the same order.
    pub fn build(
        &self,
        warehouses: &BTreeMap<String, Warehouse>,
        conversions_possible: bool,
    ) -> Vec<TranslationEntry> {
        let mut entries: BTreeMap<(String, TableType), String> = BTreeMap::new();
        for (database, sources) in &self.sources {
            let Some(warehouse) = warehouses.get(database) else {
                debug!(database = %database, "No warehouse resolved; no auto location entries");
                continue;
            };
            for table_type in [TableType::External, TableType::Managed] {
                for source in sources.sources(table_type) {
                    let target = warehouse.directory_for(table_type);
                    if !paths::is_under(source, target) {
                        entries.insert((source.to_string(), table_type), target.to_string());
                    }
                    if table_type == TableType::Managed && conversions_possible {
                        let external = warehouse.directory_for(TableType::External);
                        if !paths::is_under(source, external) {
                            entries.insert((source.to_string(), TableType::External), external.to_string());
                        }
                    }
                }
            }
        }
        entries
            .into_iter()
            .map(|((source, table_type), target)| TranslationEntry {
                source,
                target,
                table_type,
            })
            .collect()
    }
}
