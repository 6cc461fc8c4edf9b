// ABOUTME: Computes target locations for tables and partitions
// ABOUTME: Location map first, then ALIGNED/RELATIVE fallback; records distcp pairs as it goes

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::glm::GlobalLocationMap;
use super::paths;
use super::warehouse::Warehouse;
use crate::config::{Config, DataFlow, DataStrategyKind, TranslationType};
use crate::error::MirrorError;
use crate::messages::MessageCode;
use crate::model::conversion::{DB_LOCATION, DB_MANAGED_LOCATION};
use crate::model::{DBMirror, Environment, TableType};

/// An (original, target) pair plus how many trailing segments distcp should drop.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct TranslationLevel {
    pub original: String,
    pub target: String,
    pub level: usize,
}

impl TranslationLevel {
    pub fn adjusted_original(&self) -> String {
        paths::reduce_url_by(&self.original, self.level)
    }

    pub fn adjusted_target(&self) -> String {
        paths::reduce_url_by(&self.target, self.level)
    }
}

type Levels = BTreeMap<Environment, BTreeSet<TranslationLevel>>;

/// Pairs recorded by concurrent table units, per database and environment.
#[derive(Debug, Default)]
pub struct TranslationRecorder {
    pairs: Mutex<BTreeMap<String, Levels>>,
}

impl TranslationRecorder {
    pub fn record(&self, database: &str, environment: Environment, level: TranslationLevel) {
        if let Ok(mut pairs) = self.pairs.lock() {
            pairs
                .entry(database.to_string())
                .or_default()
                .entry(environment)
                .or_default()
                .insert(level);
        }
    }

    pub fn levels(&self, database: &str, environment: Environment) -> Vec<TranslationLevel> {
        self.pairs
            .lock()
            .ok()
            .and_then(|pairs| {
                pairs
                    .get(database)
                    .and_then(|envs| envs.get(&environment))
                    .map(|set| set.iter().cloned().collect())
            })
            .unwrap_or_default()
    }

    /// Databases and environments that have recorded pairs.
    pub fn recorded(&self) -> Vec<(String, Environment)> {
        self.pairs
            .lock()
            .map(|pairs| {
                pairs
                    .iter()
                    .flat_map(|(db, envs)| envs.keys().map(move |env| (db.clone(), *env)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// What to translate.
#[derive(Debug, Clone, Copy)]
pub struct TranslationRequest<'a> {
    pub database: &'a DBMirror,
    pub table: &'a str,
    /// Table type on the target side.
    pub table_type: TableType,
    pub original: &'a str,
    /// Set when translating a partition: its table's source location.
    pub table_location: Option<&'a str>,
    pub partition_spec: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub location: String,
    pub remapped: bool,
    /// Non-fatal findings to attach to the RIGHT table.
    pub issues: Vec<String>,
}

/// Immutable once the location map is built; shared by every table unit.
#[derive(Debug, Clone)]
pub struct Translator {
    config: Arc<Config>,
    glm: Arc<GlobalLocationMap>,
    warehouses: Arc<BTreeMap<String, Warehouse>>,
    recorder: Arc<TranslationRecorder>,
}

impl Translator {
    pub fn new(
        config: Arc<Config>,
        glm: Arc<GlobalLocationMap>,
        warehouses: Arc<BTreeMap<String, Warehouse>>,
        recorder: Arc<TranslationRecorder>,
    ) -> Self {
        Self {
            config,
            glm,
            warehouses,
            recorder,
        }
    }

    pub fn glm(&self) -> &GlobalLocationMap {
        &self.glm
    }

    pub fn warehouse(&self, database: &str) -> Option<&Warehouse> {
        self.warehouses.get(database)
    }

    fn source_namespace(&self) -> String {
        self.config
            .namespace(Environment::Left)
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string()
    }

    fn target_namespace(&self) -> String {
        self.config.target_namespace().unwrap_or_default()
    }

    pub fn translate(&self, request: &TranslationRequest) -> Result<Translation, MirrorError> {
        let db = &request.database.name;
        let relative = paths::strip_namespace(request.original);
        let target_db = self.config.resolve_database_name(db);

        let (new_relative, remapped) = match self.glm.lookup(relative, request.table_type) {
            Some(hit) => {
                debug!(database = %db, table = %request.table, prefix = %hit.prefix, "Location matched map entry");
                (hit.rewritten(), true)
            }
            None => {
                if self.config.data_strategy == DataStrategyKind::StorageMigration
                    && self.config.translation_type() == TranslationType::Relative
                    && self.target_namespace() == self.source_namespace()
                {
                    return Err(MirrorError::MissingDataPoint(format!(
                        "{} is already in namespace {} and no location map entry covers it",
                        request.original,
                        self.target_namespace()
                    )));
                }
                if let Some(table_location) = request.table_location {
                    let base = paths::strip_namespace(table_location);
                    if self.config.is_distcp() && !paths::is_under(relative, base) {
                        return Err(MirrorError::Mismatch(format!(
                            "{} is outside its table location {} and no location map entry covers it",
                            request.original, table_location
                        )));
                    }
                }
                if self.config.data_strategy.keeps_location() {
                    return Ok(Translation {
                        location: request.original.to_string(),
                        remapped: false,
                        issues: Vec::new(),
                    });
                }
                match self.config.translation_type() {
                    TranslationType::Aligned => (self.aligned(request, &target_db)?, false),
                    TranslationType::Relative => (swap_database_segment(relative, db, &target_db), false),
                }
            }
        };

        let location = format!("{}{}", self.target_namespace(), new_relative);
        let issues = self.validate(request, &new_relative);
        self.record(request, &location);

        Ok(Translation {
            location,
            remapped,
            issues,
        })
    }

    fn aligned(&self, request: &TranslationRequest, target_db: &str) -> Result<String, MirrorError> {
        let recorded = match request.table_type {
            TableType::External => request.database.property(Environment::Right, DB_LOCATION),
            TableType::Managed => request
                .database
                .property(Environment::Right, DB_MANAGED_LOCATION)
                .or_else(|| request.database.property(Environment::Right, DB_LOCATION)),
        };
        let base = match recorded {
            Some(location) => paths::strip_namespace(location).trim_end_matches('/').to_string(),
            None => {
                let warehouse = self.warehouses.get(&request.database.name).ok_or_else(|| {
                    MirrorError::MissingDataPoint(format!(
                        "no warehouse to align {}.{} under",
                        request.database.name, request.table
                    ))
                })?;
                format!(
                    "{}/{}.db",
                    warehouse.directory_for(request.table_type).trim_end_matches('/'),
                    target_db
                )
            }
        };
        let mut path = format!("{}/{}", base, request.table);
        if let Some(spec) = request.partition_spec {
            path = paths::join(&path, spec);
        }
        Ok(path)
    }

    fn validate(&self, request: &TranslationRequest, new_relative: &str) -> Vec<String> {
        let key = match request.table_type {
            TableType::External => DB_LOCATION,
            TableType::Managed => DB_MANAGED_LOCATION,
        };
        let Some(db_location) = request.database.property(Environment::Right, key) else {
            return Vec::new();
        };
        let expected = paths::strip_namespace(db_location);
        if paths::is_under(new_relative, expected) {
            return Vec::new();
        }
        vec![MessageCode::LocationNotMatchWarehouse.render(&[
            request.table_type.to_string(),
            request.original.to_string(),
            new_relative.to_string(),
        ])]
    }

    fn record(&self, request: &TranslationRequest, location: &str) {
        if !self.config.is_distcp() {
            return;
        }
        let environment = if self.config.data_strategy == DataStrategyKind::StorageMigration {
            Environment::Left
        } else if self.config.transfer.storage_migration.data_flow == DataFlow::Pull && !self.config.flip {
            Environment::Right
        } else {
            Environment::Left
        };
        let mut level = if self.config.is_table_filtered() { 0 } else { 1 };
        if let Some(spec) = request.partition_spec {
            level += paths::partition_depth(spec);
        }
        self.recorder.record(
            &self.config.resolve_database_name(&request.database.name),
            environment,
            TranslationLevel {
                original: request.original.to_string(),
                target: location.to_string(),
                level,
            },
        );
    }
}

/// Replaces the `<db>.db` (or bare `<db>`) segment with the target database name.
fn swap_database_segment(relative: &str, database: &str, target: &str) -> String {
    if database == target {
        return relative.to_string();
    }
    let db_dir = format!("{}.db", database);
    let segments: Vec<&str> = relative.split('/').collect();
    let idx = segments
        .iter()
        .position(|s| *s == db_dir)
        .or_else(|| segments.iter().position(|s| *s == database));
    match idx {
        Some(idx) => {
            let replacement = if segments[idx] == db_dir {
                format!("{}.db", target)
            } else {
                target.to_string()
            };
            let mut owned: Vec<String> = segments.iter().map(|s| s.to_string()).collect();
            owned[idx] = replacement;
            owned.join("/")
        }
        None => relative.to_string(),
    }
}
