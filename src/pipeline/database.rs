// ABOUTME: Database-level DDL: target database name, locations and parameters per environment
// ABOUTME: Also applies the built statements when the run executes

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::{Config, DataStrategyKind, TranslationType};
use crate::error::MirrorError;
use crate::gateway::SqlGateway;
use crate::location::warehouse::{EXTERNAL_WAREHOUSE_VAR, MANAGED_WAREHOUSE_VAR};
use crate::location::{paths, Warehouse, WarehouseSource};
use crate::model::conversion::{COMMENT, DB_LOCATION, DB_MANAGED_LOCATION, RESERVED_DB_PROPERTIES};
use crate::model::{DBMirror, Environment};

/// Swaps the trailing `<db>.db` directory for the target database's.
fn rename_database_dir(relative: &str, database: &str, target: &str) -> String {
    let db_dir = format!("{}.db", database);
    match paths::last_directory(relative) {
        Some(last) if last == db_dir => paths::join(&paths::parent_directory(relative), &format!("{}.db", target)),
        _ => relative.to_string(),
    }
}

fn quoted_clause(keyword: &str, value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => format!(" {} '{}'", keyword, v),
        _ => String::new(),
    }
}

/// Target locations for the database: `(external, managed)`, namespace-qualified.
fn target_locations(
    config: &Config,
    db: &DBMirror,
    warehouse: Option<&Warehouse>,
    namespace: &str,
    target: &str,
) -> Result<(Option<String>, Option<String>), MirrorError> {
    let relative = |key: &str| {
        db.property(Environment::Left, key)
            .map(|loc| format!("{}{}", namespace, rename_database_dir(paths::strip_namespace(loc), &db.name, target)))
    };
    let aligned = config.translation_type() == TranslationType::Aligned
        || config.data_strategy == DataStrategyKind::StorageMigration;
    match warehouse {
        Some(wh) if aligned && wh.source != WarehouseSource::Env => Ok((
            Some(format!("{}{}/{}.db", namespace, wh.external_directory, target)),
            Some(format!("{}{}/{}.db", namespace, wh.managed_directory, target)),
        )),
        Some(_) => Ok((relative(DB_LOCATION), relative(DB_MANAGED_LOCATION))),
        None if aligned => Err(MirrorError::MissingDataPoint(format!(
            "no warehouse to place database {} under",
            db.name
        ))),
        None => Ok((relative(DB_LOCATION), relative(DB_MANAGED_LOCATION))),
    }
}

/// Location is recorded but left out of the statement when it already is the
/// environment default.
fn is_default_location(location: &str, default_dir: Option<&String>) -> bool {
    match default_dir {
        Some(dir) => {
            paths::parent_directory(paths::strip_namespace(location)).trim_end_matches('/')
                == paths::strip_namespace(dir).trim_end_matches('/')
        }
        None => false,
    }
}

fn create_statement(name: &str, comment: Option<&str>, location: Option<&str>, managed: Option<&str>) -> String {
    format!(
        "CREATE DATABASE IF NOT EXISTS {}{}{}{}",
        name,
        quoted_clause("COMMENT", comment),
        quoted_clause("LOCATION", location),
        quoted_clause("MANAGEDLOCATION", managed)
    )
}

fn parameters_statement(name: &str, parameters: &BTreeMap<String, String>) -> Option<String> {
    if parameters.is_empty() {
        return None;
    }
    let pairs = parameters
        .iter()
        .map(|(k, v)| format!("'{}'='{}'", k, v))
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!("ALTER DATABASE {} SET DBPROPERTIES ({})", name, pairs))
}

fn copied_parameters(db: &DBMirror) -> BTreeMap<String, String> {
    db.properties
        .get(&Environment::Left)
        .map(|props| {
            props
                .iter()
                .filter(|(k, _)| !RESERVED_DB_PROPERTIES.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default()
}

/// Builds the statements for one database and records the target locations on RIGHT
/// (on LEFT for STORAGE_MIGRATION) so table translation can align under them.
pub fn build_database_ddl(
    config: &Config,
    db: &mut DBMirror,
    warehouse: Option<&Warehouse>,
    right_vars: &BTreeMap<String, String>,
) -> Result<(), MirrorError> {
    let comment = db.property(Environment::Left, COMMENT).map(str::to_string);

    if config.data_strategy == DataStrategyKind::Dump {
        let statement = create_statement(
            &db.name,
            comment.as_deref(),
            db.property(Environment::Left, DB_LOCATION),
            db.property(Environment::Left, DB_MANAGED_LOCATION),
        );
        db.add_sql(Environment::Left, "Creating database", statement);
        if let Some(params) = parameters_statement(&db.name, &copied_parameters(db)) {
            db.add_sql(Environment::Left, "Setting database parameters", params);
        }
        return Ok(());
    }

    let namespace = config.target_namespace().unwrap_or_default();

    if config.data_strategy == DataStrategyKind::StorageMigration {
        let (external, managed) = target_locations(config, db, warehouse, &namespace, &db.name)?;
        let name = db.name.clone();
        for (key, keyword, location) in [(DB_LOCATION, "LOCATION", external), (DB_MANAGED_LOCATION, "MANAGEDLOCATION", managed)] {
            let Some(location) = location else { continue };
            if db.property(Environment::Left, key) != Some(location.as_str()) {
                db.add_sql(
                    Environment::Left,
                    "Moving database location",
                    format!("ALTER DATABASE {} SET {} '{}'", name, keyword, location),
                );
            }
            db.set_property(Environment::Right, key, location);
        }
        return Ok(());
    }

    let target = config.resolve_database_name(&db.name);
    let right_exists = db.property(Environment::Right, DB_LOCATION).is_some();
    let right_legacy = config.cluster(Environment::Right).map(|c| c.legacy_hive).unwrap_or(false);

    if right_exists {
        debug!(database = %target, "Database exists on RIGHT; keeping its locations");
        db.add_sql(Environment::Right, "Selecting database", format!("USE {}", target));
    } else {
        let (mut external, mut managed) = if config.data_strategy.keeps_location() {
            (None, None)
        } else {
            target_locations(config, db, warehouse, &namespace, &target)?
        };
        if right_legacy {
            managed = None;
        }

        if let Some(location) = external.clone() {
            db.set_property(Environment::Right, DB_LOCATION, location.clone());
            if is_default_location(&location, right_vars.get(EXTERNAL_WAREHOUSE_VAR)) {
                db.add_issue(
                    Environment::Right,
                    format!("LOCATION {} is the environment default; not set explicitly", location),
                );
                external = None;
            }
        }
        if let Some(location) = managed.clone() {
            db.set_property(Environment::Right, DB_MANAGED_LOCATION, location.clone());
            if is_default_location(&location, right_vars.get(MANAGED_WAREHOUSE_VAR)) {
                db.add_issue(
                    Environment::Right,
                    format!("MANAGEDLOCATION {} is the environment default; not set explicitly", location),
                );
                managed = None;
            }
        }

        let statement = create_statement(&target, comment.as_deref(), external.as_deref(), managed.as_deref());
        db.add_sql(Environment::Right, "Creating database", statement);
    }

    let parameters = copied_parameters(db);
    if let Some(statement) = parameters_statement(&target, &parameters) {
        db.add_sql(Environment::Right, "Setting database parameters", statement);
    }
    for (key, value) in parameters {
        db.set_property(Environment::Right, &key, value);
    }
    Ok(())
}

/// Applies LEFT statements, then RIGHT, one session per environment.
pub async fn execute_database_ddl(sql: &dyn SqlGateway, db: &DBMirror) -> Result<()> {
    for environment in [Environment::Left, Environment::Right] {
        let statements = db.sql_for(environment);
        if statements.is_empty() {
            continue;
        }
        let mut session = sql
            .session(environment)
            .await
            .with_context(|| format!("Failed to open a {} session for database {}", environment, db.name))?;
        for pair in statements {
            session
                .execute(&pair.action)
                .await
                .with_context(|| format!("{} failed for database {}", pair.description, db.name))?;
        }
        info!(database = %db.name, environment = %environment, statements = statements.len(), "Applied database statements");
    }
    Ok(())
}
