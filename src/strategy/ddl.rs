// ABOUTME: Shared HiveQL templates and definition rewrites used by every strategy
// ABOUTME: Translates table/partition locations and shapes target definitions

use anyhow::Result;

use super::TableContext;
use crate::location::TranslationRequest;
use crate::model::{Environment, EnvironmentTable, TableMirror, TableType};

pub const EXTERNAL_PURGE: &str = "external.table.purge";
pub const LEGACY_MANAGED: &str = "hms-mirror_Converted";

pub fn use_database(database: &str) -> String {
    format!("USE {}", database)
}

pub fn drop_table(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", table)
}

pub fn msck_repair(table: &str) -> String {
    format!("MSCK REPAIR TABLE {}", table)
}

pub fn set_location(table: &str, location: &str) -> String {
    format!("ALTER TABLE {} SET LOCATION '{}'", table, location)
}

pub fn set_property(table: &str, key: &str, value: &str) -> String {
    format!("ALTER TABLE {} SET TBLPROPERTIES ('{}'='{}')", table, key, value)
}

pub fn rename_table(from: &str, to: &str) -> String {
    format!("ALTER TABLE {} RENAME TO {}", from, to)
}

/// `dt=1/region=eu` -> `dt='1', region='eu'`
pub fn partition_clause(spec: &str) -> String {
    spec.split('/')
        .filter(|s| !s.is_empty())
        .map(|kv| match kv.split_once('=') {
            Some((k, v)) => format!("{}='{}'", k, v),
            None => kv.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn add_partition(table: &str, spec: &str, location: &str) -> String {
    format!(
        "ALTER TABLE {} ADD IF NOT EXISTS PARTITION ({}) LOCATION '{}'",
        table,
        partition_clause(spec),
        location
    )
}

pub fn set_partition_location(table: &str, spec: &str, location: &str) -> String {
    format!(
        "ALTER TABLE {} PARTITION ({}) SET LOCATION '{}'",
        table,
        partition_clause(spec),
        location
    )
}

/// Column names from the `PARTITIONED BY (...)` block.
pub fn partition_columns(definition: &[String]) -> Vec<String> {
    let mut columns = Vec::new();
    let mut inside = false;
    for line in definition {
        let trimmed = line.trim();
        if !inside {
            if trimmed.to_ascii_uppercase().starts_with("PARTITIONED BY") {
                inside = true;
            }
            continue;
        }
        if let Some(name) = trimmed.split('`').nth(1) {
            columns.push(name.to_string());
        }
        if trimmed.ends_with(')') {
            break;
        }
    }
    columns
}

pub fn insert_overwrite(target: &str, source: &str, partition_columns: &[String]) -> String {
    if partition_columns.is_empty() {
        format!("INSERT OVERWRITE TABLE {} SELECT * FROM {}", target, source)
    } else {
        format!(
            "INSERT OVERWRITE TABLE {} PARTITION ({}) SELECT * FROM {}",
            target,
            partition_columns.join(", "),
            source
        )
    }
}

/// Points the first `CREATE ... TABLE` line at another table name.
pub fn rename_in_definition(definition: &mut [String], from: &str, to: &str) {
    for line in definition.iter_mut() {
        if line.trim_start().to_ascii_uppercase().starts_with("CREATE") {
            let quoted = format!("`{}`", from);
            if line.contains(&quoted) {
                *line = line.replacen(&quoted, &format!("`{}`", to), 1);
            } else {
                *line = line.replacen(from, to, 1);
            }
            break;
        }
    }
}

/// Adds or replaces a table property inside the `TBLPROPERTIES (...)` block.
pub fn upsert_property(definition: &mut Vec<String>, key: &str, value: &str) {
    let entry = format!("'{}'='{}'", key, value);
    let prefix = format!("'{}'=", key);
    if let Some(line) = definition.iter_mut().find(|l| l.trim_start().starts_with(&prefix)) {
        let trailer = if line.trim_end().ends_with(')') { ")" } else { "," };
        *line = format!("  {}{}", entry, trailer);
        return;
    }
    match definition
        .iter()
        .position(|l| l.trim().to_ascii_uppercase().starts_with("TBLPROPERTIES"))
    {
        Some(idx) => definition.insert(idx + 1, format!("  {},", entry)),
        None => {
            definition.push("TBLPROPERTIES (".to_string());
            definition.push(format!("  {})", entry));
        }
    }
}

/// Target-side type: legacy managed tables become external when the conversion applies.
pub fn target_table_type(ctx: &TableContext, left: &EnvironmentTable) -> TableType {
    if left.is_external() {
        return TableType::External;
    }
    if ctx.config.conversions_possible() && !left.is_transactional() {
        return TableType::External;
    }
    TableType::Managed
}

/// Starts a target definition from the LEFT one, applying the managed -> external conversion.
pub fn target_definition(ctx: &TableContext, left: &EnvironmentTable) -> Vec<String> {
    let mut scratch = EnvironmentTable {
        definition: left.definition.clone(),
        ..Default::default()
    };
    if !left.is_external() && target_table_type(ctx, left) == TableType::External {
        scratch.convert_to_external();
        upsert_property(&mut scratch.definition, EXTERNAL_PURGE, "true");
        upsert_property(&mut scratch.definition, LEGACY_MANAGED, "true");
    }
    scratch.definition
}

/// Translates the LEFT table location; attaches issues and the remapped flag.
pub fn translate_table_location(ctx: &TableContext, table: &mut TableMirror) -> Result<Option<String>> {
    let Some(left) = table.left() else {
        return Ok(None);
    };
    let Some(original) = left.location() else {
        return Ok(None);
    };
    let table_type = target_table_type(ctx, left);
    let translation = ctx.translator.translate(&TranslationRequest {
        database: ctx.database,
        table: &table.name,
        table_type,
        original: &original,
        table_location: None,
        partition_spec: None,
    })?;
    if translation.remapped {
        table.remapped = true;
    }
    for issue in translation.issues {
        table.add_issue(Environment::Right, issue);
    }
    Ok(Some(translation.location))
}

/// Translates every LEFT partition location; returns `(spec, target)` pairs.
pub fn translate_partitions(ctx: &TableContext, table: &mut TableMirror) -> Result<Vec<(String, String)>> {
    let Some(left) = table.left() else {
        return Ok(Vec::new());
    };
    let table_location = left.location().unwrap_or_default();
    let table_type = target_table_type(ctx, left);
    let partitions: Vec<(String, String)> = left
        .partitions
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut translated = Vec::with_capacity(partitions.len());
    let mut issues = Vec::new();
    let mut remapped = false;
    for (spec, location) in partitions {
        let translation = ctx.translator.translate(&TranslationRequest {
            database: ctx.database,
            table: &table.name,
            table_type,
            original: &location,
            table_location: Some(&table_location),
            partition_spec: Some(&spec),
        })?;
        remapped |= translation.remapped;
        issues.extend(translation.issues);
        translated.push((spec, translation.location));
    }
    if remapped {
        table.remapped = true;
    }
    for issue in issues {
        table.add_issue(Environment::Right, issue);
    }
    Ok(translated)
}

/// Opens the RIGHT statement list. An existing RIGHT table is dropped under `sync`
/// and left alone otherwise; returns false when the table must not be touched.
pub fn begin_right_sql(ctx: &TableContext, table: &mut TableMirror) -> bool {
    let exists = table
        .environment_table(Environment::Right)
        .map(|et| et.exists)
        .unwrap_or(false);
    if exists && !ctx.config.sync {
        table.add_issue(
            Environment::Right,
            "Table already exists on RIGHT; no changes without `sync`",
        );
        return false;
    }
    let name = table.name.clone();
    let right = table.environment_table_mut(Environment::Right);
    right.add_sql("Selecting database", use_database(&ctx.target_database()));
    if exists {
        right.add_sql("Dropping existing table for sync", drop_table(&name));
    }
    true
}

/// Drops a table property line, keeping the `TBLPROPERTIES (...)` block well formed.
pub fn remove_property(definition: &mut Vec<String>, key: &str) {
    let prefix = format!("'{}'=", key);
    let Some(idx) = definition.iter().position(|l| l.trim_start().starts_with(&prefix)) else {
        return;
    };
    let closes = definition[idx].trim_end().ends_with(')');
    definition.remove(idx);
    if !closes || idx == 0 {
        return;
    }
    let prev = idx - 1;
    if definition[prev].trim().to_ascii_uppercase().starts_with("TBLPROPERTIES") {
        definition.remove(prev);
    } else if let Some(stripped) = definition[prev].trim_end().strip_suffix(',') {
        definition[prev] = format!("{})", stripped);
    }
}
