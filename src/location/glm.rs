// ABOUTME: Global location map: ordered source-prefix -> per-table-type target directory rules
// ABOUTME: User entries and auto entries are merged and sorted longest prefix first

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::paths;
use crate::model::TableType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranslationEntry {
    pub source: String,
    pub target: String,
    pub table_type: TableType,
}

/// A lookup hit: the matching prefix, its target and what is left of the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlmMatch {
    pub prefix: String,
    pub target: String,
    pub remainder: String,
}

impl GlmMatch {
    pub fn rewritten(&self) -> String {
        format!("{}{}", self.target.trim_end_matches('/'), self.remainder)
    }
}

type Targets = BTreeMap<TableType, String>;

#[derive(Debug, Clone, Default)]
pub struct GlobalLocationMap {
    user: BTreeMap<String, Targets>,
    auto: BTreeMap<String, Targets>,
    ordered: Vec<(String, Targets)>,
}

fn key(source: &str) -> String {
    let trimmed = source.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn longest_first(a: &str, b: &str) -> Ordering {
    b.len().cmp(&a.len()).then_with(|| a.cmp(b))
}

impl GlobalLocationMap {
    pub fn add_user(&mut self, source: &str, table_type: TableType, target: &str) {
        self.user
            .entry(key(source))
            .or_default()
            .insert(table_type, key(target));
        self.rebuild();
    }

    /// Replaces the whole auto layer.
    pub fn set_auto(&mut self, entries: Vec<TranslationEntry>) {
        self.auto.clear();
        for entry in entries {
            self.auto
                .entry(key(&entry.source))
                .or_default()
                .insert(entry.table_type, key(&entry.target));
        }
        self.rebuild();
    }

    fn rebuild(&mut self) {
        let mut merged: BTreeMap<String, Targets> = self.auto.clone();
        for (source, targets) in &self.user {
            let slot = merged.entry(source.clone()).or_default();
            for (tt, target) in targets {
                slot.insert(*tt, target.clone());
            }
        }
        let mut ordered: Vec<(String, Targets)> = merged.into_iter().collect();
        ordered.sort_by(|(a, _), (b, _)| longest_first(a, b));
        self.ordered = ordered;
    }

    /// Longest matching prefix that has a target for `table_type`.
    pub fn lookup(&self, path: &str, table_type: TableType) -> Option<GlmMatch> {
        let path = paths::strip_namespace(path);
        self.ordered.iter().find_map(|(prefix, targets)| {
            let target = targets.get(&table_type)?;
            if !paths::is_under(path, prefix) {
                return None;
            }
            let remainder = if prefix == "/" { path } else { &path[prefix.len()..] };
            Some(GlmMatch {
                prefix: prefix.clone(),
                target: target.clone(),
                remainder: remainder.to_string(),
            })
        })
    }

    pub fn entries(&self) -> Vec<TranslationEntry> {
        self.ordered
            .iter()
            .flat_map(|(source, targets)| {
                targets.iter().map(move |(tt, target)| TranslationEntry {
                    source: source.clone(),
                    target: target.clone(),
                    table_type: *tt,
                })
            })
            .collect()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.ordered.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }
}
