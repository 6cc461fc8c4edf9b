// ABOUTME: Turns recorded translation pairs into distcp jobs per database and direction
// ABOUTME: Multi-source targets get a source list file, single sources a direct copy

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use super::paths;
use super::translator::TranslationLevel;
use crate::model::Environment;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DistcpEntry {
    Batch {
        target: String,
        sources: Vec<String>,
        source_file: String,
        skip_crc: bool,
    },
    Direct {
        source: String,
        target: String,
        skip_crc: bool,
    },
}

impl DistcpEntry {
    pub fn command(&self) -> String {
        match self {
            DistcpEntry::Batch {
                target,
                source_file,
                skip_crc,
                ..
            } => format!(
                "hadoop distcp{} -f ${{HCFS_BASE_DIR}}/{} {}",
                if *skip_crc { " -skipcrccheck" } else { "" },
                source_file,
                target
            ),
            DistcpEntry::Direct {
                source,
                target,
                skip_crc,
            } => format!(
                "hadoop distcp{} {} {}",
                if *skip_crc { " -skipcrccheck" } else { "" },
                source,
                target
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistcpPlan {
    pub database: String,
    pub environment: Environment,
    /// Target directory -> source directories, before any consolidation.
    pub index: BTreeMap<String, Vec<String>>,
    pub entries: Vec<DistcpEntry>,
}

fn protocols_differ(source: &str, target: &str) -> bool {
    match (paths::protocol_of(source), paths::protocol_of(target)) {
        (Some(a), Some(b)) => a != b,
        _ => false,
    }
}

pub struct DistcpPlanBuilder;

impl DistcpPlanBuilder {
    /// Output is ordered by target, then source.
    pub fn build(
        database: &str,
        environment: Environment,
        levels: &[TranslationLevel],
        consolidate_tables: bool,
    ) -> DistcpPlan {
        let mut reverse: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for level in levels {
            reverse
                .entry(level.adjusted_target())
                .or_default()
                .insert(level.adjusted_original());
        }

        let mut entries = Vec::new();
        let mut batch = 0;
        for (target, sources) in &reverse {
            let skip_crc = sources.iter().any(|s| protocols_differ(s, target));
            if sources.len() > 1 {
                batch += 1;
                entries.push(DistcpEntry::Batch {
                    target: target.clone(),
                    sources: sources.iter().cloned().collect(),
                    source_file: format!("{}_{}_{}_distcp_source.txt", database, environment, batch),
                    skip_crc,
                });
            } else if let Some(source) = sources.iter().next() {
                let target = if consolidate_tables {
                    paths::reduce_url_by(target, 1)
                } else {
                    target.clone()
                };
                entries.push(DistcpEntry::Direct {
                    source: source.clone(),
                    target,
                    skip_crc,
                });
            }
        }

        DistcpPlan {
            database: database.to_string(),
            environment,
            index: reverse
                .into_iter()
                .map(|(target, sources)| (target, sources.into_iter().collect()))
                .collect(),
            entries,
        }
    }
}

impl DistcpPlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(file name, contents)` for each batch entry, one source per line.
    pub fn source_files(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                DistcpEntry::Batch {
                    sources, source_file, ..
                } => Some((source_file.clone(), format!("{}\n", sources.join("\n")))),
                DistcpEntry::Direct { .. } => None,
            })
            .collect()
    }

    pub fn render_script(&self) -> String {
        let mut script = String::new();
        script.push_str("#!/usr/bin/env sh\n\n");
        script.push_str(&format!(
            "# distcp plan for database {} ({})\n",
            self.database, self.environment
        ));
        script.push_str("if [ -z \"${HCFS_BASE_DIR}\" ]; then\n");
        script.push_str("  echo \"Set HCFS_BASE_DIR to the directory holding the *_distcp_source.txt files\"\n");
        script.push_str("  exit 1\n");
        script.push_str("fi\n\n");
        for entry in &self.entries {
            script.push_str(&entry.command());
            script.push('\n');
        }
        script
    }
}

/// `{database: {target: [sources]}}` across every plan.
pub fn plan_map(plans: &[DistcpPlan]) -> BTreeMap<String, BTreeMap<String, Vec<String>>> {
    let mut map: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
    for plan in plans {
        let db = map.entry(plan.database.clone()).or_default();
        for (target, sources) in &plan.index {
            let slot = db.entry(target.clone()).or_default();
            for source in sources {
                if !slot.contains(source) {
                    slot.push(source.clone());
                }
            }
            slot.sort();
        }
    }
    map
}
