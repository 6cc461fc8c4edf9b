// ABOUTME: Storage probe backed by the `hdfs` command line client
// ABOUTME: Used for existence checks, content summaries and namespace link tests

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

use super::StorageProbe;
use crate::model::TableStatistics;

pub struct HdfsCliProbe {
    binary: PathBuf,
}

impl HdfsCliProbe {
    pub fn locate() -> Result<Self> {
        let binary = which::which("hdfs").context(
            "hdfs client not found in PATH. Install the Hadoop client or disable collect_stats/link_test",
        )?;
        Ok(Self { binary })
    }

    async fn dfs(&self, args: &[&str]) -> Result<std::process::Output> {
        debug!(args = ?args, "Running hdfs dfs");
        Command::new(&self.binary)
            .arg("dfs")
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to run hdfs dfs {}", args.join(" ")))
    }
}

/// Parses `hdfs dfs -count` output: `DIR_COUNT FILE_COUNT CONTENT_SIZE PATHNAME`.
pub fn parse_count(output: &str) -> Result<TableStatistics> {
    let line = output
        .lines()
        .find(|l| !l.trim().is_empty())
        .context("hdfs dfs -count returned no output")?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 3 {
        bail!("Unexpected hdfs dfs -count output: {}", line);
    }
    let number = |idx: usize| -> Result<u64> {
        fields[idx]
            .parse::<u64>()
            .with_context(|| format!("Unexpected number `{}` in hdfs dfs -count output", fields[idx]))
    };
    Ok(TableStatistics::new(number(1)?, number(0)?, number(2)?))
}

#[async_trait]
impl StorageProbe for HdfsCliProbe {
    async fn exists(&self, location: &str) -> Result<bool> {
        let output = self.dfs(&["-test", "-e", location]).await?;
        Ok(output.status.success())
    }

    async fn content_summary(&self, location: &str) -> Result<TableStatistics> {
        let output = self.dfs(&["-count", location]).await?;
        if !output.status.success() {
            bail!(
                "hdfs dfs -count {} failed: {}",
                location,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        parse_count(&String::from_utf8_lossy(&output.stdout))
    }

    async fn link_test(&self, namespaces: &[String]) -> Result<()> {
        for namespace in namespaces {
            let root = format!("{}/", namespace.trim_end_matches('/'));
            let output = self.dfs(&["-ls", &root]).await?;
            if !output.status.success() {
                bail!(
                    "Namespace {} is not reachable: {}",
                    namespace,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
        }
        Ok(())
    }
}
