// ABOUTME: Writes the run's structured outputs: database snapshots, distcp plans and status
// ABOUTME: Rendering them into documents is left to whatever reads this directory

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::location::{plan_map, DistcpPlan};
use crate::model::{Conversion, RunStatusReport};

pub const DISTCP_PLANS_FILE: &str = "distcp_plans.json";
pub const RUN_STATUS_FILE: &str = "run_status.json";

async fn write(path: PathBuf, contents: String, written: &mut Vec<PathBuf>) -> Result<()> {
    tokio::fs::write(&path, contents)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    written.push(path);
    Ok(())
}

/// Writes every output under `dir` and returns the paths written.
pub async fn save_reports(
    dir: &Path,
    conversion: &Conversion,
    plans: &[DistcpPlan],
    status: &RunStatusReport,
) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    let mut written = Vec::new();

    for database in conversion.databases.keys() {
        let snapshot = conversion.snapshot(database)?;
        write(dir.join(format!("{}_hms-mirror.json", database)), snapshot, &mut written).await?;
    }

    if !plans.is_empty() {
        let map = serde_json::to_string_pretty(&plan_map(plans)).context("Failed to serialize distcp plans")?;
        write(dir.join(DISTCP_PLANS_FILE), map, &mut written).await?;
    }
    for plan in plans.iter().filter(|p| !p.is_empty()) {
        let script = format!(
            "{}_{}_distcp_script.sh",
            plan.database,
            plan.environment.to_string().to_lowercase()
        );
        write(dir.join(script), plan.render_script(), &mut written).await?;
        for (name, contents) in plan.source_files() {
            write(dir.join(name), contents, &mut written).await?;
        }
    }

    let status = serde_json::to_string_pretty(status).context("Failed to serialize run status")?;
    write(dir.join(RUN_STATUS_FILE), status, &mut written).await?;

    info!(directory = %dir.display(), files = written.len(), "Reports saved");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{DistcpPlanBuilder, TranslationLevel};
    use crate::model::{Environment, RunStatus};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_snapshot_plan_and_status_written() {
        let dir = TempDir::new().unwrap();
        let mut conversion = Conversion::default();
        conversion.add_database("sales").add_table("orders");

        let level = |original: &str| TranslationLevel {
            original: original.to_string(),
            target: "hdfs://ns2/data/a".to_string(),
            level: 0,
        };
        let levels = vec![level("hdfs://ns1/data/a"), level("hdfs://ns1/data/b")];
        let plan = DistcpPlanBuilder::build("sales", Environment::Right, &levels, false);

        let report = RunStatus::new().report();
        let written = save_reports(dir.path(), &conversion, &[plan], &report).await.unwrap();

        assert!(dir.path().join("sales_hms-mirror.json").exists());
        assert!(dir.path().join("sales_right_distcp_script.sh").exists());
        assert!(dir.path().join(RUN_STATUS_FILE).exists());
        let plans = std::fs::read_to_string(dir.path().join(DISTCP_PLANS_FILE)).unwrap();
        assert!(plans.contains("hdfs://ns1/data/b"));
        assert!(written.iter().any(|p| p.to_string_lossy().ends_with("_distcp_source.txt")));
    }
}
