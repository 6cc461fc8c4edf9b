// ABOUTME: Command line entry point for hms-mirror
// ABOUTME: Loads the configuration, wires the gateways and maps the run outcome to an exit code

use anyhow::{Context, Result};
use clap::Parser;
use hms_mirror::gateway::{Gateways, HdfsCliProbe};
use hms_mirror::{Config, Coordinator};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hms-mirror")]
#[command(about = "Migrate Hive metastore databases and tables between clusters", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short = 'c')]
    config: PathBuf,
    /// Serialized conversion to run against instead of live environments
    #[arg(long)]
    test_data: Option<PathBuf>,
    /// Directory for database snapshots, distcp plans and the run status
    #[arg(long, short = 'o')]
    output_dir: Option<PathBuf>,
    /// Apply the generated statements (dry run otherwise)
    #[arg(long)]
    execute: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hms_mirror=info,warn")))
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)?;
    if cli.test_data.is_some() {
        config.load_test_data = cli.test_data;
    }
    if cli.output_dir.is_some() {
        config.output_dir = cli.output_dir;
    }
    config.execute |= cli.execute;

    // No SQL gateway ships with the binary; live stages fail with a connection error
    // unless a run is driven from test data.
    let mut gateways = Gateways::default();
    if config.collect_stats || config.link_test {
        match HdfsCliProbe::locate() {
            Ok(probe) => gateways.probe = Some(Arc::new(probe)),
            Err(e) => tracing::warn!(error = %e, "Storage probe unavailable"),
        }
    }

    let outcome = Coordinator::new(config, gateways)
        .spawn()
        .await
        .context("Migration run task failed")?;

    let report = serde_json::to_string_pretty(&outcome.report).context("Failed to serialize run report")?;
    println!("{}", report);

    if !outcome.success {
        tracing::error!(return_code = outcome.return_code, "Migration finished with errors");
        std::process::exit(1);
    }
    Ok(())
}
