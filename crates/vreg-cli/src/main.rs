use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use vreg_classifier::{OcpVariantClassifier, VariantClassifier};
use vreg_sync::{load_variants_file, RunMode, SyncRunSummary};

#[derive(Debug, Parser)]
#[command(name = "vreg-cli")]
#[command(about = "CI job variant registry command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Classify every job in the jobs file and reconcile the registry table.
    Sync {
        #[arg(long)]
        dry_run: bool,
    },
    /// Report what a sync would change without writing to the registry.
    Plan,
    /// Print the variants computed for a single job name.
    Classify {
        job: String,
        /// JSON variants file whose string members are used as overrides.
        #[arg(long)]
        overrides: Option<PathBuf>,
    },
    /// Create the registry table if it does not exist.
    Migrate,
}

fn print_summary(label: &str, summary: &SyncRunSummary) {
    println!(
        "{label}: run_id={} jobs={} registry_jobs={} inserts={} updates={} deletes={} job_deletes={} failed={} reports={}",
        summary.run_id,
        summary.expected_jobs,
        summary.current_jobs,
        summary.stats.inserts.planned,
        summary.stats.updates.planned,
        summary.stats.deletes.planned,
        summary.stats.delete_jobs.planned,
        summary.stats.failed(),
        summary.reports_dir
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,vreg=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync { dry_run: false }) {
        Commands::Sync { dry_run: false } => {
            let summary = vreg_sync::run_sync_once_from_env(RunMode::Apply).await?;
            print_summary("sync complete", &summary);
        }
        Commands::Sync { dry_run: true } | Commands::Plan => {
            let summary = vreg_sync::run_sync_once_from_env(RunMode::DryRun).await?;
            print_summary("plan complete", &summary);
        }
        Commands::Classify { job, overrides } => {
            let overrides = match overrides {
                Some(path) => load_variants_file(&path)?,
                None => BTreeMap::new(),
            };
            let variants = OcpVariantClassifier::new().classify(&job, &overrides);
            let json = serde_json::to_string_pretty(&variants).context("serializing variants")?;
            println!("{json}");
        }
        Commands::Migrate => {
            let table = vreg_sync::migrate_from_env().await?;
            println!("registry table {table} is ready");
        }
    }

    Ok(())
}
