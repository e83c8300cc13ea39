//! Lampi DB task - restore Koodisto CSV data from S3 into PostgreSQL

use anyhow::{Context, Result};
use clap::Parser;
use lampi_common::logging::{init_logging, LogConfig, LogLevel};
use lampi_db_task::config::Config;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "lampi-db-task")]
#[command(author, version, about = "Restore Koodisto CSV data from S3 into PostgreSQL")]
struct Cli {
    /// Bucket holding the manifest, schema and table files
    #[arg(long)]
    bucket: Option<String>,

    /// Key of the manifest object
    #[arg(long)]
    manifest_key: Option<String>,

    /// Database schema to recreate
    #[arg(long)]
    schema: Option<String>,

    /// Table objects opened ahead of the running COPY
    #[arg(long)]
    prefetch: Option<usize>,

    /// Mark this task name completed in public.task_status
    #[arg(long)]
    task_name: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(bucket) = self.bucket {
            config.storage.bucket = bucket;
        }
        if let Some(key) = self.manifest_key {
            config.restore.manifest_key = key;
        }
        if let Some(schema) = self.schema {
            config.restore.schema = schema;
        }
        if let Some(prefetch) = self.prefetch {
            config.restore.import_prefetch = prefetch;
        }
        if let Some(task_name) = self.task_name {
            config.restore.task_name = Some(task_name);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("lampi-db-task")
        .build()
        .merge_env()?;
    let _log_guard = init_logging(&log_config)?;

    // Command-line values override the environment before anything is checked
    let mut config = Config::load()?;
    cli.apply(&mut config);
    config.validate()?;

    let address = config.database.address();
    info!("Starting to restore Koodisto CSV data to database");

    match lampi_db_task::restore(config).await {
        Ok(report) => {
            for table in &report.tables {
                info!(table = %table.table, rows = table.rows, "Table restored");
            }
            info!(
                schema = %report.schema,
                rows = report.total_rows(),
                "Successfully restored Koodisto CSV data to database"
            );
            Ok(())
        },
        Err(e) => {
            error!(error = %e, kind = e.kind(), database = %address, "Restore failed");
            Err(e).with_context(|| format!("Failed to restore Koodisto data to database {}", address))
        },
    }
}
