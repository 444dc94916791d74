use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use customer_batch::{config::BatchConfig, pipeline::CustomerExportPipeline};
use log::{error, info};

#[derive(Parser, Debug)]
#[command(name = "customer-batch")]
#[command(about = "Export the customers table to CSV, one chunk at a time")]
#[command(version)]
struct Cli {
    /// JSON configuration file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, env = "CUSTOMER_BATCH_DATABASE_URL")]
    database_url: Option<String>,

    /// Output CSV file
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long)]
    table: Option<String>,

    #[arg(long)]
    sort_key: Option<String>,

    /// Select list of the page queries, replacing the per-backend default
    #[arg(long)]
    select: Option<String>,

    /// Extra SQL filter on the exported rows
    #[arg(long = "where")]
    filter: Option<String>,

    /// Items per commit; also sets the page size unless --page-size is given
    #[arg(long)]
    chunk_size: Option<usize>,

    #[arg(long)]
    page_size: Option<usize>,

    /// Worker threads; more than one splits the output into partition files
    #[arg(short, long)]
    threads: Option<usize>,

    #[arg(long)]
    delimiter: Option<char>,

    #[arg(long)]
    fetch_timeout_secs: Option<u64>,

    #[arg(long)]
    max_connections: Option<u32>,

    /// Used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<BatchConfig> {
        let mut config = match &self.config {
            Some(path) => BatchConfig::from_json_file(path)?,
            None => BatchConfig::default(),
        };

        if let Some(database_url) = self.database_url {
            config.database_url = database_url;
        }
        if let Some(output) = self.output {
            config.output_path = output;
        }
        if let Some(table) = self.table {
            config.table = table;
        }
        if let Some(sort_key) = self.sort_key {
            config.sort_key = sort_key;
        }
        if let Some(select) = self.select {
            config.select_clause = Some(select);
        }
        if let Some(filter) = self.filter {
            config.where_clause = Some(filter);
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
            config.page_size = self.page_size.unwrap_or(chunk_size);
        } else if let Some(page_size) = self.page_size {
            config.page_size = page_size;
        }
        if let Some(threads) = self.threads {
            config.thread_count = threads;
        }
        if let Some(delimiter) = self.delimiter {
            config.delimiter = delimiter;
        }
        if let Some(secs) = self.fetch_timeout_secs {
            config.fetch_timeout_secs = secs;
        }
        if let Some(max_connections) = self.max_connections {
            config.max_connections = Some(max_connections);
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let config = cli.into_config()?;

    sqlx::any::install_default_drivers();
    let runtime = tokio::runtime::Runtime::new().context("cannot start the tokio runtime")?;

    let pipeline = CustomerExportPipeline::connect(config, runtime.handle().clone())
        .context("cannot connect to the source database")?;

    match pipeline.run() {
        Ok(execution) => {
            info!(
                "{} customer(s) exported by job {} ({}) in {:?}",
                execution.write_count(),
                execution.name,
                execution.id,
                execution.duration
            );
            Ok(())
        }
        Err(err) => {
            error!("Export failed: {}", err);
            Err(err.into())
        }
    }
}
