mod batch;
mod config;
mod gateway;
mod record;
mod sensor;
mod store;

use crate::config::Config;
use crate::gateway::OwGateway;
use crate::record::Record;
use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "owrecord", version, about = "One-wire sensor batch recorder")]
struct Cli {
    /// Settings file path (default: OWRECORD_CONFIG_PATH, then ./settings.toml).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print the record to stdout instead of inserting it.
    #[arg(long, default_value_t = false)]
    read_only: bool,
}

fn init_tracing() -> Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,owrecord=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing()?;

    let config = Config::load(cli.config, cli.read_only).context("configuration failure")?;
    run(config).await
}

async fn run(config: Config) -> Result<()> {
    let gateway = OwGateway::new(
        config.gateway.host.clone(),
        config.gateway.port,
        config.gateway.read_timeout(),
    );

    if config.recorder.read_only {
        let record = poll(&config, &gateway).await?;
        println!("{}", record.to_json());
        return Ok(());
    }

    // Validate the database before touching any sensor; close the pool on both
    // the success and failure paths.
    let pool = store::connect(&config.postgres).await?;
    let result = async {
        let record = poll(&config, &gateway).await?;
        let table = config
            .recorder
            .table
            .as_deref()
            .context("recorder.table is not configured")?;
        store::insert_record(&pool, table, &record)
            .await
            .context("failed to insert record")?;
        tracing::info!(table = %table, columns = record.columns.len(), "record inserted");
        Ok(())
    }
    .await;
    pool.close().await;
    result
}

async fn poll(config: &Config, gateway: &OwGateway) -> Result<Record> {
    tracing::info!(
        sensors = config.sensors.len(),
        gateway = %config.gateway.host,
        "reading one-wire batch"
    );
    let outcomes = batch::read_batch(
        &config.sensors,
        gateway,
        config.recorder.retry_delay(),
    )
    .await;

    let finalized_at = Utc::now();
    let record = record::build_record(&outcomes, &config.sensors, finalized_at)?;
    Ok(record)
}
