//! Caja ledger service binary

use anyhow::Context;
use caja_ledger::{CajaLedger, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting caja ledger");

    // CAJA_CONFIG points at a TOML file; otherwise CAJA_* variables apply
    let config = match std::env::var("CAJA_CONFIG") {
        Ok(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        Err(_) => Config::from_env().context("Failed to load config from environment")?,
    };

    let ledger = CajaLedger::open(config)
        .await
        .context("Failed to open caja ledger")?;

    let stats = ledger.stats()?;
    tracing::info!(
        debts = stats.total_debts,
        deposits = stats.total_deposits,
        cuts = stats.total_cuts,
        "Caja ledger ready"
    );

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down caja ledger");
    ledger.shutdown().await?;
    Ok(())
}
