//! # Donation Stream Demo
//!
//! Starts a few micro-donation streams against a simulated wallet, prints
//! the live feed as JSON lines, and stops everything after a while.
//!
//! ```text
//! SEVA_SUMMARY_INTERVAL_SECS=5 SEVA_STORE_DIR=./streams cargo run -p donation-stream-demo
//! ```

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use sevastream_core::{
    EngineConfig, ExecutorError, PaymentExecutor, PaymentRequest, Receipt, SchedulerBuilder,
    StreamEvent,
};
use sevastream_persistence::JsonFileStreamStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Simulated wallet
// ============================================================================

/// Confirms after a short random delay and declines a fraction of payments.
struct SimulatedWallet {
    decline_percent: u8,
}

#[async_trait]
impl PaymentExecutor for SimulatedWallet {
    async fn execute(&self, request: PaymentRequest) -> Result<Receipt, ExecutorError> {
        tokio::time::sleep(Duration::from_millis(fastrand::u64(50..400))).await;

        if fastrand::u8(0..100) < self.decline_percent {
            return Err(ExecutorError::retryable(format!(
                "wallet declined debit of {}",
                request.total_debit()
            )));
        }
        Ok(Receipt::new(format!("0x{:016x}", fastrand::u64(..))))
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sevastream=info".parse()?))
        .init();

    let config = EngineConfig::from_env()?;
    config.log();

    let run_for = Duration::from_secs(
        env::var("DEMO_RUN_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(35),
    );

    let mut builder = SchedulerBuilder::new(SimulatedWallet { decline_percent: 15 })
        .with_config(config);
    if let Ok(dir) = env::var("SEVA_STORE_DIR") {
        let store = JsonFileStreamStore::open(&dir).await?;
        info!(dir = %dir, "Persisting stream snapshots");
        builder = builder.with_store(Arc::new(store));
    }
    let scheduler = builder.build();

    let mut feed = scheduler.subscribe();
    let feed_id = feed.id;
    let printer = tokio::spawn(async move {
        while let Some(event) = feed.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) if !matches!(event, StreamEvent::Summary(_)) => println!("{line}"),
                Ok(line) => info!(summary = %line, "Active streams"),
                Err(e) => tracing::warn!(error = %e, "Failed to encode event"),
            }
        }
    });

    let flood = scheduler.start_stream(Decimal::from(8), 2, "flood-relief-assam")?;
    let school = scheduler.start_stream(Decimal::new(2550, 2), 3, "school-meals-pune")?;
    let clinic =
        scheduler.start_stream_with_default_interval(Decimal::from(50), "rural-clinic-odisha")?;

    tokio::time::sleep(run_for / 2).await;
    scheduler.stop_stream(school).await?;
    info!(stream_id = %school, "Stopped one stream early");

    tokio::time::sleep(run_for / 2).await;

    let stats = scheduler.stats();
    for id in [flood, school, clinic] {
        let s = stats.stream_stats(id)?;
        info!(
            stream_id = %id,
            state = ?s.state,
            runtime_secs = s.runtime_seconds,
            total_sent = %s.total_sent,
            success_rate = s.success_rate,
            "Stream stats"
        );
    }

    scheduler.shutdown().await;
    let global = stats.global();
    info!(
        streams = global.total_streams,
        total_sent = %global.total_sent,
        total_fees = %global.total_fees,
        success_rate = global.success_rate,
        "Demo complete"
    );

    scheduler.unsubscribe(feed_id);
    printer.await?;
    Ok(())
}
