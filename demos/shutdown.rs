//! Demonstrates graceful teardown: `detach` waits for the dispatcher's
//! in-flight push (if any) before the buffer underneath it is released.

use loki_relay::config::{HandlerConfig, HandlerConfigUpdate};
use std::error::Error;
use tracing::info;
use tracing::info_span;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const HANDLER_ID: &str = "demo-shutdown";

async fn tracing_setup() -> Result<(), Box<dyn Error>> {
    let config = HandlerConfig {
        loki_url: "http://127.0.0.1:3100".to_string(),
        ..HandlerConfig::default()
    };
    loki_relay::attach(HANDLER_ID, config).await?;

    tracing_subscriber::registry()
        .with(LevelFilter::INFO)
        .with(loki_relay::layer::LokiLayer::new(HANDLER_ID))
        .init();
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_setup().await?;

    info_span!("report", output = "tracing").in_scope(|| {
        info!(task = "tracing_setup", result = "success", "tracing successfully set up");
    });

    // Configuration is mutable at runtime; shrinking the batch interval
    // takes effect on the dispatcher's next wake-up, without a restart.
    loki_relay::update_config(
        HANDLER_ID,
        HandlerConfigUpdate { batch_interval_ms: Some(1_000), ..Default::default() },
    )
    .await?;

    // Waits for any push already in flight, then releases the buffer.
    loki_relay::detach(HANDLER_ID).await?;

    Ok(())
}
