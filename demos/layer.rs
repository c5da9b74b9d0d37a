//! Attach a handler, ship logs through the `tracing` bridge, flush, detach.

use loki_relay::config::HandlerConfig;
use std::error::Error;
use std::time::Duration;
use tracing::info;
use tracing::info_span;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const HANDLER_ID: &str = "demo";

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

    tokio::time::sleep(Duration::from_secs(1)).await;

    loki_relay::flush(HANDLER_ID).await?;
    loki_relay::detach(HANDLER_ID).await?;
    Ok(())
}
