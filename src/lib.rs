//! A buffered log-shipping agent for [Grafana Loki](https://grafana.com/oss/loki/).
//!
//! Accepts structured log entries from an in-process logging facade,
//! coalesces them into batches, and pushes the batches to Loki's JSON push
//! API, persisting across restarts and backing off gracefully when the
//! remote endpoint is unavailable.
//!
//! Usage
//! =====
//!
//! ```rust,no_run
//! use loki_relay::config::HandlerConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), loki_relay::Error> {
//!     let config = HandlerConfig {
//!         loki_url: "http://127.0.0.1:3100".to_string(),
//!         ..HandlerConfig::default()
//!     };
//!     loki_relay::attach("my-service", config).await?;
//!
//!     // Register the bridging layer with `tracing` so ordinary `tracing`
//!     // calls get shipped to this handler.
//!     use tracing_subscriber::layer::SubscriberExt;
//!     use tracing_subscriber::util::SubscriberInitExt;
//!     tracing_subscriber::registry()
//!         .with(loki_relay::layer::LokiLayer::new("my-service"))
//!         .init();
//!
//!     tracing::info!(request_id = "r1", "hello from loki-relay");
//!
//!     loki_relay::flush("my-service").await?;
//!     loki_relay::detach("my-service").await?;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]

pub mod buffer;
pub mod config;
pub mod dispatcher;
pub mod entry;
pub mod error;
pub mod format;
pub mod handler;
pub mod key;
pub mod layer;
pub mod level;
pub mod loki_client;
mod no_subscriber;

pub use entry::Entry;
pub use error::{Error, Result};
pub use handler::{
    attach, detach, flush, get_config, get_state, list, set_config, store, update_config,
};
pub use level::Level;
