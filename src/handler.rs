//! The handler lifecycle: ties one [`crate::buffer::Buffer`] and one
//! [`crate::dispatcher::DispatcherHandle`] together under a unique id, and
//! the process-global registry of them (spec.md §4.6).

use crate::buffer::{Buffer, DiskBuffer, MemoryBuffer};
use crate::config::{HandlerConfig, HandlerConfigUpdate, StorageBackend};
use crate::dispatcher::{DispatcherHandle, DispatcherParams, DispatcherState};
use crate::entry::Entry;
use crate::error::Error;
use crate::loki_client::LokiClient;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use url::Url;

/// One attached handler: owns a buffer and a dispatcher as an atomic pair
/// (spec.md §3 lifecycle: "one dying forces the other down").
struct HandlerInstance {
    buffer: Arc<dyn Buffer>,
    dispatcher: DispatcherHandle,
    config: SyncMutex<HandlerConfig>,
}

impl HandlerInstance {
    async fn start(id: &str, config: HandlerConfig) -> Result<HandlerInstance, Error> {
        config.validate()?;

        let buffer: Arc<dyn Buffer> = match config.storage {
            StorageBackend::Memory => Arc::new(MemoryBuffer::new(config.max_buffer_size)),
            StorageBackend::Disk => {
                let dir = config.resolve_data_dir(id);
                Arc::new(DiskBuffer::open(&dir, config.max_buffer_size)?)
            }
        };

        let loki_url = Url::parse(&config.loki_url).map_err(|e| Error::InvalidField {
            field: "loki_url",
            reason: e.to_string(),
        })?;
        let timeout = request_timeout(config.batch_interval_ms);
        let client = Arc::new(LokiClient::new(timeout));
        let params = DispatcherParams::from(&config);
        let dispatcher = DispatcherHandle::spawn(Arc::clone(&buffer), client, loki_url, params);

        Ok(HandlerInstance {
            buffer,
            dispatcher,
            config: SyncMutex::new(config),
        })
    }

    /// Tear down dispatcher then buffer, in that order (spec.md §9: explicit
    /// ordering instead of relying on a supervisor). Waits for an in-flight
    /// push (bounded by the dispatcher's own request timeout) before
    /// closing the buffer underneath it. Safe to call while a concurrent
    /// `store` still holds an `Arc` to this instance.
    async fn stop(&self) {
        self.dispatcher.shutdown().await;
        self.buffer.stop();
    }
}

fn request_timeout(batch_interval_ms: u64) -> Duration {
    // spec.md §5: recommended default `batch_interval_ms * 2`, floor 5s.
    Duration::from_millis(batch_interval_ms.saturating_mul(2)).max(Duration::from_secs(5))
}

/// The process-global table of attached handlers (spec.md §9: replaces the
/// source language's named process registry with an explicit owning map).
#[derive(Default)]
struct Registry {
    handlers: SyncMutex<HashMap<String, Arc<HandlerInstance>>>,
}

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::default)
}

/// Attach a new handler under `id` with the given configuration.
/// See spec.md §4.6 "Attach procedure".
pub async fn attach(id: impl Into<String>, config: HandlerConfig) -> Result<(), Error> {
    let id = id.into();
    if registry().handlers.lock().contains_key(&id) {
        return Err(Error::InvalidField {
            field: "id",
            reason: format!("a handler is already attached under `{id}`"),
        });
    }
    let instance = Arc::new(HandlerInstance::start(&id, config).await?);
    registry().handlers.lock().insert(id, instance);
    Ok(())
}

/// Detach and tear down the handler registered under `id`.
pub async fn detach(id: &str) -> Result<(), Error> {
    let instance = registry()
        .handlers
        .lock()
        .remove(id)
        .ok_or_else(|| Error::UnknownHandler(id.to_string()))?;
    instance.stop().await;
    Ok(())
}

/// Fire-and-forget store of a formatted entry (spec.md §4.3 `store`).
/// Silently does nothing if `id` is not registered.
pub fn store(id: &str, entry: Entry) {
    if let Some(instance) = registry().handlers.lock().get(id).cloned() {
        instance.buffer.store(entry);
    }
}

/// Block until one push attempt for `id`'s buffer resolves.
pub async fn flush(id: &str) -> Result<(), Error> {
    let instance = lookup(id)?;
    instance.dispatcher.flush().await
}

/// Read `id`'s dispatcher state (spec.md §4.5 `get_state`): the live
/// `consecutive_failures` streak, serialized against the timer tick.
pub async fn get_state(id: &str) -> Result<DispatcherState, Error> {
    let instance = lookup(id)?;
    Ok(instance.dispatcher.get_state().await)
}

/// Deep-merge `update` into `id`'s current configuration.
pub async fn update_config(id: &str, update: HandlerConfigUpdate) -> Result<(), Error> {
    let instance = lookup(id)?;
    let merged = {
        let current = instance.config.lock();
        current.apply_update(update)?
    };
    *instance.config.lock() = merged.clone();
    instance.dispatcher.reconfigure(DispatcherParams::from(&merged)).await;
    Ok(())
}

/// Replace `id`'s public configuration wholesale, preserving the internal
/// `storage`/`data_dir` bindings chosen at attach time (spec.md §4.6 `set`).
pub async fn set_config(id: &str, mut full: HandlerConfig) -> Result<(), Error> {
    let instance = lookup(id)?;
    {
        let current = instance.config.lock();
        full.storage = current.storage;
        full.data_dir = current.data_dir.clone();
    }
    full.validate()?;
    *instance.config.lock() = full.clone();
    instance.dispatcher.reconfigure(DispatcherParams::from(&full)).await;
    Ok(())
}

/// Read back `id`'s current public configuration.
pub fn get_config(id: &str) -> Result<HandlerConfig, Error> {
    let instance = lookup(id)?;
    let config = instance.config.lock().clone();
    Ok(config)
}

/// List every currently-registered handler id.
pub fn list() -> Vec<String> {
    registry().handlers.lock().keys().cloned().collect()
}

fn lookup(id: &str) -> Result<Arc<HandlerInstance>, Error> {
    registry()
        .handlers
        .lock()
        .get(id)
        .cloned()
        .ok_or_else(|| Error::UnknownHandler(id.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::StorageBackend;

    fn memory_config(loki_url: &str) -> HandlerConfig {
        HandlerConfig {
            loki_url: loki_url.to_string(),
            storage: StorageBackend::Memory,
            batch_interval_ms: 60_000,
            ..HandlerConfig::default()
        }
    }

    #[tokio::test]
    async fn attach_rejects_duplicate_id() {
        attach("dup-test", memory_config("http://127.0.0.1:1")).await.unwrap();
        let err = attach("dup-test", memory_config("http://127.0.0.1:1")).await;
        assert!(err.is_err());
        detach("dup-test").await.unwrap();
    }

    #[tokio::test]
    async fn detach_unknown_id_errors() {
        assert!(matches!(detach("nonexistent").await, Err(Error::UnknownHandler(_))));
    }

    #[tokio::test]
    async fn update_config_rejects_storage_change() {
        attach("update-test", memory_config("http://127.0.0.1:1")).await.unwrap();
        let update = HandlerConfigUpdate {
            storage: Some(StorageBackend::Disk),
            ..Default::default()
        };
        assert!(matches!(
            update_config("update-test", update).await,
            Err(Error::ImmutableField("storage"))
        ));
        detach("update-test").await.unwrap();
    }

    #[tokio::test]
    async fn set_config_preserves_storage_backend() {
        attach("set-test", memory_config("http://127.0.0.1:1")).await.unwrap();
        let mut replacement = memory_config("http://127.0.0.1:2");
        replacement.storage = StorageBackend::Disk; // should be ignored
        set_config("set-test", replacement).await.unwrap();
        let cfg = get_config("set-test").unwrap();
        assert_eq!(cfg.storage, StorageBackend::Memory);
        assert_eq!(cfg.loki_url, "http://127.0.0.1:2");
        detach("set-test").await.unwrap();
    }

    #[tokio::test]
    async fn get_state_starts_at_zero_failures() {
        attach("state-test", memory_config("http://127.0.0.1:1")).await.unwrap();
        let state = get_state("state-test").await.unwrap();
        assert_eq!(state.consecutive_failures, 0);
        detach("state-test").await.unwrap();
    }

    #[tokio::test]
    async fn get_state_unknown_id_errors() {
        assert!(matches!(get_state("nonexistent-state").await, Err(Error::UnknownHandler(_))));
    }

    #[tokio::test]
    async fn list_reflects_attached_handlers() {
        attach("list-test", memory_config("http://127.0.0.1:1")).await.unwrap();
        assert!(list().contains(&"list-test".to_string()));
        detach("list-test").await.unwrap();
        assert!(!list().contains(&"list-test".to_string()));
    }
}
