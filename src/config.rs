//! Handler configuration: the enumerated options of spec.md §6, their
//! defaults, validation, and the deep-merge semantics `update_config` needs.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Where a label's value comes from when formatting an event into an
/// [`crate::Entry`]. See spec.md §4.2 and the redesign note in §9: this is
/// the sum type replacing the source language's tagged-value dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LabelSource {
    /// Use the event's severity level, lowercased (`"info"`, `"error"`, ...).
    FromLevel,
    /// Look up `key` in the event's metadata map; omit the label entirely
    /// if the key is absent.
    FromMetadata {
        /// Metadata key to read.
        key: String,
    },
    /// Always emit this fixed string, regardless of the event.
    Static {
        /// The literal label value.
        value: String,
    },
}

/// Which [`crate::buffer::Buffer`] implementation backs a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Durable, survives process restarts (`sled`-backed).
    Disk,
    /// In-process only, faster, lost on restart.
    Memory,
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::Disk
    }
}

fn default_labels() -> BTreeMap<String, LabelSource> {
    let mut m = BTreeMap::new();
    m.insert("level".to_string(), LabelSource::FromLevel);
    m
}

fn default_batch_size() -> usize {
    100
}
fn default_batch_interval_ms() -> u64 {
    5_000
}
fn default_max_buffer_size() -> usize {
    10_000
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_backoff_max_ms() -> u64 {
    60_000
}

/// Full, user-facing configuration for one handler instance.
///
/// This is what [`set_config`](crate::handler::set_config) replaces
/// wholesale and [`update_config`](crate::handler::update_config)
/// deep-merges into. The fields named here are exactly the options table in
/// spec.md §6; the resolved on-disk path and any other backend bookkeeping
/// live alongside it in the handler, never in this struct, so that
/// `get_config` can hand a caller this type directly without leaking
/// internals (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Base URL of the Loki server; `/loki/api/v1/push` is appended.
    pub loki_url: String,
    /// Buffer backend.
    #[serde(default)]
    pub storage: StorageBackend,
    /// Label extraction rules.
    #[serde(default = "default_labels")]
    pub labels: BTreeMap<String, LabelSource>,
    /// Metadata keys to emit as Loki structured metadata.
    #[serde(default)]
    pub structured_metadata: Vec<String>,
    /// Directory for the persistent backend. `None` resolves to
    /// `priv/loki_buffer/<id>` at attach time.
    #[serde(default)]
    pub data_dir: Option<String>,
    /// Max entries per push.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Timer interval, milliseconds.
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,
    /// Overflow threshold.
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
    /// Backoff base, milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Backoff cap, milliseconds.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        HandlerConfig {
            loki_url: String::new(),
            storage: StorageBackend::default(),
            labels: default_labels(),
            structured_metadata: Vec::new(),
            data_dir: None,
            batch_size: default_batch_size(),
            batch_interval_ms: default_batch_interval_ms(),
            max_buffer_size: default_max_buffer_size(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

/// A partial configuration, used by `update_config` to deep-merge changes
/// into an already-attached handler's current [`HandlerConfig`].
///
/// Every field is optional; only the ones present override the current
/// value. `storage` and `data_dir` are accepted here syntactically but
/// rejected by [`HandlerConfig::apply_update`] with
/// [`Error::ImmutableField`], per spec.md §4.6.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandlerConfigUpdate {
    /// See [`HandlerConfig::loki_url`].
    pub loki_url: Option<String>,
    /// Rejected if it would change the current value.
    pub storage: Option<StorageBackend>,
    /// See [`HandlerConfig::labels`].
    pub labels: Option<BTreeMap<String, LabelSource>>,
    /// See [`HandlerConfig::structured_metadata`].
    pub structured_metadata: Option<Vec<String>>,
    /// Rejected if it would change the current value.
    pub data_dir: Option<String>,
    /// See [`HandlerConfig::batch_size`].
    pub batch_size: Option<usize>,
    /// See [`HandlerConfig::batch_interval_ms`].
    pub batch_interval_ms: Option<u64>,
    /// See [`HandlerConfig::max_buffer_size`].
    pub max_buffer_size: Option<usize>,
    /// See [`HandlerConfig::backoff_base_ms`].
    pub backoff_base_ms: Option<u64>,
    /// See [`HandlerConfig::backoff_max_ms`].
    pub backoff_max_ms: Option<u64>,
}

impl HandlerConfig {
    /// Validate the options table's constraints: `loki_url` must be a
    /// parseable URL, and every threshold must be positive.
    pub fn validate(&self) -> Result<(), Error> {
        if self.loki_url.is_empty() {
            return Err(Error::MissingField("loki_url"));
        }
        url::Url::parse(&self.loki_url).map_err(|e| Error::InvalidField {
            field: "loki_url",
            reason: e.to_string(),
        })?;
        if self.batch_size == 0 {
            return Err(Error::InvalidField {
                field: "batch_size",
                reason: "must be a positive integer".into(),
            });
        }
        if self.batch_interval_ms == 0 {
            return Err(Error::InvalidField {
                field: "batch_interval_ms",
                reason: "must be a positive integer".into(),
            });
        }
        if self.max_buffer_size == 0 {
            return Err(Error::InvalidField {
                field: "max_buffer_size",
                reason: "must be a positive integer".into(),
            });
        }
        if self.backoff_base_ms == 0 {
            return Err(Error::InvalidField {
                field: "backoff_base_ms",
                reason: "must be a positive integer".into(),
            });
        }
        if self.backoff_max_ms == 0 {
            return Err(Error::InvalidField {
                field: "backoff_max_ms",
                reason: "must be a positive integer".into(),
            });
        }
        Ok(())
    }

    /// Deep-merge `update` into a clone of `self`, validating the result.
    /// `storage`/`data_dir` changes are rejected outright: spec.md §4.6
    /// says changing them mid-flight is unsupported.
    pub fn apply_update(&self, update: HandlerConfigUpdate) -> Result<HandlerConfig, Error> {
        if let Some(storage) = update.storage {
            if storage != self.storage {
                return Err(Error::ImmutableField("storage"));
            }
        }
        if let Some(data_dir) = &update.data_dir {
            if Some(data_dir) != self.data_dir.as_ref() {
                return Err(Error::ImmutableField("data_dir"));
            }
        }
        let mut merged = self.clone();
        if let Some(v) = update.loki_url {
            merged.loki_url = v;
        }
        if let Some(v) = update.labels {
            merged.labels = v;
        }
        if let Some(v) = update.structured_metadata {
            merged.structured_metadata = v;
        }
        if let Some(v) = update.batch_size {
            merged.batch_size = v;
        }
        if let Some(v) = update.batch_interval_ms {
            merged.batch_interval_ms = v;
        }
        if let Some(v) = update.max_buffer_size {
            merged.max_buffer_size = v;
        }
        if let Some(v) = update.backoff_base_ms {
            merged.backoff_base_ms = v;
        }
        if let Some(v) = update.backoff_max_ms {
            merged.backoff_max_ms = v;
        }
        merged.validate()?;
        Ok(merged)
    }

    /// Resolve the persistent backend's directory for handler `id`: the
    /// configured `data_dir`, or the default `priv/loki_buffer/<id>`.
    pub fn resolve_data_dir(&self, id: &str) -> PathBuf {
        match &self.data_dir {
            Some(dir) => PathBuf::from(dir),
            None => PathBuf::from("priv").join("loki_buffer").join(id),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_match_options_table() {
        let cfg = HandlerConfig::default();
        assert_eq!(cfg.storage, StorageBackend::Disk);
        assert_eq!(cfg.batch_size, 100);
        assert_eq!(cfg.batch_interval_ms, 5_000);
        assert_eq!(cfg.max_buffer_size, 10_000);
        assert_eq!(cfg.backoff_base_ms, 1_000);
        assert_eq!(cfg.backoff_max_ms, 60_000);
        assert_eq!(cfg.labels.get("level"), Some(&LabelSource::FromLevel));
    }

    #[test]
    fn rejects_missing_loki_url() {
        let cfg = HandlerConfig::default();
        assert!(matches!(cfg.validate(), Err(Error::MissingField("loki_url"))));
    }

    #[test]
    fn rejects_storage_change_via_update() {
        let cfg = HandlerConfig {
            loki_url: "http://localhost:3100".into(),
            ..HandlerConfig::default()
        };
        let update = HandlerConfigUpdate {
            storage: Some(StorageBackend::Memory),
            ..Default::default()
        };
        assert!(matches!(
            cfg.apply_update(update),
            Err(Error::ImmutableField("storage"))
        ));
    }

    #[test]
    fn update_merges_only_present_fields() {
        let cfg = HandlerConfig {
            loki_url: "http://localhost:3100".into(),
            batch_size: 50,
            ..HandlerConfig::default()
        };
        let update = HandlerConfigUpdate {
            batch_interval_ms: Some(1_000),
            ..Default::default()
        };
        let merged = cfg.apply_update(update).unwrap();
        assert_eq!(merged.batch_size, 50);
        assert_eq!(merged.batch_interval_ms, 1_000);
    }
}
