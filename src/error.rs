//! Error kinds surfaced to callers of this crate.
//!
//! See spec.md §7 for the error taxonomy this enum implements: configuration
//! errors are returned from `attach`/`update_config` before any side effect
//! runs, lifecycle errors unwind a partially-started handler, and delivery
//! errors are the ones the dispatcher retries under backoff.

use thiserror::Error;

/// Top-level error type for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A required configuration field was absent.
    #[error("missing configuration field `{0}`")]
    MissingField(&'static str),

    /// A configuration field was present but failed validation.
    #[error("invalid configuration field `{field}`: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Human-readable reason it was rejected.
        reason: String,
    },

    /// A component failed to start during `attach`. Any component that did
    /// start is torn back down before this error is returned.
    #[error("failed to start {component}: {cause}")]
    StartFailed {
        /// Which subcomponent failed (`"buffer"` or `"dispatcher"`).
        component: &'static str,
        /// The underlying cause.
        cause: String,
    },

    /// Loki responded with a non-2xx status.
    #[error("loki push rejected with status {status}: {body}")]
    HttpError {
        /// HTTP status code returned by Loki.
        status: u16,
        /// Response body, truncated by the caller if large.
        body: String,
    },

    /// The push request never reached Loki or never got a response
    /// (DNS, connect, TLS, timeout, or read failure).
    #[error("loki push failed: {0}")]
    RequestFailed(String),

    /// `id` does not name a registered handler.
    #[error("no handler registered with id `{0}`")]
    UnknownHandler(String),

    /// Attempted to change a field that cannot change after attach
    /// (`storage`, `data_dir`) via `update_config`.
    #[error("field `{0}` cannot be changed after the handler is attached")]
    ImmutableField(&'static str),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
