//! The [`Entry`] type: the unit of buffered work (spec.md §3).

use crate::level::Level;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single formatted log line waiting to be (or having been) shipped to
/// Loki.
///
/// Invariants (spec.md §3): `labels` is never empty (callers that can't
/// produce any label get the default `{level: <level>}` injected by the
/// formatter, see [`crate::format::format_event`]); `structured_metadata`
/// never holds a key bound to an absent value — keys are only inserted when
/// a value exists.
///
/// `labels` and `structured_metadata` use [`BTreeMap`] rather than
/// `HashMap` so that two entries with the same label *set* compare equal
/// and hash identically regardless of insertion order, which is what
/// [`crate::loki_client::LokiClient::build_push_body`]'s label-partitioning
/// step depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
    /// Severity of this entry.
    pub level: Level,
    /// Rendered message text.
    pub message: String,
    /// Low-cardinality labels; define the Loki stream this entry belongs to.
    pub labels: BTreeMap<String, String>,
    /// High-cardinality, non-indexed metadata. Empty when the event carried
    /// none of the requested structured-metadata keys.
    pub structured_metadata: BTreeMap<String, String>,
}

impl Entry {
    /// True when this entry carries no structured metadata, in which case
    /// the Loki wire value for it is a 2-element array rather than 3
    /// (spec.md §4.4).
    pub fn has_structured_metadata(&self) -> bool {
        !self.structured_metadata.is_empty()
    }
}
