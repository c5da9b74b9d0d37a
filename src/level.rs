//! The eight-value severity enumeration used by [`crate::Entry`].
//!
//! Named and ordered per spec.md §3: `debug < info < notice < warning <
//! error < critical < alert < emergency`, matching the syslog severity scale
//! Loki's ecosystem conventionally reuses for the `level` label.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Log severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Verbose diagnostic information.
    Debug,
    /// Routine informational messages.
    Info,
    /// Normal but significant condition.
    Notice,
    /// Warning conditions.
    Warning,
    /// Error conditions.
    Error,
    /// Critical conditions.
    Critical,
    /// Action must be taken immediately.
    Alert,
    /// System is unusable.
    Emergency,
}

impl Level {
    /// The lowercase string Loki label value for this level.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Notice => "notice",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Critical => "critical",
            Level::Alert => "alert",
            Level::Emergency => "emergency",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<tracing_core::Level> for Level {
    fn from(level: tracing_core::Level) -> Self {
        match level {
            tracing_core::Level::TRACE => Level::Debug,
            tracing_core::Level::DEBUG => Level::Debug,
            tracing_core::Level::INFO => Level::Info,
            tracing_core::Level::WARN => Level::Warning,
            tracing_core::Level::ERROR => Level::Error,
        }
    }
}

#[cfg(test)]
mod test {
    use super::Level;

    #[test]
    fn ordered_least_to_most_severe() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Notice);
        assert!(Level::Notice < Level::Warning);
        assert!(Level::Warning < Level::Error);
        assert!(Level::Error < Level::Critical);
        assert!(Level::Critical < Level::Alert);
        assert!(Level::Alert < Level::Emergency);
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Level::Warning).unwrap(), "\"warning\"");
    }
}
