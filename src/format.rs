//! The formatter: maps an abstract host event into a buffered [`Entry`].
//!
//! This module is the concrete implementation of the interface contract
//! spec.md §4.2 describes; spec.md treats the host logging facade itself
//! (the thing that constructs [`RawEvent`]s) as an external collaborator.
//! [`crate::layer::LokiLayer`] is the one place in this crate that builds a
//! [`RawEvent`] from a real `tracing::Event`.

use crate::config::LabelSource;
use crate::entry::Entry;
use crate::level::Level;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// A metadata value, coerced on read per spec.md §4.2: atoms/identifiers
/// become their name, strings pass through unchanged, everything else is
/// rendered as a structured-inspection string.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    /// An identifier-like value (an enum variant name, a tag) — renders as
    /// its bare name, unquoted.
    Atom(String),
    /// A UTF-8 string — renders unchanged.
    Str(String),
    /// A signed integer — renders in decimal form.
    Int(i64),
    /// A floating point number — renders in decimal form.
    Float(f64),
    /// A boolean.
    Bool(bool),
}

impl MetaValue {
    /// Apply spec.md §4.2's coercion rule.
    pub fn coerce(&self) -> String {
        match self {
            MetaValue::Atom(s) => s.clone(),
            MetaValue::Str(s) => s.clone(),
            MetaValue::Int(i) => i.to_string(),
            MetaValue::Float(f) => f.to_string(),
            MetaValue::Bool(b) => b.to_string(),
        }
    }

    /// `inspect`-style rendering used for report key/value pairs
    /// (`k=inspect(v)`): strings are quoted, everything else uses the same
    /// coercion as a label/metadata value.
    fn inspect(&self) -> String {
        match self {
            MetaValue::Str(s) => format!("{:?}", s),
            other => other.coerce(),
        }
    }
}

/// The event message, in one of the three shapes spec.md §6 enumerates.
#[derive(Debug, Clone)]
pub enum Message {
    /// Already-rendered text.
    Text(String),
    /// A `(template, args)` pair, rendered with `%`-style formatting.
    Format {
        /// `printf`-style template using `%s`/`%d`/`%f`/`%v` specifiers.
        template: String,
        /// Positional arguments substituted into the template in order.
        args: Vec<MetaValue>,
    },
    /// A structured report, rendered as `k=inspect(v)` pairs.
    Report(BTreeMap<String, MetaValue>),
}

/// A callback overriding how a [`Message::Report`] is rendered, analogous
/// to the event metadata's optional `report_cb` (spec.md §6).
pub type ReportRenderer = fn(&BTreeMap<String, MetaValue>) -> String;

/// The abstract event this crate's formatter consumes. Spec.md leaves the
/// host logging facade that produces these out of scope; this struct is
/// just a typed stand-in for `Event { level, msg, meta }` (spec.md §6).
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// Severity.
    pub level: Level,
    /// The message payload.
    pub msg: Message,
    /// Arbitrary metadata, including the well-known `time` key (read
    /// separately via [`RawEvent::time_us`], not through this map).
    pub meta: BTreeMap<String, MetaValue>,
    /// Microseconds since the epoch, if the facade supplied one. When
    /// absent, the formatter uses the wall clock.
    pub time_us: Option<i64>,
    /// Overrides [`Message::Report`] rendering when set.
    pub report_cb: Option<ReportRenderer>,
}

impl RawEvent {
    /// Construct a minimal text event at the given level; convenience for
    /// callers and tests that don't need metadata or report rendering.
    pub fn text(level: Level, message: impl Into<String>) -> RawEvent {
        RawEvent {
            level,
            msg: Message::Text(message.into()),
            meta: BTreeMap::new(),
            time_us: None,
            report_cb: None,
        }
    }
}

fn render_message(event: &RawEvent) -> String {
    match &event.msg {
        Message::Text(s) => s.clone(),
        Message::Format { template, args } => render_format(template, args),
        Message::Report(map) => {
            if let Some(cb) = event.report_cb {
                cb(map)
            } else {
                map.iter()
                    .map(|(k, v)| format!("{}={}", k, v.inspect()))
                    .collect::<Vec<_>>()
                    .join(" ")
            }
        }
    }
}

/// A small `printf`-style renderer supporting `%s`, `%d`/`%i`, `%f`, `%v`
/// (generic coercion), and `%%` (literal percent). Unknown specifiers are
/// copied through verbatim so malformed templates don't panic.
fn render_format(template: &str, args: &[MetaValue]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut args = args.iter();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('s') | Some('v') | Some('d') | Some('i') | Some('f') => {
                if let Some(arg) = args.next() {
                    out.push_str(&arg.coerce());
                }
            }
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

fn timestamp_ns(event: &RawEvent) -> i64 {
    match event.time_us {
        Some(us) => us * 1_000,
        None => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0),
    }
}

fn extract_labels(
    event: &RawEvent,
    label_config: &BTreeMap<String, LabelSource>,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    for (name, source) in label_config {
        let value = match source {
            LabelSource::FromLevel => Some(event.level.as_str().to_string()),
            LabelSource::FromMetadata { key } => event.meta.get(key).map(MetaValue::coerce),
            LabelSource::Static { value } => Some(value.clone()),
        };
        if let Some(value) = value {
            labels.insert(name.clone(), value);
        }
    }
    if labels.is_empty() {
        // spec.md §9 open question, resolved in DESIGN.md: inject a default
        // label rather than drop the entry, since a Loki stream requires at
        // least one label.
        labels.insert("level".to_string(), event.level.as_str().to_string());
    }
    labels
}

fn extract_structured_metadata(
    event: &RawEvent,
    keys: &[String],
) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for key in keys {
        if let Some(value) = event.meta.get(key) {
            out.insert(key.clone(), value.coerce());
        }
    }
    out
}

/// Format a host event into a buffered [`Entry`], per spec.md §4.2.
pub fn format_event(
    event: &RawEvent,
    label_config: &BTreeMap<String, LabelSource>,
    structured_metadata_keys: &[String],
) -> Entry {
    Entry {
        timestamp: timestamp_ns(event),
        level: event.level,
        message: render_message(event),
        labels: extract_labels(event, label_config),
        structured_metadata: extract_structured_metadata(event, structured_metadata_keys),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn labels(pairs: &[(&str, LabelSource)]) -> BTreeMap<String, LabelSource> {
        pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn uses_event_time_when_present() {
        let mut event = RawEvent::text(Level::Info, "hi");
        event.time_us = Some(1_000);
        let entry = format_event(&event, &BTreeMap::new(), &[]);
        assert_eq!(entry.timestamp, 1_000_000);
    }

    #[test]
    fn falls_back_to_wall_clock() {
        let event = RawEvent::text(Level::Info, "hi");
        let entry = format_event(&event, &BTreeMap::new(), &[]);
        assert!(entry.timestamp > 0);
    }

    #[test]
    fn missing_metadata_key_omits_label() {
        let event = RawEvent::text(Level::Info, "hi");
        let cfg = labels(&[(
            "request_id",
            LabelSource::FromMetadata { key: "request_id".into() },
        )]);
        let entry = format_event(&event, &cfg, &[]);
        assert!(!entry.labels.contains_key("request_id"));
        // Falls back to the injected default since extraction yielded nothing.
        assert_eq!(entry.labels.get("level").map(String::as_str), Some("info"));
    }

    #[test]
    fn structured_metadata_included_only_when_present() {
        let mut event = RawEvent::text(Level::Info, "hi");
        event.meta.insert("request_id".into(), MetaValue::Str("r1".into()));
        let entry = format_event(&event, &BTreeMap::new(), &["request_id".into(), "missing".into()]);
        assert_eq!(entry.structured_metadata.get("request_id").map(String::as_str), Some("r1"));
        assert!(!entry.structured_metadata.contains_key("missing"));
    }

    #[test]
    fn report_renders_sorted_key_value_pairs() {
        let mut map = BTreeMap::new();
        map.insert("b".to_string(), MetaValue::Int(2));
        map.insert("a".to_string(), MetaValue::Str("x".into()));
        let event = RawEvent {
            level: Level::Info,
            msg: Message::Report(map),
            meta: BTreeMap::new(),
            time_us: None,
            report_cb: None,
        };
        let entry = format_event(&event, &BTreeMap::new(), &[]);
        assert_eq!(entry.message, r#"a="x" b=2"#);
    }

    #[test]
    fn format_message_substitutes_args_in_order() {
        let event = RawEvent {
            level: Level::Info,
            msg: Message::Format {
                template: "user %s did %s (%d times)".into(),
                args: vec![
                    MetaValue::Str("alice".into()),
                    MetaValue::Atom("login".into()),
                    MetaValue::Int(3),
                ],
            },
            meta: BTreeMap::new(),
            time_us: None,
            report_cb: None,
        };
        let entry = format_event(&event, &BTreeMap::new(), &[]);
        assert_eq!(entry.message, "user alice did login (3 times)");
    }
}
