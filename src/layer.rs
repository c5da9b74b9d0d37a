//! An ambient `tracing_subscriber::Layer` adapter binding the abstract host
//! logging facade (spec.md §6) onto the `tracing` ecosystem, so this crate
//! is directly usable from a `tracing`-instrumented application without the
//! caller hand-writing their own event-to-[`RawEvent`] shim.
//!
//! This is wiring, not new subsystem scope: `on_event` does nothing but
//! build a [`RawEvent`] and call [`crate::handler::store`].

use crate::format::{MetaValue, Message, RawEvent};
use crate::level::Level;
use std::collections::BTreeMap;
use std::fmt;
use tracing_core::field::{Field, Visit};
use tracing_core::span::Attributes;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

#[derive(Default)]
struct FieldValues {
    values: BTreeMap<String, MetaValue>,
}

impl Visit for FieldValues {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.values.insert(field.name().to_string(), MetaValue::Str(format!("{:?}", value)));
    }
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.values.insert(field.name().to_string(), MetaValue::Float(value));
    }
    fn record_i64(&mut self, field: &Field, value: i64) {
        self.values.insert(field.name().to_string(), MetaValue::Int(value));
    }
    fn record_u64(&mut self, field: &Field, value: u64) {
        self.values.insert(field.name().to_string(), MetaValue::Int(value as i64));
    }
    fn record_bool(&mut self, field: &Field, value: bool) {
        self.values.insert(field.name().to_string(), MetaValue::Bool(value));
    }
    fn record_str(&mut self, field: &Field, value: &str) {
        self.values.insert(field.name().to_string(), MetaValue::Str(value.to_string()));
    }
    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.values.insert(field.name().to_string(), MetaValue::Str(value.to_string()));
    }
}

/// Forwards every `tracing::Event` to the handler registered under `id`.
///
/// Looking the handler up on every event (rather than capturing the
/// buffer/config at construction) keeps this adapter correct across
/// `update_config` and detach/reattach without extra bookkeeping, at the
/// cost of one registry lookup per event.
pub struct LokiLayer {
    id: String,
}

impl LokiLayer {
    /// Build a layer that ships events to the handler named `id`. `id`
    /// does not need to be attached yet; events are silently dropped
    /// until it is (and after it is detached), matching `store`'s
    /// fire-and-forget semantics.
    pub fn new(id: impl Into<String>) -> LokiLayer {
        LokiLayer { id: id.into() }
    }
}

impl<S> tracing_subscriber::Layer<S> for LokiLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, _attrs: &Attributes<'_>, _id: &tracing_core::span::Id, _ctx: Context<'_, S>) {}

    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let Ok(cfg) = crate::handler::get_config(&self.id) else {
            return;
        };

        let mut fields = FieldValues::default();
        event.record(&mut fields);

        let message = fields
            .values
            .remove("message")
            .map(|v| match v {
                MetaValue::Str(s) => s,
                other => other.coerce(),
            })
            .unwrap_or_default();

        let raw = RawEvent {
            level: Level::from(*event.metadata().level()),
            msg: Message::Text(message),
            meta: fields.values,
            time_us: None,
            report_cb: None,
        };

        let entry = crate::format::format_event(&raw, &cfg.labels, &cfg.structured_metadata);
        crate::handler::store(&self.id, entry);
    }
}
