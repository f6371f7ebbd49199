//! Adapters convert types that JSON has no native representation for.
//!
//! Each adapter is registered under a stable tag, and parameters refer to it through
//! [`super::TypeDescriptor::adapter`].  Whether a wire value goes through an adapter is decided
//! entirely by the declared type: a string that happens to look like a timestamp stays a string
//! unless the parameter was declared as a timestamp.
//!
//! Three adapters are built in:
//!
//! | tag         | Rust type                  | wire form                               |
//! |-------------|----------------------------|-----------------------------------------|
//! | `timestamp` | `chrono::NaiveDateTime`    | ISO 8601 string, `2024-01-01T00:00:00`  |
//! | `duration`  | `std::time::Duration`      | number of seconds, possibly fractional  |
//! | `decimal`   | `rust_decimal::Decimal`    | number                                  |
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde_json::{Number, Value as JsonValue};

use super::descriptor::WireKind;
use super::value::Value;

pub const TIMESTAMP_TAG: &str = "timestamp";
pub const DURATION_TAG: &str = "duration";
pub const DECIMAL_TAG: &str = "decimal";

/// Bidirectional conversion between a wire value and a [`Value`] for one kind of type.
pub trait Adapter: Send + Sync + 'static {
    /// The tag this adapter is registered and referenced under.
    fn tag(&self) -> &str;

    /// The JSON shape this adapter accepts.  Anything else is rejected before `decode` is called.
    fn wire_kind(&self) -> WireKind;

    fn decode(&self, wire: JsonValue) -> anyhow::Result<Value>;

    /// Turn a value this adapter decoded back into something encodable.  The result is encoded
    /// again, so it can be anything the converter handles, including another adapter's value.
    fn encode(&self, value: &Value) -> anyhow::Result<Value>;

    /// True if the values this adapter decodes into are variants that encode on their own, in
    /// which case they are not wrapped in [`Value::Adapted`].
    fn self_describing(&self) -> bool {
        false
    }
}

/// Adapters by tag.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the timestamp, duration and decimal adapters.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(TimestampAdapter);
        registry.register(DurationAdapter);
        registry.register(DecimalAdapter);
        registry
    }

    /// Register an adapter, replacing and returning any previous adapter with the same tag.
    pub fn register(&mut self, adapter: impl Adapter) -> Option<Arc<dyn Adapter>> {
        let adapter: Arc<dyn Adapter> = Arc::new(adapter);
        self.adapters.insert(adapter.tag().to_string(), adapter)
    }

    pub fn get(&self, tag: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(tag).cloned()
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.adapters.keys()).finish()
    }
}

pub struct TimestampAdapter;

impl TimestampAdapter {
    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

    /// Render a timestamp the way it goes on the wire.  Fractional seconds only appear when
    /// they're non-zero.
    pub fn format(timestamp: &NaiveDateTime) -> String {
        timestamp.format(Self::FORMAT).to_string()
    }

    /// Parse the ISO 8601 forms a client is likely to send.
    ///
    /// Timestamps with an offset are converted to UTC, since the decoded type carries no zone.
    pub fn parse(text: &str) -> anyhow::Result<NaiveDateTime> {
        if let Ok(timestamp) = NaiveDateTime::parse_from_str(text, Self::FORMAT) {
            return Ok(timestamp);
        }
        if let Ok(timestamp) = DateTime::parse_from_rfc3339(text) {
            return Ok(timestamp.naive_utc());
        }
        if let Ok(timestamp) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f") {
            return Ok(timestamp);
        }
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map(|date| date.and_time(NaiveTime::MIN))
            .with_context(|| format!("'{text}' is not an ISO 8601 timestamp"))
    }
}

impl Adapter for TimestampAdapter {
    fn tag(&self) -> &str {
        TIMESTAMP_TAG
    }

    fn wire_kind(&self) -> WireKind {
        WireKind::String
    }

    fn decode(&self, wire: JsonValue) -> anyhow::Result<Value> {
        match wire {
            JsonValue::String(text) => Ok(Value::Timestamp(Self::parse(&text)?)),
            other => bail!("expected a timestamp string, got {other}"),
        }
    }

    fn encode(&self, value: &Value) -> anyhow::Result<Value> {
        match value {
            Value::Timestamp(timestamp) => Ok(Value::String(Self::format(timestamp))),
            other => bail!("expected a timestamp, got {}", other.kind_name()),
        }
    }

    fn self_describing(&self) -> bool {
        true
    }
}

pub struct DurationAdapter;

impl DurationAdapter {
    pub fn seconds(duration: &Duration) -> f64 {
        duration.as_secs_f64()
    }
}

impl Adapter for DurationAdapter {
    fn tag(&self) -> &str {
        DURATION_TAG
    }

    fn wire_kind(&self) -> WireKind {
        WireKind::Number
    }

    fn decode(&self, wire: JsonValue) -> anyhow::Result<Value> {
        let seconds = wire
            .as_f64()
            .ok_or_else(|| anyhow!("expected a number of seconds, got {wire}"))?;
        let duration = Duration::try_from_secs_f64(seconds)
            .with_context(|| format!("{seconds} is not a valid duration in seconds"))?;
        Ok(Value::Duration(duration))
    }

    fn encode(&self, value: &Value) -> anyhow::Result<Value> {
        match value {
            Value::Duration(duration) => Ok(Value::Float(Self::seconds(duration))),
            other => bail!("expected a duration, got {}", other.kind_name()),
        }
    }

    fn self_describing(&self) -> bool {
        true
    }
}

pub struct DecimalAdapter;

impl DecimalAdapter {
    /// The decimal's own text becomes the JSON number, so no digits are lost to `f64`.
    pub fn to_wire(decimal: &Decimal) -> anyhow::Result<Value> {
        let number = Number::from_str(&decimal.to_string())
            .with_context(|| format!("{decimal} cannot be represented as a JSON number"))?;
        Ok(Value::Dynamic(JsonValue::Number(number)))
    }
}

impl Adapter for DecimalAdapter {
    fn tag(&self) -> &str {
        DECIMAL_TAG
    }

    fn wire_kind(&self) -> WireKind {
        WireKind::Number
    }

    fn decode(&self, wire: JsonValue) -> anyhow::Result<Value> {
        let JsonValue::Number(number) = wire else {
            bail!("expected a number, got {wire}");
        };
        // Going through the number's text keeps `0.1` as exactly 0.1 instead of the nearest f64
        let text = number.to_string();
        let decimal = Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .with_context(|| format!("{text} is not representable as a decimal"))?;
        Ok(Value::Decimal(decimal))
    }

    fn encode(&self, value: &Value) -> anyhow::Result<Value> {
        match value {
            Value::Decimal(decimal) => Self::to_wire(decimal),
            other => bail!("expected a decimal, got {}", other.kind_name()),
        }
    }

    fn self_describing(&self) -> bool {
        true
    }
}
