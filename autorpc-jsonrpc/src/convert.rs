//! Conversion between wire values (plain JSON) and typed [`Value`]s.
//!
//! [`decode`] is directed by a [`TypeDescriptor`]: the declared type decides how a wire value is
//! read, and a wire value that doesn't fit the declared type is an error.  No coercion is done
//! beyond what the type calls for, so `"2"` is not an integer.
//!
//! [`encode`] needs no descriptor because every [`Value`] variant knows its own wire form.
//!
//! Both recurse through sequences, mappings and records to any depth.  Descriptors are trees
//! (records can't refer to themselves), so the recursion always terminates.
use std::fmt;

use serde_json::{Map, Number, Value as JsonValue};
use thiserror::Error;

mod adapters;
mod descriptor;
mod typed;
mod value;

pub use adapters::{
    Adapter, AdapterRegistry, DECIMAL_TAG, DURATION_TAG, DecimalAdapter, DurationAdapter, TIMESTAMP_TAG,
    TimestampAdapter,
};
pub use descriptor::{AdapterRef, FieldDescriptor, RecordDescriptor, ScalarKind, TypeDescriptor, WireKind};
pub use typed::Typed;
pub use value::{AdaptedValue, RecordValue, Value};

/// One step on the way from the top-level value to the place a conversion failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
    Key(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Field(name) => write!(f, ".{name}"),
            PathSegment::Index(index) => write!(f, "[{index}]"),
            PathSegment::Key(key) => write!(f, "[\"{key}\"]"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConvertErrorKind {
    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: &'static str },

    #[error("record '{record}' is missing field '{field}'")]
    MissingField { record: String, field: String },

    #[error("adapter '{tag}' failed: {source:#}")]
    Adapter {
        tag: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("adapter '{tag}' was never resolved against an adapter registry")]
    UnresolvedAdapter { tag: String },

    #[error("{0} has no JSON representation")]
    NonFiniteFloat(f64),

    #[error("a {found} cannot be used as a mapping key")]
    UnsupportedKey { found: &'static str },

    #[error("{value} is out of range for {expected}")]
    OutOfRange { expected: String, value: String },
}

/// A value didn't fit its declared type, with the path to where it happened.
#[derive(Debug)]
pub struct ConvertError {
    path: Vec<PathSegment>,
    kind: ConvertErrorKind,
}

impl ConvertError {
    pub fn new(kind: ConvertErrorKind) -> Self {
        Self {
            path: Vec::new(),
            kind,
        }
    }

    pub fn mismatch(expected: impl Into<String>, found: &'static str) -> Self {
        Self::new(ConvertErrorKind::TypeMismatch {
            expected: expected.into(),
            found,
        })
    }

    pub fn out_of_range(expected: impl Into<String>, value: impl fmt::Display) -> Self {
        Self::new(ConvertErrorKind::OutOfRange {
            expected: expected.into(),
            value: value.to_string(),
        })
    }

    /// Record that the failure happened inside `segment`.  Called on the way out of the
    /// recursion, so segments are prepended.
    pub fn within(mut self, segment: PathSegment) -> Self {
        self.path.insert(0, segment);
        self
    }

    /// Path from the outermost value to the failure.
    pub fn path(&self) -> &[PathSegment] {
        &self.path
    }

    pub fn kind(&self) -> &ConvertErrorKind {
        &self.kind
    }
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.path.is_empty() {
            f.write_str("at ")?;
            for segment in &self.path {
                write!(f, "{segment}")?;
            }
            f.write_str(": ")?;
        }
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for ConvertError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.kind)
    }
}

/// Name of the JSON type of a wire value, for error messages.
pub fn wire_kind_name(wire: &JsonValue) -> &'static str {
    match wire {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(n) if n.is_f64() => "float",
        JsonValue::Number(_) => "integer",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Decode a wire value into a typed value, as directed by `ty`.
pub fn decode(wire: JsonValue, ty: &TypeDescriptor) -> Result<Value, ConvertError> {
    match ty {
        TypeDescriptor::Scalar(kind) => decode_scalar(wire, *kind),
        TypeDescriptor::Dynamic => Ok(Value::Dynamic(wire)),
        TypeDescriptor::Sequence(element) => {
            let JsonValue::Array(items) = wire else {
                return Err(ConvertError::mismatch(ty.to_string(), wire_kind_name(&wire)));
            };
            items
                .into_iter()
                .enumerate()
                .map(|(index, item)| decode(item, element).map_err(|e| e.within(PathSegment::Index(index))))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Sequence)
        }
        TypeDescriptor::Mapping(key_ty, value_ty) => {
            let JsonValue::Object(entries) = wire else {
                return Err(ConvertError::mismatch(ty.to_string(), wire_kind_name(&wire)));
            };
            entries
                .into_iter()
                .map(|(key, value)| {
                    let decoded_key = decode(key_to_wire(&key, key_ty), key_ty)
                        .map_err(|e| e.within(PathSegment::Key(key.clone())))?;
                    let decoded_value =
                        decode(value, value_ty).map_err(|e| e.within(PathSegment::Key(key)))?;
                    Ok((decoded_key, decoded_value))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Mapping)
        }
        TypeDescriptor::Record(record) => {
            let JsonValue::Object(mut entries) = wire else {
                return Err(ConvertError::mismatch(record.name.clone(), wire_kind_name(&wire)));
            };
            let mut decoded = RecordValue::new(record.name.clone());
            for field in &record.fields {
                let value = match entries.remove(&field.name) {
                    Some(JsonValue::Null) if field.optional => Value::Null,
                    Some(wire) => decode(wire, &field.ty)
                        .map_err(|e| e.within(PathSegment::Field(field.name.clone())))?,
                    None if field.optional => Value::Null,
                    None if field.ty == TypeDescriptor::Dynamic => Value::Dynamic(JsonValue::Null),
                    None => {
                        return Err(ConvertError::new(ConvertErrorKind::MissingField {
                            record: record.name.clone(),
                            field: field.name.clone(),
                        }));
                    }
                };
                decoded.push(field.name.clone(), value);
            }
            Ok(Value::Record(decoded))
        }
        TypeDescriptor::Adapter(AdapterRef::Unresolved(tag)) => {
            Err(ConvertError::new(ConvertErrorKind::UnresolvedAdapter { tag: tag.clone() }))
        }
        TypeDescriptor::Adapter(AdapterRef::Resolved(adapter)) => {
            if !adapter.wire_kind().matches(&wire) {
                return Err(ConvertError::mismatch(
                    format!("{} ({})", adapter.tag(), adapter.wire_kind()),
                    wire_kind_name(&wire),
                ));
            }
            let value = adapter.decode(wire).map_err(|source| {
                ConvertError::new(ConvertErrorKind::Adapter {
                    tag: adapter.tag().to_string(),
                    source,
                })
            })?;
            if adapter.self_describing() {
                Ok(value)
            } else {
                Ok(Value::Adapted(AdaptedValue {
                    adapter: adapter.clone(),
                    inner: Box::new(value),
                }))
            }
        }
    }
}

fn decode_scalar(wire: JsonValue, kind: ScalarKind) -> Result<Value, ConvertError> {
    match (kind, wire) {
        (ScalarKind::Null, JsonValue::Null) => Ok(Value::Null),
        (ScalarKind::Bool, JsonValue::Bool(b)) => Ok(Value::Bool(b)),
        (ScalarKind::String, JsonValue::String(s)) => Ok(Value::String(s)),
        (ScalarKind::Float, JsonValue::Number(n)) => n
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| ConvertError::out_of_range("float", &n)),
        (ScalarKind::Integer, JsonValue::Number(n)) if !n.is_f64() => n
            .as_i64()
            .map(Value::Integer)
            .ok_or_else(|| ConvertError::out_of_range("integer", &n)),
        (kind, wire) => Err(ConvertError::mismatch(kind.to_string(), wire_kind_name(&wire))),
    }
}

/// JSON object keys are always strings.  For key types other than strings, the key text is read
/// as JSON first so that `{"1": ..}` can decode into integer keys.
fn key_to_wire(key: &str, key_ty: &TypeDescriptor) -> JsonValue {
    match key_ty {
        TypeDescriptor::Scalar(ScalarKind::String) | TypeDescriptor::Dynamic => JsonValue::String(key.to_string()),
        _ => match serde_json::from_str::<JsonValue>(key) {
            Ok(parsed @ (JsonValue::Number(_) | JsonValue::Bool(_) | JsonValue::Null)) => parsed,
            _ => JsonValue::String(key.to_string()),
        },
    }
}

/// Encode a typed value into its wire form.
///
/// Fails only for values with no JSON representation: non-finite floats, mapping keys that
/// aren't scalars, and failures inside custom adapters.
pub fn encode(value: &Value) -> Result<JsonValue, ConvertError> {
    match value {
        Value::Null => Ok(JsonValue::Null),
        Value::Bool(b) => Ok(JsonValue::Bool(*b)),
        Value::Integer(i) => Ok(JsonValue::from(*i)),
        Value::Float(f) => float_to_wire(*f),
        Value::String(s) => Ok(JsonValue::String(s.clone())),
        Value::Sequence(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| encode(item).map_err(|e| e.within(PathSegment::Index(index))))
            .collect::<Result<Vec<_>, _>>()
            .map(JsonValue::Array),
        Value::Mapping(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (key, value) in entries {
                let key = key_to_text(key)?;
                let value = encode(value).map_err(|e| e.within(PathSegment::Key(key.clone())))?;
                map.insert(key, value);
            }
            Ok(JsonValue::Object(map))
        }
        Value::Record(record) => {
            let mut map = Map::with_capacity(record.fields.len());
            for (name, value) in &record.fields {
                let value = encode(value).map_err(|e| e.within(PathSegment::Field(name.clone())))?;
                map.insert(name.clone(), value);
            }
            Ok(JsonValue::Object(map))
        }
        Value::Timestamp(timestamp) => Ok(JsonValue::String(TimestampAdapter::format(timestamp))),
        Value::Duration(duration) => float_to_wire(DurationAdapter::seconds(duration)),
        Value::Decimal(decimal) => {
            let wire = DecimalAdapter::to_wire(decimal).map_err(|source| {
                ConvertError::new(ConvertErrorKind::Adapter {
                    tag: DECIMAL_TAG.to_string(),
                    source,
                })
            })?;
            encode(&wire)
        }
        Value::Adapted(adapted) => {
            let wire = adapted.adapter.encode(&adapted.inner).map_err(|source| {
                ConvertError::new(ConvertErrorKind::Adapter {
                    tag: adapted.adapter.tag().to_string(),
                    source,
                })
            })?;
            encode(&wire)
        }
        Value::Dynamic(wire) => Ok(wire.clone()),
    }
}

fn float_to_wire(f: f64) -> Result<JsonValue, ConvertError> {
    Number::from_f64(f)
        .map(JsonValue::Number)
        .ok_or_else(|| ConvertError::new(ConvertErrorKind::NonFiniteFloat(f)))
}

fn key_to_text(key: &Value) -> Result<String, ConvertError> {
    match encode(key)? {
        JsonValue::String(s) => Ok(s),
        JsonValue::Number(n) => Ok(n.to_string()),
        JsonValue::Bool(b) => Ok(b.to_string()),
        JsonValue::Null => Ok("null".to_string()),
        other => Err(ConvertError::new(ConvertErrorKind::UnsupportedKey {
            found: wire_kind_name(&other),
        })),
    }
}
