//! Typed in-memory values, the output of decoding and the input to encoding.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use super::adapters::Adapter;
use super::typed::Typed;
use super::{ConvertError, ConvertErrorKind, PathSegment};

/// A value after it has been decoded against a [`super::TypeDescriptor`].
///
/// Every variant knows how to encode itself, so encoding never needs the descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Sequence(Vec<Value>),
    /// Key/value pairs in wire order.  Keys are values too, decoded with the key descriptor.
    Mapping(Vec<(Value, Value)>),
    Record(RecordValue),
    Timestamp(NaiveDateTime),
    Duration(Duration),
    Decimal(Decimal),
    /// Produced by a custom adapter, which is also needed to encode it again.
    Adapted(AdaptedValue),
    /// An undeclared value, carried through as-is.
    Dynamic(JsonValue),
}

impl Value {
    /// Short name of the variant, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Sequence(_) => "list",
            Value::Mapping(_) => "map",
            Value::Record(_) => "record",
            Value::Timestamp(_) => "timestamp",
            Value::Duration(_) => "duration",
            Value::Decimal(_) => "decimal",
            Value::Adapted(adapted) => adapted.inner.kind_name(),
            Value::Dynamic(_) => "any",
        }
    }

    /// Strip any custom adapter wrapping, leaving the value the adapter produced.
    pub fn unwrap_adapted(self) -> Value {
        match self {
            Value::Adapted(adapted) => adapted.inner.unwrap_adapted(),
            other => other,
        }
    }

    pub fn into_record(self, name: &str) -> Result<RecordValue, ConvertError> {
        match self.unwrap_adapted() {
            Value::Record(record) => Ok(record),
            other => Err(ConvertError::mismatch(name, other.kind_name())),
        }
    }
}

/// A decoded record: its name and its fields in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordValue {
    pub name: String,
    pub fields: Vec<(String, Value)>,
}

impl RecordValue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style append of a field converted from a Rust value.
    pub fn with(mut self, field: impl Into<String>, value: impl Typed) -> Self {
        self.fields.push((field.into(), value.into_value()));
        self
    }

    pub fn push(&mut self, field: impl Into<String>, value: Value) {
        self.fields.push((field.into(), value));
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find_map(|(name, value)| (name == field).then_some(value))
    }

    /// Remove a field and convert it to a Rust value.
    ///
    /// An absent field is only acceptable if `T` is optional, in which case it converts from null.
    pub fn take<T: Typed>(&mut self, field: &str) -> Result<T, ConvertError> {
        let value = match self.fields.iter().position(|(name, _)| name == field) {
            Some(index) => self.fields.remove(index).1,
            None if T::optional() => Value::Null,
            None => {
                return Err(ConvertError::new(ConvertErrorKind::MissingField {
                    record: self.name.clone(),
                    field: field.to_string(),
                }));
            }
        };

        T::from_value(value).map_err(|e| e.within(PathSegment::Field(field.to_string())))
    }
}

/// A value produced by a custom adapter, bundled with that adapter.
#[derive(Clone)]
pub struct AdaptedValue {
    pub adapter: Arc<dyn Adapter>,
    pub inner: Box<Value>,
}

impl PartialEq for AdaptedValue {
    fn eq(&self, other: &Self) -> bool {
        self.adapter.tag() == other.adapter.tag() && self.inner == other.inner
    }
}

impl fmt::Debug for AdaptedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptedValue")
            .field("adapter", &self.adapter.tag())
            .field("inner", &self.inner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn record_take_removes_and_converts() {
        let mut record = RecordValue::new("Point").with("x", 1i64).with("y", 2i64);
        assert_eq!(record.get("y"), Some(&Value::Integer(2)));

        let x: i64 = record.take("x").unwrap();
        assert_eq!(x, 1);
        assert!(record.get("x").is_none());

        let missing: Option<i64> = record.take("z").unwrap();
        assert_eq!(missing, None);

        let err = record.take::<i64>("z").unwrap_err();
        assert_matches!(err.kind(), ConvertErrorKind::MissingField { record, field } => {
            assert_eq!(record, "Point");
            assert_eq!(field, "z");
        });
    }

    #[test]
    fn record_take_reports_field_path() {
        let mut record = RecordValue::new("Point").with("x", String::from("not a number"));
        let err = record.take::<i64>("x").unwrap_err();
        assert_eq!(err.path(), [PathSegment::Field("x".into())]);
    }

    #[test]
    fn into_record_rejects_other_values() {
        let err = Value::Integer(1).into_record("Point").unwrap_err();
        assert_matches!(err.kind(), ConvertErrorKind::TypeMismatch { expected, found } => {
            assert_eq!(expected, "Point");
            assert_eq!(*found, "integer");
        });
    }
}
