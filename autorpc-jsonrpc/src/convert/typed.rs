//! The bridge between Rust types and the converter.
//!
//! A method's parameter and return descriptors come from the [`Typed`] impls of its argument and
//! return types, so registering a plain Rust function is enough to describe it.
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::time::Duration;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use super::adapters::{DECIMAL_TAG, DURATION_TAG, TIMESTAMP_TAG};
use super::descriptor::TypeDescriptor;
use super::value::Value;
use super::{ConvertError, PathSegment, encode};

/// A Rust type with a known wire shape.
pub trait Typed: Sized + Send + 'static {
    /// The shape this type has on the wire.
    fn descriptor() -> TypeDescriptor;

    /// Convert from a value decoded against [`Typed::descriptor`].
    fn from_value(value: Value) -> Result<Self, ConvertError>;

    /// Convert into a value for encoding.
    ///
    /// For records this is the custom wire-conversion hook: whatever it returns is encoded
    /// recursively, so a type can present itself as any shape it likes.
    fn into_value(self) -> Value;

    /// True if a parameter or field of this type may be absent, in which case it's decoded as
    /// null.
    fn optional() -> bool {
        false
    }
}

impl Typed for bool {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::bool()
    }

    fn from_value(value: Value) -> Result<Self, ConvertError> {
        match value.unwrap_adapted() {
            Value::Bool(b) => Ok(b),
            other => Err(ConvertError::mismatch("bool", other.kind_name())),
        }
    }

    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

macro_rules! impl_typed_integer {
    ($($ty:ty),*) => {
        $(
            impl Typed for $ty {
                fn descriptor() -> TypeDescriptor {
                    TypeDescriptor::integer()
                }

                fn from_value(value: Value) -> Result<Self, ConvertError> {
                    match value.unwrap_adapted() {
                        Value::Integer(i) => <$ty>::try_from(i)
                            .map_err(|_| ConvertError::out_of_range(stringify!($ty), i)),
                        other => Err(ConvertError::mismatch("integer", other.kind_name())),
                    }
                }

                /// `u64` and `usize` values above `i64::MAX` still encode, as plain JSON numbers,
                /// but they decode as out of range: integers on the wire are limited to `i64`.
                #[allow(irrefutable_let_patterns)]
                fn into_value(self) -> Value {
                    // Only the widest unsigned types can fail here
                    if let Ok(i) = i64::try_from(self) {
                        Value::Integer(i)
                    } else {
                        Value::Dynamic(JsonValue::from(self))
                    }
                }
            }
        )*
    };
}

impl_typed_integer!(i8, i16, i32, i64, u8, u16, u32, u64, isize, usize);

macro_rules! impl_typed_float {
    ($($ty:ty),*) => {
        $(
            impl Typed for $ty {
                fn descriptor() -> TypeDescriptor {
                    TypeDescriptor::float()
                }

                fn from_value(value: Value) -> Result<Self, ConvertError> {
                    match value.unwrap_adapted() {
                        Value::Float(f) => Ok(f as $ty),
                        Value::Integer(i) => Ok(i as $ty),
                        other => Err(ConvertError::mismatch("float", other.kind_name())),
                    }
                }

                fn into_value(self) -> Value {
                    Value::Float(self as f64)
                }
            }
        )*
    };
}

impl_typed_float!(f32, f64);

impl Typed for String {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::string()
    }

    fn from_value(value: Value) -> Result<Self, ConvertError> {
        match value.unwrap_adapted() {
            Value::String(s) => Ok(s),
            other => Err(ConvertError::mismatch("string", other.kind_name())),
        }
    }

    fn into_value(self) -> Value {
        Value::String(self)
    }
}

/// For methods that return nothing.  Encodes as `null`.
impl Typed for () {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::null()
    }

    fn from_value(value: Value) -> Result<Self, ConvertError> {
        match value.unwrap_adapted() {
            Value::Null => Ok(()),
            other => Err(ConvertError::mismatch("null", other.kind_name())),
        }
    }

    fn into_value(self) -> Value {
        Value::Null
    }
}

/// Undeclared: the wire value as-is.
impl Typed for JsonValue {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Dynamic
    }

    fn from_value(value: Value) -> Result<Self, ConvertError> {
        match value {
            Value::Dynamic(wire) => Ok(wire),
            other => encode(&other),
        }
    }

    fn into_value(self) -> Value {
        Value::Dynamic(self)
    }
}

impl<T: Typed> Typed for Option<T> {
    fn descriptor() -> TypeDescriptor {
        T::descriptor()
    }

    fn from_value(value: Value) -> Result<Self, ConvertError> {
        match value {
            Value::Null | Value::Dynamic(JsonValue::Null) => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Some(value) => value.into_value(),
            None => Value::Null,
        }
    }

    fn optional() -> bool {
        true
    }
}

impl<T: Typed> Typed for Vec<T> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::sequence(T::descriptor())
    }

    fn from_value(value: Value) -> Result<Self, ConvertError> {
        match value.unwrap_adapted() {
            Value::Sequence(items) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| T::from_value(item).map_err(|e| e.within(PathSegment::Index(index))))
                .collect(),
            other => Err(ConvertError::mismatch(Self::descriptor().to_string(), other.kind_name())),
        }
    }

    fn into_value(self) -> Value {
        Value::Sequence(self.into_iter().map(Typed::into_value).collect())
    }
}

/// Shared by the map impls: convert each pair, tagging failures with the key.
fn mapping_entries<K: Typed, V: Typed>(
    value: Value,
    expected: impl FnOnce() -> String,
) -> Result<Vec<(K, V)>, ConvertError> {
    match value.unwrap_adapted() {
        Value::Mapping(entries) => entries
            .into_iter()
            .map(|(key, value)| {
                let label = match &key {
                    Value::String(s) => s.clone(),
                    other => encode(other).map(|wire| wire.to_string()).unwrap_or_default(),
                };
                let key = K::from_value(key).map_err(|e| e.within(PathSegment::Key(label.clone())))?;
                let value = V::from_value(value).map_err(|e| e.within(PathSegment::Key(label)))?;
                Ok((key, value))
            })
            .collect(),
        other => Err(ConvertError::mismatch(expected(), other.kind_name())),
    }
}

impl<K, V> Typed for BTreeMap<K, V>
where
    K: Typed + Ord,
    V: Typed,
{
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::mapping(K::descriptor(), V::descriptor())
    }

    fn from_value(value: Value) -> Result<Self, ConvertError> {
        mapping_entries(value, || Self::descriptor().to_string()).map(|entries| entries.into_iter().collect())
    }

    fn into_value(self) -> Value {
        Value::Mapping(
            self.into_iter()
                .map(|(key, value)| (key.into_value(), value.into_value()))
                .collect(),
        )
    }
}

impl<K, V> Typed for HashMap<K, V>
where
    K: Typed + Eq + Hash,
    V: Typed,
{
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::mapping(K::descriptor(), V::descriptor())
    }

    fn from_value(value: Value) -> Result<Self, ConvertError> {
        mapping_entries(value, || Self::descriptor().to_string()).map(|entries| entries.into_iter().collect())
    }

    fn into_value(self) -> Value {
        Value::Mapping(
            self.into_iter()
                .map(|(key, value)| (key.into_value(), value.into_value()))
                .collect(),
        )
    }
}

impl Typed for NaiveDateTime {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::adapter(TIMESTAMP_TAG)
    }

    fn from_value(value: Value) -> Result<Self, ConvertError> {
        match value.unwrap_adapted() {
            Value::Timestamp(timestamp) => Ok(timestamp),
            other => Err(ConvertError::mismatch(TIMESTAMP_TAG, other.kind_name())),
        }
    }

    fn into_value(self) -> Value {
        Value::Timestamp(self)
    }
}

impl Typed for Duration {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::adapter(DURATION_TAG)
    }

    fn from_value(value: Value) -> Result<Self, ConvertError> {
        match value.unwrap_adapted() {
            Value::Duration(duration) => Ok(duration),
            other => Err(ConvertError::mismatch(DURATION_TAG, other.kind_name())),
        }
    }

    fn into_value(self) -> Value {
        Value::Duration(self)
    }
}

impl Typed for Decimal {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::adapter(DECIMAL_TAG)
    }

    fn from_value(value: Value) -> Result<Self, ConvertError> {
        match value.unwrap_adapted() {
            Value::Decimal(decimal) => Ok(decimal),
            other => Err(ConvertError::mismatch(DECIMAL_TAG, other.kind_name())),
        }
    }

    fn into_value(self) -> Value {
        Value::Decimal(self)
    }
}

/// Declare a struct that converts as a record, with its fields in declaration order.
///
/// ```
/// use autorpc_jsonrpc::{Typed, TypeDescriptor, typed_record};
///
/// typed_record! {
///     #[derive(Debug, Clone, PartialEq)]
///     pub struct Point {
///         pub x: i64,
///         pub y: i64,
///         pub label: Option<String>,
///     }
/// }
///
/// let TypeDescriptor::Record(record) = Point::descriptor() else { unreachable!() };
/// assert_eq!(record.name, "Point");
/// assert!(record.fields[2].optional);
/// ```
#[macro_export]
macro_rules! typed_record {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_vis:vis $field:ident : $field_ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(
                $(#[$field_meta])*
                $field_vis $field: $field_ty,
            )*
        }

        impl $crate::Typed for $name {
            fn descriptor() -> $crate::TypeDescriptor {
                let record = $crate::RecordDescriptor::new(stringify!($name));
                $(
                    let record = record.field::<$field_ty>(stringify!($field));
                )*
                $crate::TypeDescriptor::record(record)
            }

            fn from_value(value: $crate::Value) -> ::std::result::Result<Self, $crate::ConvertError> {
                #[allow(unused_mut)]
                let mut record = value.into_record(stringify!($name))?;
                ::std::result::Result::Ok(Self {
                    $(
                        $field: record.take::<$field_ty>(stringify!($field))?,
                    )*
                })
            }

            fn into_value(self) -> $crate::Value {
                let record = $crate::RecordValue::new(stringify!($name));
                $(
                    let record = record.with(stringify!($field), self.$field);
                )*
                $crate::Value::Record(record)
            }
        }
    };
}
