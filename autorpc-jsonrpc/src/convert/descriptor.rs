//! The closed set of shapes the converter knows how to handle.
use std::fmt;
use std::sync::Arc;

use strum::{Display, EnumString};

use super::adapters::{Adapter, AdapterRegistry};
use super::typed::Typed;

/// Primitive wire types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ScalarKind {
    Bool,
    Integer,
    Float,
    String,
    Null,
}

/// The JSON shape an adapter expects on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum WireKind {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl WireKind {
    pub fn matches(&self, wire: &serde_json::Value) -> bool {
        matches!(
            (self, wire),
            (WireKind::String, serde_json::Value::String(_))
                | (WireKind::Number, serde_json::Value::Number(_))
                | (WireKind::Boolean, serde_json::Value::Bool(_))
                | (WireKind::Array, serde_json::Value::Array(_))
                | (WireKind::Object, serde_json::Value::Object(_))
        )
    }
}

/// Describes the type of a parameter, return value, record field, collection element, or map key.
///
/// Descriptors are built once when a service is registered.  Adapters may be referenced by tag
/// before the registry that holds them exists; [`TypeDescriptor::resolve`] swaps every tag for
/// the adapter it names, and that happens as part of registration.
#[derive(Clone)]
pub enum TypeDescriptor {
    Scalar(ScalarKind),
    Sequence(Box<TypeDescriptor>),
    Mapping(Box<TypeDescriptor>, Box<TypeDescriptor>),
    Record(Arc<RecordDescriptor>),
    /// No declared type; the wire value is passed through untouched.
    Dynamic,
    Adapter(AdapterRef),
}

/// Reference to a registered adapter, either still by tag or already looked up.
#[derive(Clone)]
pub enum AdapterRef {
    Unresolved(String),
    Resolved(Arc<dyn Adapter>),
}

impl AdapterRef {
    pub fn tag(&self) -> &str {
        match self {
            AdapterRef::Unresolved(tag) => tag,
            AdapterRef::Resolved(adapter) => adapter.tag(),
        }
    }
}

impl TypeDescriptor {
    pub fn bool() -> Self {
        Self::Scalar(ScalarKind::Bool)
    }

    pub fn integer() -> Self {
        Self::Scalar(ScalarKind::Integer)
    }

    pub fn float() -> Self {
        Self::Scalar(ScalarKind::Float)
    }

    pub fn string() -> Self {
        Self::Scalar(ScalarKind::String)
    }

    pub fn null() -> Self {
        Self::Scalar(ScalarKind::Null)
    }

    pub fn sequence(element: TypeDescriptor) -> Self {
        Self::Sequence(Box::new(element))
    }

    pub fn mapping(key: TypeDescriptor, value: TypeDescriptor) -> Self {
        Self::Mapping(Box::new(key), Box::new(value))
    }

    pub fn record(record: RecordDescriptor) -> Self {
        Self::Record(Arc::new(record))
    }

    /// Reference an adapter by its tag.  Must be resolved before anything is decoded with it.
    pub fn adapter(tag: impl Into<String>) -> Self {
        Self::Adapter(AdapterRef::Unresolved(tag.into()))
    }

    /// Replace every adapter tag in this descriptor with the adapter registered under it.
    ///
    /// On failure, returns the first tag that isn't registered.
    pub fn resolve(&self, adapters: &AdapterRegistry) -> Result<TypeDescriptor, String> {
        Ok(match self {
            TypeDescriptor::Scalar(kind) => TypeDescriptor::Scalar(*kind),
            TypeDescriptor::Dynamic => TypeDescriptor::Dynamic,
            TypeDescriptor::Sequence(element) => TypeDescriptor::sequence(element.resolve(adapters)?),
            TypeDescriptor::Mapping(key, value) => {
                TypeDescriptor::mapping(key.resolve(adapters)?, value.resolve(adapters)?)
            }
            TypeDescriptor::Record(record) => {
                let fields = record
                    .fields
                    .iter()
                    .map(|field| {
                        Ok(FieldDescriptor {
                            name: field.name.clone(),
                            ty: field.ty.resolve(adapters)?,
                            optional: field.optional,
                        })
                    })
                    .collect::<Result<Vec<_>, String>>()?;
                TypeDescriptor::record(RecordDescriptor {
                    name: record.name.clone(),
                    fields,
                })
            }
            TypeDescriptor::Adapter(AdapterRef::Resolved(adapter)) => {
                TypeDescriptor::Adapter(AdapterRef::Resolved(adapter.clone()))
            }
            TypeDescriptor::Adapter(AdapterRef::Unresolved(tag)) => match adapters.get(tag) {
                Some(adapter) => TypeDescriptor::Adapter(AdapterRef::Resolved(adapter)),
                None => return Err(tag.clone()),
            },
        })
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Scalar(kind) => write!(f, "{kind}"),
            TypeDescriptor::Sequence(element) => write!(f, "list[{element}]"),
            TypeDescriptor::Mapping(key, value) => write!(f, "map[{key}, {value}]"),
            TypeDescriptor::Record(record) => f.write_str(&record.name),
            TypeDescriptor::Dynamic => f.write_str("any"),
            TypeDescriptor::Adapter(adapter) => f.write_str(adapter.tag()),
        }
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Record(record) => f.debug_tuple("Record").field(record).finish(),
            other => write!(f, "{other}"),
        }
    }
}

/// Adapters compare by tag; everything else structurally.
impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TypeDescriptor::Scalar(a), TypeDescriptor::Scalar(b)) => a == b,
            (TypeDescriptor::Sequence(a), TypeDescriptor::Sequence(b)) => a == b,
            (TypeDescriptor::Mapping(ak, av), TypeDescriptor::Mapping(bk, bv)) => ak == bk && av == bv,
            (TypeDescriptor::Record(a), TypeDescriptor::Record(b)) => a == b,
            (TypeDescriptor::Dynamic, TypeDescriptor::Dynamic) => true,
            (TypeDescriptor::Adapter(a), TypeDescriptor::Adapter(b)) => a.tag() == b.tag(),
            _ => false,
        }
    }
}

/// A composite with named fields, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDescriptor {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub ty: TypeDescriptor,
    /// An optional field may be absent from the wire mapping or `null`; either way it decodes as
    /// null.
    pub optional: bool,
}

impl RecordDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Append a field whose shape comes from a Rust type.
    pub fn field<T: Typed>(self, name: impl Into<String>) -> Self {
        self.field_with(name, T::descriptor(), T::optional())
    }

    /// Append a field with an explicit descriptor.
    pub fn field_with(mut self, name: impl Into<String>, ty: TypeDescriptor, optional: bool) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.into(),
            ty,
            optional,
        });
        self
    }
}
