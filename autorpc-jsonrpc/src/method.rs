//! A single method of a registered service: its declared signature, and the machinery that binds
//! wire arguments to it and invokes it.
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use itertools::Itertools;
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::convert::{ConvertError, TypeDescriptor, Typed, Value, decode, encode, wire_kind_name};
use crate::error::{ArgumentError, DispatchError, ExecutionError, panic_message};
use crate::handler::{CallError, ErasedMethod};
use crate::service::ServiceEntry;

/// One declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: TypeDescriptor,
    /// Optional parameters may be omitted from named arguments, and accept `null`.
    pub optional: bool,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            ty,
            optional: false,
        }
    }

    pub fn optional(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self {
            optional: true,
            ..Self::new(name, ty)
        }
    }

    /// A parameter whose type comes from a Rust type.
    pub fn of<T: Typed>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: T::descriptor(),
            optional: T::optional(),
        }
    }
}

/// Arguments after binding: one decoded value per declared parameter, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundArguments {
    args: Vec<(String, Value)>,
}

impl BoundArguments {
    #[cfg(test)]
    pub(crate) fn from_values(values: Vec<Value>) -> Self {
        Self {
            args: values
                .into_iter()
                .enumerate()
                .map(|(index, value)| (index.to_string(), value))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.args
            .iter()
            .find_map(|(param, value)| (param == name).then_some(value))
    }

    /// Remove an argument and convert it to a Rust value.
    pub fn take<T: Typed>(&mut self, name: &str) -> Result<T, ConvertError> {
        let value = match self.args.iter().position(|(param, _)| param == name) {
            Some(index) => self.args.remove(index).1,
            None => Value::Null,
        };
        T::from_value(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.args.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn into_values(self) -> Vec<Value> {
        self.args.into_iter().map(|(_, value)| value).collect()
    }
}

/// A method of a registered service.
///
/// Immutable once built.  Holds only a weak reference back to its service, since the service owns
/// its methods.
pub struct MethodEntry {
    name: String,
    qualified_name: String,
    service: Weak<ServiceEntry>,
    params: Vec<Param>,
    returns: TypeDescriptor,
    doc: String,
    invoker: Arc<dyn ErasedMethod>,
}

impl MethodEntry {
    pub(crate) fn new(
        service_name: &str,
        service: Weak<ServiceEntry>,
        name: String,
        params: Vec<Param>,
        returns: TypeDescriptor,
        doc: String,
        invoker: Arc<dyn ErasedMethod>,
    ) -> Self {
        Self {
            qualified_name: format!("{service_name}.{name}"),
            name,
            service,
            params,
            returns,
            doc,
            invoker,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The method key, `service.method`.
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn returns(&self) -> &TypeDescriptor {
        &self.returns
    }

    pub fn documentation(&self) -> &str {
        &self.doc
    }

    /// The service this method belongs to, unless it has since been dropped.
    pub fn service(&self) -> Option<Arc<ServiceEntry>> {
        self.service.upgrade()
    }

    /// Bind the `params` member of a request: arrays bind positionally, objects by name.
    pub fn bind(&self, params: JsonValue) -> Result<BoundArguments, ArgumentError> {
        match params {
            JsonValue::Array(args) => self.bind_positional(args),
            JsonValue::Object(args) => self.bind_named(args),
            other => Err(ArgumentError::Shape {
                found: wire_kind_name(&other),
            }),
        }
    }

    /// Bind arguments by position.  There must be exactly one argument per parameter.
    pub fn bind_positional(&self, args: Vec<JsonValue>) -> Result<BoundArguments, ArgumentError> {
        if args.len() != self.params.len() {
            return Err(ArgumentError::Arity {
                expected: self.params.len(),
                actual: args.len(),
            });
        }

        let args = self
            .params
            .iter()
            .zip_eq(args)
            .map(|(param, wire)| Ok((param.name.clone(), decode_param(param, wire)?)))
            .collect::<Result<Vec<_>, ArgumentError>>()?;
        Ok(BoundArguments { args })
    }

    /// Bind arguments by name.
    ///
    /// Every required parameter must be present.  Optional parameters that are absent are bound
    /// to null.  Names that don't match any parameter are rejected.
    pub fn bind_named(&self, mut args: Map<String, JsonValue>) -> Result<BoundArguments, ArgumentError> {
        let mut bound = Vec::with_capacity(self.params.len());
        for param in &self.params {
            let value = match args.remove(&param.name) {
                Some(wire) => decode_param(param, wire)?,
                None if param.optional => Value::Null,
                None => {
                    return Err(ArgumentError::Missing {
                        param: param.name.clone(),
                    });
                }
            };
            bound.push((param.name.clone(), value));
        }

        if let Some(unexpected) = args.keys().sorted().next() {
            return Err(ArgumentError::Unexpected {
                param: unexpected.clone(),
            });
        }

        Ok(BoundArguments { args: bound })
    }

    /// Call the method with bound arguments and encode what it returns.
    ///
    /// The service instance is the one registered at the moment of the call; swapping the instance
    /// concurrently affects later calls only.  A panic in the method is caught and reported as an
    /// execution failure.
    pub fn invoke(&self, args: BoundArguments) -> Result<JsonValue, DispatchError> {
        let service = self
            .service
            .upgrade()
            .ok_or_else(|| self.execution_error(ExecutionError::ServiceGone(self.qualified_name.clone())))?;
        let instance = service.snapshot();

        debug!(method = %self.qualified_name, args = args.len(), "Invoking method");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.invoker.call(&*instance, args)));

        let value = match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(CallError::Method(e))) => return Err(self.execution_error(ExecutionError::Failed(e))),
            Ok(Err(CallError::Instance { expected })) => {
                return Err(self.execution_error(ExecutionError::IncompatibleInstance { expected }));
            }
            Ok(Err(CallError::Argument { index, source })) => {
                let param = self
                    .params
                    .get(index)
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| index.to_string());
                return Err(self.argument_error(ArgumentError::Decode { param, source }));
            }
            Ok(Err(CallError::Arity { expected, actual })) => {
                return Err(self.argument_error(ArgumentError::Arity { expected, actual }));
            }
            Err(payload) => {
                return Err(self.execution_error(ExecutionError::Panicked(panic_message(payload))));
            }
        };

        encode(&value).map_err(|e| self.execution_error(ExecutionError::Encode(e)))
    }

    /// Bind and invoke in one step.
    pub fn call(&self, params: JsonValue) -> Result<JsonValue, DispatchError> {
        let args = self.bind(params).map_err(|e| self.argument_error(e))?;
        self.invoke(args)
    }

    pub(crate) fn argument_error(&self, source: ArgumentError) -> DispatchError {
        DispatchError::InvalidParams {
            method: self.qualified_name.clone(),
            source,
        }
    }

    fn execution_error(&self, source: ExecutionError) -> DispatchError {
        DispatchError::Execution {
            method: self.qualified_name.clone(),
            source,
        }
    }
}

impl std::fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodEntry")
            .field("qualified_name", &self.qualified_name)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

fn decode_param(param: &Param, wire: JsonValue) -> Result<Value, ArgumentError> {
    if param.optional && wire.is_null() {
        return Ok(Value::Null);
    }
    decode(wire, &param.ty).map_err(|source| ArgumentError::Decode {
        param: param.name.clone(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MethodResult, Methods, Registry, Service};
    use assert_matches::assert_matches;
    use serde_json::json;

    struct Calc;

    impl Calc {
        fn scale(&self, value: f64, factor: Option<f64>) -> MethodResult<f64> {
            Ok(value * factor.unwrap_or(2.0))
        }

        fn explode(&self) -> MethodResult<()> {
            panic!("kaboom");
        }
    }

    impl Service for Calc {
        fn methods(methods: &mut Methods<Self>) {
            methods.method("scale", &["value", "factor"], Self::scale);
            methods.method("explode", &[], Self::explode);
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register("calc", Calc).unwrap();
        registry
    }

    #[test]
    fn positional_binding_requires_exact_arity() {
        let registry = registry();
        let scale = registry.method("calc.scale").unwrap();

        let bound = scale.bind(json!([3, 4])).unwrap();
        assert_eq!(bound.get("value"), Some(&Value::Float(3.0)));
        assert_eq!(bound.get("factor"), Some(&Value::Float(4.0)));

        assert_matches!(
            scale.bind(json!([3])),
            Err(ArgumentError::Arity { expected: 2, actual: 1 })
        );
        assert_matches!(
            scale.bind(json!([3, 4, 5])),
            Err(ArgumentError::Arity { expected: 2, actual: 3 })
        );
    }

    #[test]
    fn optional_parameters_accept_null_or_absence() {
        let registry = registry();
        let scale = registry.method("calc.scale").unwrap();

        assert_eq!(scale.call(json!([3, null])).unwrap(), json!(6.0));
        assert_eq!(scale.call(json!({"value": 3})).unwrap(), json!(6.0));
        assert_eq!(scale.call(json!({"value": 3, "factor": 3})).unwrap(), json!(9.0));
    }

    #[test]
    fn named_binding_rejects_missing_and_unknown_names() {
        let registry = registry();
        let scale = registry.method("calc.scale").unwrap();

        assert_matches!(
            scale.bind(json!({"factor": 3})),
            Err(ArgumentError::Missing { param }) if param == "value"
        );
        assert_matches!(
            scale.bind(json!({"value": 1, "zoom": 3})),
            Err(ArgumentError::Unexpected { param }) if param == "zoom"
        );
    }

    #[test]
    fn decode_failures_name_the_parameter() {
        let registry = registry();
        let scale = registry.method("calc.scale").unwrap();

        assert_matches!(
            scale.bind(json!(["3", 1])),
            Err(ArgumentError::Decode { param, .. }) if param == "value"
        );
        assert_matches!(scale.bind(json!("3")), Err(ArgumentError::Shape { found: "string" }));
    }

    #[test]
    fn panics_become_execution_errors() {
        let registry = registry();
        let explode = registry.method("calc.explode").unwrap();

        let err = explode.call(json!([])).unwrap_err();
        assert_matches!(
            &err,
            DispatchError::Execution { source: ExecutionError::Panicked(message), .. } if message == "kaboom"
        );
        assert_eq!(err.code().code(), -32000);
    }

    #[test]
    fn entry_metadata() {
        let registry = registry();
        let scale = registry.method("calc.scale").unwrap();
        assert_eq!(scale.name(), "scale");
        assert_eq!(scale.qualified_name(), "calc.scale");
        assert_eq!(scale.returns(), &TypeDescriptor::float());
        assert_eq!(
            scale.params(),
            [
                Param::new("value", TypeDescriptor::float()),
                Param::optional("factor", TypeDescriptor::float()),
            ]
        );
        assert_eq!(scale.service().unwrap().name(), "calc");
    }

    #[test]
    fn bound_arguments_take() {
        let mut bound = BoundArguments::from_values(vec![Value::Integer(7)]);
        assert_eq!(bound.len(), 1);
        let seven: i64 = bound.take("0").unwrap();
        assert_eq!(seven, 7);
        assert!(bound.is_empty());
        assert_eq!(bound.take::<Option<i64>>("0").unwrap(), None);
    }
}
