//! Services: the types whose methods are exposed over JSON RPC.
//!
//! A service lists its methods once, in [`Service::methods`], which is called when the service is
//! registered.  Nothing is discovered at runtime; a method that isn't listed there can't be called.
//!
//! ```
//! use autorpc_jsonrpc::{MethodResult, Methods, Registry, Service};
//!
//! struct MathService;
//!
//! impl MathService {
//!     fn add(&self, a: i64, b: i64) -> MethodResult<i64> {
//!         Ok(a + b)
//!     }
//! }
//!
//! impl Service for MathService {
//!     fn methods(methods: &mut Methods<Self>) {
//!         methods.method("add", &["a", "b"], Self::add).doc("Add two integers");
//!     }
//! }
//!
//! let mut registry = Registry::new();
//! registry.register_service(MathService).unwrap();
//! assert!(registry.method("mathService.add").is_some());
//! ```
use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock};

use crate::convert::{AdapterRegistry, TypeDescriptor, Value};
use crate::error::{MethodError, RegistrationError};
use crate::handler::{ErasedMethod, Handler, RawMethod, TypedMethod};
use crate::method::{BoundArguments, MethodEntry, Param};

/// A type whose methods can be called over JSON RPC.
///
/// Implementations must be safe to call from several threads at once; the dispatcher never
/// serializes calls to a service.
pub trait Service: Send + Sync + Sized + 'static {
    /// Declare the methods this service exposes.
    fn methods(methods: &mut Methods<Self>);

    /// The name the service is registered under by [`crate::Registry::register_service`].
    ///
    /// Defaults to the name of the type with its first letter lowercased, so `MathService` is
    /// `mathService`.
    fn service_name() -> String {
        default_service_name(std::any::type_name::<Self>())
    }

    fn documentation() -> String {
        String::new()
    }
}

/// `my_crate::module::MathService<T>` becomes `mathService`.
pub(crate) fn default_service_name(type_name: &str) -> String {
    let without_generics = type_name.split('<').next().unwrap_or(type_name);
    let base = without_generics.rsplit("::").next().unwrap_or(without_generics);
    let mut chars = base.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Collects the method declarations of a service.
pub struct Methods<S> {
    specs: Vec<MethodSpec>,
    _service: PhantomData<fn(&S)>,
}

/// One declared method, before it's attached to a registered service.
pub struct MethodSpec {
    name: String,
    params: Vec<Param>,
    returns: TypeDescriptor,
    doc: String,
    invoker: Arc<dyn ErasedMethod>,
    /// A problem found while declaring, reported when the service is registered
    problem: Option<RegistrationError>,
}

impl MethodSpec {
    /// Attach documentation to the method.
    pub fn doc(&mut self, doc: impl Into<String>) -> &mut Self {
        self.doc = doc.into();
        self
    }
}

impl<S: Service> Methods<S> {
    fn new() -> Self {
        Self {
            specs: Vec::new(),
            _service: PhantomData,
        }
    }

    /// Declare a method implemented by a Rust function taking `&S` and the arguments.
    ///
    /// The parameter types and return type come from the function's signature; `param_names`
    /// supplies the names, in the same order as the arguments.
    pub fn method<H, Args>(&mut self, name: &str, param_names: &[&str], handler: H) -> &mut MethodSpec
    where
        H: Handler<S, Args>,
        Args: 'static,
    {
        let slots = H::slots();
        let problem = (slots.len() != param_names.len()).then(|| RegistrationError::ParamNames {
            method: name.to_string(),
            expected: slots.len(),
            actual: param_names.len(),
        });
        let params = param_names
            .iter()
            .zip(slots)
            .map(|(name, slot)| Param {
                name: name.to_string(),
                ty: slot.ty,
                optional: slot.optional,
            })
            .collect();

        self.push(MethodSpec {
            name: name.to_string(),
            params,
            returns: H::returns(),
            doc: String::new(),
            invoker: Arc::new(TypedMethod::<S, H, Args>::new(handler)),
            problem,
        })
    }

    /// Declare a method with explicit parameter and return descriptors.
    ///
    /// The function receives the arguments already decoded against `params`, and returns a value
    /// that's encoded as-is.
    pub fn raw<F>(&mut self, name: &str, params: Vec<Param>, returns: TypeDescriptor, func: F) -> &mut MethodSpec
    where
        F: Fn(&S, BoundArguments) -> Result<Value, MethodError> + Send + Sync + 'static,
    {
        self.push(MethodSpec {
            name: name.to_string(),
            params,
            returns,
            doc: String::new(),
            invoker: Arc::new(RawMethod::<S, F>::new(func)),
            problem: None,
        })
    }

    fn push(&mut self, spec: MethodSpec) -> &mut MethodSpec {
        self.specs.push(spec);
        let last = self.specs.len() - 1;
        &mut self.specs[last]
    }
}

/// Names are used to build `service.method` keys, so they can't be empty or contain a dot.
pub(crate) fn validate_name(name: &str) -> Result<(), RegistrationError> {
    if name.is_empty() || name.contains('.') || name.chars().any(char::is_whitespace) {
        return Err(RegistrationError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// A registered service: its instance and its methods.
pub struct ServiceEntry {
    name: String,
    doc: String,
    type_id: TypeId,
    type_name: &'static str,
    instance: RwLock<Arc<dyn Any + Send + Sync>>,
    methods: BTreeMap<String, Arc<MethodEntry>>,
}

impl ServiceEntry {
    /// Collect and check the declarations of `S`, resolve their adapter tags, and build the entry.
    pub(crate) fn build<S: Service>(
        name: String,
        instance: S,
        adapters: &AdapterRegistry,
    ) -> Result<Arc<Self>, RegistrationError> {
        validate_name(&name)?;

        let mut methods = Methods::<S>::new();
        S::methods(&mut methods);

        let mut specs: BTreeMap<String, MethodSpec> = BTreeMap::new();
        for mut spec in methods.specs {
            if let Some(problem) = spec.problem.take() {
                return Err(problem);
            }
            validate_name(&spec.name)?;
            if specs.contains_key(&spec.name) {
                return Err(RegistrationError::DuplicateMethod {
                    service: name.clone(),
                    method: spec.name,
                });
            }

            let unknown_adapter = |tag: String| RegistrationError::UnknownAdapter {
                method: spec.name.clone(),
                tag,
            };
            for param in &mut spec.params {
                param.ty = param.ty.resolve(adapters).map_err(unknown_adapter)?;
            }
            spec.returns = spec.returns.resolve(adapters).map_err(unknown_adapter)?;

            specs.insert(spec.name.clone(), spec);
        }

        Ok(Arc::new_cyclic(|weak| {
            let methods = specs
                .into_iter()
                .map(|(method_name, spec)| {
                    let entry = MethodEntry::new(
                        &name,
                        weak.clone(),
                        method_name.clone(),
                        spec.params,
                        spec.returns,
                        spec.doc,
                        spec.invoker,
                    );
                    (method_name, Arc::new(entry))
                })
                .collect();

            ServiceEntry {
                name,
                doc: S::documentation(),
                type_id: TypeId::of::<S>(),
                type_name: std::any::type_name::<S>(),
                instance: RwLock::new(Arc::new(instance)),
                methods,
            }
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn documentation(&self) -> &str {
        &self.doc
    }

    /// Rust type name of the service implementation.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn method(&self, name: &str) -> Option<&Arc<MethodEntry>> {
        self.methods.get(name)
    }

    /// Methods in name order.
    pub fn methods(&self) -> impl Iterator<Item = &Arc<MethodEntry>> {
        self.methods.values()
    }

    /// The current service instance, if it's an `S`.
    pub fn instance<S: Service>(&self) -> Option<Arc<S>> {
        self.snapshot().downcast::<S>().ok()
    }

    /// Swap in a new instance of the same type.  Method metadata is unchanged, which is only
    /// correct because the type, and therefore its declarations, is the same.
    ///
    /// Calls already in progress finish on the old instance.
    pub fn replace_instance<S: Service>(&self, instance: S) -> Result<(), RegistrationError> {
        if TypeId::of::<S>() != self.type_id {
            return Err(RegistrationError::IncompatibleInstance {
                name: self.name.clone(),
                expected: std::any::type_name::<S>(),
            });
        }

        // A poisoned lock only means another swap panicked; the Arc inside is still whole
        *self.instance.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(instance);
        Ok(())
    }

    pub(crate) fn snapshot(&self) -> Arc<dyn Any + Send + Sync> {
        self.instance.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl std::fmt::Debug for ServiceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceEntry")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
