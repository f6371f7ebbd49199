//! The registry of services, and the request execution state machine built on top of it.
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::{Map, json};
use tracing::{Span, instrument};

use crate::convert::AdapterRegistry;
use crate::error::{DispatchError, RegistrationError};
use crate::method::MethodEntry;
use crate::service::{Service, ServiceEntry};
use crate::types::{Id, JsonValue, Response};

/// The table of registered services, indexed both by service name and by `service.method` key.
///
/// Build one at startup, wrap it in an [`Arc`], and hand it to whatever serves requests.  Once
/// shared it is read-only, apart from swapping service instances via
/// [`ServiceEntry::replace_instance`].
pub struct Registry {
    services: BTreeMap<String, Arc<ServiceEntry>>,
    methods: HashMap<String, Arc<MethodEntry>>,
    adapters: AdapterRegistry,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// An empty registry with the built-in `timestamp`, `duration` and `decimal` adapters.
    pub fn new() -> Self {
        Self {
            services: BTreeMap::new(),
            methods: HashMap::new(),
            adapters: AdapterRegistry::with_builtins(),
        }
    }

    /// Adapters available to services registered from now on.
    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    pub fn adapters_mut(&mut self) -> &mut AdapterRegistry {
        &mut self.adapters
    }

    /// Register `instance` under `name`.
    ///
    /// Fails if the name is taken, or if the declarations of `S` are inconsistent.
    pub fn register<S: Service>(&mut self, name: impl Into<String>, instance: S) -> Result<(), RegistrationError> {
        let name = name.into();
        if self.services.contains_key(&name) {
            return Err(RegistrationError::DuplicateService(name));
        }

        let entry = ServiceEntry::build(name.clone(), instance, &self.adapters)?;
        for method in entry.methods() {
            self.methods
                .insert(method.qualified_name().to_string(), method.clone());
        }
        tracing::debug!(
            service = %name,
            service_type = entry.type_name(),
            methods = self.methods.len(),
            "Registered service"
        );
        self.services.insert(name, entry);
        Ok(())
    }

    /// Register `instance` under [`Service::service_name`].
    pub fn register_service<S: Service>(&mut self, instance: S) -> Result<(), RegistrationError> {
        self.register(S::service_name(), instance)
    }

    /// Replace the instance of the service registered as `name`, or register it if there's no
    /// such service.
    ///
    /// Replacing keeps the existing method metadata, so it's only allowed when the new instance
    /// is the same Rust type as the old one.
    pub fn set<S: Service>(&mut self, name: impl Into<String>, instance: S) -> Result<(), RegistrationError> {
        let name = name.into();
        match self.services.get(&name) {
            Some(entry) => {
                entry.replace_instance(instance)?;
                tracing::debug!(service = %name, "Replaced service instance");
                Ok(())
            }
            None => self.register(name, instance),
        }
    }

    /// The instance of the service registered as `name`, if there is one and it's an `S`.
    pub fn get<S: Service>(&self, name: &str) -> Option<Arc<S>> {
        self.services.get(name)?.instance::<S>()
    }

    pub fn service(&self, name: &str) -> Option<&Arc<ServiceEntry>> {
        self.services.get(name)
    }

    /// Names of all registered services, sorted.
    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// Look up a method by its `service.method` key.
    pub fn method(&self, key: &str) -> Option<&Arc<MethodEntry>> {
        self.methods.get(key)
    }

    /// A JSON catalog of every service and method, with parameter and return types.
    pub fn describe(&self) -> JsonValue {
        let services = self
            .services
            .values()
            .map(|service| {
                let methods = service
                    .methods()
                    .map(|method| {
                        let params = method
                            .params()
                            .iter()
                            .map(|param| {
                                json!({
                                    "name": param.name,
                                    "type": param.ty.to_string(),
                                    "optional": param.optional,
                                })
                            })
                            .collect::<Vec<_>>();
                        json!({
                            "name": method.name(),
                            "qualifiedName": method.qualified_name(),
                            "params": params,
                            "returns": method.returns().to_string(),
                            "doc": method.documentation(),
                        })
                    })
                    .collect::<Vec<_>>();
                json!({
                    "name": service.name(),
                    "doc": service.documentation(),
                    "methods": methods,
                })
            })
            .collect::<Vec<_>>();

        json!({ "services": services })
    }

    /// Parse `text` as a JSON request and execute it.
    pub fn execute_text(&self, text: &str) -> Response {
        match serde_json::from_str::<JsonValue>(text) {
            Ok(request) => self.execute(request),
            Err(e) => {
                let error = DispatchError::Parse(e.to_string());
                tracing::warn!(err = %error, "Request is not valid JSON");
                Response::error(None, error)
            }
        }
    }

    /// Execute one request envelope and produce its response.
    ///
    /// Never fails: every problem, whether with the envelope or in the method, is reported as an
    /// error response.  The request id is echoed whenever it could be read, even if the rest of
    /// the envelope is invalid.
    #[instrument(skip_all, fields(method, id))]
    pub fn execute(&self, request: JsonValue) -> Response {
        let id = request.get("id").and_then(Id::from_json);
        if let Some(id) = &id {
            Span::current().record("id", tracing::field::display(id));
        }

        match self.dispatch(request) {
            Ok((id, result)) => {
                tracing::debug!("Request succeeded");
                Response::success(id, result)
            }
            Err(error) => {
                if error.is_execution_failure() {
                    tracing::error!(code = error.code().code(), err = %error, "Method execution failed");
                } else {
                    tracing::warn!(code = error.code().code(), err = %error, "Request rejected");
                }
                Response::error(id, error)
            }
        }
    }

    /// Validate, resolve, bind, invoke, encode.
    fn dispatch(&self, request: JsonValue) -> Result<(Id, JsonValue), DispatchError> {
        let (id, method, params) = validate(request)?;
        Span::current().record("method", method.as_str());

        let entry = self
            .methods
            .get(&method)
            .ok_or(DispatchError::MethodNotFound { method })?;
        let args = entry.bind(params).map_err(|e| entry.argument_error(e))?;
        let result = entry.invoke(args)?;

        Ok((id, result))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .field("adapters", &self.adapters)
            .finish()
    }
}

/// Check the envelope and take it apart.
fn validate(request: JsonValue) -> Result<(Id, String, JsonValue), DispatchError> {
    let JsonValue::Object(mut request) = request else {
        return Err(DispatchError::InvalidRequest("request must be a JSON object".into()));
    };

    match request.get("jsonrpc") {
        Some(JsonValue::String(version)) if version == "2.0" => {}
        Some(_) => return Err(DispatchError::InvalidRequest("'jsonrpc' must be \"2.0\"".into())),
        None => return Err(missing_member("jsonrpc")),
    }

    let method = match request.remove("method") {
        Some(JsonValue::String(method)) => method,
        Some(_) => return Err(DispatchError::InvalidRequest("'method' must be a string".into())),
        None => return Err(missing_member("method")),
    };

    let params = take_member(&mut request, "params")?;

    let id = take_member(&mut request, "id")?;
    let id = Id::from_json(&id)
        .ok_or_else(|| DispatchError::InvalidRequest("'id' must be a string, number, boolean or null".into()))?;

    Ok((id, method, params))
}

fn take_member(request: &mut Map<String, JsonValue>, name: &str) -> Result<JsonValue, DispatchError> {
    request.remove(name).ok_or_else(|| missing_member(name))
}

fn missing_member(name: &str) -> DispatchError {
    DispatchError::InvalidRequest(format!("missing '{name}' member"))
}
