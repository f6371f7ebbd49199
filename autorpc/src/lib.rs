//! Expose plain Rust services over JSON-RPC 2.0.
//!
//! This crate re-exports the dispatch core from `autorpc-jsonrpc` and, with the default `server`
//! feature, the async line server as [`server`].
//!
//! ```
//! use std::sync::Arc;
//! use autorpc::{MethodResult, Methods, Registry, Service};
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
//!         methods.method("add", &["a", "b"], Self::add);
//!     }
//! }
//!
//! let mut registry = Registry::new();
//! registry.register_service(MathService).unwrap();
//! let registry = Arc::new(registry);
//!
//! let response = registry.execute_text(r#"{"jsonrpc":"2.0","id":1,"method":"mathService.add","params":[2,3]}"#);
//! assert_eq!(response.result().and_then(|result| result.as_i64()), Some(5));
//! ```

pub use autorpc_jsonrpc::*;

#[cfg(feature = "server")]
pub use autorpc_server as server;
