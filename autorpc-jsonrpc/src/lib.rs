//! Expose ordinary Rust services over JSON-RPC 2.0.
//!
//! A service is any type implementing [`Service`], which lists the methods it exposes along with
//! their parameter names.  Parameter and return types come from the Rust signatures via
//! [`Typed`], and the [`convert`](crate::decode) machinery uses them to turn wire JSON into typed
//! values and back.  Services are registered in a [`Registry`], which executes request envelopes;
//! a [`RequestHandler`] adds the framing for single JSON bodies and NDJSON batches.
//!
//! Everything here is synchronous.  The `autorpc-server` crate serves a registry over async
//! streams.

mod convert;
mod error;
mod handler;
mod method;
mod registry;
mod request_handler;
mod service;
#[cfg(test)]
pub mod testing;
mod types;

pub use convert::{
    AdaptedValue, Adapter, AdapterRef, AdapterRegistry, ConvertError, ConvertErrorKind, DECIMAL_TAG, DURATION_TAG,
    DecimalAdapter, DurationAdapter, FieldDescriptor, PathSegment, RecordDescriptor, RecordValue, ScalarKind,
    TIMESTAMP_TAG, TimestampAdapter, TypeDescriptor, Typed, Value, WireKind, decode, encode, wire_kind_name,
};
pub use error::{
    ArgumentError, DispatchError, ExecutionError, MethodError, RegistrationError, Result, SERVER_ERROR_CODE,
};
pub use handler::{CallError, Handler, MethodResult, Slot};
pub use method::{BoundArguments, MethodEntry, Param};
pub use registry::Registry;
pub use request_handler::{
    HandlerConfig, JSON_CONTENT_TYPE, NDJSON_CONTENT_TYPE, NdjsonResponses, RequestHandler, ResponseBody, Status,
};
pub use service::{MethodSpec, Methods, Service, ServiceEntry};
pub use types::{
    ErrorCode, ErrorDetails, ErrorResponse, Id, JsonValue, Request, Response, ResponsePayload, SuccessResponse,
    TwoPointZero,
};
