//! Rust struct definitions that ser/de to/from JSON-RPC 2.0 envelopes.
//!
//! Requests are validated by hand in the registry rather than deserialized straight into
//! [`Request`], because each way a request can be malformed needs its own error response and
//! serde's error messages don't distinguish them well enough.  [`Request`] is still useful for
//! building requests, in tests and in clients.
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::DispatchError;
/// Re-export the protocol types that are exactly what we would declare ourselves.
pub use jsonrpsee_types::{error::ErrorCode, params::TwoPointZero};
pub use serde_json::Value as JsonValue;

/// Request Id.
///
/// JSON RPC allows any scalar here and the id is echoed back verbatim, so numbers are kept as
/// [`serde_json::Number`] rather than forced into an integer type.
///
/// Deserialization goes through [`JsonValue`] and [`Id::from_json`].  With serde_json's
/// `arbitrary_precision` enabled, numbers can't be buffered by an `untagged` enum.
#[derive(Debug, PartialEq, Eq, Clone, Serialize)]
#[serde(untagged)]
pub enum Id {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Str(String),
}

impl Id {
    /// Read an id from the `id` member of a request, if it's a shape that can be an id.
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Null => Some(Id::Null),
            JsonValue::Bool(b) => Some(Id::Bool(*b)),
            JsonValue::Number(n) => Some(Id::Number(n.clone())),
            JsonValue::String(s) => Some(Id::Str(s.clone())),
            JsonValue::Array(_) | JsonValue::Object(_) => None,
        }
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = JsonValue::deserialize(deserializer)?;
        Id::from_json(&value).ok_or_else(|| D::Error::custom(format!("invalid request id {value}")))
    }
}

impl From<u64> for Id {
    fn from(value: u64) -> Self {
        Id::Number(value.into())
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Id::Str(value.to_string())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Null => f.write_str("null"),
            Id::Bool(b) => write!(f, "{b}"),
            Id::Number(n) => write!(f, "{n}"),
            Id::Str(s) => write!(f, "\"{s}\""),
        }
    }
}

/// Serializable [JSON-RPC request object](https://www.jsonrpc.org/specification#request-object).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    /// JSON-RPC version.
    pub jsonrpc: TwoPointZero,
    /// Name of the method to be invoked, as `service.method`.
    pub method: String,
    /// Positional (array) or named (object) arguments.
    pub params: JsonValue,
    /// Request ID
    pub id: Id,
}

impl Request {
    pub fn new(id: impl Into<Id>, method: impl Into<String>, params: JsonValue) -> Self {
        Self {
            jsonrpc: TwoPointZero,
            method: method.into(),
            params,
            id: id.into(),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::json!({
            "jsonrpc": "2.0",
            "method": self.method,
            "params": self.params,
            "id": self.id,
        })
    }
}

/// JSON-RPC response object as defined in the [spec](https://www.jsonrpc.org/specification#response_object).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// JSON-RPC version.
    pub jsonrpc: TwoPointZero,
    /// Payload which can be result or error.
    #[serde(flatten)]
    pub payload: ResponsePayload,
    /// Request ID, when it could be read from the request.
    ///
    /// `None` only when the request was so broken that no id could be recovered from it; a
    /// request whose id was `null` gets `Some(Id::Null)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
}

/// Serialized in place of a response that somehow fails to serialize.  serde_json can only fail
/// here on a non-string map key, which none of the types in a response can produce.
const UNSERIALIZABLE_RESPONSE: &[u8] =
    br#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"Internal error"}}"#;

impl Response {
    /// Create a successful response
    pub fn success(id: Id, result: JsonValue) -> Self {
        Self {
            jsonrpc: TwoPointZero,
            payload: ResponsePayload::success(result),
            id: Some(id),
        }
    }

    /// Create an error response
    pub fn error(id: Option<Id>, details: impl Into<ErrorDetails>) -> Self {
        Self {
            jsonrpc: TwoPointZero,
            payload: ResponsePayload::error(details),
            id,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, ResponsePayload::Error(_))
    }

    pub fn result(&self) -> Option<&JsonValue> {
        match &self.payload {
            ResponsePayload::Success(success) => Some(&success.result),
            ResponsePayload::Error(_) => None,
        }
    }

    pub fn error_details(&self) -> Option<&ErrorDetails> {
        match &self.payload {
            ResponsePayload::Error(error) => Some(&error.error),
            ResponsePayload::Success(_) => None,
        }
    }

    /// Serialize to JSON text.
    ///
    /// This is infallible in practice; should serialization ever fail, a generic internal error
    /// envelope is produced instead so that the caller always has something to send.
    pub fn to_vec(&self) -> Vec<u8> {
        match serde_json::to_vec(self) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(err = %e, "Failed to serialize response");
                UNSERIALIZABLE_RESPONSE.to_vec()
            }
        }
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or_else(|e| {
            tracing::error!(err = %e, "Failed to serialize response");
            JsonValue::Null
        })
    }
}

/// Possible payloads of a JSON RPC response
///
/// This is an `untagged` enum so that serde will try to deserialize into each variant in order
/// until one succeeds.  This works because successs responses should have `result` and error
/// responses should have `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    /// Corresponds to failed JSON-RPC response with a error object with the field `error`.
    Error(ErrorResponse),
    /// Corresponds to successful JSON-RPC response with the field `result`.
    Success(SuccessResponse),
}

impl ResponsePayload {
    pub fn success(result: JsonValue) -> Self {
        ResponsePayload::Success(SuccessResponse { result })
    }

    pub fn error(details: impl Into<ErrorDetails>) -> Self {
        ResponsePayload::Error(details.into().into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub result: JsonValue,
}

/// [Failed JSON-RPC response object](https://www.jsonrpc.org/specification#error_object).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

impl From<ErrorDetails> for ErrorResponse {
    fn from(error: ErrorDetails) -> Self {
        Self { error }
    }
}

/// [JSON-RPC failed response error details](https://www.jsonrpc.org/specification#error_object).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    #[serde(deserialize_with = "deserialize_error_code")]
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

/// `ErrorCode` reads itself as an `i32`, which fails on a buffered arbitrary-precision number
fn deserialize_error_code<'de, D>(deserializer: D) -> Result<ErrorCode, D::Error>
where
    D: Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    value
        .as_i64()
        .and_then(|code| i32::try_from(code).ok())
        .map(ErrorCode::from)
        .ok_or_else(|| D::Error::custom(format!("invalid error code {value}")))
}

impl ErrorDetails {
    pub fn new(code: ErrorCode, message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self {
            code,
            message: message.into(),
            data: data.into(),
        }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, message, None)
    }
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message, None)
    }
    pub fn method_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MethodNotFound, message, None)
    }
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message, None)
    }
}

impl From<&DispatchError> for ErrorDetails {
    fn from(error: &DispatchError) -> Self {
        Self::new(error.code(), error.to_string(), None)
    }
}

impl From<DispatchError> for ErrorDetails {
    fn from(error: DispatchError) -> Self {
        (&error).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn request_serialization_matches_known_good() {
        let known_good_json = r#"{"jsonrpc":"2.0","method":"mathService.add","params":[2,3],"id":1}"#;
        let known_good_value: JsonValue = serde_json::from_str(known_good_json).unwrap();

        let ours = Request::new(1u64, "mathService.add", json!([2, 3]));
        assert_eq!(serde_json::to_value(&ours).unwrap(), known_good_value);
        assert_eq!(ours.to_json(), known_good_value);

        let parsed: Request = serde_json::from_str(known_good_json).unwrap();
        assert_eq!(parsed.id, Id::from(1));
        assert_eq!(parsed.method, "mathService.add");
    }

    #[test]
    fn id_shapes() {
        assert_eq!(Id::from_json(&json!(null)), Some(Id::Null));
        assert_eq!(Id::from_json(&json!(true)), Some(Id::Bool(true)));
        assert_eq!(Id::from_json(&json!(-7)), Some(Id::Number((-7i64).into())));
        assert_eq!(Id::from_json(&json!(1.5)).unwrap().to_string(), "1.5");
        assert_eq!(Id::from_json(&json!("abc")), Some(Id::Str("abc".into())));
        assert_eq!(Id::from_json(&json!([1])), None);
        assert_eq!(Id::from_json(&json!({"a": 1})), None);
    }

    #[test]
    fn success_response_serialization() {
        let response = Response::success(Id::from(1), json!(5));
        assert!(!response.is_error());
        assert_eq!(response.to_json(), json!({"jsonrpc": "2.0", "result": 5, "id": 1}));
    }

    #[test]
    fn error_response_serialization() {
        let response = Response::error(Some(Id::from("x")), ErrorDetails::method_not_found("nope"));
        assert!(response.is_error());
        assert_eq!(
            response.to_json(),
            json!({"jsonrpc": "2.0", "error": {"code": -32601, "message": "nope"}, "id": "x"})
        );

        // Without a recoverable id, the member is omitted rather than `null`
        let response = Response::error(None, ErrorDetails::invalid_request("bad"));
        assert_eq!(
            response.to_json(),
            json!({"jsonrpc": "2.0", "error": {"code": -32600, "message": "bad"}})
        );

        // A `null` id is echoed as `null`
        let response = Response::error(Some(Id::Null), ErrorDetails::invalid_request("bad"));
        assert_eq!(response.to_json()["id"], JsonValue::Null);
        assert!(response.to_json().as_object().unwrap().contains_key("id"));
    }

    #[test]
    fn response_round_trips_through_text() {
        let response = Response::error(Some(Id::from(3)), ErrorDetails::invalid_params("missing b"));
        let text = response.to_vec();
        let parsed: Response = serde_json::from_slice(&text).unwrap();
        assert_matches!(parsed.payload, ResponsePayload::Error(ErrorResponse { error }) => {
            assert_eq!(error.code, ErrorCode::InvalidParams);
            assert_eq!(error.message, "missing b");
        });
        assert_eq!(parsed.id, Some(Id::from(3)));
    }
}
