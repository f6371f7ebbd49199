//! Transport-agnostic request handling: turn a request body and its content type into response
//! bytes and a status.
//!
//! Whatever carries the bytes (an HTTP server, a CGI shim, a test) supplies a [`Read`] positioned
//! at the body and relays the returned chunks and [`Status`] verbatim.  Two framings are
//! understood:
//!
//! - `application/json`: the body is one request, the output is one response.
//! - `application/x-ndjson`: the body is any number of requests, one per line.  Responses are
//!   produced lazily, one per non-blank line and in the same order, so an arbitrarily long batch
//!   can be streamed in constant memory.  A bad line gets an error response of its own and the
//!   rest of the batch carries on.
use std::io::{self, BufRead, BufReader, Read};
use std::sync::Arc;

use crate::error::DispatchError;
use crate::registry::Registry;
use crate::types::Response;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Limits applied by a [`RequestHandler`].
#[derive(Clone, Debug, Default)]
pub struct HandlerConfig {
    /// Largest request accepted, in bytes.  Applies to the whole body for a single request, and
    /// to each line of an NDJSON batch.  `None` means no limit.
    pub max_request_bytes: Option<usize>,
}

/// Status to relay along with the response body.
///
/// Single requests get `500` for any error response, including ones caused by the client; the
/// error object in the body is what distinguishes them.  NDJSON batches always get `200`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
pub enum Status {
    #[strum(serialize = "200 OK")]
    Ok,
    #[strum(serialize = "500 Internal Server Error")]
    InternalServerError,
    #[strum(serialize = "415 Unsupported Media Type")]
    UnsupportedMediaType,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::InternalServerError => 500,
            Status::UnsupportedMediaType => 415,
        }
    }

    /// The full status line, e.g. `"200 OK"`.
    pub fn status_line(self) -> &'static str {
        self.into()
    }
}

/// Handles request bodies against a shared [`Registry`].
#[derive(Clone, Debug)]
pub struct RequestHandler {
    registry: Arc<Registry>,
    config: HandlerConfig,
}

impl RequestHandler {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            config: HandlerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: HandlerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Handle one request body.
    ///
    /// The content type is matched on its media type only, ignoring case and parameters such as
    /// `charset`.
    pub fn handle<R: Read>(&self, input: R, content_type: &str) -> (ResponseBody<R>, Status) {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            JSON_CONTENT_TYPE => {
                let response = self.handle_single(input);
                let status = if response.is_error() {
                    Status::InternalServerError
                } else {
                    Status::Ok
                };
                (ResponseBody::Single(Some(response.to_vec())), status)
            }
            NDJSON_CONTENT_TYPE => {
                let responses = NdjsonResponses {
                    registry: self.registry.clone(),
                    reader: BufReader::new(input),
                    limit: self.config.max_request_bytes,
                    finished: false,
                };
                (ResponseBody::Ndjson(responses), Status::Ok)
            }
            _ => {
                tracing::warn!(content_type, "Unsupported content type");
                (ResponseBody::Empty, Status::UnsupportedMediaType)
            }
        }
    }

    fn handle_single<R: Read>(&self, input: R) -> Response {
        match read_body(input, self.config.max_request_bytes) {
            Ok(text) => self.registry.execute_text(&text),
            Err(error) => {
                tracing::warn!(err = %error, "Failed to read request body");
                Response::error(None, error)
            }
        }
    }
}

fn read_body<R: Read>(mut input: R, limit: Option<usize>) -> Result<String, DispatchError> {
    let mut body = Vec::new();
    let read = match limit {
        Some(limit) => {
            let result = input.by_ref().take(limit as u64 + 1).read_to_end(&mut body);
            if body.len() > limit {
                // Measure the rest without buffering it
                let rest = io::copy(&mut input, &mut io::sink()).unwrap_or_default();
                return Err(DispatchError::Oversized {
                    size: Some(body.len() + rest as usize),
                    limit,
                });
            }
            result
        }
        None => input.read_to_end(&mut body),
    };
    read.map_err(|e| DispatchError::Parse(format!("failed to read request body: {e}")))?;

    String::from_utf8(body).map_err(|e| DispatchError::Parse(format!("request body is not UTF-8: {e}")))
}

/// The output of [`RequestHandler::handle`]: a sequence of byte chunks to relay in order.
pub enum ResponseBody<R> {
    /// Nothing to send
    Empty,
    /// A single response; yields one chunk
    Single(Option<Vec<u8>>),
    /// One newline-terminated chunk per request line
    Ndjson(NdjsonResponses<R>),
}

impl<R: Read> ResponseBody<R> {
    /// Concatenate all the chunks.  Only sensible when the whole body is wanted in memory.
    pub fn into_bytes(self) -> Vec<u8> {
        self.flatten().collect()
    }
}

impl<R: Read> Iterator for ResponseBody<R> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            ResponseBody::Empty => None,
            ResponseBody::Single(chunk) => chunk.take(),
            ResponseBody::Ndjson(responses) => responses.next(),
        }
    }
}

impl<R> std::fmt::Debug for ResponseBody<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseBody::Empty => f.write_str("Empty"),
            ResponseBody::Single(chunk) => f.debug_tuple("Single").field(&chunk.as_ref().map(Vec::len)).finish(),
            ResponseBody::Ndjson(_) => f.write_str("Ndjson"),
        }
    }
}

/// Lazily executes an NDJSON batch, one line per call to `next`.
pub struct NdjsonResponses<R> {
    registry: Arc<Registry>,
    reader: BufReader<R>,
    limit: Option<usize>,
    finished: bool,
}

enum Line {
    Text(Vec<u8>),
    Oversized(usize),
}

impl<R: Read> NdjsonResponses<R> {
    /// Read the next line without its terminator, or `None` at the end of the input.
    fn read_line(&mut self) -> io::Result<Option<Line>> {
        let mut line = Vec::new();
        let read = match self.limit {
            // One extra byte so a line of exactly `limit` bytes can still bring its newline
            Some(limit) => (&mut self.reader)
                .take(limit as u64 + 1)
                .read_until(b'\n', &mut line)?,
            None => self.reader.read_until(b'\n', &mut line)?,
        };
        if read == 0 {
            return Ok(None);
        }

        if line.last() == Some(&b'\n') {
            line.pop();
        } else if let Some(limit) = self.limit {
            if line.len() > limit {
                let rest = skip_rest_of_line(&mut self.reader)?;
                return Ok(Some(Line::Oversized(line.len() + rest)));
            }
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(Some(Line::Text(line)))
    }

    fn respond(response: Response) -> Vec<u8> {
        let mut chunk = response.to_vec();
        chunk.push(b'\n');
        chunk
    }
}

impl<R: Read> Iterator for NdjsonResponses<R> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let line = match self.read_line() {
                Ok(Some(Line::Text(line))) => line,
                Ok(Some(Line::Oversized(size))) => {
                    let error = DispatchError::Oversized {
                        size: Some(size),
                        limit: self.limit.unwrap_or_default(),
                    };
                    tracing::warn!(err = %error, "Skipping oversized line");
                    return Some(Self::respond(Response::error(None, error)));
                }
                Ok(None) => {
                    self.finished = true;
                    return None;
                }
                Err(e) => {
                    // Nothing after a read failure can be trusted to be a line boundary
                    tracing::error!(err = %e, "Failed to read NDJSON request stream");
                    self.finished = true;
                    let error = DispatchError::Parse(format!("failed to read request stream: {e}"));
                    return Some(Self::respond(Response::error(None, error)));
                }
            };

            let text = match String::from_utf8(line) {
                Ok(text) => text,
                Err(e) => {
                    let error = DispatchError::Parse(format!("line is not UTF-8: {e}"));
                    tracing::warn!(err = %error, "Skipping undecodable line");
                    return Some(Self::respond(Response::error(None, error)));
                }
            };
            if text.trim().is_empty() {
                continue;
            }

            return Some(Self::respond(self.registry.execute_text(&text)));
        }

        None
    }
}

/// Consume input up to and including the next newline, returning how many bytes were skipped
/// before it.
fn skip_rest_of_line<R: BufRead>(reader: &mut R) -> io::Result<usize> {
    let mut skipped = 0;
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok(skipped);
        }
        match buf.iter().position(|&b| b == b'\n') {
            Some(newline) => {
                skipped += newline;
                reader.consume(newline + 1);
                return Ok(skipped);
            }
            None => {
                let len = buf.len();
                skipped += len;
                reader.consume(len);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::init_test_logging;
    use crate::{MethodResult, Methods, Service};
    use serde_json::{Value as JsonValue, json};

    struct Adder;

    impl Adder {
        fn add(&self, a: i64, b: i64) -> MethodResult<i64> {
            Ok(a + b)
        }
    }

    impl Service for Adder {
        fn methods(methods: &mut Methods<Self>) {
            methods.method("add", &["a", "b"], Self::add);
        }
    }

    fn handler(config: HandlerConfig) -> RequestHandler {
        init_test_logging();
        let mut registry = Registry::new();
        registry.register("adder", Adder).unwrap();
        RequestHandler::new(Arc::new(registry)).with_config(config)
    }

    fn add_request(id: u64, a: i64, b: i64) -> String {
        json!({"jsonrpc": "2.0", "id": id, "method": "adder.add", "params": [a, b]}).to_string()
    }

    fn chunks_as_json(body: ResponseBody<&[u8]>) -> Vec<JsonValue> {
        body.map(|chunk| {
            assert_eq!(chunk.last(), Some(&b'\n'));
            serde_json::from_slice(&chunk).unwrap()
        })
        .collect()
    }

    #[test]
    fn single_request() {
        let handler = handler(HandlerConfig::default());
        let request = add_request(1, 2, 3);
        let (body, status) = handler.handle(request.as_bytes(), "application/json");
        assert_eq!(status, Status::Ok);

        let chunks: Vec<_> = body.collect();
        assert_eq!(chunks.len(), 1);
        assert_ne!(chunks[0].last(), Some(&b'\n'));
        let response: JsonValue = serde_json::from_slice(&chunks[0]).unwrap();
        assert_eq!(response, json!({"jsonrpc": "2.0", "id": 1, "result": 5}));
    }

    #[test]
    fn single_request_error_is_500() {
        let handler = handler(HandlerConfig::default());
        let (body, status) = handler.handle(&b"{oops"[..], "Application/JSON; charset=utf-8");
        assert_eq!(status, Status::InternalServerError);
        assert_eq!(status.status_line(), "500 Internal Server Error");
        let response: JsonValue = serde_json::from_slice(&body.into_bytes()).unwrap();
        assert_eq!(response["error"]["code"], -32700);
    }

    #[test]
    fn unsupported_content_type() {
        let handler = handler(HandlerConfig::default());
        let (mut body, status) = handler.handle(&b"{}"[..], "text/plain");
        assert_eq!(status, Status::UnsupportedMediaType);
        assert_eq!(status.code(), 415);
        assert!(body.next().is_none());
    }

    #[test]
    fn ndjson_batch_isolates_failures() {
        let handler = handler(HandlerConfig::default());
        let input = format!("{}\n\n{{not json\r\n   \n{}", add_request(1, 1, 1), add_request(3, 2, 2));
        let (body, status) = handler.handle(input.as_bytes(), NDJSON_CONTENT_TYPE);
        assert_eq!(status, Status::Ok);

        let responses = chunks_as_json(body);
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["result"], 2);
        assert_eq!(responses[1]["error"]["code"], -32700);
        assert_eq!(responses[2]["result"], 4);
        assert_eq!(responses[2]["id"], 3);
    }

    #[test]
    fn ndjson_non_utf8_line() {
        let handler = handler(HandlerConfig::default());
        let mut input = b"\xff\xfe\n".to_vec();
        input.extend_from_slice(add_request(2, 5, 5).as_bytes());
        let (body, _) = handler.handle(input.as_slice(), NDJSON_CONTENT_TYPE);

        let responses = chunks_as_json(body);
        assert_eq!(responses[0]["error"]["code"], -32700);
        assert_eq!(responses[1]["result"], 10);
    }

    #[test]
    fn size_limits() {
        let request = add_request(1, 2, 3);
        let handler = handler(HandlerConfig {
            max_request_bytes: Some(request.len()),
        });

        let (_, status) = handler.handle(request.as_bytes(), JSON_CONTENT_TYPE);
        assert_eq!(status, Status::Ok);

        let padded = format!("{request}          ");
        let (body, status) = handler.handle(padded.as_bytes(), JSON_CONTENT_TYPE);
        assert_eq!(status, Status::InternalServerError);
        let response: JsonValue = serde_json::from_slice(&body.into_bytes()).unwrap();
        assert_eq!(response["error"]["code"], -32007);

        let batch = format!("{request}\n{padded}\n{request}\n");
        let (body, _) = handler.handle(batch.as_bytes(), NDJSON_CONTENT_TYPE);
        let responses = chunks_as_json(body);
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["result"], 5);
        assert_eq!(responses[1]["error"]["code"], -32007);
        assert_eq!(responses[2]["result"], 5);
    }

    /// Yields some bytes, then fails
    struct Flaky {
        data: &'static [u8],
    }

    impl Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.data.is_empty() {
                return Err(io::Error::other("connection reset"));
            }
            let n = buf.len().min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn ndjson_read_error_ends_the_stream() {
        let handler = handler(HandlerConfig::default());
        let input = Flaky {
            data: b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"adder.add\",\"params\":[1,2]}\n",
        };
        let (body, _) = handler.handle(input, NDJSON_CONTENT_TYPE);
        let responses: Vec<JsonValue> = body.map(|chunk| serde_json::from_slice(&chunk).unwrap()).collect();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["result"], 3);
        assert_eq!(responses[1]["error"]["code"], -32700);
    }
}
