//! Serve a [`Registry`] over a newline-delimited stream.
//!
//! Each line read is one JSON RPC request; each response is written as one line, in the same order
//! as the requests.  The stream can be anything that implements tokio's `AsyncRead` and
//! `AsyncWrite`: a TCP socket, a Unix socket, stdio, or an in-memory pipe in tests.
use std::sync::Arc;

use autorpc_jsonrpc::{DispatchError, Registry, Response};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::instrument;

/// Lines longer than this are rejected unless configured otherwise.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Longest request line accepted, in bytes.  A longer line gets an error response and is
    /// skipped; the connection carries on with the next line.
    pub max_line_length: usize,

    /// Run each dispatch on tokio's blocking thread pool.
    ///
    /// Service methods are synchronous and may take arbitrarily long, so by default they're kept
    /// off the async worker threads.  Turn this off for services that are known to be quick.
    pub dispatch_on_blocking_pool: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            dispatch_on_blocking_pool: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line codec error: {0}")]
    Codec(#[source] LinesCodecError),

    #[error("Dispatch task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<LinesCodecError> for ServerError {
    fn from(error: LinesCodecError) -> Self {
        match error {
            LinesCodecError::Io(e) => ServerError::Io(e),
            other => ServerError::Codec(other),
        }
    }
}

/// Counters for one served connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServeStats {
    /// Responses written, one per non-blank line
    pub requests: u64,
    /// How many of those were error responses
    pub errors: u64,
}

/// Serves one shared registry over any number of connections.
///
/// Cheap to clone; clones share the registry.
#[derive(Clone, Debug)]
pub struct LineServer {
    registry: Arc<Registry>,
    config: ServerConfig,
}

impl LineServer {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            config: ServerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Serve a single bidirectional stream until the peer closes it.
    pub async fn serve<Io>(&self, io: Io) -> Result<ServeStats, ServerError>
    where
        Io: AsyncRead + AsyncWrite + Send,
    {
        let (reader, writer) = tokio::io::split(io);
        self.serve_split(reader, writer).await
    }

    /// Serve requests from this process's stdin, writing responses to stdout.
    pub async fn serve_stdio(&self) -> Result<ServeStats, ServerError> {
        self.serve_split(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve requests read from `reader`, writing responses to `writer`, until `reader` reaches
    /// the end of its input.
    ///
    /// Requests are handled one at a time, so responses come out in request order.  Only I/O
    /// failures end the connection early; every problem with a request is reported in its
    /// response.
    #[instrument(skip_all, fields(max_line_length = self.config.max_line_length))]
    pub async fn serve_split<R, W>(&self, reader: R, writer: W) -> Result<ServeStats, ServerError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let limit = self.config.max_line_length;
        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(limit));
        let mut responses = FramedWrite::new(writer, LinesCodec::new());
        let mut stats = ServeStats::default();

        tracing::debug!("Connection opened");

        // After a decode error the framed reader yields one `None` before carrying on
        let mut resuming = false;
        loop {
            let line = match lines.next().await {
                Some(line) => line,
                None if resuming => {
                    resuming = false;
                    continue;
                }
                None => break,
            };

            let response = match line {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => self.dispatch(line).await?,
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    // The codec discards the rest of the line and resynchronizes at the next
                    // newline
                    resuming = true;
                    let error = DispatchError::Oversized { size: None, limit };
                    tracing::warn!(err = %error, "Skipping oversized line");
                    Response::error(None, error)
                }
                Err(LinesCodecError::Io(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                    // The codec has already consumed the offending line
                    resuming = true;
                    let error = DispatchError::Parse(format!("line is not UTF-8: {e}"));
                    tracing::warn!(err = %error, "Skipping undecodable line");
                    Response::error(None, error)
                }
                Err(LinesCodecError::Io(e)) => {
                    tracing::error!(err = %e, "Error reading from connection");
                    return Err(ServerError::Io(e));
                }
            };

            stats.requests += 1;
            if response.is_error() {
                stats.errors += 1;
            }

            let text = String::from_utf8_lossy(&response.to_vec()).into_owned();
            if let Err(e) = responses.send(text).await {
                tracing::error!(err = %e, "Error writing response");
                return Err(e.into());
            }
        }

        tracing::debug!(requests = stats.requests, errors = stats.errors, "Connection closed");
        Ok(stats)
    }

    async fn dispatch(&self, line: String) -> Result<Response, ServerError> {
        if self.config.dispatch_on_blocking_pool {
            let registry = self.registry.clone();
            Ok(tokio::task::spawn_blocking(move || registry.execute_text(&line)).await?)
        } else {
            Ok(self.registry.execute_text(&line))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::init_test_logging;
    use autorpc_jsonrpc::{MethodResult, Methods, Service};
    use serde_json::{Value as JsonValue, json};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct Adder;

    impl Adder {
        fn add(&self, a: i64, b: i64) -> MethodResult<i64> {
            Ok(a + b)
        }

        fn slow(&self, millis: u64) -> MethodResult<u64> {
            std::thread::sleep(std::time::Duration::from_millis(millis));
            Ok(millis)
        }
    }

    impl Service for Adder {
        fn methods(methods: &mut Methods<Self>) {
            methods.method("add", &["a", "b"], Self::add);
            methods.method("slow", &["millis"], Self::slow);
        }
    }

    fn server(config: ServerConfig) -> LineServer {
        init_test_logging();
        let mut registry = Registry::new();
        registry.register("adder", Adder).unwrap();
        LineServer::new(Arc::new(registry)).with_config(config)
    }

    fn add_request(id: u64, a: i64, b: i64) -> String {
        json!({"jsonrpc": "2.0", "id": id, "method": "adder.add", "params": [a, b]}).to_string()
    }

    /// Write `input` to a server over an in-memory pipe, close the client's write side, and
    /// collect everything the server writes back.
    async fn exchange(server: LineServer, input: Vec<u8>) -> (ServeStats, Vec<JsonValue>) {
        let (mut client, server_side) = tokio::io::duplex(64 * 1024);
        let serving = tokio::spawn(async move { server.serve(server_side).await });

        client.write_all(&input).await.unwrap();
        client.shutdown().await.unwrap();

        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        let stats = serving.await.unwrap().unwrap();

        assert!(output.is_empty() || output.ends_with('\n'));
        let responses = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        (stats, responses)
    }

    #[tokio::test]
    async fn responds_in_order_and_isolates_failures() {
        let server = server(ServerConfig::default());
        let input = format!(
            "{}\n\n{{\"jsonrpc\":\"2.0\",\"id\":2,\r\n{}\n",
            add_request(1, 1, 2),
            add_request(3, 3, 4)
        );

        let (stats, responses) = exchange(server, input.into_bytes()).await;
        assert_eq!(stats, ServeStats { requests: 3, errors: 1 });
        assert_eq!(responses[0], json!({"jsonrpc": "2.0", "id": 1, "result": 3}));
        assert_eq!(responses[1]["error"]["code"], -32700);
        assert_eq!(responses[2], json!({"jsonrpc": "2.0", "id": 3, "result": 7}));
    }

    #[tokio::test]
    async fn oversized_lines_are_skipped() {
        let server = server(ServerConfig {
            max_line_length: 128,
            ..Default::default()
        });
        let long = format!(
            r#"{{"jsonrpc":"2.0","id":1,"method":"adder.add","params":[1,2],"pad":"{}"}}"#,
            "x".repeat(500)
        );
        let input = format!("{long}\n{}\n", add_request(2, 20, 22));

        let (stats, responses) = exchange(server, input.into_bytes()).await;
        assert_eq!(stats, ServeStats { requests: 2, errors: 1 });
        assert_eq!(responses[0]["error"]["code"], -32007);
        assert_eq!(responses[1]["result"], 42);
    }

    #[tokio::test]
    async fn non_utf8_lines_are_parse_errors() {
        let server = server(ServerConfig::default());
        let mut input = b"\xc3\x28\n".to_vec();
        input.extend_from_slice(add_request(9, 4, 5).as_bytes());
        input.push(b'\n');

        let (stats, responses) = exchange(server, input).await;
        assert_eq!(stats, ServeStats { requests: 2, errors: 1 });
        assert_eq!(responses[0]["error"]["code"], -32700);
        assert_eq!(responses[1]["result"], 9);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn inline_dispatch() {
        let server = server(ServerConfig {
            dispatch_on_blocking_pool: false,
            ..Default::default()
        });
        let input = format!(
            "{}\n{}\n",
            add_request(1, 2, 2),
            json!({"jsonrpc": "2.0", "id": 2, "method": "adder.slow", "params": {"millis": 5}})
        );

        let (stats, responses) = exchange(server, input.into_bytes()).await;
        assert_eq!(stats, ServeStats { requests: 2, errors: 0 });
        assert_eq!(responses[0]["result"], 4);
        assert_eq!(responses[1]["result"], 5);
    }

    #[tokio::test]
    async fn connections_share_the_registry() {
        let server = server(ServerConfig::default());
        let connections: Vec<_> = (0..4u64)
            .map(|n| {
                let server = server.clone();
                tokio::spawn(async move {
                    let input = format!("{}\n", add_request(n, n as i64, 1));
                    exchange(server, input.into_bytes()).await
                })
            })
            .collect();

        for (n, connection) in connections.into_iter().enumerate() {
            let (stats, responses) = connection.await.unwrap();
            assert_eq!(stats.requests, 1);
            assert_eq!(responses[0]["result"], n as i64 + 1);
        }
    }
}
