//! Serve a couple of small services as newline-delimited JSON RPC.
//!
//! With no arguments, requests are read from stdin and responses written to stdout:
//!
//! ```text
//! $ echo '{"jsonrpc":"2.0","id":1,"method":"mathService.add","params":[2,3]}' | cargo run --example math_service
//! {"jsonrpc":"2.0","result":5,"id":1}
//! ```
//!
//! With an address argument (e.g. `127.0.0.1:4000`) it listens for TCP connections instead.
use std::sync::Arc;
use std::time::Duration;

use autorpc::server::{LineServer, ServerConfig};
use autorpc::{MethodError, MethodResult, Methods, Registry, Service, typed_record};
use chrono::NaiveDateTime;

struct MathService;

impl MathService {
    fn add(&self, a: i64, b: i64) -> MethodResult<i64> {
        Ok(a + b)
    }

    fn divide(&self, a: f64, b: f64) -> MethodResult<f64> {
        if b == 0.0 {
            return Err(MethodError::new("division by zero"));
        }
        Ok(a / b)
    }

    fn mean(&self, values: Vec<f64>) -> MethodResult<Option<f64>> {
        if values.is_empty() {
            return Ok(None);
        }
        Ok(Some(values.iter().sum::<f64>() / values.len() as f64))
    }
}

impl Service for MathService {
    fn methods(methods: &mut Methods<Self>) {
        methods.method("add", &["a", "b"], Self::add).doc("Add two integers");
        methods.method("divide", &["a", "b"], Self::divide);
        methods
            .method("mean", &["values"], Self::mean)
            .doc("Arithmetic mean, or null for no values");
    }

    fn documentation() -> String {
        "Basic arithmetic".into()
    }
}

typed_record! {
    #[derive(Debug)]
    struct Session {
        user: String,
        started: NaiveDateTime,
        length: Duration,
    }
}

struct SessionService;

impl SessionService {
    fn end_of(&self, session: Session) -> MethodResult<NaiveDateTime> {
        let length = chrono::Duration::from_std(session.length)?;
        Ok(session.started + length)
    }

    fn describe(&self, session: Session) -> MethodResult<String> {
        Ok(format!(
            "{} started at {} for {}s",
            session.user,
            session.started,
            session.length.as_secs_f64()
        ))
    }
}

impl Service for SessionService {
    fn methods(methods: &mut Methods<Self>) {
        methods.method("end_of", &["session"], Self::end_of);
        methods.method("describe", &["session"], Self::describe);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries responses, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let mut registry = Registry::new();
    registry.register_service(MathService)?;
    registry.register_service(SessionService)?;
    tracing::info!(services = ?registry.service_names().collect::<Vec<_>>(), "Services registered");

    let server = LineServer::new(Arc::new(registry)).with_config(ServerConfig::default());

    match std::env::args().nth(1) {
        None => {
            let stats = server.serve_stdio().await?;
            tracing::info!(requests = stats.requests, errors = stats.errors, "Input closed");
        }
        Some(addr) => {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            tracing::info!(%addr, "Listening");
            loop {
                let (stream, peer) = listener.accept().await?;
                let server = server.clone();
                tokio::spawn(async move {
                    match server.serve(stream).await {
                        Ok(stats) => tracing::info!(%peer, requests = stats.requests, "Connection closed"),
                        Err(e) => tracing::error!(%peer, err = %e, "Connection failed"),
                    }
                });
            }
        }
    }

    Ok(())
}
