//! Async line-oriented transport for an `autorpc` [`Registry`](autorpc_jsonrpc::Registry).
//!
//! There is no HTTP here.  A [`LineServer`] takes an already established byte stream (a TCP
//! connection, stdio, a pipe) and speaks newline-delimited JSON RPC over it.  Anything fancier
//! belongs in the program that owns the connection.

mod server;
#[cfg(test)]
#[path = "../../autorpc-jsonrpc/src/testing.rs"]
mod testing;

pub use server::{DEFAULT_MAX_LINE_LENGTH, LineServer, ServeStats, ServerConfig, ServerError};
