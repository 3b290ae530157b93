//! Transport boundary for graph table calls.
//!
//! The client never opens connections itself. It hands each encoded
//! [`PsRequest`] to a [`PsTransport`], which owns channels, stubs and any
//! retry policy, and receives the raw response bytes back.

use crate::protocol::PsRequest;
use crate::sharding::ServerIndex;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Errors reported by a transport for a single call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection to the server could not be established.
    #[error("Connection failed to server {server}: {message}")]
    ConnectionFailed { server: ServerIndex, message: String },

    /// The call did not complete in time.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The server answered with a failure status.
    #[error("Server {server} returned status {status}: {message}")]
    ServerStatus {
        server: ServerIndex,
        status: i32,
        message: String,
    },

    /// No channel exists for the requested server.
    #[error("Unknown server index {0}")]
    UnknownServer(ServerIndex),
}

/// Request/response channel to the servers of a graph table cluster.
///
/// Implementations must be safe to call concurrently: the client issues one
/// call per destination server in parallel.
#[async_trait]
pub trait PsTransport: Send + Sync {
    /// Number of servers reachable through this transport.
    fn server_count(&self) -> usize;

    /// Sends one request to a server and returns the raw response body.
    async fn call(&self, server: ServerIndex, request: PsRequest) -> Result<Bytes, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::ConnectionFailed {
            server: 2,
            message: "Connection refused".to_string(),
        };
        assert!(err.to_string().contains("server 2"));

        let err = TransportError::Timeout { timeout_ms: 5000 };
        assert!(err.to_string().contains("5000ms"));

        let err = TransportError::ServerStatus {
            server: 0,
            status: -1,
            message: "table not found".to_string(),
        };
        assert!(err.to_string().contains("table not found"));
    }
}
