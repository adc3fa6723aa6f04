//! Connection lifecycle engine for the wsgate gateway.
//!
//! Terminates client transport sessions, runs one read pump and one write
//! pump per [`Connection`], and keeps the authoritative connection registry
//! inside a single coordination task owned by the [`Server`]. Application
//! code sits above this crate and only ever sees [`Connection::send`] and
//! [`Connection::receive`].

mod connection;
mod frame;
mod pumps;
mod registry;
mod server;
pub mod tcp;
pub mod ws;

#[cfg(test)]
pub(crate) mod mock;

use std::time::Duration;

pub use connection::{ConnConfig, ConnId, ConnMeta, Connection, PumpTasks};
pub use frame::{Frame, Transport};
pub use server::{Server, ServerConfig, ServerState};
pub use tcp::{LenPrefixConfig, LenPrefixTransport};
pub use ws::WsTransport;

/// Default inbound queue capacity per connection.
pub const DEFAULT_PENDING_READ: usize = 1024;

/// Default outbound queue capacity per connection.
pub const DEFAULT_PENDING_WRITE: usize = 2000;

/// Default maximum message size in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4096;

/// Default liveness window. Probes go out at 9/10 of this value.
pub const DEFAULT_LIVENESS_WINDOW: Duration = Duration::from_secs(60);

/// Default maximum number of concurrent connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 20_000;

/// Connection identifiers wrap back to 1 after this value.
pub const MAX_CONN_ID: u64 = 2_000_000_000;

/// Failure at the transport layer. Always fatal to the connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Errors returned by [`Connection`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnError {
    #[error("message too large ({len} bytes, limit {max})")]
    MessageTooLarge { len: usize, max: usize },

    #[error("outbound queue full, message dropped")]
    Backpressure,

    #[error("connection closed")]
    ConnectionClosed,
}

/// Errors returned by [`Server::accept`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServerError {
    #[error("connection limit reached ({max})")]
    AdmissionRejected { max: usize },

    #[error("server is not accepting connections ({0:?})")]
    NotAccepting(ServerState),
}
