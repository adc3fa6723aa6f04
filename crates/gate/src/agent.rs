//! Agent: the application-facing handle for one connection.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, warn};
use wsgate_network::{ConnError, ConnId, Connection};

use crate::processor::Processor;

/// Errors surfaced by an [`Agent`].
#[derive(Debug, thiserror::Error)]
pub enum AgentError<E: std::error::Error + 'static> {
    #[error("decode failed: {0}")]
    Decode(#[source] E),

    #[error("encode failed: {0}")]
    Encode(#[source] E),

    #[error("route failed: {0}")]
    Route(#[source] E),

    #[error(transparent)]
    Connection(#[from] ConnError),
}

/// Binds one [`Connection`] to the shared [`Processor`].
pub struct Agent<P: Processor> {
    conn: Arc<Connection>,
    processor: Arc<P>,
    user_data: Mutex<P::UserData>,
}

impl<P: Processor> fmt::Debug for Agent<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent").field("conn", &self.conn).finish()
    }
}

impl<P: Processor> Agent<P> {
    pub fn new(conn: Arc<Connection>, processor: Arc<P>) -> Arc<Self> {
        Arc::new(Self {
            conn,
            processor,
            user_data: Mutex::new(P::UserData::default()),
        })
    }

    /// Receives, decodes and routes payloads until the connection closes.
    ///
    /// A decode or route failure ends the session: the error is logged,
    /// the connection is closed and the error is returned. A closed
    /// connection ends the loop with `Ok(())`.
    pub async fn run(self: Arc<Self>) -> Result<(), AgentError<P::Error>> {
        self.processor.on_open(&self);

        let result = loop {
            let data = match self.conn.receive().await {
                Ok(data) => data,
                Err(_) => break Ok(()),
            };

            let msg = match self.processor.decode(&data) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(id = %self.id(), "decode message error: {e}");
                    break Err(AgentError::Decode(e));
                }
            };

            if let Err(e) = self.processor.route(msg, Arc::clone(&self)).await {
                warn!(id = %self.id(), "route message error: {e}");
                break Err(AgentError::Route(e));
            }
        };

        self.conn.close();
        self.processor.on_close(&self);
        debug!(id = %self.id(), "agent stopped");
        result
    }

    /// Encodes and queues `msg`, logging any failure.
    pub fn send(&self, msg: &P::Message) {
        if let Err(e) = self.try_send(msg) {
            let ty = std::any::type_name::<P::Message>();
            match e {
                AgentError::Connection(ConnError::Backpressure)
                | AgentError::Connection(ConnError::ConnectionClosed) => {
                    warn!(id = %self.id(), "write message {ty} dropped: {e}");
                }
                _ => error!(id = %self.id(), "write message {ty} error: {e}"),
            }
        }
    }

    /// Encodes and queues `msg`, returning any failure to the caller.
    pub fn try_send(&self, msg: &P::Message) -> Result<(), AgentError<P::Error>> {
        let data = self.processor.encode(msg).map_err(AgentError::Encode)?;
        self.conn.send(data)?;
        Ok(())
    }

    /// Closes the underlying connection. The agent loop then exits.
    pub fn close(&self) {
        self.conn.close();
    }

    pub fn id(&self) -> ConnId {
        self.conn.id()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.conn.local_addr()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.conn.remote_addr()
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    pub fn processor(&self) -> &Arc<P> {
        &self.processor
    }

    pub fn set_user_data(&self, data: P::UserData) {
        *self.user_data.lock() = data;
    }

    /// Runs `f` with exclusive access to the session's user data.
    pub fn with_user_data<R>(&self, f: impl FnOnce(&mut P::UserData) -> R) -> R {
        f(&mut self.user_data.lock())
    }

    pub fn user_data(&self) -> P::UserData
    where
        P::UserData: Clone,
    {
        self.user_data.lock().clone()
    }
}
