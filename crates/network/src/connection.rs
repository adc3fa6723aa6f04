//! One live transport session: bounded inbound/outbound queues, a liveness
//! window, and an exactly-once close.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::Instrument;

use crate::frame::{Frame, Transport};
use crate::pumps;
use crate::{
    ConnError, DEFAULT_LIVENESS_WINDOW, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_PENDING_READ,
    DEFAULT_PENDING_WRITE,
};

/// Connection identifier. Unique for the life of a server modulo
/// wraparound at [`MAX_CONN_ID`](crate::MAX_CONN_ID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl ConnId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Addresses of the underlying transport, when it has any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnMeta {
    pub local: Option<SocketAddr>,
    pub remote: Option<SocketAddr>,
}

/// Per-connection limits.
#[derive(Debug, Clone)]
pub struct ConnConfig {
    /// Inbound queue capacity (frames waiting for the agent).
    pub pending_read: usize,
    /// Outbound queue capacity (frames waiting for the write pump).
    pub pending_write: usize,
    /// Payloads must be strictly shorter than this.
    pub max_message_size: usize,
    /// Maximum idle time before the peer is presumed dead.
    pub liveness_window: Duration,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            pending_read: DEFAULT_PENDING_READ,
            pending_write: DEFAULT_PENDING_WRITE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            liveness_window: DEFAULT_LIVENESS_WINDOW,
        }
    }
}

impl ConnConfig {
    /// Probe interval: 9/10 of the liveness window.
    pub fn heartbeat_period(&self) -> Duration {
        (self.liveness_window * 9 / 10).max(Duration::from_millis(1))
    }
}

/// Item on the outbound queue.
#[derive(Debug)]
pub(crate) enum Outbound {
    Data(Vec<u8>),
    Pong(Vec<u8>),
    /// Sentinel: stop writing once everything queued before it is out.
    Close,
}

/// Why the read pump could not enqueue a frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum InboundRejected {
    Full,
    Closed,
}

struct ConnState {
    closed: bool,
    outbound: Option<mpsc::Sender<Outbound>>,
    inbound: Option<mpsc::Sender<Vec<u8>>>,
}

/// A live transport session.
///
/// `send` never blocks, `receive` waits for the next inbound payload, and
/// `close` may be called from anywhere, any number of times.
pub struct Connection {
    id: ConnId,
    meta: ConnMeta,
    max_message_size: usize,
    liveness_window: Duration,
    heartbeat_period: Duration,
    state: Mutex<ConnState>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
    cancel: CancellationToken,
    span: tracing::Span,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("meta", &self.meta)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Builds a connection without starting its pumps.
    ///
    /// Returns the receiving end of the outbound queue, which belongs to
    /// the write pump.
    pub(crate) fn new(
        id: ConnId,
        meta: ConnMeta,
        config: &ConnConfig,
    ) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        let (out_tx, out_rx) = mpsc::channel(config.pending_write.max(1));
        let (in_tx, in_rx) = mpsc::channel(config.pending_read.max(1));
        let span = tracing::info_span!("conn", %id, remote = ?meta.remote);

        let conn = Arc::new(Self {
            id,
            meta,
            max_message_size: config.max_message_size,
            liveness_window: config.liveness_window,
            heartbeat_period: config.heartbeat_period(),
            state: Mutex::new(ConnState {
                closed: false,
                outbound: Some(out_tx),
                inbound: Some(in_tx),
            }),
            inbound_rx: tokio::sync::Mutex::new(in_rx),
            cancel: CancellationToken::new(),
            span,
        });
        (conn, out_rx)
    }

    /// Creates a connection over `transport` and starts both pumps.
    pub fn spawn<T: Transport>(
        id: ConnId,
        transport: T,
        meta: ConnMeta,
        config: &ConnConfig,
    ) -> (Arc<Self>, PumpTasks) {
        let (conn, outbound_rx) = Self::new(id, meta, config);
        let tasks = conn.start_pumps(transport, outbound_rx);
        (conn, tasks)
    }

    pub(crate) fn start_pumps<T: Transport>(
        self: &Arc<Self>,
        transport: T,
        outbound_rx: mpsc::Receiver<Outbound>,
    ) -> PumpTasks {
        let (sink, stream) = transport.split::<Frame>();

        let read = tokio::spawn(
            pumps::read_pump(stream, Arc::clone(self)).instrument(self.span.clone()),
        );
        let write = tokio::spawn(
            pumps::write_pump(sink, outbound_rx, Arc::clone(self)).instrument(self.span.clone()),
        );

        PumpTasks { read, write }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.meta.local
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.meta.remote
    }

    pub fn liveness_window(&self) -> Duration {
        self.liveness_window
    }

    pub fn heartbeat_period(&self) -> Duration {
        self.heartbeat_period
    }

    /// Queues `payload` for the write pump without waiting.
    ///
    /// A full queue drops the payload and reports [`ConnError::Backpressure`];
    /// the caller decides whether to retry.
    pub fn send(&self, payload: Vec<u8>) -> Result<(), ConnError> {
        let state = self.state.lock();
        let Some(tx) = state.outbound.as_ref() else {
            return Err(ConnError::ConnectionClosed);
        };
        if payload.len() >= self.max_message_size {
            return Err(ConnError::MessageTooLarge {
                len: payload.len(),
                max: self.max_message_size,
            });
        }
        tx.try_send(Outbound::Data(payload)).map_err(|e| match e {
            TrySendError::Full(_) => ConnError::Backpressure,
            TrySendError::Closed(_) => ConnError::ConnectionClosed,
        })
    }

    /// Queues the close sentinel behind every pending payload.
    ///
    /// The write pump flushes what was queued before it, then closes the
    /// connection.
    pub fn close_after_flush(&self) -> Result<(), ConnError> {
        let state = self.state.lock();
        let Some(tx) = state.outbound.as_ref() else {
            return Err(ConnError::ConnectionClosed);
        };
        tx.try_send(Outbound::Close).map_err(|e| match e {
            TrySendError::Full(_) => ConnError::Backpressure,
            TrySendError::Closed(_) => ConnError::ConnectionClosed,
        })
    }

    /// Waits for the next inbound payload.
    ///
    /// Payloads already queued at close time are still delivered; after
    /// that every call returns [`ConnError::ConnectionClosed`].
    pub async fn receive(&self) -> Result<Vec<u8>, ConnError> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await.ok_or(ConnError::ConnectionClosed)
    }

    /// Closes the connection. Idempotent.
    ///
    /// Both queues are closed and the pumps are told to release the
    /// transport. The server registry drops the connection once both pumps
    /// have exited.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.outbound = None;
            state.inbound = None;
        }
        self.cancel.cancel();
        tracing::debug!(parent: &self.span, "connection closed");
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Resolves once [`close`](Self::close) has run.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Number of payloads waiting in the outbound queue.
    pub fn pending_outbound(&self) -> usize {
        self.state
            .lock()
            .outbound
            .as_ref()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0)
    }

    /// Hands a data frame from the read pump to the agent.
    pub(crate) fn push_inbound(&self, data: Vec<u8>) -> Result<(), InboundRejected> {
        let state = self.state.lock();
        let Some(tx) = state.inbound.as_ref() else {
            return Err(InboundRejected::Closed);
        };
        tx.try_send(data).map_err(|e| match e {
            TrySendError::Full(_) => InboundRejected::Full,
            TrySendError::Closed(_) => InboundRejected::Closed,
        })
    }

    /// Queues a probe acknowledgment. Dropped if the queue is full.
    pub(crate) fn enqueue_pong(&self, payload: Vec<u8>) {
        let state = self.state.lock();
        if let Some(tx) = state.outbound.as_ref() {
            if tx.try_send(Outbound::Pong(payload)).is_err() {
                tracing::trace!("outbound queue full, pong dropped");
            }
        }
    }
}

/// Join handles for the two pumps of one connection.
#[derive(Debug)]
pub struct PumpTasks {
    read: JoinHandle<()>,
    write: JoinHandle<()>,
}

impl PumpTasks {
    /// Resolves once both pumps have exited.
    pub async fn join(self) {
        let (read, write) = tokio::join!(self.read, self.write);
        if let Err(e) = read {
            tracing::error!("read pump task failed: {e}");
        }
        if let Err(e) = write {
            tracing::error!("write pump task failed: {e}");
        }
    }
}
