//! Gateway: the composition root.
//!
//! Binds the WebSocket listener and the optional length-prefixed TCP
//! listener, feeds every accepted session through one shared
//! [`Server`], and runs an [`Agent`] for each admitted connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use wsgate_network::{ConnMeta, LenPrefixTransport, Server, Transport, WsTransport};

use crate::agent::Agent;
use crate::config::{ConfigError, GateConfig};
use crate::processor::Processor;

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Errors returned by [`Gateway`].
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("TLS termination is not available; put a TLS proxy in front of the gateway")]
    TlsUnavailable,
}

#[derive(Debug, Clone, Copy)]
enum Listener {
    Ws,
    Tcp,
}

/// The gateway.
///
/// Create with [`Gateway::new`], drive with [`Gateway::run`], stop with
/// [`Gateway::shutdown`].
pub struct Gateway<P: Processor> {
    config: GateConfig,
    processor: Arc<P>,
    server: Arc<Server>,
    agents: TaskTracker,
    cancel: CancellationToken,
    ws_addr: Mutex<Option<SocketAddr>>,
    tcp_addr: Mutex<Option<SocketAddr>>,
}

impl<P: Processor> Gateway<P> {
    /// Validates `config` and builds the server. Nothing is bound yet.
    pub fn new(config: GateConfig, processor: P) -> Result<Arc<Self>, GatewayError> {
        config.validate()?;
        let server = Server::new(config.server_config());
        Ok(Arc::new(Self {
            config,
            processor: Arc::new(processor),
            server,
            agents: TaskTracker::new(),
            cancel: CancellationToken::new(),
            ws_addr: Mutex::new(None),
            tcp_addr: Mutex::new(None),
        }))
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    /// Bound WebSocket address. Only available after [`run`](Self::run)
    /// binds the socket.
    pub async fn ws_addr(&self) -> Option<SocketAddr> {
        *self.ws_addr.lock().await
    }

    /// Bound TCP address, if the TCP listener is configured and bound.
    pub async fn tcp_addr(&self) -> Option<SocketAddr> {
        *self.tcp_addr.lock().await
    }

    /// Signals [`run`](Self::run) to stop accepting and drain.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Accepts clients until [`shutdown`](Self::shutdown), then drains
    /// the server and waits for every agent to finish.
    pub async fn run(self: &Arc<Self>) -> Result<(), GatewayError> {
        if self.config.tls_requested() {
            error!(
                cert = %self.config.cert_file,
                key = %self.config.key_file,
                "TLS requested but not supported"
            );
            return Err(GatewayError::TlsUnavailable);
        }

        let ws_listener = self.bind(&self.config.ws_addr).await?;
        let tcp_listener = self.bind(&self.config.tcp_addr).await?;

        if let Some(listener) = &ws_listener {
            let addr = listener.local_addr()?;
            *self.ws_addr.lock().await = Some(addr);
            info!("websocket listener on {addr}");
        }
        if let Some(listener) = &tcp_listener {
            let addr = listener.local_addr()?;
            *self.tcp_addr.lock().await = Some(addr);
            info!("tcp listener on {addr}");
        }

        self.server.start();

        tokio::join!(
            self.accept_loop(ws_listener, Listener::Ws),
            self.accept_loop(tcp_listener, Listener::Tcp),
        );

        info!("gateway shutting down");
        self.server.shutdown().await;

        self.agents.close();
        self.agents.wait().await;
        info!("gateway stopped");
        Ok(())
    }

    async fn bind(&self, addr: &str) -> Result<Option<TcpListener>, GatewayError> {
        if addr.is_empty() {
            return Ok(None);
        }
        Ok(Some(TcpListener::bind(addr).await?))
    }

    async fn accept_loop(self: &Arc<Self>, listener: Option<TcpListener>, kind: Listener) {
        let Some(listener) = listener else {
            return;
        };
        let mut backoff = ACCEPT_BACKOFF_MIN;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(?kind, "listener stopped");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            backoff = ACCEPT_BACKOFF_MIN;
                            let gateway = Arc::clone(self);
                            self.agents.spawn(async move {
                                match kind {
                                    Listener::Ws => gateway.handle_ws(stream, peer_addr).await,
                                    Listener::Tcp => gateway.handle_tcp(stream, peer_addr).await,
                                }
                            });
                        }
                        Err(e) => {
                            warn!(?kind, "accept error: {e}; retrying in {backoff:?}");
                            tokio::time::sleep(backoff).await;
                            backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
                        }
                    }
                }
            }
        }
    }

    async fn handle_ws(self: Arc<Self>, stream: TcpStream, peer_addr: SocketAddr) {
        let local_addr = stream.local_addr().ok();

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.config.max_inbound_len());
        ws_config.max_frame_size = Some(self.config.max_inbound_len());

        let handshake = tokio::time::timeout(
            self.config.http_timeout(),
            accept_async_with_config(stream, Some(ws_config)),
        );
        let ws_stream = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = handshake => {
                match result {
                    Ok(Ok(ws_stream)) => ws_stream,
                    Ok(Err(e)) => {
                        warn!(%peer_addr, "websocket upgrade failed: {e}");
                        return;
                    }
                    Err(_) => {
                        warn!(%peer_addr, "websocket upgrade timed out");
                        return;
                    }
                }
            }
        };

        let meta = ConnMeta {
            local: local_addr,
            remote: Some(peer_addr),
        };
        self.serve(WsTransport::new(ws_stream), meta).await;
    }

    async fn handle_tcp(self: Arc<Self>, stream: TcpStream, peer_addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer_addr, "set_nodelay failed: {e}");
        }
        let meta = ConnMeta {
            local: stream.local_addr().ok(),
            remote: Some(peer_addr),
        };
        let transport = LenPrefixTransport::new(stream, &self.config.len_prefix_config());
        self.serve(transport, meta).await;
    }

    /// Admits the session and runs its agent to completion.
    async fn serve<T: Transport>(self: Arc<Self>, transport: T, meta: ConnMeta) {
        let conn = match self.server.accept(transport, meta) {
            Ok(conn) => conn,
            Err(e) => {
                debug!(remote = ?meta.remote, "session dropped: {e}");
                return;
            }
        };

        let agent = Agent::new(conn, Arc::clone(&self.processor));
        if let Err(e) = agent.run().await {
            debug!(remote = ?meta.remote, "agent ended with error: {e}");
        }
    }
}
