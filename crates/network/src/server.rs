//! Server: admission control, identifier assignment and drain-and-wait
//! shutdown over the single-writer registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connection::{ConnConfig, ConnId, ConnMeta, Connection};
use crate::frame::Transport;
use crate::registry::{self, RegistryEvent};
use crate::{DEFAULT_MAX_CONNECTIONS, MAX_CONN_ID, ServerError};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum number of concurrently registered connections.
    pub max_connections: usize,
    /// Limits applied to every accepted connection.
    pub conn: ConnConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            conn: ConnConfig::default(),
        }
    }
}

/// Server lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Initializing,
    Running,
    Draining,
    Stopped,
}

enum RegistryTask {
    Idle(mpsc::UnboundedReceiver<RegistryEvent>),
    Running(JoinHandle<()>),
    Finished,
}

/// Accepts transport sessions and tracks them until they are torn down.
pub struct Server {
    config: ServerConfig,
    next_id: AtomicU64,
    admitted: Arc<AtomicUsize>,
    state: watch::Sender<ServerState>,
    events: mpsc::UnboundedSender<RegistryEvent>,
    registry: Mutex<RegistryTask>,
    /// Orders every `Register` before the registry's `Shutdown`.
    admission: Mutex<()>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ServerState::Initializing);
        Arc::new(Self {
            config,
            next_id: AtomicU64::new(0),
            admitted: Arc::new(AtomicUsize::new(0)),
            state,
            events,
            registry: Mutex::new(RegistryTask::Idle(events_rx)),
            admission: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Admitted connections that have not yet been unregistered.
    pub fn connection_count(&self) -> usize {
        self.admitted.load(Ordering::Acquire)
    }

    /// Starts the registry task and begins admitting connections.
    ///
    /// Must be called from within a tokio runtime. Calling it again, or
    /// after shutdown, does nothing.
    pub fn start(&self) {
        let mut registry = self.registry.lock();
        let events_rx = match std::mem::replace(&mut *registry, RegistryTask::Finished) {
            RegistryTask::Idle(events_rx) => events_rx,
            other => {
                *registry = other;
                debug!("server already started or stopped");
                return;
            }
        };

        let handle = tokio::spawn(registry::run_registry(
            events_rx,
            Arc::clone(&self.admitted),
        ));
        *registry = RegistryTask::Running(handle);
        drop(registry);

        self.state.send_replace(ServerState::Running);
        info!(
            max_connections = self.config.max_connections,
            "server running"
        );
    }

    /// Admits a new transport session.
    ///
    /// On success the connection's pumps are running and its registration
    /// is queued. On rejection the transport is dropped and no connection
    /// exists.
    pub fn accept<T: Transport>(
        &self,
        transport: T,
        meta: ConnMeta,
    ) -> Result<Arc<Connection>, ServerError> {
        let admission = self.admission.lock();
        let state = self.state();
        if state != ServerState::Running {
            debug!(?state, remote = ?meta.remote, "not accepting, dropping session");
            return Err(ServerError::NotAccepting(state));
        }

        let max = self.config.max_connections;
        let reserved = self
            .admitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            });
        if reserved.is_err() {
            warn!(max, remote = ?meta.remote, "connection limit reached, dropping session");
            return Err(ServerError::AdmissionRejected { max });
        }

        let id = self.next_conn_id();
        let (conn, outbound_rx) = Connection::new(id, meta, &self.config.conn);

        // Register before the pumps exist so the unregister always follows.
        if self
            .events
            .send(RegistryEvent::Register(Arc::clone(&conn)))
            .is_err()
        {
            self.admitted.fetch_sub(1, Ordering::AcqRel);
            return Err(ServerError::NotAccepting(ServerState::Stopped));
        }
        drop(admission);

        let tasks = conn.start_pumps(transport, outbound_rx);
        let events = self.events.clone();
        tokio::spawn(async move {
            tasks.join().await;
            let _ = events.send(RegistryEvent::Unregister(id));
        });

        Ok(conn)
    }

    /// Closes every connection and waits until all of them have
    /// unregistered.
    ///
    /// Concurrent callers all return once the server has stopped.
    pub async fn shutdown(&self) {
        let previous = {
            let _admission = self.admission.lock();
            let mut previous = None;
            self.state.send_if_modified(|state| match *state {
                ServerState::Initializing => {
                    previous = Some(ServerState::Initializing);
                    *state = ServerState::Stopped;
                    true
                }
                ServerState::Running => {
                    previous = Some(ServerState::Running);
                    *state = ServerState::Draining;
                    true
                }
                ServerState::Draining | ServerState::Stopped => false,
            });
            if previous == Some(ServerState::Running) {
                let _ = self.events.send(RegistryEvent::Shutdown);
            }
            previous
        };

        match previous {
            Some(ServerState::Initializing) => {
                *self.registry.lock() = RegistryTask::Finished;
                info!("server stopped before it was started");
            }
            Some(_) => {
                info!(count = self.connection_count(), "server draining");

                let task = std::mem::replace(&mut *self.registry.lock(), RegistryTask::Finished);
                if let RegistryTask::Running(handle) = task {
                    if let Err(e) = handle.await {
                        error!("registry task failed: {e}");
                    }
                }

                self.state.send_replace(ServerState::Stopped);
                info!("server closed gracefully");
            }
            None => {
                let mut state = self.state.subscribe();
                let _ = state.wait_for(|s| *s == ServerState::Stopped).await;
            }
        }
    }

    fn next_conn_id(&self) -> ConnId {
        let advance = |n: u64| if n >= MAX_CONN_ID { 1 } else { n + 1 };
        let prev = match self
            .next_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(advance(n)))
        {
            Ok(n) | Err(n) => n,
        };
        ConnId::new(advance(prev))
    }
}
