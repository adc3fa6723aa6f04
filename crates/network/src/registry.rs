//! Connection registry, owned and mutated by a single coordination task.
//!
//! Every other task talks to the registry through one ordered event queue,
//! so a connection's unregister can never overtake its register. `Server`
//! enqueues every register ahead of `Shutdown`, so once draining starts the
//! map only shrinks.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::connection::{ConnId, Connection};

#[derive(Debug)]
pub(crate) enum RegistryEvent {
    Register(Arc<Connection>),
    Unregister(ConnId),
    /// Close everything and exit once the map is empty.
    Shutdown,
}

/// Runs the coordination loop.
///
/// `admitted` is the admission counter reserved by `Server::accept`; the
/// registry releases a slot for every unregistered connection.
pub(crate) async fn run_registry(
    mut events: mpsc::UnboundedReceiver<RegistryEvent>,
    admitted: Arc<AtomicUsize>,
) {
    let mut conns: HashMap<ConnId, Arc<Connection>> = HashMap::new();
    let mut draining = false;

    while let Some(event) = events.recv().await {
        match event {
            RegistryEvent::Register(conn) => {
                info!(
                    id = %conn.id(),
                    remote = ?conn.remote_addr(),
                    count = conns.len() + 1,
                    "connection registered"
                );
                conns.insert(conn.id(), conn);
            }
            RegistryEvent::Unregister(id) => {
                if let Some(conn) = conns.remove(&id) {
                    admitted.fetch_sub(1, Ordering::AcqRel);
                    info!(
                        %id,
                        remote = ?conn.remote_addr(),
                        count = conns.len(),
                        "connection unregistered"
                    );
                }
            }
            RegistryEvent::Shutdown => {
                draining = true;
                info!(count = conns.len(), "closing all connections");
                for conn in conns.values() {
                    conn.close();
                }
            }
        }

        if draining && conns.is_empty() {
            break;
        }
    }

    debug!("registry stopped");
}
