//! Processor trait: the application's codec and router.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::agent::Agent;

/// A boxed future returned by [`Processor::route`].
pub type RouteFuture<'a, E> = Pin<Box<dyn Future<Output = Result<(), E>> + Send + 'a>>;

/// Encodes, decodes and routes application messages.
///
/// One processor instance is shared by every agent, and every agent calls
/// it from its own task, so all methods may run concurrently with
/// themselves and with each other. Implementations that keep state must
/// synchronize it internally.
pub trait Processor: Sized + Send + Sync + 'static {
    /// Decoded application message.
    type Message: Send + 'static;

    /// Per-session state stored on each [`Agent`].
    type UserData: Default + Send + 'static;

    /// Codec and routing failure.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Decodes one inbound payload.
    fn decode(&self, data: &[u8]) -> Result<Self::Message, Self::Error>;

    /// Encodes one outbound message.
    fn encode(&self, msg: &Self::Message) -> Result<Vec<u8>, Self::Error>;

    /// Hands a decoded message to application logic.
    ///
    /// An error ends the session: the agent loop stops and the connection
    /// is closed.
    fn route(&self, msg: Self::Message, agent: Arc<Agent<Self>>) -> RouteFuture<'_, Self::Error>;

    /// Called once before the agent starts receiving.
    fn on_open(&self, agent: &Arc<Agent<Self>>) {
        let _ = agent;
    }

    /// Called once after the agent loop has ended and the connection is
    /// closed.
    fn on_close(&self, agent: &Arc<Agent<Self>>) {
        let _ = agent;
    }
}
