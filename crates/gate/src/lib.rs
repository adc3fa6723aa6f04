//! Application-facing half of the wsgate gateway.
//!
//! A [`Gateway`] listens for WebSocket (and optionally length-prefixed TCP)
//! clients, admits them through a [`wsgate_network::Server`], and runs one
//! [`Agent`] per connection. Agents hand every inbound payload to the
//! application's [`Processor`] for decoding and routing, and encode replies
//! through the same processor.

mod agent;
mod config;
mod gateway;
mod processor;

pub use agent::{Agent, AgentError};
pub use config::{ConfigError, GateConfig};
pub use gateway::{Gateway, GatewayError};
pub use processor::{Processor, RouteFuture};

pub use wsgate_network as network;
