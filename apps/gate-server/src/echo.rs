//! Echo processor: the default application behind the `wsgate` binary.

use std::sync::Arc;

use serde::Serialize;
use wsgate_gate::{Agent, Processor, RouteFuture};

use crate::envelope::Envelope;

#[derive(Debug, thiserror::Error)]
pub enum EchoError {
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
}

/// Per-session state.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub messages: u64,
}

#[derive(Serialize)]
struct PongPayload {
    count: u64,
}

/// Answers `echo` and `ping`; anything else gets an `error` envelope.
#[derive(Debug, Default)]
pub struct EchoProcessor;

impl Processor for EchoProcessor {
    type Message = Envelope;
    type UserData = Session;
    type Error = EchoError;

    fn decode(&self, data: &[u8]) -> Result<Envelope, EchoError> {
        Ok(serde_json::from_slice(data)?)
    }

    fn encode(&self, msg: &Envelope) -> Result<Vec<u8>, EchoError> {
        Ok(serde_json::to_vec(msg)?)
    }

    fn route(&self, msg: Envelope, agent: Arc<Agent<Self>>) -> RouteFuture<'_, EchoError> {
        Box::pin(async move {
            let count = agent.with_user_data(|s| {
                s.messages += 1;
                s.messages
            });
            tracing::trace!(id = %agent.id(), msg_type = %msg.msg_type, count, "routing");

            let reply = match msg.msg_type.as_str() {
                "echo" => msg.reply_raw("echo", msg.payload.clone()),
                "ping" => Envelope::new(&msg.id, "pong", Some(&PongPayload { count }))?,
                other => msg.reply_error(404, format!("unknown message type: {other}")),
            };
            agent.send(&reply);
            Ok::<(), EchoError>(())
        })
    }

    fn on_open(&self, agent: &Arc<Agent<Self>>) {
        tracing::info!(id = %agent.id(), remote = ?agent.remote_addr(), "session opened");
    }

    fn on_close(&self, agent: &Arc<Agent<Self>>) {
        tracing::info!(
            id = %agent.id(),
            messages = agent.with_user_data(|s| s.messages),
            "session closed"
        );
    }
}
