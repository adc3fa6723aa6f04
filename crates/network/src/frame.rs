//! Frame model shared by every transport binding.

use futures_util::{Sink, Stream};

use crate::TransportError;

/// One message as seen by the pumps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Application payload. Forwarded to the inbound queue.
    Data(Vec<u8>),
    /// Liveness probe.
    Ping(Vec<u8>),
    /// Probe acknowledgment.
    Pong(Vec<u8>),
}

impl Frame {
    /// Returns `true` for ping/pong frames.
    pub fn is_control(&self) -> bool {
        matches!(self, Frame::Ping(_) | Frame::Pong(_))
    }
}

/// A duplex, message-oriented transport session.
///
/// Reading yields frames until the peer goes away (`None`) or the
/// transport fails. Writing accepts frames of any kind. Read and write
/// deadlines are enforced by the pumps, not by the transport.
pub trait Transport:
    Stream<Item = Result<Frame, TransportError>>
    + Sink<Frame, Error = TransportError>
    + Send
    + Unpin
    + 'static
{
}

impl<T> Transport for T where
    T: Stream<Item = Result<Frame, TransportError>>
        + Sink<Frame, Error = TransportError>
        + Send
        + Unpin
        + 'static
{
}
