//! WebSocket binding.
//!
//! Binary and text messages both surface as [`Frame::Data`]; outgoing data
//! is always written as binary. A close frame ends the stream.
//!
//! tungstenite answers every incoming ping itself, so an outgoing
//! [`Frame::Pong`] is dropped here.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures_util::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

use crate::TransportError;
use crate::frame::Frame;

/// [`Transport`](crate::Transport) over an established WebSocket.
pub struct WsTransport<S> {
    inner: WebSocketStream<S>,
    finished: bool,
}

impl<S> WsTransport<S> {
    pub fn new(inner: WebSocketStream<S>) -> Self {
        Self {
            inner,
            finished: false,
        }
    }

    pub fn into_inner(self) -> WebSocketStream<S> {
        self.inner
    }
}

impl<S> Stream for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Item = Result<Frame, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.finished {
                return Poll::Ready(None);
            }
            let frame = match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                Some(Ok(WsMessage::Binary(data))) => Frame::Data(data.to_vec()),
                Some(Ok(WsMessage::Text(text))) => Frame::Data(text.as_bytes().to_vec()),
                Some(Ok(WsMessage::Ping(data))) => Frame::Ping(data.to_vec()),
                Some(Ok(WsMessage::Pong(data))) => Frame::Pong(data.to_vec()),
                Some(Ok(WsMessage::Close(_))) => {
                    tracing::trace!("received close frame");
                    this.finished = true;
                    return Poll::Ready(None);
                }
                // Raw frames never surface while reading.
                Some(Ok(WsMessage::Frame(_))) => continue,
                Some(Err(e)) => return Poll::Ready(Some(Err(e.into()))),
                None => {
                    this.finished = true;
                    return Poll::Ready(None);
                }
            };
            return Poll::Ready(Some(Ok(frame)));
        }
    }
}

impl<S> Sink<Frame> for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.get_mut().inner)
            .poll_ready(cx)
            .map_err(Into::into)
    }

    fn start_send(self: Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
        let msg = match item {
            Frame::Data(data) => WsMessage::Binary(data.into()),
            Frame::Ping(data) => WsMessage::Ping(data.into()),
            Frame::Pong(_) => return Ok(()),
        };
        Pin::new(&mut self.get_mut().inner)
            .start_send(msg)
            .map_err(Into::into)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.get_mut().inner)
            .poll_flush(cx)
            .map_err(Into::into)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.get_mut().inner)
            .poll_close(cx)
            .map_err(Into::into)
    }
}
