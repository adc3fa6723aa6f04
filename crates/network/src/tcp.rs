//! Length-prefixed TCP binding.
//!
//! # Wire format
//!
//! ```text
//! [len_msg_len bytes: payload length, big-endian unless configured]
//! [length bytes: payload]
//! ```
//!
//! A zero-length frame is the liveness probe. An outgoing probe is written
//! as an empty frame and every empty frame received counts as an
//! acknowledgment, so peers stay alive by echoing empty frames back.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures_util::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::TransportError;
use crate::frame::Frame;

/// Framing options for [`LenPrefixTransport`].
#[derive(Debug, Clone)]
pub struct LenPrefixConfig {
    /// Width of the length header in bytes (1 to 8).
    pub len_msg_len: usize,
    /// Encode the length header little-endian.
    pub little_endian: bool,
    /// Incoming payloads must be shorter than this, the same bound
    /// `Connection::send` applies to outgoing ones.
    pub max_msg_len: usize,
}

impl Default for LenPrefixConfig {
    fn default() -> Self {
        Self {
            len_msg_len: 2,
            little_endian: false,
            max_msg_len: crate::DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// [`Transport`](crate::Transport) over a length-prefixed byte stream.
pub struct LenPrefixTransport<T> {
    inner: Framed<T, LengthDelimitedCodec>,
}

impl<T> LenPrefixTransport<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: T, config: &LenPrefixConfig) -> Self {
        let mut builder = LengthDelimitedCodec::builder();
        builder
            .length_field_length(config.len_msg_len.clamp(1, 8))
            .max_frame_length(config.max_msg_len.saturating_sub(1));
        if config.little_endian {
            builder.little_endian();
        } else {
            builder.big_endian();
        }
        Self {
            inner: builder.new_framed(io),
        }
    }
}

impl<T> Stream for LenPrefixTransport<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    type Item = Result<Frame, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let item = ready!(Pin::new(&mut this.inner).poll_next(cx));
        Poll::Ready(item.map(|res| {
            res.map(|buf| {
                if buf.is_empty() {
                    Frame::Pong(Vec::new())
                } else {
                    Frame::Data(buf.to_vec())
                }
            })
            .map_err(TransportError::from)
        }))
    }
}

impl<T> Sink<Frame> for LenPrefixTransport<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Sink::<Bytes>::poll_ready(Pin::new(&mut self.get_mut().inner), cx).map_err(Into::into)
    }

    fn start_send(self: Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
        let inner = Pin::new(&mut self.get_mut().inner);
        match item {
            Frame::Data(data) => Sink::<Bytes>::start_send(inner, Bytes::from(data))?,
            Frame::Ping(_) => Sink::<Bytes>::start_send(inner, Bytes::new())?,
            // Acknowledgments are implicit on this binding.
            Frame::Pong(_) => {}
        }
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Sink::<Bytes>::poll_flush(Pin::new(&mut self.get_mut().inner), cx).map_err(Into::into)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Sink::<Bytes>::poll_close(Pin::new(&mut self.get_mut().inner), cx).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    fn transport(
        config: &LenPrefixConfig,
    ) -> (LenPrefixTransport<tokio::io::DuplexStream>, tokio::io::DuplexStream) {
        let (ours, theirs) = tokio::io::duplex(1024);
        (LenPrefixTransport::new(ours, config), theirs)
    }

    #[tokio::test]
    async fn data_frame_is_big_endian_by_default() {
        let (mut t, mut peer) = transport(&LenPrefixConfig::default());

        t.send(Frame::Data(b"abc".to_vec())).await.unwrap();

        let mut buf = [0u8; 5];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x00, 0x03, b'a', b'b', b'c']);
    }

    #[tokio::test]
    async fn little_endian_four_byte_header() {
        let config = LenPrefixConfig {
            len_msg_len: 4,
            little_endian: true,
            ..LenPrefixConfig::default()
        };
        let (mut t, mut peer) = transport(&config);

        t.send(Frame::Data(b"hi".to_vec())).await.unwrap();

        let mut buf = [0u8; 6];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x02, 0x00, 0x00, 0x00, b'h', b'i']);
    }

    #[tokio::test]
    async fn probe_is_an_empty_frame_and_pong_is_silent() {
        let (mut t, mut peer) = transport(&LenPrefixConfig::default());

        t.send(Frame::Pong(Vec::new())).await.unwrap();
        t.send(Frame::Ping(Vec::new())).await.unwrap();
        t.send(Frame::Data(b"x".to_vec())).await.unwrap();

        let mut buf = [0u8; 5];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x00, 0x00, 0x00, 0x01, b'x']);
    }

    #[tokio::test]
    async fn incoming_frames_map_to_data_and_acks() {
        let (mut t, mut peer) = transport(&LenPrefixConfig::default());

        peer.write_all(&[0x00, 0x00, 0x00, 0x02, b'o', b'k'])
            .await
            .unwrap();

        assert_eq!(t.next().await.unwrap().unwrap(), Frame::Pong(Vec::new()));
        assert_eq!(
            t.next().await.unwrap().unwrap(),
            Frame::Data(b"ok".to_vec())
        );

        drop(peer);
        assert!(t.next().await.is_none());
    }

    #[tokio::test]
    async fn oversized_incoming_frame_is_an_error() {
        let config = LenPrefixConfig {
            max_msg_len: 4,
            ..LenPrefixConfig::default()
        };
        let (mut t, mut peer) = transport(&config);

        peer.write_all(&[0x00, 0x08]).await.unwrap();
        peer.write_all(&[0u8; 8]).await.unwrap();

        assert!(matches!(t.next().await, Some(Err(TransportError::Io(_)))));
    }

    #[tokio::test]
    async fn frame_at_the_limit_is_rejected() {
        let config = LenPrefixConfig {
            max_msg_len: 4,
            ..LenPrefixConfig::default()
        };
        let (mut t, mut peer) = transport(&config);

        peer.write_all(&[0x00, 0x03, b'a', b'b', b'c']).await.unwrap();
        peer.write_all(&[0x00, 0x04, b'a', b'b', b'c', b'd']).await.unwrap();

        assert_eq!(t.next().await.unwrap().unwrap(), Frame::Data(b"abc".to_vec()));
        assert!(matches!(t.next().await, Some(Err(TransportError::Io(_)))));
    }
}
