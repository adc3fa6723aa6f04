//! Channel-backed transport for pump and registry tests.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures_util::{Sink, Stream};
use tokio::sync::mpsc;

use crate::TransportError;
use crate::frame::Frame;

#[derive(Debug)]
pub(crate) struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Result<Frame, TransportError>>,
    outgoing: mpsc::UnboundedSender<Frame>,
    fail_writes: Arc<AtomicBool>,
}

/// The remote end of a [`MockTransport`].
#[derive(Debug)]
pub(crate) struct MockPeer {
    frames: mpsc::UnboundedSender<Result<Frame, TransportError>>,
    written: mpsc::UnboundedReceiver<Frame>,
    fail_writes: Arc<AtomicBool>,
}

pub(crate) fn pair() -> (MockTransport, MockPeer) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let fail_writes = Arc::new(AtomicBool::new(false));

    let transport = MockTransport {
        incoming: in_rx,
        outgoing: out_tx,
        fail_writes: Arc::clone(&fail_writes),
    };
    let peer = MockPeer {
        frames: in_tx,
        written: out_rx,
        fail_writes,
    };
    (transport, peer)
}

impl MockPeer {
    pub(crate) fn send(&self, frame: Frame) {
        let _ = self.frames.send(Ok(frame));
    }

    pub(crate) fn send_data(&self, data: &[u8]) {
        self.send(Frame::Data(data.to_vec()));
    }

    pub(crate) fn send_error(&self) {
        let _ = self.frames.send(Err(TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "mock read failure",
        ))));
    }

    /// Makes every subsequent write on the transport fail.
    pub(crate) fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Next frame written by the connection, of any kind.
    pub(crate) async fn next_frame(&mut self) -> Option<Frame> {
        self.written.recv().await
    }

    /// Next data frame written by the connection, skipping control frames.
    pub(crate) async fn next_data(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.written.recv().await? {
                Frame::Data(data) => return Some(data),
                _ => continue,
            }
        }
    }
}

impl Stream for MockTransport {
    type Item = Result<Frame, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().incoming.poll_recv(cx)
    }
}

impl Sink<Frame> for MockTransport {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
        let this = self.get_mut();
        if this.fail_writes.load(Ordering::SeqCst) {
            return Err(broken_pipe("mock write failure"));
        }
        this.outgoing
            .send(item)
            .map_err(|_| broken_pipe("mock peer gone"))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

fn broken_pipe(msg: &'static str) -> TransportError {
    TransportError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, msg))
}
