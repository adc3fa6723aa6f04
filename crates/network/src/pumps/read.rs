//! Read pump. Moves frames from the transport to the inbound queue.

use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tracing::{debug, trace, warn};

use crate::TransportError;
use crate::connection::{Connection, InboundRejected};
use crate::frame::Frame;

/// Reads frames until the transport fails, the peer goes quiet for a full
/// liveness window, or the connection is closed elsewhere.
///
/// Only control frames refresh the liveness deadline. A full inbound queue
/// sheds the whole connection rather than one frame.
pub(crate) async fn read_pump<S>(mut stream: S, conn: Arc<Connection>)
where
    S: Stream<Item = Result<Frame, TransportError>> + Unpin,
{
    let window = conn.liveness_window();
    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;

            _ = conn.closed() => break,

            () = &mut deadline => {
                warn!(?window, "liveness window expired, closing");
                break;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Frame::Data(data))) => {
                        if conn.is_closed() {
                            break;
                        }
                        trace!(len = data.len(), "received data frame");
                        match conn.push_inbound(data) {
                            Ok(()) => {}
                            Err(InboundRejected::Full) => {
                                warn!("inbound queue full, shedding connection");
                                break;
                            }
                            Err(InboundRejected::Closed) => break,
                        }
                    }
                    Some(Ok(Frame::Ping(payload))) => {
                        trace!("received ping, sending pong");
                        deadline.as_mut().reset(tokio::time::Instant::now() + window);
                        conn.enqueue_pong(payload);
                    }
                    Some(Ok(Frame::Pong(_))) => {
                        trace!("received pong");
                        deadline.as_mut().reset(tokio::time::Instant::now() + window);
                    }
                    Some(Err(e)) => {
                        debug!("transport read failed: {e}");
                        break;
                    }
                    None => {
                        debug!("transport closed by peer");
                        break;
                    }
                }
            }
        }
    }

    conn.close();
    debug!("read pump exited");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::connection::{ConnConfig, ConnId, ConnMeta};
    use crate::mock;

    fn config(pending_read: usize) -> ConnConfig {
        ConnConfig {
            pending_read,
            pending_write: 16,
            max_message_size: 1024,
            liveness_window: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn data_frames_reach_receiver_in_order() {
        let (transport, peer) = mock::pair();
        let (conn, _tasks) =
            Connection::spawn(ConnId::new(1), transport, ConnMeta::default(), &config(8));

        peer.send_data(b"a");
        peer.send_data(b"b");
        peer.send_data(b"c");

        assert_eq!(conn.receive().await.unwrap(), b"a");
        assert_eq!(conn.receive().await.unwrap(), b"b");
        assert_eq!(conn.receive().await.unwrap(), b"c");
        conn.close();
    }

    #[tokio::test]
    async fn inbound_overflow_closes_instead_of_dropping() {
        let (transport, peer) = mock::pair();
        let (conn, tasks) =
            Connection::spawn(ConnId::new(1), transport, ConnMeta::default(), &config(1));

        // Nobody is receiving, so the second frame overflows the queue.
        peer.send_data(b"first");
        peer.send_data(b"second");

        tokio::time::timeout(Duration::from_secs(1), conn.closed())
            .await
            .expect("overflow should close the connection");
        tasks.join().await;

        // The frame that fit is still delivered; the second one is not.
        assert_eq!(conn.receive().await.unwrap(), b"first");
        assert!(conn.receive().await.is_err());
    }

    #[tokio::test]
    async fn ping_is_answered_and_not_forwarded() {
        let (transport, mut peer) = mock::pair();
        let (conn, _tasks) =
            Connection::spawn(ConnId::new(1), transport, ConnMeta::default(), &config(8));

        peer.send(Frame::Ping(b"probe".to_vec()));
        peer.send_data(b"payload");

        assert_eq!(peer.next_frame().await, Some(Frame::Pong(b"probe".to_vec())));
        // The first inbound item is the data frame, not the ping.
        assert_eq!(conn.receive().await.unwrap(), b"payload");
        conn.close();
    }

    #[tokio::test]
    async fn read_error_closes_connection() {
        let (transport, peer) = mock::pair();
        let (conn, tasks) =
            Connection::spawn(ConnId::new(1), transport, ConnMeta::default(), &config(8));

        peer.send_error();

        tokio::time::timeout(Duration::from_secs(1), tasks.join())
            .await
            .expect("pumps should exit on read error");
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn peer_disconnect_closes_connection() {
        let (transport, peer) = mock::pair();
        let (conn, tasks) =
            Connection::spawn(ConnId::new(1), transport, ConnMeta::default(), &config(8));

        drop(peer);

        tokio::time::timeout(Duration::from_secs(1), tasks.join())
            .await
            .expect("pumps should exit when the peer goes away");
        assert!(conn.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_probes_close_within_window() {
        let (transport, mut peer) = mock::pair();
        let cfg = config(8);
        let (conn, _tasks) =
            Connection::spawn(ConnId::new(1), transport, ConnMeta::default(), &cfg);

        let limit = cfg.liveness_window + cfg.heartbeat_period();
        tokio::time::timeout(limit, conn.closed())
            .await
            .expect("silent peer should be closed within window + probe interval");

        // The write pump did probe before giving up.
        assert_eq!(peer.next_frame().await, Some(Frame::Ping(Vec::new())));
    }

    #[tokio::test(start_paused = true)]
    async fn pongs_keep_connection_alive() {
        let (transport, mut peer) = mock::pair();
        let cfg = config(8);
        let (conn, _tasks) =
            Connection::spawn(ConnId::new(1), transport, ConnMeta::default(), &cfg);

        let responder = tokio::spawn(async move {
            while let Some(frame) = peer.next_frame().await {
                if let Frame::Ping(payload) = frame {
                    peer.send(Frame::Pong(payload));
                }
            }
        });

        tokio::time::sleep(cfg.liveness_window * 5).await;
        assert!(!conn.is_closed(), "answered probes should keep the connection open");

        conn.close();
        responder.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn data_alone_does_not_refresh_liveness() {
        let (transport, peer) = mock::pair();
        let cfg = config(64);
        let (conn, _tasks) =
            Connection::spawn(ConnId::new(1), transport, ConnMeta::default(), &cfg);

        let chatter = tokio::spawn(async move {
            loop {
                peer.send_data(b"noise");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });

        tokio::time::timeout(cfg.liveness_window * 2, conn.closed())
            .await
            .expect("data frames must not count as liveness acknowledgments");
        chatter.abort();
    }
}
