//! Write pump. Drains the outbound queue and sends liveness probes.

use std::sync::Arc;

use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::TransportError;
use crate::connection::{Connection, Outbound};
use crate::frame::Frame;

/// Writes queued frames in order and probes the peer on an idle timer.
///
/// Each cycle handles exactly one event: one queued frame or one probe.
/// Every write is bounded by the liveness window. Once the connection is
/// closed nothing else is written.
pub(crate) async fn write_pump<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<Outbound>,
    conn: Arc<Connection>,
) where
    S: Sink<Frame, Error = TransportError> + Unpin,
{
    let window = conn.liveness_window();
    let period = conn.heartbeat_period();
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            // Checked first so frames queued before close() are discarded.
            _ = conn.closed() => break,

            _ = heartbeat.tick() => {
                if let Err(e) = write_frame(&mut sink, Frame::Ping(Vec::new()), window).await {
                    warn!("liveness probe failed: {e}");
                    break;
                }
                trace!("sent liveness probe");
            }

            item = outbound.recv() => {
                let frame = match item {
                    Some(Outbound::Data(data)) => Frame::Data(data),
                    Some(Outbound::Pong(payload)) => Frame::Pong(payload),
                    Some(Outbound::Close) => {
                        debug!("close requested, write pump stopping");
                        break;
                    }
                    None => {
                        debug!("outbound queue closed");
                        break;
                    }
                };
                if let Err(e) = write_frame(&mut sink, frame, window).await {
                    warn!("transport write failed: {e}");
                    break;
                }
            }
        }
    }

    conn.close();
    // Best-effort close of the transport.
    let _ = tokio::time::timeout(window, sink.close()).await;
    debug!("write pump exited");
}

async fn write_frame<S>(
    sink: &mut S,
    frame: Frame,
    deadline: std::time::Duration,
) -> Result<(), TransportError>
where
    S: Sink<Frame, Error = TransportError> + Unpin,
{
    match tokio::time::timeout(deadline, sink.send(frame)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "write deadline exceeded",
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::connection::{ConnConfig, ConnId, ConnMeta};
    use crate::mock;

    fn config() -> ConnConfig {
        ConnConfig {
            pending_read: 8,
            pending_write: 8,
            max_message_size: 1024,
            liveness_window: Duration::from_secs(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn probe_sent_after_nine_tenths_of_window() {
        let (transport, mut peer) = mock::pair();
        let (conn, _tasks) =
            Connection::spawn(ConnId::new(1), transport, ConnMeta::default(), &config());

        let start = Instant::now();
        assert_eq!(peer.next_frame().await, Some(Frame::Ping(Vec::new())));
        assert_eq!(start.elapsed(), Duration::from_secs(9));
        conn.close();
    }

    #[tokio::test]
    async fn write_failure_closes_connection() {
        let (transport, peer) = mock::pair();
        let (conn, tasks) =
            Connection::spawn(ConnId::new(1), transport, ConnMeta::default(), &config());

        peer.fail_writes();
        conn.send(b"doomed".to_vec()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), tasks.join())
            .await
            .expect("pumps should exit after a write failure");
        assert!(conn.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failure_closes_connection() {
        let (transport, peer) = mock::pair();
        let cfg = config();
        let (conn, _tasks) =
            Connection::spawn(ConnId::new(1), transport, ConnMeta::default(), &cfg);

        peer.fail_writes();
        tokio::time::timeout(cfg.heartbeat_period() + Duration::from_millis(1), conn.closed())
            .await
            .expect("failed probe should close the connection");
    }

    #[tokio::test]
    async fn queued_frames_interleave_with_pongs_in_queue_order() {
        let (transport, mut peer) = mock::pair();
        let (conn, _tasks) =
            Connection::spawn(ConnId::new(1), transport, ConnMeta::default(), &config());

        conn.send(b"one".to_vec()).unwrap();
        conn.enqueue_pong(b"p".to_vec());
        conn.send(b"two".to_vec()).unwrap();

        assert_eq!(peer.next_frame().await, Some(Frame::Data(b"one".to_vec())));
        assert_eq!(peer.next_frame().await, Some(Frame::Pong(b"p".to_vec())));
        assert_eq!(peer.next_frame().await, Some(Frame::Data(b"two".to_vec())));
        conn.close();
    }

    #[tokio::test]
    async fn close_discards_queued_frames() {
        for _ in 0..20 {
            let (transport, mut peer) = mock::pair();
            let (conn, outbound_rx) =
                Connection::new(ConnId::new(1), ConnMeta::default(), &config());

            for i in 0..8u8 {
                conn.send(vec![i]).unwrap();
            }
            conn.close();

            let tasks = conn.start_pumps(transport, outbound_rx);
            tokio::time::timeout(Duration::from_secs(1), tasks.join())
                .await
                .expect("pumps should exit on a closed connection");

            while let Some(frame) = peer.next_frame().await {
                assert!(
                    !matches!(frame, Frame::Data(_)),
                    "data written after close: {frame:?}"
                );
            }
        }
    }
}
