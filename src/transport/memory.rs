//! In-process connection pair.
//!
//! Both ends share one close flag: closing either side fails pending and
//! future reads and writes on both. Each end counts its writes and `close`
//! calls, which makes it handy for asserting teardown behaviour.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use socketio_channel::transport::{Connection, MemoryConnection};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let (a, b) = MemoryConnection::pair(Duration::from_secs(25), Duration::from_secs(60));
//! a.write_message("2".to_string()).await.unwrap();
//! assert_eq!(b.read_message().await.unwrap(), "2");
//! # });
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};

use super::{BoxFuture, Connection};
use crate::error::{ChannelError, Result};

/// Default number of frames buffered per direction.
pub const DEFAULT_MEMORY_BUFFER: usize = 1024;

/// One end of an in-memory connection.
pub struct MemoryConnection {
    tx: mpsc::Sender<String>,
    rx: Mutex<mpsc::Receiver<String>>,
    closed: Arc<watch::Sender<bool>>,
    ping_interval: Duration,
    ping_timeout: Duration,
    writes: AtomicUsize,
    closes: AtomicUsize,
}

impl MemoryConnection {
    /// Create a connected pair with the default buffer size.
    pub fn pair(ping_interval: Duration, ping_timeout: Duration) -> (Self, Self) {
        Self::pair_with_buffer(DEFAULT_MEMORY_BUFFER, ping_interval, ping_timeout)
    }

    /// Create a connected pair buffering at most `buffer` frames per direction.
    ///
    /// Writes wait while the peer's buffer is full.
    pub fn pair_with_buffer(
        buffer: usize,
        ping_interval: Duration,
        ping_timeout: Duration,
    ) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(buffer);
        let (b_tx, a_rx) = mpsc::channel(buffer);
        let (closed, _) = watch::channel(false);
        let closed = Arc::new(closed);

        let end = |tx, rx| Self {
            tx,
            rx: Mutex::new(rx),
            closed: closed.clone(),
            ping_interval,
            ping_timeout,
            writes: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        };

        (end(a_tx, a_rx), end(b_tx, b_rx))
    }

    /// Number of successful `write_message` calls on this end.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Acquire)
    }

    /// Number of `close` calls on this end.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::Acquire)
    }

    /// Check if the pair was closed from either side.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

impl Connection for MemoryConnection {
    fn read_message(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let mut closed = self.closed.subscribe();
            if *closed.borrow() {
                return Err(ChannelError::ConnectionClosed);
            }

            let mut rx = self.rx.lock().await;
            tokio::select! {
                frame = rx.recv() => frame.ok_or(ChannelError::ConnectionClosed),
                _ = closed.wait_for(|closed| *closed) => Err(ChannelError::ConnectionClosed),
            }
        })
    }

    fn write_message(&self, frame: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut closed = self.closed.subscribe();
            if *closed.borrow() {
                return Err(ChannelError::ConnectionClosed);
            }

            tokio::select! {
                sent = self.tx.send(frame) => {
                    sent.map_err(|_| ChannelError::ConnectionClosed)?;
                    self.writes.fetch_add(1, Ordering::AcqRel);
                    Ok(())
                }
                _ = closed.wait_for(|closed| *closed) => Err(ChannelError::ConnectionClosed),
            }
        })
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::AcqRel);
        self.closed.send_replace(true);
    }

    fn ping_params(&self) -> (Duration, Duration) {
        (self.ping_interval, self.ping_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (MemoryConnection, MemoryConnection) {
        MemoryConnection::pair(Duration::from_secs(25), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_frames_cross_in_order() {
        let (a, b) = pair();

        a.write_message("1st".to_string()).await.unwrap();
        a.write_message("2nd".to_string()).await.unwrap();
        b.write_message("back".to_string()).await.unwrap();

        assert_eq!(b.read_message().await.unwrap(), "1st");
        assert_eq!(b.read_message().await.unwrap(), "2nd");
        assert_eq!(a.read_message().await.unwrap(), "back");
        assert_eq!(a.write_count(), 2);
        assert_eq!(b.write_count(), 1);
    }

    #[tokio::test]
    async fn test_close_fails_both_sides() {
        let (a, b) = pair();

        a.close();

        assert!(b.is_closed());
        assert!(matches!(
            b.read_message().await,
            Err(ChannelError::ConnectionClosed)
        ));
        assert!(matches!(
            b.write_message("x".to_string()).await,
            Err(ChannelError::ConnectionClosed)
        ));
        assert_eq!(a.close_count(), 1);
        assert_eq!(b.close_count(), 0);
    }

    #[tokio::test]
    async fn test_close_wakes_pending_read() {
        let (a, b) = pair();
        let a = Arc::new(a);

        let reader = a.clone();
        let task = tokio::spawn(async move { reader.read_message().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        b.close();

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ChannelError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_full_buffer_blocks_writer() {
        let (a, _b) =
            MemoryConnection::pair_with_buffer(1, Duration::from_secs(1), Duration::from_secs(1));

        a.write_message("fits".to_string()).await.unwrap();

        let blocked =
            tokio::time::timeout(Duration::from_millis(20), a.write_message("waits".to_string()))
                .await;
        assert!(blocked.is_err());
        assert_eq!(a.write_count(), 1);
    }

    #[test]
    fn test_ping_params() {
        let (a, _b) = pair();
        assert_eq!(
            a.ping_params(),
            (Duration::from_secs(25), Duration::from_secs(60))
        );
    }
}
