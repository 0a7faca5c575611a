//! Acknowledgment correlator.
//!
//! Pairs an outgoing ack request (`42<id>[...]`) with the reply
//! (`43<id>[...]`) that arrives later on the inbound loop. Each request gets
//! a fresh id and a one-shot reply slot; the slot is removed on resolution or
//! on timeout, whichever comes first.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use socketio_channel::ack::Correlator;
//!
//! # tokio_test_block_on(async {
//! let correlator = Correlator::new();
//! let (id, waiter) = correlator.register();
//! correlator.resolve(id, "\"pong\"".to_string());
//! let reply = correlator.await_reply(id, waiter, Duration::from_secs(1)).await.unwrap();
//! assert_eq!(reply, "\"pong\"");
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(f)
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{ChannelError, Result};

/// Receiving half of a registered reply slot.
pub type ReplyWaiter = oneshot::Receiver<String>;

/// Outstanding acknowledgment requests of one channel.
#[derive(Debug, Default)]
pub struct Correlator {
    last_id: AtomicU64,
    waiters: Mutex<HashMap<u64, oneshot::Sender<String>>>,
}

impl Correlator {
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reply slot under a fresh correlation id.
    ///
    /// Must happen before the request frame is sent so a fast reply cannot
    /// arrive ahead of its waiter.
    pub fn register(&self) -> (u64, ReplyWaiter) {
        let id = self.last_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(id, tx);
        (id, rx)
    }

    /// Wait for the reply to `id`.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::Timeout`] if no reply arrived within `timeout`
    /// - [`ChannelError::ConnectionClosed`] if the slot was cancelled
    pub async fn await_reply(
        &self,
        id: u64,
        waiter: ReplyWaiter,
        timeout: Duration,
    ) -> Result<String> {
        match tokio::time::timeout(timeout, waiter).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => Err(ChannelError::ConnectionClosed),
            Err(_) => {
                self.cancel(id);
                Err(ChannelError::Timeout)
            }
        }
    }

    /// Deliver a reply. Returns `false` when nobody waits for `id`
    /// (never registered, already resolved, or timed out).
    pub fn resolve(&self, id: u64, payload: String) -> bool {
        let waiter = self.waiters.lock().remove(&id);
        match waiter {
            // the receiver may have timed out between remove and send
            Some(tx) => tx.send(payload).is_ok(),
            None => {
                tracing::debug!("Dropping ack {} with no waiter", id);
                false
            }
        }
    }

    /// Discard the reply slot for `id`.
    pub fn cancel(&self, id: u64) {
        self.waiters.lock().remove(&id);
    }

    /// Discard every reply slot. Pending waiters fail with
    /// [`ChannelError::ConnectionClosed`]. Returns the number discarded.
    pub fn cancel_all(&self) -> usize {
        let mut waiters = self.waiters.lock();
        let count = waiters.len();
        waiters.clear();
        count
    }

    /// Number of outstanding requests.
    pub fn pending(&self) -> usize {
        self.waiters.lock().len()
    }
}
