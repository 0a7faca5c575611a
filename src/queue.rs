//! Bounded outbound frame queue.
//!
//! Unlike `tokio::sync::mpsc`, this queue lets a party other than the
//! consumer observe its depth, discard its contents and close it. Teardown
//! needs all three: it empties the queue, leaves a single stop sentinel for
//! the outbound loop and rejects any later push.
//!
//! ```text
//! emit/ack ─┐
//! pinger   ─┼─► FrameQueue (cap N) ─► outbound loop ─► Connection
//! pong     ─┘
//! ```
//!
//! The queue supports many producers and exactly one consumer.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{ChannelError, Result};

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded multi-producer, single-consumer FIFO.
pub struct FrameQueue<T> {
    state: Mutex<State<T>>,
    capacity: usize,
    notify: Notify,
}

impl<T> FrameQueue<T> {
    /// Create a queue holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            notify: Notify::new(),
        }
    }

    /// Maximum number of queued items.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current depth.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Check if the queue was closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Append an item without waiting.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::Overflow`] if the queue is full
    /// - [`ChannelError::ConnectionClosed`] if the queue was closed
    pub fn try_push(&self, item: T) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(ChannelError::ConnectionClosed);
            }
            if state.items.len() >= self.capacity {
                return Err(ChannelError::Overflow);
            }
            state.items.push_back(item);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Discard everything queued, leave `sentinel` as the only item and
    /// reject further pushes. Returns the number of discarded items.
    ///
    /// The consumer still receives the sentinel, then `None`.
    pub fn close_with(&self, sentinel: T) -> usize {
        let discarded = {
            let mut state = self.state.lock();
            let discarded = state.items.len();
            state.items.clear();
            state.items.push_back(sentinel);
            state.closed = true;
            discarded
        };
        self.notify.notify_one();
        discarded
    }

    /// Wait for the next item. Returns `None` once the queue is closed and empty.
    pub async fn pop(&self) -> Option<T> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            // notify_one stores a permit when nobody waits, so a push between
            // the check above and this await is not lost
            self.notify.notified().await;
        }
    }
}
