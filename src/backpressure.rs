//! Backpressure detection for the outbound queue.
//!
//! The outbound loop classifies the queue depth before every dequeue:
//!
//! - **Normal**: at most half full, the channel is not backpressured.
//! - **Elevated**: more than half full, the channel is recorded in the
//!   [`OverflowRegistry`] so operators can see it.
//! - **Saturated**: one slot or less left, the channel is closed with
//!   [`ChannelError::Overflow`](crate::ChannelError::Overflow).
//!
//! The registry is purely observational and never owns a channel.

use std::collections::HashSet;

use parking_lot::Mutex;

/// Outbound queue pressure level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pressure {
    /// Depth ≤ capacity / 2.
    Normal,
    /// Depth > capacity / 2.
    Elevated,
    /// Depth ≥ capacity - 1.
    Saturated,
}

/// Classify a queue depth against its capacity.
#[inline]
pub fn classify(depth: usize, capacity: usize) -> Pressure {
    if depth >= capacity.saturating_sub(1) {
        Pressure::Saturated
    } else if depth > capacity / 2 {
        Pressure::Elevated
    } else {
        Pressure::Normal
    }
}

/// Set of channels whose outbound queue is currently backpressured.
///
/// Share one instance between channels through an `Arc`; each test can use
/// its own.
#[derive(Debug, Default)]
pub struct OverflowRegistry {
    channels: Mutex<HashSet<u64>>,
}

impl OverflowRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a channel as backpressured.
    pub fn insert(&self, channel_id: u64) {
        self.channels.lock().insert(channel_id);
    }

    /// Clear a channel's backpressure mark, if any.
    pub fn remove(&self, channel_id: u64) {
        self.channels.lock().remove(&channel_id);
    }

    /// Check whether a channel is marked.
    pub fn contains(&self, channel_id: u64) -> bool {
        self.channels.lock().contains(&channel_id)
    }

    /// Number of backpressured channels.
    pub fn count(&self) -> usize {
        self.channels.lock().len()
    }

    /// Apply a classification result for a channel.
    pub(crate) fn observe(&self, channel_id: u64, pressure: Pressure) {
        match pressure {
            Pressure::Elevated => self.insert(channel_id),
            Pressure::Normal => self.remove(channel_id),
            // the channel is about to close, teardown removes it
            Pressure::Saturated => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_classify_thresholds_at_500() {
        assert_eq!(classify(0, 500), Pressure::Normal);
        assert_eq!(classify(250, 500), Pressure::Normal);
        assert_eq!(classify(251, 500), Pressure::Elevated);
        assert_eq!(classify(498, 500), Pressure::Elevated);
        assert_eq!(classify(499, 500), Pressure::Saturated);
        assert_eq!(classify(500, 500), Pressure::Saturated);
    }

    #[test]
    fn test_classify_odd_capacity() {
        // capacity / 2 rounds down
        assert_eq!(classify(5, 11), Pressure::Normal);
        assert_eq!(classify(6, 11), Pressure::Elevated);
        assert_eq!(classify(10, 11), Pressure::Saturated);
    }

    #[test]
    fn test_classify_tiny_capacity() {
        assert_eq!(classify(0, 1), Pressure::Saturated);
        assert_eq!(classify(0, 2), Pressure::Normal);
        assert_eq!(classify(1, 2), Pressure::Saturated);
    }

    #[test]
    fn test_registry_insert_remove() {
        let registry = OverflowRegistry::new();
        assert_eq!(registry.count(), 0);

        registry.insert(1);
        registry.insert(2);
        registry.insert(1);
        assert_eq!(registry.count(), 2);
        assert!(registry.contains(1));

        registry.remove(1);
        assert!(!registry.contains(1));
        assert_eq!(registry.count(), 1);

        // removing an absent id is fine
        registry.remove(42);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_registry_observe() {
        let registry = OverflowRegistry::new();

        registry.observe(7, Pressure::Elevated);
        assert!(registry.contains(7));

        registry.observe(7, Pressure::Saturated);
        assert!(registry.contains(7));

        registry.observe(7, Pressure::Normal);
        assert!(!registry.contains(7));
    }

    #[test]
    fn test_registry_shared_across_threads() {
        let registry = Arc::new(OverflowRegistry::new());

        let handles: Vec<_> = (0..8u64)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.insert(i))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(registry.count(), 8);
    }
}
