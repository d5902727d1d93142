//! # Delivery Deduplication
//!
//! At-least-once transports re-deliver; receivers must treat a repeated
//! `message_id` as a no-op. The window is bounded in both time and entry
//! count so a chatty peer cannot grow it without limit.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Bounded, time-windowed set of recently seen message ids.
pub struct DeliveryWindow {
    seen: HashMap<Uuid, Instant>,
    window: Duration,
    max_entries: usize,
    last_sweep: Instant,
}

impl DeliveryWindow {
    /// Sweep no more often than this.
    const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

    #[must_use]
    pub fn new(window: Duration, max_entries: usize) -> Self {
        Self {
            seen: HashMap::new(),
            window,
            max_entries: max_entries.max(1),
            last_sweep: Instant::now(),
        }
    }

    /// Record `message_id`; returns `true` if it is fresh, `false` if it was
    /// already delivered within the window.
    pub fn observe(&mut self, message_id: Uuid) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_sweep) > Self::SWEEP_INTERVAL {
            self.sweep(now);
            self.last_sweep = now;
        }

        if self.seen.contains_key(&message_id) {
            return false;
        }

        if self.seen.len() >= self.max_entries {
            // Window full: drop the oldest entry. Losing dedup on the
            // oldest id is acceptable; handlers are idempotent anyway.
            if let Some(oldest) = self
                .seen
                .iter()
                .min_by_key(|(_, seen_at)| **seen_at)
                .map(|(id, _)| *id)
            {
                self.seen.remove(&oldest);
            }
        }

        self.seen.insert(message_id, now);
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn sweep(&mut self, now: Instant) {
        let window = self.window;
        self.seen
            .retain(|_, seen_at| now.duration_since(*seen_at) <= window);
    }
}

impl Default for DeliveryWindow {
    fn default() -> Self {
        Self::new(Duration::from_secs(300), 10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_then_duplicate() {
        let mut window = DeliveryWindow::default();
        let id = Uuid::new_v4();
        assert!(window.observe(id));
        assert!(!window.observe(id));
    }

    #[test]
    fn test_distinct_ids_are_fresh() {
        let mut window = DeliveryWindow::default();
        assert!(window.observe(Uuid::new_v4()));
        assert!(window.observe(Uuid::new_v4()));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_entry_cap_evicts_oldest() {
        let mut window = DeliveryWindow::new(Duration::from_secs(300), 3);
        let first = Uuid::new_v4();
        assert!(window.observe(first));
        for _ in 0..3 {
            assert!(window.observe(Uuid::new_v4()));
        }
        assert_eq!(window.len(), 3);
        // The first id aged out of the bounded window, so it reads as fresh
        // again; idempotent handlers absorb this.
        assert!(window.observe(first));
    }
}
