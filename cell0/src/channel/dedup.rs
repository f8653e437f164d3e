//! Bounded replay-window de-duplication against `channelMessageId` (spec
//! §4.1 "Adapter is responsible for de-duplication ... within a bounded
//! replay window").

use std::collections::VecDeque;
use std::sync::Mutex;

pub struct DedupWindow {
    capacity: usize,
    seen: Mutex<(VecDeque<String>, std::collections::HashSet<String>)>,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seen: Mutex::new((VecDeque::new(), std::collections::HashSet::new())),
        }
    }

    /// Returns `true` the first time `message_id` is seen within the
    /// window; `false` for a duplicate. Evicts the oldest id once the
    /// window is full.
    pub fn observe(&self, message_id: &str) -> bool {
        let mut guard = self.seen.lock().unwrap();
        let (order, set) = &mut *guard;
        if set.contains(message_id) {
            return false;
        }
        if order.len() >= self.capacity {
            if let Some(oldest) = order.pop_front() {
                set.remove(&oldest);
            }
        }
        order.push_back(message_id.to_string());
        set.insert(message_id.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_within_window_is_rejected() {
        let window = DedupWindow::new(4);
        assert!(window.observe("m1"));
        assert!(!window.observe("m1"));
    }

    #[test]
    fn eviction_allows_reobservation_after_window_slides() {
        let window = DedupWindow::new(2);
        assert!(window.observe("m1"));
        assert!(window.observe("m2"));
        assert!(window.observe("m3")); // evicts m1
        assert!(window.observe("m1")); // seen again, window slid past it
    }
}
