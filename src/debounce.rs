use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

struct Entry<A> {
    deadline: Instant,
    action: A,
}

/// Keyed trailing-edge debouncer polled by the event loop.
///
/// Scheduling under a key replaces whatever was pending for that key, so
/// only the last action of a burst survives. Due actions are handed back by
/// [`Debouncer::take_due`] and never returned twice.
pub struct Debouncer<K, A> {
    pending: HashMap<K, Entry<A>>,
}

impl<K, A> Default for Debouncer<K, A> {
    fn default() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone, A> Debouncer<K, A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, key: K, delay: Duration, action: A) {
        self.schedule_at(key, Instant::now(), delay, action);
    }

    pub fn schedule_at(&mut self, key: K, now: Instant, delay: Duration, action: A) {
        let deadline = now.checked_add(delay).unwrap_or(now);
        self.pending.insert(key, Entry { deadline, action });
    }

    /// Drops a pending action without running it. Returns whether one existed.
    pub fn cancel(&mut self, key: &K) -> bool {
        self.pending.remove(key).is_some()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|entry| entry.deadline).min()
    }

    pub fn take_due(&mut self, now: Instant) -> Vec<A> {
        let due_keys: Vec<K> = self
            .pending
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();

        let mut due: Vec<Entry<A>> = due_keys
            .iter()
            .filter_map(|key| self.pending.remove(key))
            .collect();
        due.sort_by_key(|entry| entry.deadline);
        due.into_iter().map(|entry| entry.action).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(300);

    #[test]
    fn burst_collapses_to_last_action() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new();
        debouncer.schedule_at("flows", start, DELAY, "c");
        debouncer.schedule_at("flows", start + Duration::from_millis(100), DELAY, "ca");
        debouncer.schedule_at("flows", start + Duration::from_millis(200), DELAY, "cat");

        assert!(debouncer.take_due(start + Duration::from_millis(450)).is_empty());
        assert_eq!(
            debouncer.take_due(start + Duration::from_millis(500)),
            vec!["cat"]
        );
        assert!(debouncer.take_due(start + Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn cancel_prevents_firing() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new();
        debouncer.schedule_at(1, start, DELAY, ());
        assert!(debouncer.cancel(&1));
        assert!(!debouncer.cancel(&1));
        assert!(debouncer.take_due(start + DELAY).is_empty());
        assert_eq!(debouncer.next_deadline(), None);
    }

    #[test]
    fn keys_are_independent() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new();
        debouncer.schedule_at("a", start, Duration::from_millis(200), 1);
        debouncer.schedule_at("b", start, Duration::from_millis(100), 2);
        assert_eq!(debouncer.next_deadline(), Some(start + Duration::from_millis(100)));
        assert_eq!(debouncer.take_due(start + Duration::from_millis(250)), vec![2, 1]);
    }
}
