use std::{collections::HashMap, time::{Duration, Instant}};

const MAX_ENTRIES: usize = 10_000;

/// TTL-based content dedup window for the ordered lane.
///
/// Keys are the envelope's dedup key (group id + event type + payload
/// bytes); a key seen within the window collapses the publish.
pub(crate) struct DedupWindow {
    entries: HashMap<String, Instant>,
    window: Duration,
}

impl DedupWindow {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            window,
        }
    }

    /// Returns true if the key is a duplicate (already seen within the window).
    pub(crate) fn check_and_insert(&mut self, key: &str) -> bool {
        self.evict_expired();
        if self.entries.contains_key(key) {
            return true;
        }
        if self.entries.len() >= MAX_ENTRIES
            && let Some(oldest_key) = self
                .entries
                .iter()
                .min_by_key(|(_, inserted)| **inserted)
                .map(|(k, _)| k.clone())
        {
            self.entries.remove(&oldest_key);
        }
        self.entries.insert(key.to_string(), Instant::now());
        false
    }

    fn evict_expired(&mut self) {
        let Some(cutoff) = Instant::now().checked_sub(self.window) else {
            return;
        };
        self.entries.retain(|_, inserted| *inserted > cutoff);
    }
}
