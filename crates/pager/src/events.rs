//! Deduplication cache for the user event stream.

use crate::source::UserEvent;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

#[derive(Debug, Clone)]
struct CachedEvent {
    event: UserEvent,
    last_seen: u64,
}

/// Remembers event ids seen on recent polls.
///
/// The event log returns a sliding window, so the same event shows up in
/// many consecutive responses. Entries are evicted once they have not been
/// re-observed for `retention_cycles` polls: by then the service has rotated
/// them out and they cannot come back.
#[derive(Debug)]
pub struct EventCache {
    entries: HashMap<String, CachedEvent>,
    cycle: u64,
    retention_cycles: u64,
}

impl EventCache {
    pub fn new(retention_cycles: u64) -> Self {
        Self {
            entries: HashMap::new(),
            cycle: 0,
            retention_cycles: retention_cycles.max(1),
        }
    }

    /// Record one poll's worth of events, returning the ones never seen before.
    pub fn observe(&mut self, events: Vec<UserEvent>) -> Vec<UserEvent> {
        self.cycle += 1;
        let cycle = self.cycle;

        let mut fresh = Vec::new();
        for event in events {
            match self.entries.entry(event.id.clone()) {
                Entry::Occupied(mut entry) => entry.get_mut().last_seen = cycle,
                Entry::Vacant(entry) => {
                    fresh.push(event.clone());
                    entry.insert(CachedEvent {
                        event,
                        last_seen: cycle,
                    });
                }
            }
        }

        let retention = self.retention_cycles;
        self.entries
            .retain(|_, cached| cycle - cached.last_seen < retention);

        fresh
    }

    pub fn get(&self, id: &str) -> Option<&UserEvent> {
        self.entries.get(id).map(|cached| &cached.event)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str) -> UserEvent {
        UserEvent {
            id: id.to_string(),
            name: "deploy".to_string(),
            payload: None,
            node_filter: String::new(),
            service_filter: String::new(),
            tag_filter: String::new(),
            version: 1,
            ltime: 0,
        }
    }

    #[test]
    fn test_repeated_events_are_ignored() {
        let mut cache = EventCache::new(8);

        let fresh = cache.observe(vec![event("a"), event("b")]);
        assert_eq!(fresh.len(), 2);

        let fresh = cache.observe(vec![event("a"), event("b"), event("c")]);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].id, "c");
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("c").map(|e| e.name.as_str()), Some("deploy"));
    }

    #[test]
    fn test_duplicates_within_one_batch() {
        let mut cache = EventCache::new(8);
        let fresh = cache.observe(vec![event("a"), event("a")]);
        assert_eq!(fresh.len(), 1);
    }

    #[test]
    fn test_unseen_entries_are_evicted() {
        let mut cache = EventCache::new(2);
        cache.observe(vec![event("old")]);
        cache.observe(vec![event("new")]);
        assert!(cache.contains("old"));

        // "old" has now missed two consecutive polls
        cache.observe(vec![event("new")]);
        assert!(!cache.contains("old"));
        assert!(cache.contains("new"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_reobserved_entries_stay() {
        let mut cache = EventCache::new(2);
        for _ in 0..10 {
            assert!(cache.observe(vec![event("steady")]).len() <= 1);
        }
        assert!(cache.contains("steady"));
    }

    #[test]
    fn test_zero_retention_keeps_current_poll() {
        let mut cache = EventCache::new(0);
        cache.observe(vec![event("a")]);
        assert!(cache.contains("a"));
        cache.observe(vec![]);
        assert!(cache.is_empty());
    }
}
