use std::collections::{HashSet, VecDeque};

use crate::transport::BusMessage;

pub const REPLAY_CACHE_CAP: usize = 2000;

/// Bounded FIFO set of recently seen message keys. Per-coordinator and
/// ephemeral; durable replay protection is the signed flag and the
/// signature-value comparison in the status document.
pub struct ReplayCache {
    seen: HashSet<String>,
    order: VecDeque<String>,
    cap: usize,
}

impl ReplayCache {
    pub fn new(cap: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            cap,
        }
    }

    /// Message identity: the explicit id when present, otherwise
    /// `{from}|{typ}|hash(body)`.
    pub fn message_key(message: &BusMessage) -> String {
        match &message.id {
            Some(id) => id.to_string(),
            None => {
                use crate::prefix::Prefix;
                let body = serde_json::to_string(&message.body).unwrap_or_default();
                format!(
                    "{}|{}|{}",
                    message.from.to_str(),
                    message.typ,
                    blake3::hash(body.as_bytes()).to_hex()
                )
            }
        }
    }

    /// Records a key; returns false when it was already present.
    pub fn insert(&mut self, key: String) -> bool {
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() >= self.cap {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.order.push_back(key.clone());
        self.seen.insert(key);
        true
    }
}

impl Default for ReplayCache {
    fn default() -> Self {
        Self::new(REPLAY_CACHE_CAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_keys_are_dropped() {
        let mut cache = ReplayCache::new(10);
        assert!(cache.insert("a".into()));
        assert!(!cache.insert("a".into()));
        assert!(cache.insert("b".into()));
    }

    #[test]
    fn eviction_is_fifo() {
        let mut cache = ReplayCache::new(2);
        cache.insert("a".into());
        cache.insert("b".into());
        cache.insert("c".into());
        // "a" was evicted, so it is fresh again
        assert!(cache.insert("a".into()));
        // "c" is still present
        assert!(!cache.insert("c".into()));
    }
}
