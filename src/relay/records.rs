//! Bounded map of forwarded messages.
//!
//! Maps source message ids to their destination counterparts. The map is
//! the edit-routing table and doubles as the duplicate-suppression set, so
//! its capacity is also the dedup horizon: once a record is evicted, a
//! repeat of that source id would be forwarded again.

use std::collections::{HashMap, VecDeque};

use crate::common::types::MessageId;

/// Source-to-destination message id records with oldest-first eviction.
#[derive(Debug)]
pub struct ForwardedRecords {
    capacity: usize,
    map: HashMap<MessageId, MessageId>,
    order: VecDeque<MessageId>,
}

impl ForwardedRecords {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Record a forwarded message, evicting the oldest record at capacity.
    pub fn insert(&mut self, source_id: MessageId, destination_id: MessageId) {
        if self.map.contains_key(&source_id) {
            self.map.insert(source_id, destination_id);
            return;
        }
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.map.remove(&evicted);
            }
        }
        self.order.push_back(source_id.clone());
        self.map.insert(source_id, destination_id);
    }

    pub fn contains(&self, source_id: &MessageId) -> bool {
        self.map.contains_key(source_id)
    }

    /// Destination id for an already-forwarded source message.
    pub fn get(&self, source_id: &MessageId) -> Option<&MessageId> {
        self.map.get(source_id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_after_insert() {
        let mut records = ForwardedRecords::new(8);
        records.insert("s1".to_string(), "d1".to_string());
        assert!(records.contains(&"s1".to_string()));
        assert_eq!(records.get(&"s1".to_string()), Some(&"d1".to_string()));
        assert_eq!(records.get(&"s2".to_string()), None);
    }

    #[test]
    fn test_oldest_record_evicted_at_capacity() {
        let mut records = ForwardedRecords::new(2);
        records.insert("s1".to_string(), "d1".to_string());
        records.insert("s2".to_string(), "d2".to_string());
        records.insert("s3".to_string(), "d3".to_string());

        assert_eq!(records.len(), 2);
        assert!(!records.contains(&"s1".to_string()));
        assert!(records.contains(&"s2".to_string()));
        assert!(records.contains(&"s3".to_string()));
    }

    #[test]
    fn test_reinsert_updates_without_eviction() {
        let mut records = ForwardedRecords::new(2);
        records.insert("s1".to_string(), "d1".to_string());
        records.insert("s2".to_string(), "d2".to_string());
        records.insert("s1".to_string(), "d1-new".to_string());

        assert_eq!(records.len(), 2);
        assert_eq!(records.get(&"s1".to_string()), Some(&"d1-new".to_string()));
        assert!(records.contains(&"s2".to_string()));
    }
}
