//! Replicated message log
//!
//! Merges messages arriving from any transport into one ordered,
//! duplicate-free sequence. Messages are immutable, so merging is a pure
//! set union keyed by message id; the first copy of an id wins.
//!
//! Ordering is by `(timestamp, id)` using author wall clocks. Clock skew
//! between clients is not corrected.

use std::collections::{BTreeMap, HashMap};

use crate::model::{Message, MessageId};

/// Ordered, de-duplicated set of messages
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    /// Messages keyed by their replicated order
    entries: BTreeMap<(u64, MessageId), Message>,

    /// Retained ids, mapped to their timestamp
    ids: HashMap<MessageId, u64>,

    /// Newest key evicted so far; nothing at or below it is accepted again
    watermark: Option<(u64, MessageId)>,

    /// Retain at most this many messages (oldest evicted first)
    capacity: Option<usize>,
}

impl MessageLog {
    /// Create an unbounded log
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log that keeps only the newest `capacity` messages
    ///
    /// Eviction only moves a watermark forward, so a late duplicate of an
    /// evicted message is still rejected without remembering its id. A
    /// message ordered below the watermark would be evicted at once and is
    /// rejected the same way.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            ..Self::default()
        }
    }

    /// Append a message. Returns `false` if its id is already known.
    pub fn append(&mut self, message: Message) -> bool {
        if self.ids.contains_key(&message.id) {
            return false;
        }
        if let Some((ts, id)) = &self.watermark {
            if (message.timestamp, &message.id) <= (*ts, id) {
                return false;
            }
        }

        self.ids.insert(message.id.clone(), message.timestamp);
        self.entries
            .insert((message.timestamp, message.id.clone()), message);
        self.evict();
        true
    }

    /// Union a batch of messages into the log
    ///
    /// Returns the messages that were new, in replicated order.
    pub fn merge<I>(&mut self, messages: I) -> Vec<Message>
    where
        I: IntoIterator<Item = Message>,
    {
        let mut added = Vec::new();
        for message in messages {
            if self.append(message.clone()) {
                added.push(message);
            }
        }
        added.sort_by(|a, b| a.order_cmp(b));
        added
    }

    /// Whether an id is retained
    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains_key(id)
    }

    /// Look up a retained message by id
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        let ts = *self.ids.get(id)?;
        self.entries.get(&(ts, id.clone()))
    }

    /// All retained messages in replicated order
    pub fn snapshot(&self) -> Vec<Message> {
        self.entries.values().cloned().collect()
    }

    /// Retained messages with a timestamp strictly after `timestamp`
    pub fn since(&self, timestamp: u64) -> Vec<Message> {
        self.entries
            .range((timestamp.saturating_add(1), MessageId::new(""))..)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Timestamp of the newest retained message
    pub fn last_timestamp(&self) -> Option<u64> {
        self.entries.keys().next_back().map(|(ts, _)| *ts)
    }

    /// Number of retained messages
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget everything, including known ids
    pub fn clear(&mut self) {
        self.entries.clear();
        self.ids.clear();
        self.watermark = None;
    }

    fn evict(&mut self) {
        if let Some(capacity) = self.capacity {
            while self.entries.len() > capacity {
                let Some((key, message)) = self.entries.pop_first() else {
                    break;
                };
                self.ids.remove(&message.id);
                self.watermark = Some(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Participant;

    fn msg(client: &str, body: &str, ts: u64) -> Message {
        let author = Participant::new(client, client);
        Message::compose(client, &author, body, ts)
    }

    #[test]
    fn test_append_dedup() {
        let mut log = MessageLog::new();
        assert!(log.append(msg("A", "hello", 100)));
        assert!(!log.append(msg("A", "hello", 100)));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_first_copy_wins() {
        let mut log = MessageLog::new();
        log.append(msg("A", "original", 100));

        let mut tampered = msg("A", "edited", 100);
        tampered.author = "Mallory".into();
        assert!(!log.append(tampered));

        let stored = log.get(&MessageId::new("A:100")).unwrap();
        assert_eq!(stored.body, "original");
    }

    #[test]
    fn test_two_client_example() {
        let mut replica_a = MessageLog::new();
        let mut replica_b = MessageLog::new();

        let hello = msg("A", "hello", 100);
        let hi = msg("B", "hi", 101);

        // Each replica sees its own message first
        replica_a.append(hello.clone());
        replica_b.append(hi.clone());
        replica_a.merge(vec![hi.clone()]);
        replica_b.merge(vec![hello.clone()]);

        let a = replica_a.snapshot();
        let b = replica_b.snapshot();
        assert_eq!(a, b);
        assert_eq!(a[0].id.as_str(), "A:100");
        assert_eq!(a[0].body, "hello");
        assert_eq!(a[1].id.as_str(), "B:101");
        assert_eq!(a[1].body, "hi");
    }

    #[test]
    fn test_merge_order_independent() {
        let batch: Vec<Message> = (0..20)
            .map(|i| msg(if i % 2 == 0 { "A" } else { "B" }, "x", 1000 + (i * 7) % 13))
            .collect();

        let mut forward = MessageLog::new();
        forward.merge(batch.clone());

        let mut reverse = MessageLog::new();
        reverse.merge(batch.iter().rev().cloned());
        // Redelivery adds nothing
        assert!(reverse.merge(batch.clone()).is_empty());

        assert_eq!(forward.snapshot(), reverse.snapshot());
    }

    #[test]
    fn test_merge_returns_new_in_order() {
        let mut log = MessageLog::new();
        log.append(msg("A", "one", 10));

        let added = log.merge(vec![msg("B", "three", 30), msg("A", "one", 10), msg("C", "two", 20)]);
        let ids: Vec<_> = added.iter().map(|m| m.id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["C:20", "B:30"]);
    }

    #[test]
    fn test_since() {
        let mut log = MessageLog::new();
        log.merge(vec![msg("A", "a", 10), msg("B", "b", 20), msg("C", "c", 20), msg("D", "d", 30)]);

        let newer = log.since(20);
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].body, "d");
        assert_eq!(log.since(0).len(), 4);
        assert_eq!(log.last_timestamp(), Some(30));
    }

    #[test]
    fn test_capacity_evicts_oldest_and_rejects_late_duplicates() {
        let mut log = MessageLog::with_capacity(2);
        log.append(msg("A", "1", 1));
        log.append(msg("A", "2", 2));
        log.append(msg("A", "3", 3));

        assert_eq!(log.len(), 2);
        assert_eq!(log.snapshot()[0].body, "2");
        assert!(!log.append(msg("A", "1", 1)));
        assert!(!log.contains(&MessageId::new("A:1")));
    }

    #[test]
    fn test_bounded_log_forgets_evicted_ids() {
        let mut log = MessageLog::with_capacity(3);
        for ts in 1..=1000 {
            assert!(log.append(msg("A", "x", ts)));
        }

        assert_eq!(log.len(), 3);
        assert_eq!(log.ids.len(), 3);
        // Same timestamp as an evicted message, ordered after it by id
        assert!(log.append(msg("B", "late", 997)));
        assert!(!log.append(msg("A", "x", 997)));
        assert_eq!(log.ids.len(), log.len());

        log.clear();
        assert!(log.append(msg("A", "x", 1)));
    }
}
