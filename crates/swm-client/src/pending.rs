//! Pending-query table.
//!
//! Tracks outstanding requests by correlation id. Each entry owns the send
//! half of a per-query oneshot channel; the matching receive half is handed
//! to exactly one waiter at registration time, so a resolved reply is
//! delivered directly to its owner instead of being broadcast on a shared
//! mailbox.
//!
//! Pure bookkeeping, no I/O. The component wraps the table in a mutex shared
//! between the caller side (register) and the dispatcher task (resolve).

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::envelope::Envelope;
use crate::types::PeerId;

/// One outstanding request awaiting a correlated reply.
#[derive(Debug)]
pub struct PendingQuery {
    pub id: String,
    pub requester: PeerId,
    pub envelope: Envelope,
    pub created: Instant,
    reply_tx: oneshot::Sender<String>,
}

impl PendingQuery {
    /// Hand the resolved payload text to the waiter. Returns `false` if the
    /// waiter already gave up (dropped its receiver).
    pub fn deliver(self, payload_text: String) -> bool {
        self.reply_tx.send(payload_text).is_ok()
    }
}

/// A mutable collection of outstanding requests, keyed by correlation id.
///
/// Ids are generator-assigned UUIDs by convention, so at most one entry
/// exists per id at any time.
#[derive(Debug, Default)]
pub struct PendingQueryTable {
    entries: HashMap<String, PendingQuery>,
}

impl PendingQueryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending query and return the receive half of its reply
    /// channel. A duplicate id replaces the stale entry (its waiter sees the
    /// channel close) — ids are effectively globally unique, so this only
    /// happens when a caller reuses an id after abandoning the first wait.
    pub fn register(
        &mut self,
        id: String,
        requester: PeerId,
        envelope: Envelope,
    ) -> oneshot::Receiver<String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let previous = self.entries.insert(
            id.clone(),
            PendingQuery {
                id,
                requester,
                envelope,
                created: Instant::now(),
                reply_tx,
            },
        );
        if let Some(stale) = previous {
            tracing::warn!(id = %stale.id, "replacing pending query with duplicate id");
        }
        reply_rx
    }

    /// Remove and return the pending query matching `id`. A miss is not an
    /// error — nobody is waiting for that reply.
    pub fn resolve(&mut self, id: &str) -> Option<PendingQuery> {
        self.entries.remove(id)
    }

    /// Whether a query is still pending under `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Drop every remaining entry. Used only at component teardown: waiters
    /// still blocked on these ids observe their reply channel closing.
    /// Returns how many in-flight queries were discarded.
    pub fn drain_all(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    /// Drop entries whose waiter is gone (receiver dropped without a reply)
    /// or that have been pending longer than `max_age`. Called periodically
    /// by the dispatcher. Returns how many were evicted.
    pub fn evict_stale(&mut self, max_age: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, q| !q.reply_tx.is_closed() && q.created.elapsed() < max_age);
        before - self.entries.len()
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
    use serde_json::json;

    fn envelope(id: &str) -> Envelope {
        Envelope::request(json!({ "queryId": id, "query": "GET_ROOT_NODE" }))
    }

    #[test]
    fn register_and_resolve() {
        let mut table = PendingQueryTable::new();
        let requester = PeerId::random();
        let mut rx = table.register("q1".into(), requester, envelope("q1"));

        assert!(table.contains("q1"));
        assert_eq!(table.len(), 1);

        let query = table.resolve("q1").expect("entry present");
        assert_eq!(query.id, "q1");
        assert_eq!(query.requester, requester);
        assert!(table.is_empty());

        assert!(query.deliver(r#"{"queryId":"q1"}"#.into()));
        assert_eq!(rx.try_recv().unwrap(), r#"{"queryId":"q1"}"#);
    }

    #[test]
    fn resolve_miss_is_none() {
        let mut table = PendingQueryTable::new();
        assert!(table.resolve("nobody").is_none());
    }

    #[test]
    fn second_resolve_finds_nothing() {
        let mut table = PendingQueryTable::new();
        let _rx = table.register("q1".into(), PeerId::random(), envelope("q1"));
        assert!(table.resolve("q1").is_some());
        assert!(table.resolve("q1").is_none());
    }

    #[test]
    fn resolving_one_id_leaves_others_pending() {
        let mut table = PendingQueryTable::new();
        let _rx_a = table.register("a".into(), PeerId::random(), envelope("a"));
        let _rx_b = table.register("b".into(), PeerId::random(), envelope("b"));

        assert!(table.resolve("a").is_some());
        assert!(table.contains("b"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn drain_discards_everything() {
        let mut table = PendingQueryTable::new();
        let mut rx = table.register("q1".into(), PeerId::random(), envelope("q1"));
        let _rx2 = table.register("q2".into(), PeerId::random(), envelope("q2"));

        assert_eq!(table.drain_all(), 2);
        assert!(table.is_empty());
        // The waiter observes the channel closing, not a reply.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn evict_stale_keeps_live_waiters() {
        let mut table = PendingQueryTable::new();
        let rx_dead = table.register("dead".into(), PeerId::random(), envelope("dead"));
        let _rx_live = table.register("live".into(), PeerId::random(), envelope("live"));

        drop(rx_dead);
        assert_eq!(table.evict_stale(Duration::from_secs(3600)), 1);
        assert!(!table.contains("dead"));
        assert!(table.contains("live"));
    }

    #[tokio::test(start_paused = true)]
    async fn evict_stale_drops_old_entries() {
        let mut table = PendingQueryTable::new();
        let _rx = table.register("old".into(), PeerId::random(), envelope("old"));

        tokio::time::advance(Duration::from_secs(10)).await;
        let _rx2 = table.register("fresh".into(), PeerId::random(), envelope("fresh"));

        // Both waiters are alive; only the aged-out entry goes.
        assert_eq!(table.evict_stale(Duration::from_secs(5)), 1);
        assert!(!table.contains("old"));
        assert!(table.contains("fresh"));
    }

    #[test]
    fn delivery_to_dropped_waiter_reports_false() {
        let mut table = PendingQueryTable::new();
        let rx = table.register("q1".into(), PeerId::random(), envelope("q1"));
        drop(rx);
        let query = table.resolve("q1").unwrap();
        assert!(!query.deliver("{}".into()));
    }
}
