//! Fan-out of snapshot payloads to live WebSocket subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

/// Mutex-protected subscriber set plus the latest published snapshot.
/// Broadcasting snapshots the set under the lock, releases it, sends to
/// each subscriber, then prunes the dead ones under the lock again.
pub struct SignalHub {
    subscribers: Mutex<HashMap<u64, mpsc::UnboundedSender<String>>>,
    next_id: AtomicU64,
    latest: Mutex<Value>,
}

impl SignalHub {
    pub fn new() -> Self {
        SignalHub {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            latest: Mutex::new(Value::Null),
        }
    }

    /// Register a subscriber; the returned id is used to unsubscribe.
    pub fn subscribe(&self) -> (u64, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().unwrap().insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().unwrap().remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// The most recent snapshot, handed to new subscribers on connect.
    pub fn latest_snapshot(&self) -> Value {
        self.latest.lock().unwrap().clone()
    }

    pub fn set_latest(&self, payload: Value) {
        *self.latest.lock().unwrap() = payload;
    }

    /// Send one payload to every subscriber, dropping the ones whose
    /// receiving side is gone.
    pub fn broadcast(&self, payload: &Value) {
        let text = payload.to_string();

        let current: Vec<(u64, mpsc::UnboundedSender<String>)> = {
            let subscribers = self.subscribers.lock().unwrap();
            subscribers
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect()
        };

        let mut stale = Vec::new();
        for (id, tx) in current {
            if tx.send(text.clone()).is_err() {
                stale.push(id);
            }
        }

        if !stale.is_empty() {
            let mut subscribers = self.subscribers.lock().unwrap();
            for id in &stale {
                subscribers.remove(id);
            }
            debug!("pruned {} dead subscribers", stale.len());
        }
    }
}

impl Default for SignalHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_broadcast_reaches_live_subscribers() {
        let hub = SignalHub::new();
        let (_id_a, mut rx_a) = hub.subscribe();
        let (_id_b, mut rx_b) = hub.subscribe();

        hub.broadcast(&json!({"type": "snapshot", "n": 1}));

        assert_eq!(rx_a.try_recv().unwrap(), r#"{"n":1,"type":"snapshot"}"#);
        assert_eq!(rx_b.try_recv().unwrap(), r#"{"n":1,"type":"snapshot"}"#);
    }

    #[test]
    fn test_dead_subscribers_are_pruned() {
        let hub = SignalHub::new();
        let (_id_live, _rx_live) = hub.subscribe();
        let (_id_dead, rx_dead) = hub.subscribe();
        drop(rx_dead);

        assert_eq!(hub.subscriber_count(), 2);
        hub.broadcast(&json!({"type": "snapshot"}));
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[test]
    fn test_unsubscribe_removes_entry() {
        let hub = SignalHub::new();
        let (id, _rx) = hub.subscribe();
        hub.unsubscribe(id);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_latest_snapshot_roundtrip() {
        let hub = SignalHub::new();
        assert!(hub.latest_snapshot().is_null());
        hub.set_latest(json!({"type": "snapshot", "signals": []}));
        assert_eq!(hub.latest_snapshot()["type"], "snapshot");
    }
}
