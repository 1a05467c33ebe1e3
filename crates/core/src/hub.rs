//! Live fan-out of newly recorded operations.
//!
//! Each branch gets its own `tokio::sync::broadcast` channel, created when
//! the first listener subscribes. Publishing never blocks: a listener that
//! falls more than `capacity` messages behind loses the oldest ones and is
//! told how many it missed. Dropping a [`Subscription`] cancels it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::operation::Operation;
use crate::oplog::branch_key;

/// Default per-branch buffer size.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Per-branch broadcast channels.
#[derive(Debug)]
pub struct OperationHub {
    channels: Mutex<HashMap<String, broadcast::Sender<Operation>>>,
    capacity: usize,
}

impl Default for OperationHub {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl OperationHub {
    /// `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<Operation>>> {
        self.channels.lock().unwrap_or_else(|poisoned| {
            warn!("hub mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Start listening to operations published on `branch`.
    pub fn subscribe(&self, branch: &str) -> Subscription {
        let mut channels = self.channels();
        let sender = channels
            .entry(branch_key(branch))
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        debug!(branch, listeners = sender.receiver_count() + 1, "listener subscribed");
        Subscription {
            branch: branch.to_string(),
            receiver: sender.subscribe(),
        }
    }

    /// Deliver `operation` to every live listener of `branch`. Returns the
    /// number of listeners it was handed to.
    pub fn publish(&self, branch: &str, operation: &Operation) -> usize {
        let key = branch_key(branch);
        let mut channels = self.channels();
        let Some(sender) = channels.get(&key) else {
            return 0;
        };

        match sender.send(operation.clone()) {
            Ok(count) => {
                debug!(branch, op = %operation.id, listeners = count, "published operation");
                count
            }
            Err(_) => {
                // Every listener is gone; release the channel.
                channels.remove(&key);
                debug!(branch, "no listeners left, channel released");
                0
            }
        }
    }

    /// Number of live listeners on `branch`.
    pub fn listener_count(&self, branch: &str) -> usize {
        self.channels()
            .get(&branch_key(branch))
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A live listener on one branch.
#[derive(Debug)]
pub struct Subscription {
    branch: String,
    receiver: broadcast::Receiver<Operation>,
}

impl Subscription {
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Wait for the next operation. Returns `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<Operation> {
        loop {
            match self.receiver.recv().await {
                Ok(op) => return Some(op),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(branch = %self.branch, missed, "listener lagged, operations dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// The next already-buffered operation, without waiting.
    pub fn try_recv(&mut self) -> Option<Operation> {
        loop {
            match self.receiver.try_recv() {
                Ok(op) => return Some(op),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!(branch = %self.branch, missed, "listener lagged, operations dropped");
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::PropertyValue;

    fn op(value: i64) -> Operation {
        Operation::set_property("e1", "n", PropertyValue::integer(value))
    }

    #[test]
    fn test_publish_without_listeners_is_noop() {
        let hub = OperationHub::default();
        assert_eq!(hub.publish("alice", &op(1)), 0);
        assert_eq!(hub.listener_count("alice"), 0);
    }

    #[tokio::test]
    async fn test_listener_receives_in_order() {
        let hub = OperationHub::default();
        let mut sub = hub.subscribe("alice");
        let first = op(1);
        let second = op(2);

        assert_eq!(hub.publish("ALICE", &first), 1);
        hub.publish("alice", &second);
        hub.publish("bob", &op(3));

        assert_eq!(sub.recv().await.unwrap().id, first.id);
        assert_eq!(sub.recv().await.unwrap().id, second.id);
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_slow_listener_drops_oldest() {
        let hub = OperationHub::new(2);
        let mut sub = hub.subscribe("alice");
        let ops: Vec<Operation> = (0..4).map(op).collect();
        for o in &ops {
            hub.publish("alice", o);
        }

        assert_eq!(sub.try_recv().unwrap().id, ops[2].id);
        assert_eq!(sub.try_recv().unwrap().id, ops[3].id);
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_dropping_subscription_releases_channel() {
        let hub = OperationHub::default();
        let sub = hub.subscribe("alice");
        assert_eq!(hub.listener_count("alice"), 1);
        drop(sub);
        assert_eq!(hub.listener_count("alice"), 0);
        assert_eq!(hub.publish("alice", &op(1)), 0);
    }
}
