//! Sub-topic consumer interface and the concurrent map that owns them
//!
//! A `ChildConsumer` is the single-partition (or single non-partitioned
//! topic) consumer: wire protocol, connection management and flow control
//! live behind this trait. The multi-topics consumer only coordinates them.

use crate::message::{Message, MessageId, SeekPosition};
use crate::stats::BrokerConsumerStats;
use crate::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

/// Whether a sub-topic backs a partition or a whole non-partitioned topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    /// The bare topic itself, no partition suffix
    NonPartitioned,
    /// One partition of a partitioned topic
    Partitioned,
}

/// Receiver of messages produced by sub-topic consumers
///
/// Held weakly by every child so that a torn-down parent never has its
/// lifetime extended by in-flight deliveries; a child that fails to upgrade
/// the handle drops the message.
#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    /// Deliver one message from `child` to the parent consumer
    async fn message_received(&self, child: Arc<dyn ChildConsumer>, msg: Message);
}

/// Options for creating one sub-topic consumer
pub struct ChildConsumerOptions {
    /// Full sub-topic name (bare topic or `{topic}-partition-{n}`)
    pub topic: String,
    /// Subscription name shared by all children of the parent consumer
    pub subscription: String,
    /// Partitioned or non-partitioned addressing
    pub kind: TopicKind,
    /// Receiver queue budget for this child, already divided across
    /// partitions by the parent
    pub receiver_queue_size: usize,
    /// Do not start dispatching messages until the listener is resumed
    pub start_paused: bool,
    /// Where the child delivers received messages
    pub dispatcher: Weak<dyn MessageDispatcher>,
}

/// Creates sub-topic consumers on behalf of the multi-topics consumer
pub trait ChildConsumerFactory: Send + Sync {
    /// Construct a consumer for one sub-topic
    ///
    /// This is synchronous object construction only; the broker handshake
    /// happens after [`ChildConsumer::start`] and is observed through
    /// [`ChildConsumer::wait_created`].
    fn create(&self, options: ChildConsumerOptions) -> Result<Arc<dyn ChildConsumer>>;
}

/// A single sub-topic consumer
#[async_trait]
pub trait ChildConsumer: Send + Sync {
    /// Full name of the sub-topic this consumer reads
    fn topic(&self) -> &str;

    /// Begin the asynchronous broker handshake
    fn start(&self);

    /// Resolves once the handshake started by [`start`](Self::start)
    /// completes, with its outcome; single-shot
    async fn wait_created(&self) -> Result<()>;

    /// Close the consumer and release its broker resources
    async fn close(&self) -> Result<()>;

    /// Remove the subscription on the broker and close
    async fn unsubscribe(&self) -> Result<()>;

    /// Acknowledge one message
    async fn acknowledge(&self, msg_id: &MessageId) -> Result<()>;

    /// Acknowledge a batch of messages from this sub-topic
    async fn acknowledge_list(&self, msg_ids: &[MessageId]) -> Result<()>;

    /// Acknowledge every message up to and including `msg_id`
    async fn acknowledge_cumulative(&self, msg_id: &MessageId) -> Result<()>;

    /// Mark a message for redelivery without acknowledging it
    fn negative_acknowledge(&self, msg_id: &MessageId);

    /// Ask the broker to redeliver everything unacknowledged
    fn redeliver_unacknowledged_messages(&self);

    /// Ask the broker to redeliver the given unacknowledged messages
    fn redeliver_messages(&self, msg_ids: &HashSet<MessageId>);

    /// Move the consume cursor
    async fn seek(&self, position: SeekPosition) -> Result<()>;

    /// Stop invoking the message listener until resumed
    fn pause_message_listener(&self);

    /// Resume invoking the message listener
    fn resume_message_listener(&self);

    /// Grant the broker `permits` additional in-flight messages
    fn send_flow_permits_to_broker(&self, permits: u32);

    /// Replenish one flow permit after `msg` left the parent's queue
    fn increase_available_permits(&self, msg: &Message);

    /// Whether the underlying connection is established
    fn is_connected(&self) -> bool;

    /// Whether the broker holds at least one message for this consumer
    async fn has_message_available(&self) -> Result<bool>;

    /// Record which partition of the parent topic this consumer serves
    fn set_partition_index(&self, index: i32);

    /// Broker-side statistics for this consumer
    async fn broker_consumer_stats(&self) -> Result<BrokerConsumerStats>;
}

/// Concurrent map of sub-topic name to its consumer
///
/// All mutation is atomic with respect to iteration snapshots; `take_all`
/// drains the map in one critical section so a closing parent observes a
/// consistent set of children.
#[derive(Default)]
pub(crate) struct ChildConsumerMap {
    inner: RwLock<HashMap<String, Arc<dyn ChildConsumer>>>,
}

impl ChildConsumerMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, topic: String, consumer: Arc<dyn ChildConsumer>) {
        self.inner.write().insert(topic, consumer);
    }

    pub fn find(&self, topic: &str) -> Option<Arc<dyn ChildConsumer>> {
        self.inner.read().get(topic).cloned()
    }

    pub fn remove(&self, topic: &str) -> Option<Arc<dyn ChildConsumer>> {
        self.inner.write().remove(topic)
    }

    /// Atomically drain every entry
    pub fn take_all(&self) -> Vec<(String, Arc<dyn ChildConsumer>)> {
        self.inner.write().drain().collect()
    }

    /// Snapshot of the current consumers; taken under the read lock and
    /// released before the caller touches any of them
    pub fn values(&self) -> Vec<Arc<dyn ChildConsumer>> {
        self.inner.read().values().cloned().collect()
    }

    /// Snapshot of the current sub-topic names
    pub fn keys(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
