//! Configuration types for the RelayMQ consumer

use crate::batch::BatchReceivePolicy;
use crate::consumer::MultiTopicsConsumer;
use crate::message::Message;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked for every message when listener-based delivery is
/// configured; a configured listener disables the synchronous receive calls
pub type MessageListener = Arc<dyn Fn(Arc<MultiTopicsConsumer>, Message) + Send + Sync>;

/// How competing consumers on one subscription share messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionType {
    /// Single consumer, per-partition ordering
    Exclusive,
    /// Round-robin across consumers; enables per-id redelivery
    Shared,
    /// Exclusive with a standby taking over on failure
    Failover,
    /// Shared with key affinity; enables per-id redelivery
    KeyShared,
}

impl SubscriptionType {
    /// Whether this type supports redelivering individual message ids
    pub fn supports_selective_redelivery(&self) -> bool {
        matches!(self, Self::Shared | Self::KeyShared)
    }
}

/// Consumer configuration
#[derive(Clone)]
pub struct ConsumerConfig {
    /// Bound on the merged receiver queue and per-child queue upper bound
    pub receiver_queue_size: usize,
    /// Total receiver budget divided across all partitions of a topic
    pub max_total_receiver_queue_size_across_partitions: usize,
    /// Redelivery timeout for unacknowledged messages; zero disables
    /// tracking
    pub unacked_messages_timeout: Duration,
    /// Granularity of unacked-timeout expiry when non-zero
    pub tick_duration: Duration,
    /// Period of partition-count rediscovery; zero disables it
    pub partitions_update_interval: Duration,
    /// Listener-based delivery; disables synchronous receive when set
    pub message_listener: Option<MessageListener>,
    /// Do not auto-resume listeners once the consumer is ready
    pub start_paused: bool,
    /// Subscription sharing mode
    pub subscription_type: SubscriptionType,
    /// Limits applied to batch receive calls
    pub batch_receive_policy: BatchReceivePolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            receiver_queue_size: 1000,
            max_total_receiver_queue_size_across_partitions: 50_000,
            unacked_messages_timeout: Duration::ZERO,
            tick_duration: Duration::from_secs(1),
            partitions_update_interval: Duration::ZERO,
            message_listener: None,
            start_paused: false,
            subscription_type: SubscriptionType::Exclusive,
            batch_receive_policy: BatchReceivePolicy::default(),
        }
    }
}

impl fmt::Debug for ConsumerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerConfig")
            .field("receiver_queue_size", &self.receiver_queue_size)
            .field(
                "max_total_receiver_queue_size_across_partitions",
                &self.max_total_receiver_queue_size_across_partitions,
            )
            .field("unacked_messages_timeout", &self.unacked_messages_timeout)
            .field("tick_duration", &self.tick_duration)
            .field("partitions_update_interval", &self.partitions_update_interval)
            .field("message_listener", &self.message_listener.is_some())
            .field("start_paused", &self.start_paused)
            .field("subscription_type", &self.subscription_type)
            .field("batch_receive_policy", &self.batch_receive_policy)
            .finish()
    }
}

/// Builder for [`ConsumerConfig`]
#[derive(Default)]
pub struct ConsumerConfigBuilder {
    config: ConsumerConfig,
}

impl ConsumerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receiver_queue_size(mut self, size: usize) -> Self {
        self.config.receiver_queue_size = size.max(1);
        self
    }

    pub fn max_total_receiver_queue_size_across_partitions(mut self, size: usize) -> Self {
        self.config.max_total_receiver_queue_size_across_partitions = size.max(1);
        self
    }

    pub fn unacked_messages_timeout(mut self, timeout: Duration) -> Self {
        self.config.unacked_messages_timeout = timeout;
        self
    }

    pub fn tick_duration(mut self, tick: Duration) -> Self {
        self.config.tick_duration = tick;
        self
    }

    pub fn partitions_update_interval(mut self, interval: Duration) -> Self {
        self.config.partitions_update_interval = interval;
        self
    }

    pub fn message_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(Arc<MultiTopicsConsumer>, Message) + Send + Sync + 'static,
    {
        self.config.message_listener = Some(Arc::new(listener));
        self
    }

    pub fn start_paused(mut self, start_paused: bool) -> Self {
        self.config.start_paused = start_paused;
        self
    }

    pub fn subscription_type(mut self, subscription_type: SubscriptionType) -> Self {
        self.config.subscription_type = subscription_type;
        self
    }

    pub fn batch_receive_policy(mut self, policy: BatchReceivePolicy) -> Self {
        self.config.batch_receive_policy = policy;
        self
    }

    pub fn build(self) -> ConsumerConfig {
        self.config
    }
}
