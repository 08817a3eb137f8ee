//! Broker-side consumer statistics

/// Statistics the broker reports for one sub-topic consumer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrokerConsumerStats {
    /// Messages per second dispatched to this consumer
    pub msg_rate_out: f64,
    /// Bytes per second dispatched to this consumer
    pub msg_throughput_out: f64,
    /// Messages per second redelivered to this consumer
    pub msg_rate_redeliver: f64,
    /// Messages the broker may still push without a new flow grant
    pub available_permits: i64,
    /// Messages delivered but not yet acknowledged
    pub unacked_messages: u64,
    /// Whether the broker stopped dispatching due to unacked backlog
    pub blocked_on_unacked_messages: bool,
    /// Messages waiting in the subscription backlog
    pub msg_backlog: u64,
    /// Broker-assigned consumer name
    pub consumer_name: String,
}

/// Per-partition statistics aggregated across a multi-topics consumer
#[derive(Debug, Clone, Default)]
pub struct MultiTopicsBrokerConsumerStats {
    per_partition: Vec<BrokerConsumerStats>,
}

impl MultiTopicsBrokerConsumerStats {
    /// Aggregate with one empty slot per sub-topic consumer
    pub fn new(partitions: usize) -> Self {
        Self {
            per_partition: vec![BrokerConsumerStats::default(); partitions],
        }
    }

    /// Fill the slot for the consumer at `index`
    pub fn add(&mut self, stats: BrokerConsumerStats, index: usize) {
        if let Some(slot) = self.per_partition.get_mut(index) {
            *slot = stats;
        }
    }

    /// Statistics of the consumer at `index`
    pub fn get(&self, index: usize) -> Option<&BrokerConsumerStats> {
        self.per_partition.get(index)
    }

    /// Number of aggregated consumers
    pub fn partition_count(&self) -> usize {
        self.per_partition.len()
    }

    /// Total dispatch rate across all partitions
    pub fn msg_rate_out(&self) -> f64 {
        self.per_partition.iter().map(|s| s.msg_rate_out).sum()
    }

    /// Total dispatch throughput across all partitions
    pub fn msg_throughput_out(&self) -> f64 {
        self.per_partition.iter().map(|s| s.msg_throughput_out).sum()
    }

    /// Total redelivery rate across all partitions
    pub fn msg_rate_redeliver(&self) -> f64 {
        self.per_partition.iter().map(|s| s.msg_rate_redeliver).sum()
    }

    /// Total unacknowledged messages across all partitions
    pub fn unacked_messages(&self) -> u64 {
        self.per_partition.iter().map(|s| s.unacked_messages).sum()
    }

    /// Total subscription backlog across all partitions
    pub fn msg_backlog(&self) -> u64 {
        self.per_partition.iter().map(|s| s.msg_backlog).sum()
    }

    /// Whether any partition is blocked on unacked backlog
    pub fn is_blocked_on_unacked_messages(&self) -> bool {
        self.per_partition
            .iter()
            .any(|s| s.blocked_on_unacked_messages)
    }
}
