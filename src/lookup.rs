//! Partition metadata discovery

use crate::topic::TopicName;
use crate::Result;
use async_trait::async_trait;

/// Broker metadata for one topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionMetadata {
    /// Number of partitions; `0` means the topic is non-partitioned
    pub partitions: usize,
}

impl PartitionMetadata {
    /// Metadata for a topic with `partitions` partitions
    pub fn new(partitions: usize) -> Self {
        Self { partitions }
    }

    /// Metadata for a non-partitioned topic
    pub fn non_partitioned() -> Self {
        Self { partitions: 0 }
    }
}

/// Topic lookup against the broker's discovery endpoint
#[async_trait]
pub trait LookupService: Send + Sync {
    /// Resolve the partition count of `topic`
    async fn get_partition_metadata(&self, topic: &TopicName) -> Result<PartitionMetadata>;
}
