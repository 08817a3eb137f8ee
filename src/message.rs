//! Message and message-id types for the consumer surface

use crate::child::ChildConsumer;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

/// Identifier of a message within a partition
///
/// The owning topic name is stamped onto ids as messages flow through the
/// multi-topics consumer; acknowledgment routing relies on it. Equality and
/// hashing ignore the stamp so an id compares the same before and after
/// delivery.
#[derive(Clone)]
pub struct MessageId {
    partition: i32,
    offset: i64,
    topic_name: Option<Arc<str>>,
}

impl MessageId {
    /// Create a message id for `offset` within `partition`
    pub fn new(partition: i32, offset: i64) -> Self {
        Self {
            partition,
            offset,
            topic_name: None,
        }
    }

    /// Sentinel id addressing the earliest available message
    pub fn earliest() -> Self {
        Self::new(-1, -1)
    }

    /// Sentinel id addressing the latest available message
    pub fn latest() -> Self {
        Self::new(-1, i64::MAX)
    }

    /// Whether this id is the earliest sentinel
    pub fn is_earliest(&self) -> bool {
        self.partition == -1 && self.offset == -1
    }

    /// Whether this id is the latest sentinel
    pub fn is_latest(&self) -> bool {
        self.partition == -1 && self.offset == i64::MAX
    }

    /// Partition index, `-1` for the sentinels
    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Offset within the partition
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Name of the owning sub-topic, if stamped
    pub fn topic_name(&self) -> Option<&str> {
        self.topic_name.as_deref()
    }

    pub(crate) fn set_topic_name(&mut self, topic: Arc<str>) {
        self.topic_name = Some(topic);
    }
}

impl PartialEq for MessageId {
    fn eq(&self, other: &Self) -> bool {
        self.partition == other.partition && self.offset == other.offset
    }
}

impl Eq for MessageId {}

impl Hash for MessageId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.partition.hash(state);
        self.offset.hash(state);
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.topic_name.as_deref().unwrap_or(""),
            self.partition,
            self.offset
        )
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Position a consumer cursor can be moved to
#[derive(Debug, Clone)]
pub enum SeekPosition {
    /// Seek to a message id (including the earliest/latest sentinels)
    MessageId(MessageId),
    /// Seek to the first message published at or after the timestamp (ms)
    Timestamp(u64),
}

/// A message received from a sub-topic consumer
///
/// The multi-topics consumer stamps each delivered message with its owning
/// topic name and a weak handle to the sub-topic consumer that produced it,
/// used to replenish that consumer's flow permits once the message leaves
/// the receiver queue.
#[derive(Clone)]
pub struct Message {
    id: MessageId,
    key: Option<Bytes>,
    payload: Bytes,
    properties: HashMap<String, String>,
    publish_time: u64,
    source: Option<Weak<dyn ChildConsumer>>,
}

impl Message {
    /// Create a message with an id and payload
    pub fn new(id: MessageId, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            key: None,
            payload: payload.into(),
            properties: HashMap::new(),
            publish_time: 0,
            source: None,
        }
    }

    /// Attach a routing key
    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Attach a string property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Set the broker publish timestamp (ms)
    pub fn with_publish_time(mut self, publish_time: u64) -> Self {
        self.publish_time = publish_time;
        self
    }

    /// Message id
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Routing key, if any
    pub fn key(&self) -> Option<&Bytes> {
        self.key.as_ref()
    }

    /// Message payload
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// String properties attached by the producer
    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    /// Broker publish timestamp (ms)
    pub fn publish_time(&self) -> u64 {
        self.publish_time
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Name of the sub-topic this message was received from, if stamped
    pub fn topic_name(&self) -> Option<&str> {
        self.id.topic_name()
    }

    pub(crate) fn stamp(&mut self, topic: Arc<str>, source: Weak<dyn ChildConsumer>) {
        self.id.set_topic_name(topic);
        self.source = Some(source);
    }

    pub(crate) fn source(&self) -> Option<Arc<dyn ChildConsumer>> {
        self.source.as_ref().and_then(Weak::upgrade)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("len", &self.payload.len())
            .field("publish_time", &self.publish_time)
            .finish()
    }
}
