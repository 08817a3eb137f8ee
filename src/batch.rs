//! Batch-receive policy and accumulator

use crate::error::RelaymqClientError;
use crate::message::Message;
use crate::Result;
use std::time::Duration;

const DEFAULT_MAX_NUM_BYTES: i64 = 10 * 1024 * 1024;

/// Limits applied to one batch-receive call
///
/// A non-positive limit is disabled; at least one of the two size limits
/// must be enabled. The timeout bounds how long a batch call waits before
/// delivering whatever has accumulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReceivePolicy {
    max_num_messages: i32,
    max_num_bytes: i64,
    timeout: Duration,
}

impl BatchReceivePolicy {
    /// Create a policy, rejecting one with every limit disabled
    pub fn new(max_num_messages: i32, max_num_bytes: i64, timeout: Duration) -> Result<Self> {
        if max_num_messages <= 0 && max_num_bytes <= 0 {
            return Err(RelaymqClientError::invalid_configuration(
                "batch receive policy needs at least one of max_num_messages or max_num_bytes",
            ));
        }
        Ok(Self {
            max_num_messages,
            max_num_bytes,
            timeout,
        })
    }

    /// Message-count limit; non-positive means disabled
    pub fn max_num_messages(&self) -> i32 {
        self.max_num_messages
    }

    /// Byte-size limit; non-positive means disabled
    pub fn max_num_bytes(&self) -> i64 {
        self.max_num_bytes
    }

    /// Wait bound for one batch call
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for BatchReceivePolicy {
    fn default() -> Self {
        Self {
            max_num_messages: -1,
            max_num_bytes: DEFAULT_MAX_NUM_BYTES,
            timeout: Duration::from_millis(100),
        }
    }
}

/// Accumulates messages for one batch delivery
pub(crate) struct MessageBatch {
    max_num_messages: i32,
    max_num_bytes: i64,
    current_bytes: i64,
    messages: Vec<Message>,
}

impl MessageBatch {
    pub fn new(policy: BatchReceivePolicy) -> Self {
        Self {
            max_num_messages: policy.max_num_messages(),
            max_num_bytes: policy.max_num_bytes(),
            current_bytes: 0,
            messages: Vec::new(),
        }
    }

    /// Whether `msg` still fits; an empty batch accepts any message so a
    /// single oversized message is never stuck
    pub fn can_add(&self, msg: &Message) -> bool {
        if self.messages.is_empty() {
            return true;
        }
        let within_count =
            self.max_num_messages <= 0 || (self.messages.len() as i32) < self.max_num_messages;
        let within_bytes =
            self.max_num_bytes <= 0 || self.current_bytes + msg.len() as i64 <= self.max_num_bytes;
        within_count && within_bytes
    }

    pub fn add(&mut self, msg: Message) {
        self.current_bytes += msg.len() as i64;
        self.messages.push(msg);
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}
