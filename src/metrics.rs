//! Metrics collection for the multi-topics consumer

use std::sync::atomic::{AtomicU64, Ordering};

/// Consumer metrics collector
#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    /// Messages handed to a receive path or listener
    pub messages_received: AtomicU64,
    /// Payload bytes handed to a receive path or listener
    pub bytes_received: AtomicU64,
    /// Individual and cumulative acknowledgments forwarded to a sub-topic
    pub acks_sent: AtomicU64,
    /// Acknowledgments that failed or could not be routed
    pub ack_failures: AtomicU64,
    /// Negative acknowledgments forwarded to a sub-topic
    pub negative_acks: AtomicU64,
    /// Redelivery requests issued (broadcast or per-id)
    pub redeliver_requests: AtomicU64,
    /// Seek operations completed
    pub seeks: AtomicU64,
}

impl ConsumerMetrics {
    /// Record one received message of `bytes` payload bytes
    pub fn record_receive(&self, bytes: u64) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record an acknowledgment forwarded to its owning sub-topic
    pub fn record_ack(&self) {
        self.acks_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed or unroutable acknowledgment
    pub fn record_ack_failure(&self) {
        self.ack_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a negative acknowledgment
    pub fn record_negative_ack(&self) {
        self.negative_acks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a redelivery request
    pub fn record_redeliver_request(&self) {
        self.redeliver_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed seek
    pub fn record_seek(&self) {
        self.seeks.fetch_add(1, Ordering::Relaxed);
    }
}
