//! Tracking of delivered-but-unacknowledged messages

use crate::message::MessageId;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Receiver of message ids whose acknowledgment timeout expired
pub trait RedeliveryHook: Send + Sync {
    /// Request redelivery of the expired ids
    fn redeliver(&self, msg_ids: HashSet<MessageId>);
}

/// Bookkeeping of delivered-but-not-yet-acked message ids
pub trait UnackedMessageTracker: Send + Sync {
    /// Begin timeout processing, if any
    fn start(&self) {}

    /// Track a delivered message
    fn add(&self, msg_id: &MessageId);

    /// Stop tracking an acknowledged message
    fn remove(&self, msg_id: &MessageId);

    /// Stop tracking a batch of acknowledged messages
    fn remove_list(&self, msg_ids: &[MessageId]);

    /// Stop tracking every message of the same topic up to and including
    /// `msg_id`
    fn remove_messages_till(&self, msg_id: &MessageId);

    /// Stop tracking every message of `topic`
    fn remove_topic_message(&self, topic: &str);

    /// Drop all tracked ids
    fn clear(&self);

    /// Number of tracked ids
    fn size(&self) -> usize;
}

/// Tracker used when acknowledgment timeouts are disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct UnackedMessageTrackerDisabled;

impl UnackedMessageTracker for UnackedMessageTrackerDisabled {
    fn add(&self, _msg_id: &MessageId) {}
    fn remove(&self, _msg_id: &MessageId) {}
    fn remove_list(&self, _msg_ids: &[MessageId]) {}
    fn remove_messages_till(&self, _msg_id: &MessageId) {}
    fn remove_topic_message(&self, _topic: &str) {}
    fn clear(&self) {}
    fn size(&self) -> usize {
        0
    }
}

struct TrackerShared {
    /// Time windows, oldest first; ids age one window per tick and are
    /// redelivered when their window falls off the front
    windows: Mutex<VecDeque<HashSet<MessageId>>>,
    hook: Weak<dyn RedeliveryHook>,
}

/// Tracker that requests redelivery once an id stays unacked past the
/// configured timeout
pub struct UnackedMessageTrackerEnabled {
    shared: Arc<TrackerShared>,
    tick: Duration,
    token: CancellationToken,
}

impl UnackedMessageTrackerEnabled {
    /// Tracker with a single expiry window the size of `timeout`
    pub fn new(timeout: Duration, hook: Weak<dyn RedeliveryHook>) -> Self {
        Self::with_tick(timeout, timeout, hook)
    }

    /// Tracker expiring at `tick` granularity
    pub fn with_tick(timeout: Duration, tick: Duration, hook: Weak<dyn RedeliveryHook>) -> Self {
        let tick = if tick.is_zero() { timeout } else { tick };
        let window_count =
            ((timeout.as_millis().max(1) + tick.as_millis() - 1) / tick.as_millis()).max(1) as usize;
        let windows = (0..=window_count).map(|_| HashSet::new()).collect();
        Self {
            shared: Arc::new(TrackerShared {
                windows: Mutex::new(windows),
                hook,
            }),
            tick,
            token: CancellationToken::new(),
        }
    }

    fn rotate(shared: &TrackerShared) {
        let expired = {
            let mut windows = shared.windows.lock();
            windows.push_back(HashSet::new());
            windows.pop_front().unwrap_or_default()
        };
        if expired.is_empty() {
            return;
        }
        debug!("{} unacked messages timed out, requesting redelivery", expired.len());
        if let Some(hook) = shared.hook.upgrade() {
            hook.redeliver(expired);
        }
    }
}

impl UnackedMessageTracker for UnackedMessageTrackerEnabled {
    fn start(&self) {
        let shared = self.shared.clone();
        let tick = self.tick;
        let token = self.token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(tick) => Self::rotate(&shared),
                }
            }
        });
    }

    fn add(&self, msg_id: &MessageId) {
        let mut windows = self.shared.windows.lock();
        if let Some(newest) = windows.back_mut() {
            newest.insert(msg_id.clone());
        }
    }

    fn remove(&self, msg_id: &MessageId) {
        let mut windows = self.shared.windows.lock();
        for window in windows.iter_mut() {
            if window.remove(msg_id) {
                return;
            }
        }
    }

    fn remove_list(&self, msg_ids: &[MessageId]) {
        let mut windows = self.shared.windows.lock();
        for msg_id in msg_ids {
            for window in windows.iter_mut() {
                if window.remove(msg_id) {
                    break;
                }
            }
        }
    }

    fn remove_messages_till(&self, msg_id: &MessageId) {
        let topic = msg_id.topic_name();
        let mut windows = self.shared.windows.lock();
        for window in windows.iter_mut() {
            window.retain(|id| !(id.topic_name() == topic && id.offset() <= msg_id.offset()));
        }
    }

    fn remove_topic_message(&self, topic: &str) {
        let mut windows = self.shared.windows.lock();
        for window in windows.iter_mut() {
            window.retain(|id| id.topic_name() != Some(topic));
        }
    }

    fn clear(&self) {
        let mut windows = self.shared.windows.lock();
        for window in windows.iter_mut() {
            window.clear();
        }
    }

    fn size(&self) -> usize {
        self.shared.windows.lock().iter().map(HashSet::len).sum()
    }
}

impl Drop for UnackedMessageTrackerEnabled {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
