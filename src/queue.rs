//! Bounded FIFO that merges every sub-topic stream

use crate::message::Message;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

struct QueueInner {
    items: VecDeque<Message>,
    closed: bool,
}

/// Bounded queue of received messages shared by all delivery paths
///
/// Producers (sub-topic consumers) wait when the queue is full, which is
/// what throttles the brokers: flow permits are only replenished once a
/// message is popped and processed. `close` releases every waiter.
pub(crate) struct MergedQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
}

impl MergedQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                closed: false,
            }),
            capacity: capacity.max(1),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    /// Enqueue a message, waiting for room; returns `false` when the queue
    /// is closed and the message was dropped
    pub async fn push(&self, msg: Message) -> bool {
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return false;
                }
                if inner.items.len() < self.capacity {
                    inner.items.push_back(msg);
                    self.not_empty.notify_one();
                    return true;
                }
                // register interest under the lock so a wakeup issued
                // right after release cannot be lost
                notified.as_mut().enable();
            }
            notified.await;
        }
    }

    /// Dequeue the next message, waiting for one; `None` once closed
    pub async fn pop(&self) -> Option<Message> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            {
                let mut inner = self.inner.lock();
                if let Some(msg) = inner.items.pop_front() {
                    self.not_full.notify_one();
                    return Some(msg);
                }
                if inner.closed {
                    return None;
                }
                notified.as_mut().enable();
            }
            notified.await;
        }
    }

    /// Dequeue without waiting
    pub fn try_pop(&self) -> Option<Message> {
        let mut inner = self.inner.lock();
        let msg = inner.items.pop_front();
        if msg.is_some() {
            self.not_full.notify_one();
        }
        msg
    }

    /// Dequeue the head only if `predicate` accepts it
    pub fn pop_if<F>(&self, mut predicate: F) -> Option<Message>
    where
        F: FnMut(&Message) -> bool,
    {
        let mut inner = self.inner.lock();
        let accepted = match inner.items.front() {
            Some(head) => predicate(head),
            None => false,
        };
        if !accepted {
            return None;
        }
        let msg = inner.items.pop_front();
        self.not_full.notify_one();
        msg
    }

    /// Drop every queued message
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.items.clear();
        self.not_full.notify_waiters();
    }

    /// Close the queue, waking all blocked producers and consumers
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }
}
