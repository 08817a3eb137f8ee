//! Scripted collaborators for driving the multi-topics consumer end to end

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use relaymq_client::*;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;

/// Scripted behavior for the children of one topic
#[derive(Default, Clone)]
pub struct ChildBehavior {
    /// Fail synchronous construction in the factory
    pub create_error: Option<RelaymqClientError>,
    /// Resolve the creation future with this error
    pub created_error: Option<RelaymqClientError>,
    /// Park the creation future until released (or failed by close)
    pub hold_created: bool,
    /// Park seek calls until released
    pub hold_seek: bool,
    pub unsubscribe_error: Option<RelaymqClientError>,
    pub close_error: Option<RelaymqClientError>,
    pub seek_error: Option<RelaymqClientError>,
    pub ack_error: Option<RelaymqClientError>,
    pub stats_error: Option<RelaymqClientError>,
    pub has_message: bool,
    pub has_message_error: Option<RelaymqClientError>,
    pub stats: BrokerConsumerStats,
}

pub struct MockChildConsumer {
    topic: String,
    pub subscription: String,
    pub kind: TopicKind,
    pub receiver_queue_size: usize,
    pub start_paused: bool,
    dispatcher: Weak<dyn MessageDispatcher>,
    behavior: ChildBehavior,
    started: AtomicBool,
    hold_created: AtomicBool,
    created_error: Mutex<Option<RelaymqClientError>>,
    created_notify: Notify,
    hold_seek: AtomicBool,
    seek_notify: Notify,
    connected: AtomicBool,
    partition_index: AtomicI32,
    events: Mutex<Vec<String>>,
}

impl MockChildConsumer {
    fn new(options: ChildConsumerOptions, behavior: ChildBehavior) -> Self {
        Self {
            topic: options.topic,
            subscription: options.subscription,
            kind: options.kind,
            receiver_queue_size: options.receiver_queue_size,
            start_paused: options.start_paused,
            dispatcher: options.dispatcher,
            hold_created: AtomicBool::new(behavior.hold_created),
            created_error: Mutex::new(behavior.created_error.clone()),
            created_notify: Notify::new(),
            hold_seek: AtomicBool::new(behavior.hold_seek),
            seek_notify: Notify::new(),
            behavior,
            started: AtomicBool::new(false),
            connected: AtomicBool::new(true),
            partition_index: AtomicI32::new(-1),
            events: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn event_count(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    pub fn was_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Let a parked creation future resolve
    pub fn release_created(&self) {
        self.hold_created.store(false, Ordering::SeqCst);
        self.created_notify.notify_one();
    }

    /// Let a parked seek call return
    pub fn release_seek(&self) {
        self.hold_seek.store(false, Ordering::SeqCst);
        self.seek_notify.notify_one();
    }

    /// Push one message through the parent's delivery path
    pub async fn emit(self: &Arc<Self>, offset: i64, payload: &str) {
        let partition = self.partition_index.load(Ordering::SeqCst);
        let msg = Message::new(MessageId::new(partition.max(0), offset), payload.to_string());
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            let child: Arc<dyn ChildConsumer> = self.clone();
            dispatcher.message_received(child, msg).await;
        }
    }
}

#[async_trait]
impl ChildConsumer for MockChildConsumer {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn start(&self) {
        self.record("start");
        self.started.store(true, Ordering::SeqCst);
        self.created_notify.notify_one();
    }

    async fn wait_created(&self) -> Result<()> {
        loop {
            if self.started.load(Ordering::SeqCst) && !self.hold_created.load(Ordering::SeqCst) {
                return match self.created_error.lock().clone() {
                    Some(e) => Err(e),
                    None => Ok(()),
                };
            }
            self.created_notify.notified().await;
        }
    }

    async fn close(&self) -> Result<()> {
        self.record("close");
        // a consumer closed mid-handshake can never finish creating
        if self.hold_created.load(Ordering::SeqCst) {
            *self.created_error.lock() = Some(RelaymqClientError::AlreadyClosed);
            self.release_created();
        }
        match &self.behavior.close_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn unsubscribe(&self) -> Result<()> {
        self.record("unsubscribe");
        match &self.behavior.unsubscribe_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn acknowledge(&self, msg_id: &MessageId) -> Result<()> {
        self.record(format!("ack:{}:{}", msg_id.partition(), msg_id.offset()));
        match &self.behavior.ack_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn acknowledge_list(&self, msg_ids: &[MessageId]) -> Result<()> {
        self.record(format!("ack_list:{}", msg_ids.len()));
        match &self.behavior.ack_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn acknowledge_cumulative(&self, msg_id: &MessageId) -> Result<()> {
        self.record(format!("ack_cumulative:{}:{}", msg_id.partition(), msg_id.offset()));
        match &self.behavior.ack_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn negative_acknowledge(&self, msg_id: &MessageId) {
        self.record(format!("nack:{}:{}", msg_id.partition(), msg_id.offset()));
    }

    fn redeliver_unacknowledged_messages(&self) {
        self.record("redeliver_all");
    }

    fn redeliver_messages(&self, msg_ids: &HashSet<MessageId>) {
        self.record(format!("redeliver:{}", msg_ids.len()));
    }

    async fn seek(&self, position: SeekPosition) -> Result<()> {
        let label = match &position {
            SeekPosition::MessageId(id) if id.is_earliest() => "seek:earliest".to_string(),
            SeekPosition::MessageId(id) if id.is_latest() => "seek:latest".to_string(),
            SeekPosition::MessageId(id) => format!("seek:{}:{}", id.partition(), id.offset()),
            SeekPosition::Timestamp(ts) => format!("seek:ts:{ts}"),
        };
        self.record(label);
        while self.hold_seek.load(Ordering::SeqCst) {
            self.seek_notify.notified().await;
        }
        match &self.behavior.seek_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn pause_message_listener(&self) {
        self.record("pause");
    }

    fn resume_message_listener(&self) {
        self.record("resume");
    }

    fn send_flow_permits_to_broker(&self, permits: u32) {
        self.record(format!("flow:{permits}"));
    }

    fn increase_available_permits(&self, _msg: &Message) {
        self.record("permit");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn has_message_available(&self) -> Result<bool> {
        match &self.behavior.has_message_error {
            Some(e) => Err(e.clone()),
            None => Ok(self.behavior.has_message),
        }
    }

    fn set_partition_index(&self, index: i32) {
        self.record(format!("set_partition:{index}"));
        self.partition_index.store(index, Ordering::SeqCst);
    }

    async fn broker_consumer_stats(&self) -> Result<BrokerConsumerStats> {
        match &self.behavior.stats_error {
            Some(e) => Err(e.clone()),
            None => Ok(self.behavior.stats.clone()),
        }
    }
}

/// Factory producing scripted mock children, keyed by topic prefix
#[derive(Default)]
pub struct MockChildFactory {
    children: Mutex<Vec<Arc<MockChildConsumer>>>,
    behaviors: Mutex<HashMap<String, ChildBehavior>>,
}

impl MockChildFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script the children of `topic` (matched by sub-topic prefix)
    pub fn script(&self, topic: &str, behavior: ChildBehavior) {
        self.behaviors.lock().insert(topic.to_string(), behavior);
    }

    pub fn children(&self) -> Vec<Arc<MockChildConsumer>> {
        self.children.lock().clone()
    }

    pub fn created_count(&self) -> usize {
        self.children.lock().len()
    }

    /// The most recent child created for `topic`
    pub fn child(&self, topic: &str) -> Arc<MockChildConsumer> {
        self.children
            .lock()
            .iter()
            .rev()
            .find(|c| c.topic() == topic)
            .cloned()
            .unwrap_or_else(|| panic!("no child created for {topic}"))
    }

    fn behavior_for(&self, topic: &str) -> ChildBehavior {
        let behaviors = self.behaviors.lock();
        if let Some(behavior) = behaviors.get(topic) {
            return behavior.clone();
        }
        behaviors
            .iter()
            .find(|(key, _)| topic.starts_with(key.as_str()))
            .map(|(_, b)| b.clone())
            .unwrap_or_default()
    }
}

impl ChildConsumerFactory for MockChildFactory {
    fn create(&self, options: ChildConsumerOptions) -> Result<Arc<dyn ChildConsumer>> {
        let behavior = self.behavior_for(&options.topic);
        if let Some(e) = behavior.create_error.clone() {
            return Err(e);
        }
        let child = Arc::new(MockChildConsumer::new(options, behavior));
        self.children.lock().push(child.clone());
        Ok(child)
    }
}

/// Scripted partition metadata source
#[derive(Default)]
pub struct MockLookup {
    partitions: Mutex<HashMap<String, Result<usize>>>,
    calls: Mutex<Vec<String>>,
}

impl MockLookup {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_partitions(&self, topic: &str, partitions: usize) {
        self.partitions
            .lock()
            .insert(topic.to_string(), Ok(partitions));
    }

    pub fn set_error(&self, topic: &str, error: RelaymqClientError) {
        self.partitions.lock().insert(topic.to_string(), Err(error));
    }

    pub fn call_count(&self, topic: &str) -> usize {
        self.calls.lock().iter().filter(|t| *t == topic).count()
    }
}

#[async_trait]
impl LookupService for MockLookup {
    async fn get_partition_metadata(&self, topic: &TopicName) -> Result<PartitionMetadata> {
        self.calls.lock().push(topic.as_str().to_string());
        match self.partitions.lock().get(topic.as_str()) {
            Some(Ok(partitions)) => Ok(PartitionMetadata::new(*partitions)),
            Some(Err(e)) => Err(e.clone()),
            None => Err(RelaymqClientError::topic_not_found(topic.as_str())),
        }
    }
}

/// Records consumers deregistered at shutdown
#[derive(Default)]
pub struct MockRegistry {
    deregistered: Mutex<Vec<String>>,
}

impl MockRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deregistered_count(&self) -> usize {
        self.deregistered.lock().len()
    }
}

impl ConsumerRegistry for MockRegistry {
    fn deregister_consumer(&self, consumer_name: &str) {
        self.deregistered.lock().push(consumer_name.to_string());
    }
}

/// Subscribe a consumer against the mocks with the default subscription
pub async fn subscribe_consumer(
    topics: &[&str],
    lookup: &Arc<MockLookup>,
    factory: &Arc<MockChildFactory>,
    config: ConsumerConfig,
) -> Result<Arc<MultiTopicsConsumer>> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let lookup: Arc<dyn LookupService> = lookup.clone();
    let factory: Arc<dyn ChildConsumerFactory> = factory.clone();
    MultiTopicsConsumerBuilder::new(lookup, factory)
        .topics(topics.to_vec())
        .subscription("test-sub")
        .config(config)
        .subscribe()
        .await
}

/// Poll until `condition` holds, panicking after a generous deadline
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {what}");
}

