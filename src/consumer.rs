//! Multi-topic consumer: fans N topics out into per-partition sub-topic
//! consumers and merges their streams behind one receive surface
//!
//! The engine owns the sub-topic consumers and the merged receiver queue.
//! Everything else (the wire protocol, partition discovery, timed
//! redelivery) sits behind the collaborator traits in [`crate::child`],
//! [`crate::lookup`] and [`crate::tracker`].

use crate::batch::MessageBatch;
use crate::child::{
    ChildConsumer, ChildConsumerFactory, ChildConsumerMap, ChildConsumerOptions, MessageDispatcher,
    TopicKind,
};
use crate::config::ConsumerConfig;
use crate::error::RelaymqClientError;
use crate::interceptor::{ConsumerInterceptors, NoopConsumerInterceptors};
use crate::lookup::LookupService;
use crate::message::{Message, MessageId, SeekPosition};
use crate::metrics::ConsumerMetrics;
use crate::queue::MergedQueue;
use crate::stats::MultiTopicsBrokerConsumerStats;
use crate::topic::TopicName;
use crate::tracker::{
    RedeliveryHook, UnackedMessageTracker, UnackedMessageTrackerDisabled,
    UnackedMessageTrackerEnabled,
};
use crate::Result;
use async_trait::async_trait;
use futures::Stream;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Owner of consumers, notified when one shuts down
pub trait ConsumerRegistry: Send + Sync {
    /// Remove a consumer from the owner's bookkeeping
    fn deregister_consumer(&self, consumer_name: &str);
}

/// Lifecycle state of a multi-topics consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConsumerState {
    /// Sub-topic consumers are still being created
    Pending = 0,
    /// All sub-topic consumers are live
    Ready = 1,
    /// A close or unsubscribe is in flight
    Closing = 2,
    /// Shut down; terminal
    Closed = 3,
    /// A sub-topic consumer failed; cleanup in flight
    Failed = 4,
}

struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: ConsumerState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> ConsumerState {
        match self.0.load(Ordering::SeqCst) {
            0 => ConsumerState::Pending,
            1 => ConsumerState::Ready,
            2 => ConsumerState::Closing,
            3 => ConsumerState::Closed,
            _ => ConsumerState::Failed,
        }
    }

    fn store(&self, state: ConsumerState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// CAS used for the transitions that must fire at most once
    fn transition(&self, from: ConsumerState, to: ConsumerState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Terminal completion that fires at most once, no matter how many child
/// callbacks race to settle it
struct CompletionCell<T> {
    tx: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> CompletionCell<T> {
    fn new(tx: oneshot::Sender<T>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    fn complete(&self, value: T) -> bool {
        if let Some(tx) = self.tx.lock().take() {
            tx.send(value).is_ok()
        } else {
            false
        }
    }
}

type OpCompletion = Arc<CompletionCell<Result<()>>>;

#[derive(Debug, Clone, Copy)]
struct TopicEntry {
    partitions: usize,
    kind: TopicKind,
}

impl TopicEntry {
    /// Partition count in lookup form: `0` for a non-partitioned topic
    fn lookup_partitions(&self) -> usize {
        match self.kind {
            TopicKind::NonPartitioned => 0,
            TopicKind::Partitioned => self.partitions,
        }
    }

    fn partition_keys(&self, topic_name: &TopicName) -> Vec<String> {
        match self.kind {
            TopicKind::NonPartitioned => vec![topic_name.as_str().to_string()],
            TopicKind::Partitioned => (0..self.partitions)
                .map(|i| topic_name.partition_name(i))
                .collect(),
        }
    }
}

struct BatchPendingEntry {
    id: u64,
    tx: oneshot::Sender<Result<Vec<Message>>>,
}

/// Builder for [`MultiTopicsConsumer`]
pub struct MultiTopicsConsumerBuilder {
    topics: Vec<String>,
    subscription: String,
    config: ConsumerConfig,
    lookup: Arc<dyn LookupService>,
    factory: Arc<dyn ChildConsumerFactory>,
    client: Option<Weak<dyn ConsumerRegistry>>,
    interceptors: Arc<dyn ConsumerInterceptors>,
}

impl MultiTopicsConsumerBuilder {
    /// Create a builder with the mandatory collaborators
    pub fn new(lookup: Arc<dyn LookupService>, factory: Arc<dyn ChildConsumerFactory>) -> Self {
        Self {
            topics: Vec::new(),
            subscription: String::new(),
            config: ConsumerConfig::default(),
            lookup,
            factory,
            client: None,
            interceptors: Arc::new(NoopConsumerInterceptors),
        }
    }

    /// Set the topics to subscribe to
    pub fn topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    /// Add a single topic
    pub fn topic<S: Into<String>>(mut self, topic: S) -> Self {
        self.topics.push(topic.into());
        self
    }

    /// Set the subscription name
    pub fn subscription<S: Into<String>>(mut self, subscription: S) -> Self {
        self.subscription = subscription.into();
        self
    }

    /// Set the consumer configuration
    pub fn config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach the owning client for shutdown deregistration
    pub fn client(mut self, client: Weak<dyn ConsumerRegistry>) -> Self {
        self.client = Some(client);
        self
    }

    /// Attach an interceptor pipeline
    pub fn interceptors(mut self, interceptors: Arc<dyn ConsumerInterceptors>) -> Self {
        self.interceptors = interceptors;
        self
    }

    /// Create the consumer and subscribe every configured topic
    ///
    /// Resolves once all partitions of all topics are subscribed, or with
    /// the first failure after the partially-created consumers were rolled
    /// back.
    pub async fn subscribe(self) -> Result<Arc<MultiTopicsConsumer>> {
        if self.subscription.is_empty() {
            return Err(RelaymqClientError::invalid_configuration(
                "subscription name is required",
            ));
        }
        for topic in &self.topics {
            if TopicName::parse(topic).is_none() {
                error!("Topic name invalid when creating consumer: {}", topic);
                return Err(RelaymqClientError::invalid_topic_name(topic.clone()));
            }
        }

        let consumer_name = format!(
            "[multi-topics-consumer: {} - {}]",
            self.topics.first().map(String::as_str).unwrap_or("empty-topics"),
            self.subscription
        );

        let (created_tx, created_rx) = oneshot::channel();
        let consumer = Arc::new_cyclic(|weak: &Weak<MultiTopicsConsumer>| {
            let tracker = build_tracker(&self.config, weak.clone());
            MultiTopicsConsumer {
                consumer_name,
                subscription: self.subscription,
                topics: self.topics,
                incoming_messages: MergedQueue::new(self.config.receiver_queue_size),
                config: self.config,
                state: StateCell::new(ConsumerState::Pending),
                consumers: ChildConsumerMap::new(),
                partition_table: Mutex::new(HashMap::new()),
                number_topic_partitions: AtomicUsize::new(0),
                incoming_messages_size: AtomicI64::new(0),
                pending_receives: Mutex::new(VecDeque::new()),
                batch_pending: Mutex::new(VecDeque::new()),
                batch_seq: AtomicU64::new(0),
                during_seek: AtomicBool::new(false),
                failed_result: OnceLock::new(),
                created: CompletionCell::new(created_tx),
                lookup: self.lookup,
                factory: self.factory,
                client: self.client,
                interceptors: self.interceptors,
                unacked_tracker: tracker,
                metrics: Arc::new(ConsumerMetrics::default()),
                partitions_update_timer: Mutex::new(None),
                timer_token: CancellationToken::new(),
                weak_self: weak.clone(),
            }
        });

        consumer.unacked_tracker.start();
        consumer.start();

        match created_rx.await {
            Ok(Ok(())) => Ok(consumer),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RelaymqClientError::unknown("consumer creation abandoned")),
        }
    }
}

fn build_tracker(
    config: &ConsumerConfig,
    hook: Weak<MultiTopicsConsumer>,
) -> Arc<dyn UnackedMessageTracker> {
    if config.unacked_messages_timeout.is_zero() {
        return Arc::new(UnackedMessageTrackerDisabled);
    }
    let hook = hook as Weak<dyn RedeliveryHook>;
    if config.tick_duration.is_zero() {
        Arc::new(UnackedMessageTrackerEnabled::new(
            config.unacked_messages_timeout,
            hook,
        ))
    } else {
        Arc::new(UnackedMessageTrackerEnabled::with_tick(
            config.unacked_messages_timeout,
            config.tick_duration,
            hook,
        ))
    }
}

/// Consumer over N topics, each expanded into its partition sub-topics
///
/// Messages from all sub-topics are merged into one bounded queue with
/// per-partition ordering. Acknowledgments, seeks and redeliveries are
/// routed back to the owning sub-topic by the topic name stamped onto every
/// delivered message id.
pub struct MultiTopicsConsumer {
    consumer_name: String,
    subscription: String,
    topics: Vec<String>,
    config: ConsumerConfig,
    state: StateCell,
    consumers: ChildConsumerMap,
    /// topic -> partition count; guarded for short critical sections only,
    /// callers snapshot then release before any lookup or subscribe
    partition_table: Mutex<HashMap<String, TopicEntry>>,
    number_topic_partitions: AtomicUsize,
    incoming_messages: MergedQueue,
    incoming_messages_size: AtomicI64,
    pending_receives: Mutex<VecDeque<oneshot::Sender<Result<Message>>>>,
    batch_pending: Mutex<VecDeque<BatchPendingEntry>>,
    batch_seq: AtomicU64,
    during_seek: AtomicBool,
    failed_result: OnceLock<RelaymqClientError>,
    created: CompletionCell<Result<()>>,
    lookup: Arc<dyn LookupService>,
    factory: Arc<dyn ChildConsumerFactory>,
    client: Option<Weak<dyn ConsumerRegistry>>,
    interceptors: Arc<dyn ConsumerInterceptors>,
    unacked_tracker: Arc<dyn UnackedMessageTracker>,
    metrics: Arc<ConsumerMetrics>,
    partitions_update_timer: Mutex<Option<JoinHandle<()>>>,
    timer_token: CancellationToken,
    weak_self: Weak<MultiTopicsConsumer>,
}

impl MultiTopicsConsumer {
    // ---------------------------------------------------------------------
    // construction

    fn start(&self) {
        if self.topics.is_empty() {
            if self.state.transition(ConsumerState::Pending, ConsumerState::Ready) {
                debug!("No topics passed in when creating the multi-topics consumer");
                self.created.complete(Ok(()));
            } else {
                error!("Consumer {} in wrong state at start: {:?}", self.consumer_name, self.state.load());
                self.created
                    .complete(Err(RelaymqClientError::unknown("consumer not pending at start")));
            }
            return;
        }

        let topics_need_create = Arc::new(AtomicI64::new(self.topics.len() as i64));
        for topic in self.topics.clone() {
            let rx = self.subscribe_topic_inner(&topic);
            let weak = self.weak_self.clone();
            let counter = topics_need_create.clone();
            tokio::spawn(async move {
                let result = rx.await.unwrap_or(Err(RelaymqClientError::AlreadyClosed));
                if let Some(this) = weak.upgrade() {
                    this.handle_one_topic_subscribed(result, &topic, &counter);
                }
            });
        }
    }

    fn handle_one_topic_subscribed(&self, result: Result<()>, topic: &str, topics_need_create: &AtomicI64) {
        match &result {
            Err(e) => {
                // keep the first failure for the creation future; saved
                // before the state flips so racing child callbacks cannot
                // capture their secondary error instead
                let _ = self.failed_result.set(e.clone());
                self.state.store(ConsumerState::Failed);
                error!("Failed when subscribing to topic {} in multi-topics consumer: {}", topic, e);
            }
            Ok(()) => debug!("Subscribed to topic {} in multi-topics consumer", topic),
        }

        if topics_need_create.fetch_sub(1, Ordering::SeqCst) == 1 {
            if self.state.transition(ConsumerState::Pending, ConsumerState::Ready) {
                info!("Successfully subscribed to all topics of {}", self.consumer_name);
                self.created.complete(Ok(()));
                // all children are subscribed, the listeners may start
                if self.config.message_listener.is_some() && !self.config.start_paused {
                    info!("Starting message listeners");
                    let _ = self.resume_message_listener();
                }
            } else {
                error!("Unable to create consumer {}", self.consumer_name);
                // roll back the successfully subscribed children; shutdown
                // resolves the creation future with the saved failure
                let weak = self.weak_self.clone();
                tokio::spawn(async move {
                    if let Some(this) = weak.upgrade() {
                        let _ = this.close().await;
                    }
                });
            }
        }
    }

    // ---------------------------------------------------------------------
    // subscribe coordinator

    /// Subscribe one additional topic
    pub async fn subscribe_topic(&self, topic: &str) -> Result<()> {
        let rx = self.subscribe_topic_inner(topic);
        rx.await.unwrap_or(Err(RelaymqClientError::AlreadyClosed))
    }

    fn subscribe_topic_inner(&self, topic: &str) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        let promise: OpCompletion = Arc::new(CompletionCell::new(tx));

        let Some(topic_name) = TopicName::parse(topic) else {
            error!("Topic name invalid: {}", topic);
            promise.complete(Err(RelaymqClientError::invalid_topic_name(topic)));
            return rx;
        };

        let state = self.state.load();
        if state == ConsumerState::Closed || state == ConsumerState::Closing {
            error!("Multi-topics consumer already closed when subscribing");
            promise.complete(Err(RelaymqClientError::AlreadyClosed));
            return rx;
        }

        let known_partitions = {
            let table = self.partition_table.lock();
            table.get(topic).map(TopicEntry::lookup_partitions)
        };
        match known_partitions {
            Some(partitions) => self.subscribe_topic_partitions(partitions, &topic_name, &promise),
            None => {
                let weak = self.weak_self.clone();
                let lookup = self.lookup.clone();
                tokio::spawn(async move {
                    let metadata = lookup.get_partition_metadata(&topic_name).await;
                    let Some(this) = weak.upgrade() else {
                        promise.complete(Err(RelaymqClientError::AlreadyClosed));
                        return;
                    };
                    match metadata {
                        Ok(metadata) => {
                            this.subscribe_topic_partitions(metadata.partitions, &topic_name, &promise)
                        }
                        Err(e) => {
                            error!(
                                "Error getting partition metadata while subscribing {}: {}",
                                this.consumer_name, e
                            );
                            promise.complete(Err(e));
                        }
                    }
                });
            }
        }
        rx
    }

    /// Create and start one sub-topic consumer per partition of `topic_name`
    ///
    /// `num_partitions == 0` means non-partitioned: a single child keyed by
    /// the bare topic name.
    fn subscribe_topic_partitions(
        &self,
        num_partitions: usize,
        topic_name: &TopicName,
        promise: &OpCompletion,
    ) {
        if !self.client_alive() {
            promise.complete(Err(RelaymqClientError::AlreadyClosed));
            return;
        }

        let (partitions, kind) = if num_partitions == 0 {
            (1, TopicKind::NonPartitioned)
        } else {
            (num_partitions, TopicKind::Partitioned)
        };

        // Pause message dispatch until the parent reaches Ready, otherwise
        // messages could be acked before creation completes.
        let start_paused = self.config.message_listener.is_some() || self.config.start_paused;
        let receiver_queue_size = self.child_receiver_queue_size(partitions);

        {
            let mut table = self.partition_table.lock();
            table.insert(topic_name.as_str().to_string(), TopicEntry { partitions, kind });
        }
        self.number_topic_partitions.fetch_add(partitions, Ordering::SeqCst);

        let partitions_need_create = Arc::new(AtomicI64::new(partitions as i64));

        if kind == TopicKind::NonPartitioned {
            let options =
                self.child_options(topic_name.as_str().to_string(), kind, receiver_queue_size, start_paused);
            let child = match self.factory.create(options) {
                Ok(child) => child,
                Err(e) => {
                    error!("Failed to create sub-topic consumer for {}: {}", topic_name, e);
                    promise.complete(Err(RelaymqClientError::connect(e.to_string())));
                    return;
                }
            };
            self.spawn_created_listener(child.clone(), partitions_need_create, promise.clone());
            self.consumers.put(topic_name.as_str().to_string(), child.clone());
            debug!("Creating consumer for {} - {}", topic_name, self.consumer_name);
            child.start();
        } else {
            let mut children = Vec::with_capacity(partitions);
            for i in 0..partitions {
                let partition_topic = topic_name.partition_name(i);
                let options =
                    self.child_options(partition_topic.clone(), kind, receiver_queue_size, start_paused);
                match self.factory.create(options) {
                    Ok(child) => children.push((partition_topic, child)),
                    Err(e) => {
                        error!("Failed to create sub-topic consumer for {}: {}", partition_topic, e);
                        promise.complete(Err(RelaymqClientError::connect(e.to_string())));
                        return;
                    }
                }
            }
            for (i, (partition_topic, child)) in children.into_iter().enumerate() {
                self.spawn_created_listener(child.clone(), partitions_need_create.clone(), promise.clone());
                child.set_partition_index(i as i32);
                self.consumers.put(partition_topic.clone(), child.clone());
                debug!("Creating consumer for {} - {}", partition_topic, self.consumer_name);
                child.start();
            }
        }
    }

    fn child_options(
        &self,
        topic: String,
        kind: TopicKind,
        receiver_queue_size: usize,
        start_paused: bool,
    ) -> ChildConsumerOptions {
        let dispatcher: Weak<dyn MessageDispatcher> = self.weak_self.clone();
        ChildConsumerOptions {
            topic,
            subscription: self.subscription.clone(),
            kind,
            receiver_queue_size,
            start_paused,
            dispatcher,
        }
    }

    /// Per-child share of the total receiver budget, at least one slot
    fn child_receiver_queue_size(&self, partitions: usize) -> usize {
        let share = self.config.max_total_receiver_queue_size_across_partitions / partitions.max(1);
        self.config.receiver_queue_size.min(share).max(1)
    }

    fn spawn_created_listener(
        &self,
        child: Arc<dyn ChildConsumer>,
        partitions_need_create: Arc<AtomicI64>,
        promise: OpCompletion,
    ) {
        let weak = self.weak_self.clone();
        tokio::spawn(async move {
            let result = child.wait_created().await;
            if let Some(this) = weak.upgrade() {
                this.handle_single_consumer_created(result, &partitions_need_create, &promise);
            }
        });
    }

    fn handle_single_consumer_created(
        &self,
        result: Result<()>,
        partitions_need_create: &AtomicI64,
        promise: &OpCompletion,
    ) {
        if self.state.load() == ConsumerState::Failed {
            // another child already failed and cleanup is in flight
            promise.complete(Err(RelaymqClientError::AlreadyClosed));
            error!("Unable to create consumer {}: parent already failed", self.consumer_name);
            return;
        }

        let previous = partitions_need_create.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0);

        if let Err(e) = result {
            error!("Unable to create consumer {}: {}", self.consumer_name, e);
            promise.complete(Err(e));
            return;
        }

        debug!("Subscribed to one partition, {} remaining to create", previous - 1);

        if previous == 1 {
            if !self.config.partitions_update_interval.is_zero() {
                self.run_partition_update_task();
            }
            promise.complete(Ok(()));
        }
    }

    // ---------------------------------------------------------------------
    // delivery path

    async fn on_message_received(&self, child: Arc<dyn ChildConsumer>, mut msg: Message) {
        // a message crossing a seek boundary predates the new cursor
        if self.during_seek.load(Ordering::Acquire) {
            return;
        }
        debug!("Received message from sub-topic {}", child.topic());
        msg.stamp(Arc::from(child.topic()), Arc::downgrade(&child));

        let waiter = self.pending_receives.lock().pop_front();
        if let Some(tx) = waiter {
            let weak = self.weak_self.clone();
            tokio::spawn(async move {
                if let Some(this) = weak.upgrade() {
                    this.notify_pending_received(msg, tx);
                }
            });
            return;
        }

        let len = msg.len() as i64;
        if !self.incoming_messages.push(msg).await {
            return;
        }
        self.incoming_messages_size.fetch_add(len, Ordering::SeqCst);

        // A waiter may have parked between the pending check above and the
        // push: its pop-or-park ran before the message was visible. Both
        // sides resolve the hand-off under the pending-receive lock, so
        // popping the head back out here closes that window.
        let handoff = {
            let mut pending = self.pending_receives.lock();
            if pending.is_empty() {
                None
            } else {
                self.incoming_messages
                    .try_pop()
                    .and_then(|msg| pending.pop_front().map(|tx| (msg, tx)))
            }
        };
        if let Some((msg, tx)) = handoff {
            self.incoming_messages_size.fetch_sub(msg.len() as i64, Ordering::SeqCst);
            let weak = self.weak_self.clone();
            tokio::spawn(async move {
                if let Some(this) = weak.upgrade() {
                    this.notify_pending_received(msg, tx);
                }
            });
            return;
        }

        // try trigger a pending batch
        let batch_waiter = {
            let mut pending = self.batch_pending.lock();
            if self.has_enough_messages_for_batch_receive() {
                pending.pop_front()
            } else {
                None
            }
        };
        if let Some(entry) = batch_waiter {
            let messages = self.drain_batch();
            let _ = entry.tx.send(Ok(messages));
        }

        if self.config.message_listener.is_some() {
            let weak = self.weak_self.clone();
            tokio::spawn(async move {
                if let Some(this) = weak.upgrade() {
                    this.run_listener_once().await;
                }
            });
        }
    }

    /// Deliver a message to a waiter that was parked on an empty queue.
    /// Resident-byte accounting stays with the caller: a message routed
    /// here before entering the queue was never counted, and one popped
    /// back out for the hand-off is uncounted at that point.
    fn notify_pending_received(&self, msg: Message, tx: oneshot::Sender<Result<Message>>) {
        self.unacked_tracker.add(msg.id());
        self.metrics.record_receive(msg.len() as u64);
        if let Some(child) = msg.source() {
            child.increase_available_permits(&msg);
        }
        let _ = tx.send(Ok(msg));
    }

    async fn run_listener_once(self: Arc<Self>) {
        let Some(msg) = self.incoming_messages.pop().await else {
            return;
        };
        self.message_processed(&msg);
        if let Some(listener) = self.config.message_listener.clone() {
            let consumer = self.clone();
            if catch_unwind(AssertUnwindSafe(|| listener(consumer, msg))).is_err() {
                error!("Message listener of {} panicked", self.consumer_name);
            }
        }
    }

    /// Bookkeeping for a message leaving the merged queue: subtract its
    /// bytes, track it as unacked and refill the producing child's permit
    fn message_processed(&self, msg: &Message) {
        self.incoming_messages_size.fetch_sub(msg.len() as i64, Ordering::SeqCst);
        self.unacked_tracker.add(msg.id());
        self.metrics.record_receive(msg.len() as u64);
        if let Some(child) = msg.source() {
            child.increase_available_permits(msg);
        }
    }

    /// Receive the next message, waiting until one is available
    pub async fn receive(&self) -> Result<Message> {
        if self.state.load() != ConsumerState::Ready {
            return Err(RelaymqClientError::AlreadyClosed);
        }
        if self.config.message_listener.is_some() {
            error!("Can not receive when a listener has been set");
            return Err(RelaymqClientError::invalid_configuration(
                "synchronous receive is disabled while a message listener is set",
            ));
        }
        match self.incoming_messages.pop().await {
            Some(msg) => {
                self.message_processed(&msg);
                Ok(msg)
            }
            None => Err(RelaymqClientError::AlreadyClosed),
        }
    }

    /// Receive the next message, waiting up to `timeout`
    pub async fn receive_with_timeout(&self, timeout: Duration) -> Result<Message> {
        if self.state.load() != ConsumerState::Ready {
            return Err(RelaymqClientError::AlreadyClosed);
        }
        if self.config.message_listener.is_some() {
            error!("Can not receive when a listener has been set");
            return Err(RelaymqClientError::invalid_configuration(
                "synchronous receive is disabled while a message listener is set",
            ));
        }
        match tokio::time::timeout(timeout, self.incoming_messages.pop()).await {
            Ok(Some(msg)) => {
                self.message_processed(&msg);
                Ok(msg)
            }
            Ok(None) => Err(RelaymqClientError::AlreadyClosed),
            Err(_) => {
                if self.state.load() != ConsumerState::Ready {
                    Err(RelaymqClientError::AlreadyClosed)
                } else {
                    Err(RelaymqClientError::Timeout)
                }
            }
        }
    }

    /// Receive without contending on the queue: an immediate pop when a
    /// message is resident, otherwise the caller parks until the next
    /// delivery wakes it directly
    pub async fn receive_async(&self) -> Result<Message> {
        if self.state.load() != ConsumerState::Ready {
            return Err(RelaymqClientError::AlreadyClosed);
        }
        let rx = {
            let mut pending = self.pending_receives.lock();
            if let Some(msg) = self.incoming_messages.try_pop() {
                drop(pending);
                self.message_processed(&msg);
                return Ok(msg);
            }
            if self.incoming_messages.is_closed() {
                return Err(RelaymqClientError::AlreadyClosed);
            }
            let (tx, rx) = oneshot::channel();
            pending.push_back(tx);
            rx
        };
        rx.await.unwrap_or(Err(RelaymqClientError::AlreadyClosed))
    }

    /// Messages iterator over `receive_async`, ending when the consumer
    /// closes
    pub fn stream(self: &Arc<Self>) -> impl Stream<Item = Result<Message>> + Send + 'static {
        let this = self.clone();
        futures::stream::unfold(this, |this| async move {
            match this.receive_async().await {
                Ok(msg) => Some((Ok(msg), this)),
                Err(RelaymqClientError::AlreadyClosed) => None,
                Err(e) => Some((Err(e), this)),
            }
        })
    }

    fn fail_pending_receive_callbacks(&self) {
        self.incoming_messages.close();
        let waiters: Vec<_> = {
            let mut pending = self.pending_receives.lock();
            pending.drain(..).collect()
        };
        for tx in waiters {
            let _ = tx.send(Err(RelaymqClientError::AlreadyClosed));
        }
    }

    // ---------------------------------------------------------------------
    // batch receive

    /// Receive a batch bounded by the configured [`crate::batch::BatchReceivePolicy`]
    ///
    /// Returns as soon as a policy threshold is met, or with whatever has
    /// accumulated when the policy timeout expires.
    pub async fn batch_receive(&self) -> Result<Vec<Message>> {
        if self.state.load() != ConsumerState::Ready {
            return Err(RelaymqClientError::AlreadyClosed);
        }
        if self.config.message_listener.is_some() {
            return Err(RelaymqClientError::invalid_configuration(
                "batch receive is disabled while a message listener is set",
            ));
        }

        let rx = {
            let mut pending = self.batch_pending.lock();
            if self.has_enough_messages_for_batch_receive() {
                drop(pending);
                return Ok(self.drain_batch());
            }
            // re-check under the lock so a concurrent close cannot strand
            // this entry after it drained the pending list
            let state = self.state.load();
            if state == ConsumerState::Closing || state == ConsumerState::Closed {
                return Err(RelaymqClientError::AlreadyClosed);
            }
            let id = self.batch_seq.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = oneshot::channel();
            pending.push_back(BatchPendingEntry { id, tx });
            self.arm_batch_receive_timer(id);
            rx
        };
        rx.await.unwrap_or(Err(RelaymqClientError::AlreadyClosed))
    }

    fn arm_batch_receive_timer(&self, id: u64) {
        let weak = self.weak_self.clone();
        let token = self.timer_token.clone();
        let timeout = self.config.batch_receive_policy.timeout();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if let Some(this) = weak.upgrade() {
                        this.expire_batch_receive(id);
                    }
                }
            }
        });
    }

    fn expire_batch_receive(&self, id: u64) {
        let entry = {
            let mut pending = self.batch_pending.lock();
            let index = pending.iter().position(|e| e.id == id);
            index.and_then(|i| pending.remove(i))
        };
        if let Some(entry) = entry {
            let messages = self.drain_batch();
            let _ = entry.tx.send(Ok(messages));
        }
    }

    fn has_enough_messages_for_batch_receive(&self) -> bool {
        let policy = &self.config.batch_receive_policy;
        if policy.max_num_messages() <= 0 && policy.max_num_bytes() <= 0 {
            return false;
        }
        (policy.max_num_messages() > 0
            && self.incoming_messages.len() as i32 >= policy.max_num_messages())
            || (policy.max_num_bytes() > 0
                && self.incoming_messages_size.load(Ordering::SeqCst) >= policy.max_num_bytes())
    }

    fn drain_batch(&self) -> Vec<Message> {
        let mut batch = MessageBatch::new(self.config.batch_receive_policy);
        while let Some(msg) = self.incoming_messages.pop_if(|peek| batch.can_add(peek)) {
            self.message_processed(&msg);
            batch.add(msg);
        }
        batch.into_messages()
    }

    fn fail_pending_batch_receive(&self) {
        let entries: Vec<_> = {
            let mut pending = self.batch_pending.lock();
            pending.drain(..).collect()
        };
        for entry in entries {
            let _ = entry.tx.send(Err(RelaymqClientError::AlreadyClosed));
        }
    }

    // ---------------------------------------------------------------------
    // acknowledgment routing

    /// Acknowledge one message by id
    pub async fn acknowledge(&self, msg_id: &MessageId) -> Result<()> {
        if self.state.load() != ConsumerState::Ready {
            let result = Err(RelaymqClientError::AlreadyClosed);
            self.interceptors.on_acknowledge(msg_id, &result);
            return result;
        }

        let topic = msg_id.topic_name().unwrap_or("");
        match self.consumers.find(topic) {
            Some(child) => {
                self.unacked_tracker.remove(msg_id);
                let result = child.acknowledge(msg_id).await;
                match result {
                    Ok(()) => self.metrics.record_ack(),
                    Err(_) => self.metrics.record_ack_failure(),
                }
                result
            }
            None => {
                log_unroutable_ack(topic);
                self.metrics.record_ack_failure();
                Err(unroutable_ack_error(topic))
            }
        }
    }

    /// Acknowledge a list of messages, grouped per owning sub-topic
    pub async fn acknowledge_list(&self, msg_ids: Vec<MessageId>) -> Result<()> {
        if self.state.load() != ConsumerState::Ready {
            return Err(RelaymqClientError::AlreadyClosed);
        }

        let mut by_topic: HashMap<String, Vec<MessageId>> = HashMap::new();
        for msg_id in msg_ids {
            let Some(topic) = msg_id.topic_name() else {
                log_unroutable_ack("");
                return Err(unroutable_ack_error(""));
            };
            by_topic.entry(topic.to_string()).or_default().push(msg_id);
        }
        if by_topic.is_empty() {
            return Ok(());
        }

        let (tx, rx) = oneshot::channel();
        let terminal: OpCompletion = Arc::new(CompletionCell::new(tx));
        let need_callback = Arc::new(AtomicI64::new(by_topic.len() as i64));

        for (topic, ids) in by_topic {
            match self.consumers.find(&topic) {
                Some(child) => {
                    self.unacked_tracker.remove_list(&ids);
                    let terminal = terminal.clone();
                    let need_callback = need_callback.clone();
                    let metrics = self.metrics.clone();
                    tokio::spawn(async move {
                        match child.acknowledge_list(&ids).await {
                            Err(e) => {
                                error!("Failed when acknowledging message list: {}", e);
                                metrics.record_ack_failure();
                                // poison the countdown so later completions
                                // cannot fire the callback a second time
                                need_callback.store(-1, Ordering::SeqCst);
                                terminal.complete(Err(e));
                            }
                            Ok(()) => {
                                metrics.record_ack();
                                if need_callback.fetch_sub(1, Ordering::SeqCst) == 1 {
                                    terminal.complete(Ok(()));
                                }
                            }
                        }
                    });
                }
                None => {
                    log_unroutable_ack(&topic);
                    self.metrics.record_ack_failure();
                    terminal.complete(Err(unroutable_ack_error(&topic)));
                }
            }
        }

        rx.await.unwrap_or(Err(RelaymqClientError::AlreadyClosed))
    }

    /// Acknowledge every message of one sub-topic up to and including
    /// `msg_id`
    pub async fn acknowledge_cumulative(&self, msg_id: &MessageId) -> Result<()> {
        let topic = msg_id.topic_name().unwrap_or("");
        match self.consumers.find(topic) {
            Some(child) => {
                self.unacked_tracker.remove_messages_till(msg_id);
                let result = child.acknowledge_cumulative(msg_id).await;
                self.interceptors.on_acknowledge_cumulative(msg_id, &result);
                match result {
                    Ok(()) => self.metrics.record_ack(),
                    Err(_) => self.metrics.record_ack_failure(),
                }
                result
            }
            None => {
                log_unroutable_ack(topic);
                self.metrics.record_ack_failure();
                Err(unroutable_ack_error(topic))
            }
        }
    }

    /// Mark one message for redelivery without acknowledging it; unknown
    /// ids are ignored
    pub fn negative_acknowledge(&self, msg_id: &MessageId) {
        let topic = msg_id.topic_name().unwrap_or("");
        if let Some(child) = self.consumers.find(topic) {
            self.unacked_tracker.remove(msg_id);
            self.metrics.record_negative_ack();
            child.negative_acknowledge(msg_id);
        }
    }

    /// Ask every sub-topic to redeliver everything unacknowledged
    pub fn redeliver_unacknowledged_messages(&self) {
        debug!("Sending redeliver-unacknowledged command to all sub-topic consumers");
        for child in self.consumers.values() {
            child.redeliver_unacknowledged_messages();
        }
        self.unacked_tracker.clear();
        self.metrics.record_redeliver_request();
    }

    /// Ask the owning sub-topics to redeliver the given ids
    ///
    /// Selective redelivery needs a Shared or KeyShared subscription; other
    /// types degrade to the broadcast form.
    pub fn redeliver_unacknowledged(&self, msg_ids: HashSet<MessageId>) {
        if msg_ids.is_empty() {
            return;
        }
        if !self.config.subscription_type.supports_selective_redelivery() {
            self.redeliver_unacknowledged_messages();
            return;
        }

        let mut by_topic: HashMap<String, HashSet<MessageId>> = HashMap::new();
        for msg_id in msg_ids {
            let topic = msg_id.topic_name().unwrap_or("").to_string();
            by_topic.entry(topic).or_default().insert(msg_id);
        }
        for (topic, ids) in by_topic {
            match self.consumers.find(&topic) {
                Some(child) => child.redeliver_messages(&ids),
                None => error!("Message of topic {} not in consumers", topic),
            }
        }
        self.metrics.record_redeliver_request();
    }

    // ---------------------------------------------------------------------
    // seek coordinator

    /// Move the cursor of the owning sub-topic to `msg_id`, or of every
    /// sub-topic for the earliest/latest sentinels
    pub async fn seek(&self, msg_id: MessageId) -> Result<()> {
        if msg_id.is_earliest() || msg_id.is_latest() {
            return self.seek_all(SeekPosition::MessageId(msg_id)).await;
        }

        let topic = msg_id.topic_name().unwrap_or("").to_string();
        let Some(child) = self.consumers.find(&topic) else {
            error!("{} cannot seek a message id whose topic '{}' is not subscribed", self.consumer_name, topic);
            return Err(RelaymqClientError::operation_not_supported(format!(
                "cannot seek a message id of unsubscribed topic '{topic}'"
            )));
        };

        self.before_seek();
        let result = child.seek(SeekPosition::MessageId(msg_id)).await;
        self.after_seek();
        if result.is_ok() {
            self.metrics.record_seek();
        }
        result
    }

    /// Move every sub-topic cursor to the first message published at or
    /// after `timestamp` (ms)
    pub async fn seek_timestamp(&self, timestamp: u64) -> Result<()> {
        self.seek_all(SeekPosition::Timestamp(timestamp)).await
    }

    async fn seek_all(&self, position: SeekPosition) -> Result<()> {
        let children = self.consumers.values();
        self.before_seek();
        if children.is_empty() {
            self.after_seek();
            return Ok(());
        }

        let (tx, rx) = oneshot::channel();
        let terminal: OpCompletion = Arc::new(CompletionCell::new(tx));
        let remaining = Arc::new(AtomicI64::new(children.len() as i64));
        for child in children {
            let position = position.clone();
            let terminal = terminal.clone();
            let remaining = remaining.clone();
            tokio::spawn(async move {
                match child.seek(position).await {
                    Err(e) => {
                        remaining.store(-1, Ordering::SeqCst);
                        terminal.complete(Err(e));
                    }
                    Ok(()) => {
                        if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                            terminal.complete(Ok(()));
                        }
                    }
                }
            });
        }

        let result = rx.await.unwrap_or(Err(RelaymqClientError::AlreadyClosed));
        self.after_seek();
        if result.is_ok() {
            self.metrics.record_seek();
        }
        result
    }

    /// Stop accepting deliveries and drain everything that predates the
    /// new cursor
    fn before_seek(&self) {
        self.during_seek.store(true, Ordering::Release);
        for child in self.consumers.values() {
            child.pause_message_listener();
        }
        self.unacked_tracker.clear();
        self.incoming_messages.clear();
        self.incoming_messages_size.store(0, Ordering::Release);
    }

    fn after_seek(&self) {
        self.during_seek.store(false, Ordering::Release);
        let weak = self.weak_self.clone();
        tokio::spawn(async move {
            if let Some(this) = weak.upgrade() {
                for child in this.consumers.values() {
                    child.resume_message_listener();
                }
            }
        });
    }

    // ---------------------------------------------------------------------
    // lifecycle coordinator

    /// Remove the subscription from every topic and shut down
    pub async fn unsubscribe(&self) -> Result<()> {
        info!("{} unsubscribing", self.consumer_name);

        let state = self.state.load();
        if state == ConsumerState::Closing || state == ConsumerState::Closed {
            return Err(RelaymqClientError::AlreadyClosed);
        }
        self.state.store(ConsumerState::Closing);

        let children = self.consumers.values();
        let result = if children.is_empty() {
            Ok(())
        } else {
            let (tx, rx) = oneshot::channel();
            let terminal: OpCompletion = Arc::new(CompletionCell::new(tx));
            let remaining = Arc::new(AtomicI64::new(children.len() as i64));
            for child in children {
                let weak = self.weak_self.clone();
                let terminal = terminal.clone();
                let remaining = remaining.clone();
                tokio::spawn(async move {
                    let result = child.unsubscribe().await;
                    let Some(this) = weak.upgrade() else { return };
                    if let Err(e) = result {
                        this.state.store(ConsumerState::Failed);
                        error!(
                            "Error unsubscribing one of the consumers of subscription {}: {}",
                            this.subscription, e
                        );
                    }
                    if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                        debug!("Unsubscribed all partition consumers of {}", this.consumer_name);
                        let result = if this.state.load() != ConsumerState::Failed {
                            Ok(())
                        } else {
                            Err(RelaymqClientError::unknown("failed to unsubscribe consumers"))
                        };
                        terminal.complete(result);
                    }
                });
            }
            rx.await.unwrap_or(Err(RelaymqClientError::AlreadyClosed))
        };

        match result {
            Ok(()) => {
                self.internal_shutdown();
                info!("{} unsubscribed successfully", self.consumer_name);
                Ok(())
            }
            Err(e) => {
                self.state.store(ConsumerState::Ready);
                warn!("{} failed to unsubscribe: {}", self.consumer_name, e);
                Err(e)
            }
        }
    }

    /// Remove the subscription from one topic, dropping its sub-topic
    /// consumers
    pub async fn unsubscribe_topic(&self, topic: &str) -> Result<()> {
        let entry = {
            let table = self.partition_table.lock();
            table.get(topic).copied()
        };
        let Some(entry) = entry else {
            error!(
                "Multi-topics consumer does not subscribe topic {} (subscription {})",
                topic, self.subscription
            );
            return Err(RelaymqClientError::topic_not_found(topic));
        };

        let state = self.state.load();
        if state == ConsumerState::Closing || state == ConsumerState::Closed {
            error!(
                "Multi-topics consumer already closed when unsubscribing topic {} (subscription {})",
                topic, self.subscription
            );
            return Err(RelaymqClientError::AlreadyClosed);
        }

        let Some(topic_name) = TopicName::parse(topic) else {
            error!("Topic name invalid: {}", topic);
            return Err(RelaymqClientError::unknown(format!("invalid topic name '{topic}'")));
        };

        let keys = entry.partition_keys(&topic_name);
        let total = keys.len();
        let (tx, rx) = oneshot::channel();
        let terminal: OpCompletion = Arc::new(CompletionCell::new(tx));
        let unsubscribed = Arc::new(AtomicUsize::new(0));
        let missing_partition = Arc::new(AtomicBool::new(false));

        for key in keys {
            match self.consumers.find(&key) {
                None => {
                    error!("Multi-topics consumer not subscribed on sub-topic {}", key);
                    missing_partition.store(true, Ordering::SeqCst);
                    if unsubscribed.fetch_add(1, Ordering::SeqCst) + 1 == total {
                        self.finish_topic_unsubscribe(topic, entry, &missing_partition, &terminal);
                    }
                }
                Some(child) => {
                    let weak = self.weak_self.clone();
                    let terminal = terminal.clone();
                    let unsubscribed = unsubscribed.clone();
                    let missing_partition = missing_partition.clone();
                    let topic = topic.to_string();
                    tokio::spawn(async move {
                        let result = child.unsubscribe().await;
                        let Some(this) = weak.upgrade() else { return };
                        if let Err(e) = result {
                            this.state.store(ConsumerState::Failed);
                            error!("Error unsubscribing consumer of sub-topic {}: {}", key, e);
                        } else {
                            debug!("Successfully unsubscribed sub-topic consumer {}", key);
                        }
                        if let Some(removed) = this.consumers.remove(&key) {
                            removed.pause_message_listener();
                        }
                        if unsubscribed.fetch_add(1, Ordering::SeqCst) + 1 == total {
                            this.finish_topic_unsubscribe(&topic, entry, &missing_partition, &terminal);
                        }
                    });
                }
            }
        }

        rx.await.unwrap_or(Err(RelaymqClientError::AlreadyClosed))
    }

    fn finish_topic_unsubscribe(
        &self,
        topic: &str,
        entry: TopicEntry,
        missing_partition: &AtomicBool,
        terminal: &OpCompletion,
    ) {
        debug!("Unsubscribed all partition consumers of topic {}", topic);
        let removed = {
            let mut table = self.partition_table.lock();
            table.remove(topic)
        };
        if removed.is_some() {
            self.number_topic_partitions.fetch_sub(entry.partitions, Ordering::SeqCst);
        }
        self.unacked_tracker.remove_topic_message(topic);
        if entry.kind == TopicKind::Partitioned {
            if let Some(topic_name) = TopicName::parse(topic) {
                for i in 0..entry.partitions {
                    self.unacked_tracker.remove_topic_message(&topic_name.partition_name(i));
                }
            }
        }

        let failed = self.state.load() == ConsumerState::Failed
            || missing_partition.load(Ordering::SeqCst);
        terminal.complete(if failed {
            Err(RelaymqClientError::unknown(format!("failed to unsubscribe topic '{topic}'")))
        } else {
            Ok(())
        });
    }

    /// Close the consumer, releasing every sub-topic consumer; idempotent
    pub async fn close(&self) -> Result<()> {
        let state = self.state.load();
        if state == ConsumerState::Closing || state == ConsumerState::Closed {
            self.internal_shutdown();
            return Ok(());
        }

        self.state.store(ConsumerState::Closing);
        self.cancel_timers();

        let drained = self.consumers.take_all();
        self.number_topic_partitions.store(0, Ordering::SeqCst);

        // release every parked receive before waiting on the children
        self.fail_pending_receive_callbacks();
        self.fail_pending_batch_receive();

        let result = if drained.is_empty() {
            debug!(
                "Multi-topics consumer has no consumers to close (subscription {})",
                self.subscription
            );
            Ok(())
        } else {
            let (tx, rx) = oneshot::channel();
            let terminal: OpCompletion = Arc::new(CompletionCell::new(tx));
            let remaining = Arc::new(AtomicUsize::new(drained.len()));
            let last_failure: Arc<Mutex<Option<RelaymqClientError>>> = Arc::new(Mutex::new(None));
            for (name, child) in drained {
                let terminal = terminal.clone();
                let remaining = remaining.clone();
                let last_failure = last_failure.clone();
                tokio::spawn(async move {
                    let result = child.close().await;
                    if let Err(e) = &result {
                        error!("Closing the consumer failed for sub-topic {}: {}", name, e);
                        *last_failure.lock() = Some(e.clone());
                    }
                    let left = remaining.fetch_sub(1, Ordering::SeqCst) - 1;
                    debug!("Closed consumer for sub-topic {}, {} remaining", name, left);
                    if left == 0 {
                        let outcome = match last_failure.lock().take() {
                            Some(e) => Err(e),
                            None => Ok(()),
                        };
                        terminal.complete(outcome);
                    }
                });
            }
            rx.await.unwrap_or(Err(RelaymqClientError::AlreadyClosed))
        };

        self.internal_shutdown();
        if let Err(e) = &result {
            warn!("{} failed to close consumer: {}", self.consumer_name, e);
            if !e.is_already_closed() {
                self.state.store(ConsumerState::Failed);
            }
        }
        result
    }

    /// Tear down all shared state; safe to call any number of times
    fn internal_shutdown(&self) {
        self.cancel_timers();
        self.incoming_messages.clear();
        self.partition_table.lock().clear();
        self.unacked_tracker.clear();
        self.interceptors.close();
        if let Some(client) = self.client.as_ref().and_then(Weak::upgrade) {
            client.deregister_consumer(&self.consumer_name);
        }
        self.consumers.clear();
        let failure = self
            .failed_result
            .get()
            .cloned()
            .unwrap_or(RelaymqClientError::AlreadyClosed);
        self.created.complete(Err(failure));
        self.state.store(ConsumerState::Closed);
    }

    fn cancel_timers(&self) {
        self.timer_token.cancel();
        if let Some(handle) = self.partitions_update_timer.lock().take() {
            handle.abort();
        }
    }

    fn client_alive(&self) -> bool {
        match &self.client {
            None => true,
            Some(client) => client.strong_count() > 0,
        }
    }

    // ---------------------------------------------------------------------
    // partition refresher

    /// Arm (or reset) the partition rediscovery timer; an aborted previous
    /// wait is treated as an ignored tick
    fn run_partition_update_task(&self) {
        if self.config.partitions_update_interval.is_zero() || self.timer_token.is_cancelled() {
            return;
        }
        let weak = self.weak_self.clone();
        let token = self.timer_token.clone();
        let interval = self.config.partitions_update_interval;
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(interval) => {
                    if let Some(this) = weak.upgrade() {
                        this.topic_partition_update();
                    }
                }
            }
        });
        let mut slot = self.partitions_update_timer.lock();
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    fn topic_partition_update(&self) {
        let snapshot: Vec<(String, TopicEntry)> = {
            let table = self.partition_table.lock();
            table.iter().map(|(t, e)| (t.clone(), *e)).collect()
        };
        for (topic, entry) in snapshot {
            let Some(topic_name) = TopicName::parse(&topic) else { continue };
            let weak = self.weak_self.clone();
            let lookup = self.lookup.clone();
            tokio::spawn(async move {
                let result = lookup.get_partition_metadata(&topic_name).await;
                if let Some(this) = weak.upgrade() {
                    this.handle_get_partitions(&topic_name, result, entry.partitions);
                }
            });
        }
    }

    fn handle_get_partitions(
        &self,
        topic_name: &TopicName,
        result: Result<crate::lookup::PartitionMetadata>,
        current_partitions: usize,
    ) {
        if self.state.load() != ConsumerState::Ready {
            return;
        }
        match result {
            Ok(metadata) => {
                let new_partitions = metadata.partitions;
                if new_partitions > current_partitions {
                    info!(
                        "Partition count of {} grew from {} to {}",
                        topic_name, current_partitions, new_partitions
                    );
                    let partitions_need_create =
                        Arc::new(AtomicI64::new((new_partitions - current_partitions) as i64));
                    let (tx, _rx) = oneshot::channel();
                    let promise: OpCompletion = Arc::new(CompletionCell::new(tx));
                    {
                        let mut table = self.partition_table.lock();
                        table.insert(
                            topic_name.as_str().to_string(),
                            TopicEntry {
                                partitions: new_partitions,
                                kind: TopicKind::Partitioned,
                            },
                        );
                    }
                    self.number_topic_partitions
                        .fetch_add(new_partitions - current_partitions, Ordering::SeqCst);
                    for i in current_partitions..new_partitions {
                        self.subscribe_single_new_consumer(
                            new_partitions,
                            topic_name,
                            i,
                            &promise,
                            &partitions_need_create,
                        );
                    }
                    // the timer re-arms once the last new child reports
                    // created
                    return;
                }
            }
            Err(e) => warn!("Failed to get partition metadata for {}: {}", topic_name, e),
        }
        self.run_partition_update_task();
    }

    /// Subscribe one newly discovered partition, dividing the receiver
    /// budget by the grown partition count
    fn subscribe_single_new_consumer(
        &self,
        total_partitions: usize,
        topic_name: &TopicName,
        partition_index: usize,
        promise: &OpCompletion,
        partitions_need_create: &Arc<AtomicI64>,
    ) {
        if !self.client_alive() {
            promise.complete(Err(RelaymqClientError::AlreadyClosed));
            return;
        }
        let receiver_queue_size = self.child_receiver_queue_size(total_partitions);
        let partition_topic = topic_name.partition_name(partition_index);
        let options = self.child_options(
            partition_topic.clone(),
            TopicKind::Partitioned,
            receiver_queue_size,
            self.config.start_paused,
        );
        let child = match self.factory.create(options) {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to create sub-topic consumer for {}: {}", partition_topic, e);
                promise.complete(Err(RelaymqClientError::connect(e.to_string())));
                return;
            }
        };
        self.spawn_created_listener(child.clone(), partitions_need_create.clone(), promise.clone());
        child.set_partition_index(partition_index as i32);
        self.consumers.put(partition_topic.clone(), child.clone());
        child.start();
        info!(
            "Created consumer for new partition {} of {} ({} consumers total)",
            partition_topic,
            self.consumer_name,
            self.consumers.len()
        );
    }

    // ---------------------------------------------------------------------
    // stats / availability fan-outs

    /// Aggregate broker-side statistics from every sub-topic consumer
    pub async fn get_broker_consumer_stats(&self) -> Result<MultiTopicsBrokerConsumerStats> {
        if self.state.load() != ConsumerState::Ready {
            return Err(RelaymqClientError::ConsumerNotInitialized);
        }
        let children = self.consumers.values();
        if children.is_empty() {
            return Ok(MultiTopicsBrokerConsumerStats::new(0));
        }

        let aggregate = Arc::new(Mutex::new(MultiTopicsBrokerConsumerStats::new(children.len())));
        let latch = Arc::new(AtomicI64::new(children.len() as i64));
        let (tx, rx) = oneshot::channel();
        let terminal = Arc::new(CompletionCell::new(tx));

        for (index, child) in children.into_iter().enumerate() {
            let aggregate = aggregate.clone();
            let latch = latch.clone();
            let terminal = terminal.clone();
            tokio::spawn(async move {
                match child.broker_consumer_stats().await {
                    Err(e) => {
                        latch.store(-1, Ordering::SeqCst);
                        terminal.complete(Err(e));
                    }
                    Ok(stats) => {
                        aggregate.lock().add(stats, index);
                        if latch.fetch_sub(1, Ordering::SeqCst) == 1 {
                            terminal.complete(Ok(std::mem::take(&mut *aggregate.lock())));
                        }
                    }
                }
            });
        }

        rx.await.unwrap_or(Err(RelaymqClientError::AlreadyClosed))
    }

    /// Whether any message is available to receive
    ///
    /// The resident-byte short-circuit is read unsynchronized and may
    /// answer `true` while a seek is draining the queue; a subsequent
    /// receive observes the drained state.
    pub async fn has_message_available(&self) -> Result<bool> {
        if self.incoming_messages_size.load(Ordering::SeqCst) > 0 {
            return Ok(true);
        }
        let children = self.consumers.values();
        if children.is_empty() {
            return Ok(false);
        }

        let any_available = Arc::new(AtomicBool::new(false));
        let need_callback = Arc::new(AtomicI64::new(children.len() as i64));
        let (tx, rx) = oneshot::channel();
        let terminal = Arc::new(CompletionCell::new(tx));

        for child in children {
            let weak = self.weak_self.clone();
            let any_available = any_available.clone();
            let need_callback = need_callback.clone();
            let terminal = terminal.clone();
            tokio::spawn(async move {
                match child.has_message_available().await {
                    Err(e) => {
                        error!("Failed checking message availability: {}", e);
                        need_callback.store(-1, Ordering::SeqCst);
                        terminal.complete(Err(e));
                    }
                    Ok(has_message) => {
                        if has_message {
                            any_available.store(true, Ordering::SeqCst);
                        }
                        if need_callback.fetch_sub(1, Ordering::SeqCst) == 1 {
                            let resident = weak
                                .upgrade()
                                .map(|this| this.incoming_messages_size.load(Ordering::SeqCst) > 0)
                                .unwrap_or(false);
                            terminal.complete(Ok(any_available.load(Ordering::SeqCst) || resident));
                        }
                    }
                }
            });
        }

        rx.await.unwrap_or(Err(RelaymqClientError::AlreadyClosed))
    }

    // ---------------------------------------------------------------------
    // listener control and introspection

    /// Stop invoking the configured message listener on every sub-topic
    pub fn pause_message_listener(&self) -> Result<()> {
        if self.config.message_listener.is_none() {
            return Err(RelaymqClientError::invalid_configuration(
                "no message listener is configured",
            ));
        }
        for child in self.consumers.values() {
            child.pause_message_listener();
        }
        Ok(())
    }

    /// Resume invoking the configured message listener on every sub-topic
    pub fn resume_message_listener(&self) -> Result<()> {
        if self.config.message_listener.is_none() {
            return Err(RelaymqClientError::invalid_configuration(
                "no message listener is configured",
            ));
        }
        for child in self.consumers.values() {
            child.resume_message_listener();
        }
        Ok(())
    }

    /// Grant every sub-topic consumer a full receiver queue of flow permits
    pub fn send_flow_permits(&self) {
        let permits = self.config.receiver_queue_size as u32;
        for child in self.consumers.values() {
            debug!("Sending flow permits to broker for sub-topic {}", child.topic());
            child.send_flow_permits_to_broker(permits);
        }
    }

    /// Aggregating the last message id across topics is unsupported
    pub async fn get_last_message_id(&self) -> Result<MessageId> {
        Err(RelaymqClientError::operation_not_supported(
            "get_last_message_id is not supported on a multi-topics consumer",
        ))
    }

    /// Whether every sub-topic consumer holds a live connection
    pub fn is_connected(&self) -> bool {
        if self.state.load() != ConsumerState::Ready {
            return false;
        }
        self.consumers.values().iter().all(|c| c.is_connected())
    }

    /// Number of sub-topic consumers with a live connection
    pub fn connected_consumer_count(&self) -> usize {
        self.consumers.values().iter().filter(|c| c.is_connected()).count()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConsumerState {
        self.state.load()
    }

    /// Whether the consumer reached its terminal state
    pub fn is_closed(&self) -> bool {
        self.state.load() == ConsumerState::Closed
    }

    /// Whether the consumer is live
    pub fn is_open(&self) -> bool {
        self.state.load() == ConsumerState::Ready
    }

    /// Messages currently resident in the merged queue
    pub fn prefetched_message_count(&self) -> usize {
        self.incoming_messages.len()
    }

    /// Total partitions across all subscribed topics
    pub fn number_of_partitions(&self) -> usize {
        self.number_topic_partitions.load(Ordering::SeqCst)
    }

    /// Number of sub-topic consumers currently owned
    pub fn child_consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Names of the sub-topics currently subscribed
    pub fn subscribed_partition_names(&self) -> Vec<String> {
        self.consumers.keys()
    }

    /// Message ids delivered but not yet acknowledged
    pub fn unacked_message_count(&self) -> usize {
        self.unacked_tracker.size()
    }

    /// Subscription name
    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    /// Topics this consumer was created with
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Display name of this consumer
    pub fn name(&self) -> &str {
        &self.consumer_name
    }

    /// Metrics counters of this consumer
    pub fn metrics(&self) -> &ConsumerMetrics {
        &self.metrics
    }
}

#[async_trait]
impl MessageDispatcher for MultiTopicsConsumer {
    async fn message_received(&self, child: Arc<dyn ChildConsumer>, msg: Message) {
        self.on_message_received(child, msg).await;
    }
}

impl RedeliveryHook for MultiTopicsConsumer {
    fn redeliver(&self, msg_ids: HashSet<MessageId>) {
        self.redeliver_unacknowledged(msg_ids);
    }
}

impl Drop for MultiTopicsConsumer {
    fn drop(&mut self) {
        self.cancel_timers();
    }
}

fn log_unroutable_ack(topic: &str) {
    if topic.is_empty() {
        error!("A message id without a topic name cannot be acknowledged by a multi-topics consumer");
    } else {
        error!("Message of topic {} not in consumers", topic);
    }
}

fn unroutable_ack_error(topic: &str) -> RelaymqClientError {
    if topic.is_empty() {
        RelaymqClientError::operation_not_supported(
            "message id carries no topic name to route the acknowledgment",
        )
    } else {
        RelaymqClientError::operation_not_supported(format!(
            "message topic '{topic}' has no subscribed consumer"
        ))
    }
}
