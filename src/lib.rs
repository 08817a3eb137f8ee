//! # RelayMQ Client Library
//!
//! An async Rust client for the RelayMQ message broker, centered on a
//! multi-topics consumer that subscribes to any number of topics, expands
//! each into its partitions and merges every partition stream behind one
//! receive surface.
//!
//! ## Features
//!
//! - **Multi-topic fan-in**: one consumer over N topics and all of their
//!   partitions, with per-partition ordering
//! - **Three delivery styles**: awaited receive, parked receive and
//!   listener callbacks, plus size-bounded batch receive
//! - **Backpressure**: a bounded merged queue replenishes broker flow
//!   permits only when messages are consumed
//! - **Ack routing**: individual, batched, cumulative and negative
//!   acknowledgments routed to the owning partition
//! - **Partition discovery**: newly added partitions are subscribed
//!   automatically on a configurable interval
//! - **Observability**: built-in metrics and tracing support
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relaymq_client::*;
//! use std::sync::Arc;
//!
//! # async fn run(lookup: Arc<dyn LookupService>, factory: Arc<dyn ChildConsumerFactory>) -> Result<()> {
//! let consumer = MultiTopicsConsumerBuilder::new(lookup, factory)
//!     .topics(vec!["orders", "payments"])
//!     .subscription("billing")
//!     .config(
//!         ConsumerConfigBuilder::new()
//!             .receiver_queue_size(500)
//!             .build(),
//!     )
//!     .subscribe()
//!     .await?;
//!
//! let msg = consumer.receive().await?;
//! println!("received {} bytes from {:?}", msg.len(), msg.topic_name());
//! consumer.acknowledge(msg.id()).await?;
//!
//! consumer.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod child;
pub mod config;
pub mod consumer;
pub mod error;
pub mod interceptor;
pub mod lookup;
pub mod message;
pub mod metrics;
pub mod stats;
pub mod topic;
pub mod tracker;

mod queue;

pub use batch::BatchReceivePolicy;
pub use child::{
    ChildConsumer, ChildConsumerFactory, ChildConsumerOptions, MessageDispatcher, TopicKind,
};
pub use config::{ConsumerConfig, ConsumerConfigBuilder, MessageListener, SubscriptionType};
pub use consumer::{
    ConsumerRegistry, ConsumerState, MultiTopicsConsumer, MultiTopicsConsumerBuilder,
};
pub use error::RelaymqClientError;
pub use interceptor::{ConsumerInterceptors, NoopConsumerInterceptors};
pub use lookup::{LookupService, PartitionMetadata};
pub use message::{Message, MessageId, SeekPosition};
pub use metrics::ConsumerMetrics;
pub use stats::{BrokerConsumerStats, MultiTopicsBrokerConsumerStats};
pub use topic::TopicName;
pub use tracker::{
    RedeliveryHook, UnackedMessageTracker, UnackedMessageTrackerDisabled,
    UnackedMessageTrackerEnabled,
};

/// Client library result type
pub type Result<T> = std::result::Result<T, RelaymqClientError>;

/// Client library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
