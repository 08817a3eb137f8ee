//! Consumer interceptor hooks

use crate::message::MessageId;
use crate::Result;

/// Observer hooks invoked around acknowledgment outcomes
///
/// The multi-topics consumer notifies the interceptors when an ack is
/// rejected at its own gate; acks that reach a sub-topic consumer are
/// intercepted there. Implementations must not block.
pub trait ConsumerInterceptors: Send + Sync {
    /// An individual acknowledgment completed with `result`
    fn on_acknowledge(&self, msg_id: &MessageId, result: &Result<()>);

    /// A cumulative acknowledgment completed with `result`
    fn on_acknowledge_cumulative(&self, msg_id: &MessageId, result: &Result<()>);

    /// The owning consumer is shutting down
    fn close(&self);
}

/// Interceptor set that observes nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopConsumerInterceptors;

impl ConsumerInterceptors for NoopConsumerInterceptors {
    fn on_acknowledge(&self, _msg_id: &MessageId, _result: &Result<()>) {}

    fn on_acknowledge_cumulative(&self, _msg_id: &MessageId, _result: &Result<()>) {}

    fn close(&self) {}
}
