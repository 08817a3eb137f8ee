//! Error types for the RelayMQ client library

/// Main error type for RelayMQ client operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelaymqClientError {
    /// The consumer is closing or already closed
    #[error("Consumer already closed")]
    AlreadyClosed,

    /// A topic name failed validation
    #[error("Invalid topic name: '{topic}'")]
    InvalidTopicName { topic: String },

    /// The operation conflicts with the consumer configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// The topic is not part of this subscription
    #[error("Topic '{topic}' is not subscribed")]
    TopicNotFound { topic: String },

    /// A timed operation did not complete in time
    #[error("Operation timed out")]
    Timeout,

    /// The operation cannot be performed by this consumer
    #[error("Operation not supported: {message}")]
    OperationNotSupported { message: String },

    /// Establishing a broker connection failed
    #[error("Connection error: {message}")]
    ConnectError { message: String },

    /// The consumer has not finished initializing
    #[error("Consumer not initialized")]
    ConsumerNotInitialized,

    /// The broker-side service unit is not ready to serve the topic
    #[error("Service unit not ready: {message}")]
    ServiceUnitNotReady { message: String },

    /// Catch-all for unclassified failures
    #[error("{message}")]
    UnknownError { message: String },
}

impl RelaymqClientError {
    /// Create a new invalid-configuration error
    pub fn invalid_configuration<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create a new invalid-topic-name error
    pub fn invalid_topic_name<S: Into<String>>(topic: S) -> Self {
        Self::InvalidTopicName {
            topic: topic.into(),
        }
    }

    /// Create a new topic-not-found error
    pub fn topic_not_found<S: Into<String>>(topic: S) -> Self {
        Self::TopicNotFound {
            topic: topic.into(),
        }
    }

    /// Create a new operation-not-supported error
    pub fn operation_not_supported<S: Into<String>>(message: S) -> Self {
        Self::OperationNotSupported {
            message: message.into(),
        }
    }

    /// Create a new connection error
    pub fn connect<S: Into<String>>(message: S) -> Self {
        Self::ConnectError {
            message: message.into(),
        }
    }

    /// Create a new service-unit-not-ready error
    pub fn service_unit_not_ready<S: Into<String>>(message: S) -> Self {
        Self::ServiceUnitNotReady {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn unknown<S: Into<String>>(message: S) -> Self {
        Self::UnknownError {
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectError { .. } | Self::ServiceUnitNotReady { .. } | Self::Timeout
        )
    }

    /// Check if this error indicates a closed consumer
    pub fn is_already_closed(&self) -> bool {
        matches!(self, Self::AlreadyClosed)
    }

    /// Check if this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}
