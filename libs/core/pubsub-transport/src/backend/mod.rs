//! Pub/Sub service operations the transport depends on.
//!
//! [`PubSubBackend`] is the narrow surface of the managed service the
//! transport uses: topic and subscription provisioning, publish, pull and
//! lease settlement. [`RestPubSub`] talks to the real service (or its
//! emulator); [`InMemoryPubSub`] keeps everything in process.

mod memory;
mod rest;

pub use memory::InMemoryPubSub;
pub use rest::RestPubSub;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Fully qualified topic name (`projects/{project}/topics/{id}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicName(String);

impl TopicName {
    pub fn new(project_id: &str, topic_id: &str) -> Self {
        Self(format!("projects/{}/topics/{}", project_id, topic_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fully qualified subscription name (`projects/{project}/subscriptions/{id}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionName(String);

impl SubscriptionName {
    pub fn new(project_id: &str, subscription_id: &str) -> Self {
        Self(format!(
            "projects/{}/subscriptions/{}",
            project_id, subscription_id
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message as stored by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PubsubMessage {
    /// Payload bytes
    pub data: Vec<u8>,
    /// String attributes
    pub attributes: BTreeMap<String, String>,
    /// Message id; assigned by the service on publish
    pub message_id: String,
    /// Time the service accepted the message
    pub publish_time: Option<DateTime<Utc>>,
}

/// A leased message returned by a pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Token used to acknowledge or release the lease
    pub ack_id: String,
    pub message: PubsubMessage,
    /// How many times the message has been delivered, when known
    pub delivery_attempt: Option<u32>,
}

/// Error returned by backend operations.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The topic or subscription does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The topic or subscription already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The service is overloaded or temporarily unavailable
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Any other non-success status
    #[error("status {code}: {message}")]
    Status { code: u16, message: String },

    /// HTTP transport error
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response could not be decoded
    #[error("could not decode response: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, BackendError::AlreadyExists(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }
}

/// Pub/Sub service operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PubSubBackend: Send + Sync {
    /// Succeeds when the topic exists.
    async fn get_topic(&self, topic: &TopicName) -> Result<(), BackendError>;

    async fn create_topic(&self, topic: &TopicName) -> Result<(), BackendError>;

    async fn delete_topic(&self, topic: &TopicName) -> Result<(), BackendError>;

    /// Succeeds when the subscription exists.
    async fn get_subscription(&self, subscription: &SubscriptionName) -> Result<(), BackendError>;

    async fn create_subscription(
        &self,
        subscription: &SubscriptionName,
        topic: &TopicName,
        ack_deadline: Duration,
    ) -> Result<(), BackendError>;

    async fn delete_subscription(&self, subscription: &SubscriptionName)
        -> Result<(), BackendError>;

    /// Publish messages, returning the ids the service assigned.
    async fn publish(
        &self,
        topic: &TopicName,
        messages: Vec<PubsubMessage>,
    ) -> Result<Vec<String>, BackendError>;

    /// Pull up to `max_messages`, waiting a bounded time for one to arrive.
    async fn pull(
        &self,
        subscription: &SubscriptionName,
        max_messages: usize,
    ) -> Result<Vec<ReceivedMessage>, BackendError>;

    async fn acknowledge(
        &self,
        subscription: &SubscriptionName,
        ack_ids: Vec<String>,
    ) -> Result<(), BackendError>;

    /// Set the remaining lease of `ack_ids`; zero makes them redeliverable.
    async fn modify_ack_deadline(
        &self,
        subscription: &SubscriptionName,
        ack_ids: Vec<String>,
        ack_deadline: Duration,
    ) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_names() {
        let topic = TopicName::new("my-project", "orders");
        let subscription = SubscriptionName::new("my-project", "orders");

        assert_eq!(topic.as_str(), "projects/my-project/topics/orders");
        assert_eq!(
            subscription.to_string(),
            "projects/my-project/subscriptions/orders"
        );
    }

    #[test]
    fn test_error_predicates() {
        assert!(BackendError::NotFound("t".into()).is_not_found());
        assert!(BackendError::Unavailable("busy".into()).is_unavailable());
        assert!(BackendError::AlreadyExists("t".into()).is_already_exists());
        assert!(!BackendError::Decode("x".into()).is_not_found());
    }
}
