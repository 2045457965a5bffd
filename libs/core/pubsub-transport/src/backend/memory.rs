//! In-memory Pub/Sub for testing and single-process scenarios.
//!
//! Behaves like the managed service where the transport cares:
//! - topics fan out to every subscription attached to them
//! - pulled messages are leased for the subscription's ack deadline
//! - a lease that expires or is reset to zero makes the message deliverable again
//! - acknowledged messages are gone for good
//!
//! Time is measured with `tokio::time`, so tests may run with a paused clock.

use super::{
    BackendError, PubSubBackend, PubsubMessage, ReceivedMessage, SubscriptionName, TopicName,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct Delivery {
    message: PubsubMessage,
    attempts: u32,
}

#[derive(Debug)]
struct Lease {
    delivery: Delivery,
    expires_at: Instant,
}

#[derive(Debug)]
struct Subscription {
    topic: String,
    ack_deadline: Duration,
    pending: VecDeque<Delivery>,
    leased: HashMap<String, Lease>,
    acknowledged: u64,
}

impl Subscription {
    /// Return expired leases to the front of the queue.
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .leased
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(ack_id, _)| ack_id.clone())
            .collect();

        for ack_id in expired {
            if let Some(lease) = self.leased.remove(&ack_id) {
                self.pending.push_front(lease.delivery);
            }
        }
    }

    fn next_lease_expiry(&self) -> Option<Instant> {
        self.leased.values().map(|lease| lease.expires_at).min()
    }
}

#[derive(Debug, Default)]
struct State {
    topics: HashSet<String>,
    subscriptions: HashMap<String, Subscription>,
    next_message_id: u64,
    subscription_lag: u32,
    unavailable: bool,
}

/// In-memory Pub/Sub service.
///
/// Cloning shares the same state, so a test can keep a handle for inspection
/// while the transport owns another.
///
/// ## Example
///
/// ```rust,ignore
/// let pubsub = InMemoryPubSub::new().with_pull_wait(Duration::from_millis(50));
/// let transport = PubSubTransport::new(config, Arc::new(pubsub.clone()));
/// ```
#[derive(Clone)]
pub struct InMemoryPubSub {
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
    pull_wait: Duration,
}

impl Default for InMemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPubSub {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            notify: Arc::new(Notify::new()),
            pull_wait: Duration::from_secs(1),
        }
    }

    /// How long a pull waits for a message before returning empty.
    pub fn with_pull_wait(mut self, wait: Duration) -> Self {
        self.pull_wait = wait;
        self
    }

    /// Make the next `attempts` subscription creations report the topic as
    /// not found, the way the service does while a new topic propagates.
    pub async fn lag_subscription_creation(&self, attempts: u32) {
        self.state.lock().await.subscription_lag = attempts;
    }

    /// Make pulls fail with an unavailable error.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    pub async fn topic_exists(&self, topic: &TopicName) -> bool {
        self.state.lock().await.topics.contains(topic.as_str())
    }

    pub async fn subscription_exists(&self, subscription: &SubscriptionName) -> bool {
        self.state
            .lock()
            .await
            .subscriptions
            .contains_key(subscription.as_str())
    }

    /// Messages waiting to be pulled.
    pub async fn pending(&self, subscription: &SubscriptionName) -> usize {
        self.with_subscription(subscription, |sub| sub.pending.len())
            .await
    }

    /// Messages pulled and not yet acknowledged or released.
    pub async fn outstanding(&self, subscription: &SubscriptionName) -> usize {
        self.with_subscription(subscription, |sub| sub.leased.len())
            .await
    }

    /// Messages acknowledged so far.
    pub async fn acknowledged(&self, subscription: &SubscriptionName) -> u64 {
        self.with_subscription(subscription, |sub| sub.acknowledged)
            .await
    }

    async fn with_subscription<T: Default>(
        &self,
        subscription: &SubscriptionName,
        f: impl FnOnce(&mut Subscription) -> T,
    ) -> T {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        match state.subscriptions.get_mut(subscription.as_str()) {
            Some(sub) => {
                sub.reclaim_expired(now);
                f(sub)
            }
            None => T::default(),
        }
    }
}

#[async_trait]
impl PubSubBackend for InMemoryPubSub {
    async fn get_topic(&self, topic: &TopicName) -> Result<(), BackendError> {
        if self.topic_exists(topic).await {
            Ok(())
        } else {
            Err(BackendError::NotFound(topic.to_string()))
        }
    }

    async fn create_topic(&self, topic: &TopicName) -> Result<(), BackendError> {
        if self.state.lock().await.topics.insert(topic.to_string()) {
            Ok(())
        } else {
            Err(BackendError::AlreadyExists(topic.to_string()))
        }
    }

    async fn delete_topic(&self, topic: &TopicName) -> Result<(), BackendError> {
        if self.state.lock().await.topics.remove(topic.as_str()) {
            Ok(())
        } else {
            Err(BackendError::NotFound(topic.to_string()))
        }
    }

    async fn get_subscription(&self, subscription: &SubscriptionName) -> Result<(), BackendError> {
        if self.subscription_exists(subscription).await {
            Ok(())
        } else {
            Err(BackendError::NotFound(subscription.to_string()))
        }
    }

    async fn create_subscription(
        &self,
        subscription: &SubscriptionName,
        topic: &TopicName,
        ack_deadline: Duration,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;

        if state.subscriptions.contains_key(subscription.as_str()) {
            return Err(BackendError::AlreadyExists(subscription.to_string()));
        }
        if state.subscription_lag > 0 {
            state.subscription_lag -= 1;
            return Err(BackendError::NotFound(topic.to_string()));
        }
        if !state.topics.contains(topic.as_str()) {
            return Err(BackendError::NotFound(topic.to_string()));
        }

        state.subscriptions.insert(
            subscription.to_string(),
            Subscription {
                topic: topic.to_string(),
                ack_deadline,
                pending: VecDeque::new(),
                leased: HashMap::new(),
                acknowledged: 0,
            },
        );
        Ok(())
    }

    async fn delete_subscription(
        &self,
        subscription: &SubscriptionName,
    ) -> Result<(), BackendError> {
        match self
            .state
            .lock()
            .await
            .subscriptions
            .remove(subscription.as_str())
        {
            Some(_) => Ok(()),
            None => Err(BackendError::NotFound(subscription.to_string())),
        }
    }

    async fn publish(
        &self,
        topic: &TopicName,
        messages: Vec<PubsubMessage>,
    ) -> Result<Vec<String>, BackendError> {
        let mut state = self.state.lock().await;
        if !state.topics.contains(topic.as_str()) {
            return Err(BackendError::NotFound(topic.to_string()));
        }

        let mut ids = Vec::with_capacity(messages.len());
        for mut message in messages {
            state.next_message_id += 1;
            message.message_id = state.next_message_id.to_string();
            message.publish_time = Some(Utc::now());
            ids.push(message.message_id.clone());

            for sub in state
                .subscriptions
                .values_mut()
                .filter(|sub| sub.topic == topic.as_str())
            {
                sub.pending.push_back(Delivery {
                    message: message.clone(),
                    attempts: 0,
                });
            }
        }
        drop(state);

        debug!(topic = %topic, count = ids.len(), "Published to in-memory topic");
        self.notify.notify_waiters();
        Ok(ids)
    }

    async fn pull(
        &self,
        subscription: &SubscriptionName,
        max_messages: usize,
    ) -> Result<Vec<ReceivedMessage>, BackendError> {
        let deadline = Instant::now() + self.pull_wait;

        loop {
            // Created before inspecting state so a publish in between is not missed
            let notified = self.notify.notified();

            let next_expiry = {
                let now = Instant::now();
                let mut state = self.state.lock().await;
                if state.unavailable {
                    return Err(BackendError::Unavailable(format!(
                        "{}: too many outstanding pull requests",
                        subscription
                    )));
                }

                let sub = state
                    .subscriptions
                    .get_mut(subscription.as_str())
                    .ok_or_else(|| BackendError::NotFound(subscription.to_string()))?;
                sub.reclaim_expired(now);

                let mut batch = Vec::new();
                while batch.len() < max_messages {
                    let Some(mut delivery) = sub.pending.pop_front() else {
                        break;
                    };
                    delivery.attempts += 1;
                    let ack_id = uuid::Uuid::new_v4().to_string();
                    batch.push(ReceivedMessage {
                        ack_id: ack_id.clone(),
                        message: delivery.message.clone(),
                        delivery_attempt: Some(delivery.attempts),
                    });
                    sub.leased.insert(
                        ack_id,
                        Lease {
                            delivery,
                            expires_at: now + sub.ack_deadline,
                        },
                    );
                }

                if !batch.is_empty() {
                    return Ok(batch);
                }
                sub.next_lease_expiry()
            };

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            let wake_at = next_expiry.map_or(deadline, |expiry| expiry.min(deadline));
            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    async fn acknowledge(
        &self,
        subscription: &SubscriptionName,
        ack_ids: Vec<String>,
    ) -> Result<(), BackendError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let sub = state
            .subscriptions
            .get_mut(subscription.as_str())
            .ok_or_else(|| BackendError::NotFound(subscription.to_string()))?;
        sub.reclaim_expired(now);

        // Unknown or expired ack ids are ignored, like the managed service does
        for ack_id in ack_ids {
            if sub.leased.remove(&ack_id).is_some() {
                sub.acknowledged += 1;
            }
        }
        Ok(())
    }

    async fn modify_ack_deadline(
        &self,
        subscription: &SubscriptionName,
        ack_ids: Vec<String>,
        ack_deadline: Duration,
    ) -> Result<(), BackendError> {
        let now = Instant::now();
        {
            let mut state = self.state.lock().await;
            let sub = state
                .subscriptions
                .get_mut(subscription.as_str())
                .ok_or_else(|| BackendError::NotFound(subscription.to_string()))?;
            sub.reclaim_expired(now);

            for ack_id in ack_ids {
                if ack_deadline.is_zero() {
                    if let Some(lease) = sub.leased.remove(&ack_id) {
                        sub.pending.push_front(lease.delivery);
                    }
                } else if let Some(lease) = sub.leased.get_mut(&ack_id) {
                    lease.expires_at = now + ack_deadline;
                }
            }
        }

        self.notify.notify_waiters();
        Ok(())
    }
}
