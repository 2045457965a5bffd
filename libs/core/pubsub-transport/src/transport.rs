//! The Pub/Sub transport.

use crate::backend::{BackendError, PubSubBackend, RestPubSub, SubscriptionName, TopicName};
use crate::config::PubSubConfig;
use crate::metrics::PubSubMetrics;
use crate::provisioning;
use crate::publisher::PublisherCache;
use crate::wire;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::try_join_all;
use messaging::{
    CancellationToken, OutgoingMessage, TransactionContext, TransactionOutcome, Transport,
    TransportError, TransportMessage,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

/// Context item holding messages sent during the transaction.
const OUTGOING_ITEM: &str = "pubsub-transport.outgoing";

type OutgoingBuffer = Arc<Mutex<Vec<OutgoingMessage>>>;

/// Message-bus transport backed by Pub/Sub.
///
/// Every address maps to a topic of the same name in the configured
/// project. The input queue additionally gets a subscription of the same
/// name, provisioned by [`Transport::initialize`].
///
/// Cloning is cheap and clones share publishers and the subscription.
#[derive(Clone)]
pub struct PubSubTransport {
    config: Arc<PubSubConfig>,
    backend: Arc<dyn PubSubBackend>,
    publishers: Arc<PublisherCache>,
    subscription: Arc<OnceCell<SubscriptionName>>,
    metrics: PubSubMetrics,
}

impl PubSubTransport {
    /// Create a transport over `backend`.
    pub fn new(config: PubSubConfig, backend: Arc<dyn PubSubBackend>) -> Self {
        let publishers = Arc::new(PublisherCache::new(
            config.project_id.clone(),
            Arc::clone(&backend),
        ));
        let metrics = PubSubMetrics::new(config.input_queue.as_deref());

        Self {
            config: Arc::new(config),
            backend,
            publishers,
            subscription: Arc::new(OnceCell::new()),
            metrics,
        }
    }

    /// Create a transport talking to the REST endpoint in `config`.
    pub fn from_config(config: PubSubConfig) -> Result<Self, TransportError> {
        let backend = RestPubSub::from_config(&config)
            .map_err(|e| TransportError::Config(e.to_string()))?;
        Ok(Self::new(config, Arc::new(backend)))
    }

    /// The input subscription, once provisioned.
    pub fn subscription(&self) -> Option<&SubscriptionName> {
        self.subscription.get()
    }

    fn topic(&self, address: &str) -> TopicName {
        TopicName::new(&self.config.project_id, address)
    }

    fn subscription_name(&self, address: &str) -> SubscriptionName {
        SubscriptionName::new(&self.config.project_id, address)
    }

    /// Publish `messages`, grouped by destination.
    ///
    /// Groups keep the order in which their messages were queued. All groups,
    /// and all messages within a group, are published concurrently; the call
    /// returns once everything is published or with the first failure.
    pub async fn send_outgoing_messages(
        &self,
        messages: Vec<OutgoingMessage>,
    ) -> Result<(), TransportError> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut groups: Vec<(String, Vec<TransportMessage>)> = Vec::new();
        for OutgoingMessage {
            destination,
            message,
        } in messages
        {
            match groups.iter_mut().find(|(d, _)| *d == destination) {
                Some((_, group)) => group.push(message),
                None => groups.push((destination, vec![message])),
            }
        }

        try_join_all(
            groups
                .into_iter()
                .map(|(destination, group)| self.publish_group(destination, group)),
        )
        .await?;

        Ok(())
    }

    async fn publish_group(
        &self,
        destination: String,
        messages: Vec<TransportMessage>,
    ) -> Result<(), TransportError> {
        let publisher = self.publishers.get(&destination).await?;

        let mut batch = Vec::with_capacity(messages.len());
        for message in messages {
            let (translated, truncated) = wire::to_pubsub_message(message)?;
            self.metrics.headers_truncated(&destination, truncated);
            batch.push(translated);
        }

        let count = batch.len();
        match publisher.publish_all(batch).await {
            Ok(_) => {
                self.metrics.messages_published(&destination, count);
                Ok(())
            }
            Err(e) => {
                self.metrics.publish_failed(&destination);
                Err(e)
            }
        }
    }

    /// Delete the input queue's subscription and topic.
    ///
    /// Either may already be gone. A send-only transport has nothing to purge.
    pub async fn purge_queue(&self) -> Result<(), TransportError> {
        let Some(queue) = self.config.input_queue.as_deref() else {
            return Ok(());
        };

        provisioning::purge(
            self.backend.as_ref(),
            &self.subscription_name(queue),
            &self.topic(queue),
        )
        .await
    }

    /// Delete the topic behind `address`, tolerating its absence.
    pub async fn delete_queue(&self, address: &str) -> Result<(), TransportError> {
        provisioning::delete_topic(self.backend.as_ref(), &self.topic(address)).await
    }

    fn input_queue(&self) -> &str {
        self.config.input_queue.as_deref().unwrap_or_default()
    }
}

#[async_trait]
impl Transport for PubSubTransport {
    fn address(&self) -> Option<&str> {
        self.config.input_queue.as_deref()
    }

    async fn initialize(&self) -> Result<(), TransportError> {
        let Some(queue) = self.config.input_queue.as_deref() else {
            info!(project = %self.config.project_id, "No input queue, transport is send-only");
            return Ok(());
        };

        if self.subscription.initialized() {
            return Ok(());
        }

        self.create_queue(queue).await?;

        let topic = self.topic(queue);
        let subscription = self.subscription_name(queue);
        provisioning::ensure_subscription(
            self.backend.as_ref(),
            &subscription,
            &topic,
            &self.config,
        )
        .await?;

        info!(queue = %queue, subscription = %subscription, "Transport initialized");
        if self.subscription.set(subscription).is_err() {
            debug!(queue = %queue, "Subscription already set");
        }
        Ok(())
    }

    async fn create_queue(&self, address: &str) -> Result<(), TransportError> {
        if address.trim().is_empty() {
            return Err(TransportError::Config(
                "queue address must not be empty".to_string(),
            ));
        }
        provisioning::ensure_topic(self.backend.as_ref(), &self.topic(address)).await
    }

    async fn send(
        &self,
        destination: &str,
        message: TransportMessage,
        context: &mut TransactionContext,
    ) -> Result<(), TransportError> {
        if message.message_id().is_none() {
            return Err(TransportError::MissingHeader(
                messaging::headers::MESSAGE_ID.to_string(),
            ));
        }
        let outgoing = OutgoingMessage::new(destination, message);

        if let Some(buffer) = context.item::<OutgoingBuffer>(OUTGOING_ITEM).cloned() {
            buffer.lock().await.push(outgoing);
            return Ok(());
        }

        let buffer: OutgoingBuffer = Arc::new(Mutex::new(vec![outgoing]));
        context.insert_item(OUTGOING_ITEM, Arc::clone(&buffer));

        let transport = self.clone();
        let transaction_id = context.id();
        context.on_completed(move |outcome| async move {
            let messages = std::mem::take(&mut *buffer.lock().await);
            match outcome {
                TransactionOutcome::Committed => transport.send_outgoing_messages(messages).await,
                TransactionOutcome::Aborted => {
                    debug!(
                        transaction_id = %transaction_id,
                        count = messages.len(),
                        "Discarding outgoing messages"
                    );
                    Ok(())
                }
            }
        });

        Ok(())
    }

    async fn receive(
        &self,
        context: &mut TransactionContext,
        cancel: &CancellationToken,
    ) -> Result<Option<TransportMessage>, TransportError> {
        let Some(subscription) = self.subscription.get() else {
            return Ok(None);
        };
        let queue = self.input_queue();

        let pulled = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(queue = %queue, "Receive cancelled");
                return Ok(None);
            }
            result = self.backend.pull(subscription, 1) => result,
        };

        let received = pulled.map_err(|e| match e {
            BackendError::Unavailable(_) => TransportError::Unavailable {
                queue: queue.to_string(),
                source: e.into(),
            },
            e => TransportError::Receive {
                queue: queue.to_string(),
                source: e.into(),
            },
        })?;

        let Some(received) = received.into_iter().next() else {
            return Ok(None);
        };

        let message = wire::to_transport_message(&received.message);

        if message.is_expired(Utc::now()) {
            warn!(
                queue = %queue,
                message_id = message.message_id().unwrap_or_default(),
                expires_at = message.header(messaging::headers::EXPIRES_AT).unwrap_or_default(),
                "Dropping expired message"
            );
            self.metrics.message_expired();
            return Ok(None);
        }
        self.metrics.message_received();

        debug!(
            queue = %queue,
            message_id = message.message_id().unwrap_or_default(),
            delivery_attempt = received.delivery_attempt,
            "Received message"
        );

        let lease = ReceivedLease {
            backend: Arc::clone(&self.backend),
            subscription: subscription.clone(),
            queue: queue.to_string(),
            ack_id: received.ack_id,
            metrics: self.metrics.clone(),
        };
        context.on_completed(move |outcome| lease.settle(outcome));

        Ok(Some(message))
    }
}

/// A pulled message waiting for its transaction to finish.
struct ReceivedLease {
    backend: Arc<dyn PubSubBackend>,
    subscription: SubscriptionName,
    queue: String,
    ack_id: String,
    metrics: PubSubMetrics,
}

impl ReceivedLease {
    /// Acknowledge on commit, reset the lease to zero on abort.
    async fn settle(self, outcome: TransactionOutcome) -> Result<(), TransportError> {
        let result = match outcome {
            TransactionOutcome::Committed => {
                self.backend
                    .acknowledge(&self.subscription, vec![self.ack_id.clone()])
                    .await
            }
            TransactionOutcome::Aborted => {
                self.backend
                    .modify_ack_deadline(&self.subscription, vec![self.ack_id.clone()], Duration::ZERO)
                    .await
            }
        };

        if let Err(e) = result {
            return Err(TransportError::Settle {
                queue: self.queue,
                ack_id: self.ack_id,
                source: e.into(),
            });
        }

        match outcome {
            TransactionOutcome::Committed => self.metrics.message_acknowledged(),
            TransactionOutcome::Aborted => self.metrics.message_lease_reset(),
        }
        debug!(queue = %self.queue, ack_id = %self.ack_id, outcome = %outcome, "Settled message");
        Ok(())
    }
}
