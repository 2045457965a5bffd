//! Topic and subscription provisioning.

use crate::backend::{PubSubBackend, SubscriptionName, TopicName};
use crate::config::PubSubConfig;
use messaging::TransportError;
use tracing::{debug, info, warn};

/// Make sure `topic` exists, creating it when it does not.
///
/// Idempotent: a topic created concurrently by someone else counts as success.
pub async fn ensure_topic(
    backend: &dyn PubSubBackend,
    topic: &TopicName,
) -> Result<(), TransportError> {
    match backend.get_topic(topic).await {
        Ok(()) => {
            debug!(topic = %topic, "Topic exists");
            Ok(())
        }
        Err(e) if e.is_not_found() => match backend.create_topic(topic).await {
            Ok(()) => {
                info!(topic = %topic, "Created topic");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                debug!(topic = %topic, "Topic created concurrently");
                Ok(())
            }
            Err(e) => Err(TransportError::provisioning(topic.to_string(), e)),
        },
        Err(e) => Err(TransportError::provisioning(topic.to_string(), e)),
    }
}

/// Make sure `subscription` on `topic` exists.
///
/// A creation that reports not-found means the topic is not yet visible to
/// the subscription service; it is retried with the configured backoff until
/// the attempt budget runs out. After a successful creation the call waits
/// out the propagation delay before returning.
pub async fn ensure_subscription(
    backend: &dyn PubSubBackend,
    subscription: &SubscriptionName,
    topic: &TopicName,
    config: &PubSubConfig,
) -> Result<(), TransportError> {
    match backend.get_subscription(subscription).await {
        Ok(()) => {
            debug!(subscription = %subscription, "Subscription exists");
            return Ok(());
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(TransportError::provisioning(subscription.to_string(), e)),
    }

    let policy = &config.subscription_retry;
    for attempt in 1..=policy.max_attempts {
        match backend
            .create_subscription(subscription, topic, config.ack_deadline)
            .await
        {
            Ok(()) => {
                info!(
                    subscription = %subscription,
                    topic = %topic,
                    attempt,
                    "Created subscription"
                );
                tokio::time::sleep(config.propagation_delay).await;
                return Ok(());
            }
            Err(e) if e.is_already_exists() => {
                debug!(subscription = %subscription, "Subscription created concurrently");
                return Ok(());
            }
            Err(e) if e.is_not_found() => {
                if attempt == policy.max_attempts {
                    warn!(
                        subscription = %subscription,
                        topic = %topic,
                        attempt,
                        "Topic still not visible, giving up"
                    );
                    break;
                }
                let delay = policy.delay_after(attempt);
                warn!(
                    subscription = %subscription,
                    topic = %topic,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Topic not visible yet, retrying subscription creation"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(TransportError::provisioning(subscription.to_string(), e)),
        }
    }

    Err(TransportError::ProvisioningExhausted {
        topic: topic.to_string(),
        attempts: policy.max_attempts,
    })
}

/// Delete `subscription` and then `topic`; either may already be gone.
pub async fn purge(
    backend: &dyn PubSubBackend,
    subscription: &SubscriptionName,
    topic: &TopicName,
) -> Result<(), TransportError> {
    match backend.delete_subscription(subscription).await {
        Ok(()) => info!(subscription = %subscription, "Deleted subscription"),
        Err(e) if e.is_not_found() => debug!(subscription = %subscription, "Subscription already absent"),
        Err(e) => return Err(TransportError::provisioning(subscription.to_string(), e)),
    }

    delete_topic(backend, topic).await
}

/// Delete `topic`, tolerating its absence.
pub async fn delete_topic(
    backend: &dyn PubSubBackend,
    topic: &TopicName,
) -> Result<(), TransportError> {
    match backend.delete_topic(topic).await {
        Ok(()) => {
            info!(topic = %topic, "Deleted topic");
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            debug!(topic = %topic, "Topic already absent");
            Ok(())
        }
        Err(e) => Err(TransportError::provisioning(topic.to_string(), e)),
    }
}
