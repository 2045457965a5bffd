//! Per-destination publishers.

use crate::backend::{BackendError, PubSubBackend, PubsubMessage, TopicName};
use futures::future::try_join_all;
use messaging::TransportError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

/// Outbound client bound to one destination topic.
pub struct Publisher {
    destination: String,
    topic: TopicName,
    backend: Arc<dyn PubSubBackend>,
}

impl Publisher {
    /// Create a publisher, verifying that the topic is reachable.
    async fn connect(
        backend: Arc<dyn PubSubBackend>,
        destination: &str,
        topic: TopicName,
    ) -> Result<Self, BackendError> {
        backend.get_topic(&topic).await?;
        info!(destination = %destination, topic = %topic, "Publisher created");

        Ok(Self {
            destination: destination.to_string(),
            topic,
            backend,
        })
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn topic(&self) -> &TopicName {
        &self.topic
    }

    /// Publish one message, returning the id the service assigned.
    pub async fn publish(&self, message: PubsubMessage) -> Result<String, TransportError> {
        let ids = self
            .backend
            .publish(&self.topic, vec![message])
            .await
            .map_err(|e| TransportError::send(self.destination.clone(), e))?;

        ids.into_iter().next().ok_or_else(|| {
            TransportError::send(
                self.destination.clone(),
                "publish returned no message id",
            )
        })
    }

    /// Publish every message concurrently and wait for all of them.
    ///
    /// The first failure is returned.
    pub async fn publish_all(
        &self,
        messages: Vec<PubsubMessage>,
    ) -> Result<Vec<String>, TransportError> {
        let ids = try_join_all(messages.into_iter().map(|m| self.publish(m))).await?;
        debug!(destination = %self.destination, count = ids.len(), "Published messages");
        Ok(ids)
    }
}

/// Lazily created publishers, one per destination.
///
/// Concurrent first calls for a destination share a single creation. A
/// failed creation caches nothing, so the next call tries again. Publishers
/// are never evicted.
pub struct PublisherCache {
    project_id: String,
    backend: Arc<dyn PubSubBackend>,
    publishers: Mutex<HashMap<String, Arc<OnceCell<Arc<Publisher>>>>>,
}

impl PublisherCache {
    pub fn new(project_id: impl Into<String>, backend: Arc<dyn PubSubBackend>) -> Self {
        Self {
            project_id: project_id.into(),
            backend,
            publishers: Mutex::new(HashMap::new()),
        }
    }

    /// Get the publisher for `destination`, creating it on first use.
    pub async fn get(&self, destination: &str) -> Result<Arc<Publisher>, TransportError> {
        let cell = {
            let mut publishers = self.publishers.lock().await;
            Arc::clone(publishers.entry(destination.to_string()).or_default())
        };

        let publisher = cell
            .get_or_try_init(|| async {
                let topic = TopicName::new(&self.project_id, destination);
                Publisher::connect(Arc::clone(&self.backend), destination, topic)
                    .await
                    .map(Arc::new)
                    .map_err(|e| TransportError::publisher(destination, e))
            })
            .await?;

        Ok(Arc::clone(publisher))
    }

    /// Number of publishers created so far.
    pub async fn len(&self) -> usize {
        self.publishers
            .lock()
            .await
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
