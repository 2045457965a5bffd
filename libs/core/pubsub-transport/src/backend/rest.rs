//! Pub/Sub v1 REST client
//!
//! Talks to the managed service or to the local emulator over HTTP/JSON.

use super::{
    BackendError, PubSubBackend, PubsubMessage, ReceivedMessage, SubscriptionName, TopicName,
};
use crate::config::PubSubConfig;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// REST backend.
#[derive(Clone)]
pub struct RestPubSub {
    client: Client,
    endpoint: String,
    access_token: Option<String>,
}

impl RestPubSub {
    /// Create a backend for `endpoint` (e.g. `http://localhost:8085`).
    pub fn new(endpoint: impl Into<String>) -> Result<Self, BackendError> {
        Self::with_timeout(endpoint, Duration::from_secs(60))
    }

    fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            access_token: None,
        })
    }

    /// Create a backend from transport configuration.
    pub fn from_config(config: &PubSubConfig) -> Result<Self, BackendError> {
        let backend = Self::with_timeout(config.endpoint.clone(), config.request_timeout)?;
        Ok(match &config.access_token {
            Some(token) => backend.with_access_token(token.clone()),
            None => backend,
        })
    }

    /// Attach a bearer token to every request.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/v1/{}", self.endpoint, resource)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute(&self, request: RequestBuilder, resource: &str) -> Result<Response, BackendError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, resource, body))
    }

    async fn execute_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        resource: &str,
    ) -> Result<T, BackendError> {
        let response = self.execute(request, resource).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| BackendError::Decode(e.to_string()))
    }
}

/// Map a non-success HTTP status to a backend error.
fn status_error(status: StatusCode, resource: &str, body: String) -> BackendError {
    match status {
        StatusCode::NOT_FOUND => BackendError::NotFound(resource.to_string()),
        StatusCode::CONFLICT => BackendError::AlreadyExists(resource.to_string()),
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::TOO_MANY_REQUESTS => {
            BackendError::Unavailable(format!("{}: {}", resource, body))
        }
        other => BackendError::Status {
            code: other.as_u16(),
            message: body,
        },
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionRequest<'a> {
    topic: &'a str,
    ack_deadline_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    data: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    message_id: String,
    #[serde(default, skip_serializing)]
    publish_time: Option<DateTime<Utc>>,
}

impl From<PubsubMessage> for WireMessage {
    fn from(message: PubsubMessage) -> Self {
        Self {
            data: BASE64.encode(&message.data),
            attributes: message.attributes,
            message_id: message.message_id,
            publish_time: None,
        }
    }
}

impl TryFrom<WireMessage> for PubsubMessage {
    type Error = BackendError;

    fn try_from(message: WireMessage) -> Result<Self, Self::Error> {
        let data = BASE64
            .decode(message.data.as_bytes())
            .map_err(|e| BackendError::Decode(format!("message data: {}", e)))?;
        Ok(Self {
            data,
            attributes: message.attributes,
            message_id: message.message_id,
            publish_time: message.publish_time,
        })
    }
}

#[derive(Debug, Serialize)]
struct PublishRequest {
    messages: Vec<WireMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: usize,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<WireReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReceivedMessage {
    ack_id: String,
    message: WireMessage,
    #[serde(default)]
    delivery_attempt: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest {
    ack_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyAckDeadlineRequest {
    ack_ids: Vec<String>,
    ack_deadline_seconds: u64,
}

#[async_trait]
impl PubSubBackend for RestPubSub {
    async fn get_topic(&self, topic: &TopicName) -> Result<(), BackendError> {
        let request = self.client.get(self.url(topic.as_str()));
        self.execute(request, topic.as_str()).await?;
        Ok(())
    }

    async fn create_topic(&self, topic: &TopicName) -> Result<(), BackendError> {
        debug!(topic = %topic, "Creating topic");
        let request = self
            .client
            .put(self.url(topic.as_str()))
            .json(&serde_json::json!({}));
        self.execute(request, topic.as_str()).await?;
        Ok(())
    }

    async fn delete_topic(&self, topic: &TopicName) -> Result<(), BackendError> {
        let request = self.client.delete(self.url(topic.as_str()));
        self.execute(request, topic.as_str()).await?;
        Ok(())
    }

    async fn get_subscription(&self, subscription: &SubscriptionName) -> Result<(), BackendError> {
        let request = self.client.get(self.url(subscription.as_str()));
        self.execute(request, subscription.as_str()).await?;
        Ok(())
    }

    async fn create_subscription(
        &self,
        subscription: &SubscriptionName,
        topic: &TopicName,
        ack_deadline: Duration,
    ) -> Result<(), BackendError> {
        debug!(subscription = %subscription, topic = %topic, "Creating subscription");
        let request = self
            .client
            .put(self.url(subscription.as_str()))
            .json(&SubscriptionRequest {
                topic: topic.as_str(),
                ack_deadline_seconds: ack_deadline.as_secs(),
            });
        self.execute(request, subscription.as_str()).await?;
        Ok(())
    }

    async fn delete_subscription(
        &self,
        subscription: &SubscriptionName,
    ) -> Result<(), BackendError> {
        let request = self.client.delete(self.url(subscription.as_str()));
        self.execute(request, subscription.as_str()).await?;
        Ok(())
    }

    async fn publish(
        &self,
        topic: &TopicName,
        messages: Vec<PubsubMessage>,
    ) -> Result<Vec<String>, BackendError> {
        let request = self
            .client
            .post(self.url(&format!("{}:publish", topic)))
            .json(&PublishRequest {
                messages: messages.into_iter().map(WireMessage::from).collect(),
            });
        let response: PublishResponse = self.execute_json(request, topic.as_str()).await?;
        Ok(response.message_ids)
    }

    async fn pull(
        &self,
        subscription: &SubscriptionName,
        max_messages: usize,
    ) -> Result<Vec<ReceivedMessage>, BackendError> {
        let request = self
            .client
            .post(self.url(&format!("{}:pull", subscription)))
            .json(&PullRequest { max_messages });
        let response: PullResponse = self.execute_json(request, subscription.as_str()).await?;

        response
            .received_messages
            .into_iter()
            .map(|received| {
                Ok(ReceivedMessage {
                    ack_id: received.ack_id,
                    message: PubsubMessage::try_from(received.message)?,
                    delivery_attempt: received.delivery_attempt,
                })
            })
            .collect()
    }

    async fn acknowledge(
        &self,
        subscription: &SubscriptionName,
        ack_ids: Vec<String>,
    ) -> Result<(), BackendError> {
        let request = self
            .client
            .post(self.url(&format!("{}:acknowledge", subscription)))
            .json(&AcknowledgeRequest { ack_ids });
        self.execute(request, subscription.as_str()).await?;
        Ok(())
    }

    async fn modify_ack_deadline(
        &self,
        subscription: &SubscriptionName,
        ack_ids: Vec<String>,
        ack_deadline: Duration,
    ) -> Result<(), BackendError> {
        let request = self
            .client
            .post(self.url(&format!("{}:modifyAckDeadline", subscription)))
            .json(&ModifyAckDeadlineRequest {
                ack_ids,
                ack_deadline_seconds: ack_deadline.as_secs(),
            });
        self.execute(request, subscription.as_str()).await?;
        Ok(())
    }
}
