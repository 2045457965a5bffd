//! Configuration for the Pub/Sub transport.

use messaging::RetryPolicy;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Public Pub/Sub REST endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://pubsub.googleapis.com";

/// Ack deadline requested for the input subscription.
pub const DEFAULT_ACK_DEADLINE: Duration = Duration::from_secs(30);

/// Pause after creating a subscription before it is trusted to exist.
pub const DEFAULT_PROPAGATION_DELAY: Duration = Duration::from_secs(5);

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },
}

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct PubSubConfig {
    /// Project that owns every topic and subscription
    pub project_id: String,

    /// Input queue; `None` makes the transport send-only
    pub input_queue: Option<String>,

    /// REST endpoint (emulator or production)
    pub endpoint: String,

    /// Bearer token attached to requests, if any
    pub access_token: Option<String>,

    /// Ack deadline for the input subscription
    pub ack_deadline: Duration,

    /// Pause after subscription creation
    pub propagation_delay: Duration,

    /// Retry policy while the topic is not yet visible to the subscription service
    pub subscription_retry: RetryPolicy,

    /// Per-request timeout for the REST client
    pub request_timeout: Duration,
}

impl PubSubConfig {
    /// Create a send-only configuration for `project_id`.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            input_queue: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            access_token: None,
            ack_deadline: DEFAULT_ACK_DEADLINE,
            propagation_delay: DEFAULT_PROPAGATION_DELAY,
            subscription_retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(60),
        }
    }

    /// Load from environment variables.
    ///
    /// - `PUBSUB_PROJECT_ID` (required)
    /// - `PUBSUB_INPUT_QUEUE` (empty or unset = send-only)
    /// - `PUBSUB_EMULATOR_HOST` (e.g. `localhost:8085`, wins over `PUBSUB_ENDPOINT`)
    /// - `PUBSUB_ENDPOINT`
    /// - `PUBSUB_ACCESS_TOKEN`
    /// - `PUBSUB_PROPAGATION_DELAY_MS`
    pub fn from_env() -> Result<Self, ConfigError> {
        let project_id = env::var("PUBSUB_PROJECT_ID")
            .map_err(|_| ConfigError::MissingEnvVar("PUBSUB_PROJECT_ID".to_string()))?;

        let mut config = Self::new(project_id)
            .with_input_queue(env::var("PUBSUB_INPUT_QUEUE").unwrap_or_default());

        if let Ok(host) = env::var("PUBSUB_EMULATOR_HOST") {
            config = config.with_emulator_host(&host);
        } else if let Ok(endpoint) = env::var("PUBSUB_ENDPOINT") {
            config = config.with_endpoint(endpoint);
        }

        if let Ok(token) = env::var("PUBSUB_ACCESS_TOKEN") {
            config = config.with_access_token(token);
        }

        if let Ok(raw) = env::var("PUBSUB_PROPAGATION_DELAY_MS") {
            let millis = raw.parse::<u64>().map_err(|e| ConfigError::ParseError {
                key: "PUBSUB_PROPAGATION_DELAY_MS".to_string(),
                details: e.to_string(),
            })?;
            config = config.with_propagation_delay(Duration::from_millis(millis));
        }

        Ok(config)
    }

    /// Set the input queue. An empty name means send-only.
    pub fn with_input_queue(mut self, queue: impl Into<String>) -> Self {
        let queue = queue.into();
        self.input_queue = (!queue.trim().is_empty()).then_some(queue);
        self
    }

    /// Set the REST endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Point at a local emulator (`host:port`).
    pub fn with_emulator_host(self, host: &str) -> Self {
        self.with_endpoint(format!("http://{}", host))
    }

    /// Set the bearer token.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Set the post-creation propagation pause.
    pub fn with_propagation_delay(mut self, delay: Duration) -> Self {
        self.propagation_delay = delay;
        self
    }

    /// Set the subscription creation retry policy.
    pub fn with_subscription_retry(mut self, policy: RetryPolicy) -> Self {
        self.subscription_retry = policy;
        self
    }
}
