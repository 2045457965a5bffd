//! Message-bus transport backed by a managed Pub/Sub service.
//!
//! Bridges the bus's "receive one message, then commit or abort" model to
//! Pub/Sub's lease-based, at-least-once delivery:
//! - **Provisioning**: every address is a topic; the input queue also gets a
//!   subscription, created with bounded retries while the topic propagates
//! - **Publishers**: one per destination, created once and shared
//! - **Receive**: pulls one message at a time and settles its lease when the
//!   transaction completes (acknowledge on commit, reset to zero on abort)
//! - **Send**: buffers messages in the transaction and publishes them on
//!   commit, grouped by destination
//!
//! # Example
//!
//! ```rust,ignore
//! use messaging::{CancellationToken, TransactionContext, Transport};
//! use pubsub_transport::{PubSubConfig, PubSubTransport};
//!
//! let config = PubSubConfig::from_env()?;
//! let transport = PubSubTransport::from_config(config)?;
//! transport.initialize().await?;
//!
//! let cancel = CancellationToken::new();
//! let mut ctx = TransactionContext::new();
//! if let Some(message) = transport.receive(&mut ctx, &cancel).await? {
//!     handle(message).await?;
//! }
//! ctx.commit().await?;
//! ```

pub mod backend;
pub mod config;
pub mod metrics;
pub mod provisioning;
pub mod publisher;
pub mod transport;
pub mod wire;

pub use backend::{
    BackendError, InMemoryPubSub, PubSubBackend, PubsubMessage, ReceivedMessage, RestPubSub,
    SubscriptionName, TopicName,
};
pub use config::{ConfigError, PubSubConfig};
pub use metrics::PubSubMetrics;
pub use publisher::{Publisher, PublisherCache};
pub use transport::PubSubTransport;
pub use wire::MAX_ATTRIBUTE_VALUE_LENGTH;
