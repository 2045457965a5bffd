//! Transport-level messaging abstractions.
//!
//! This library is the seam between a message-bus runtime and the transports
//! that move its messages:
//! - **Messages**: [`TransportMessage`] (headers + opaque body) and [`OutgoingMessage`]
//! - **Transactions**: [`TransactionContext`] with a single outcome dispatch point
//! - **Transports**: the [`Transport`] trait a backend adapter implements
//! - **Errors**: [`TransportError`] categorized for the runtime's backoff policy
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐      ┌──────────────────────────────────────┐
//! │   Bus runtime   │      │             Transports               │
//! │                 │      │                                      │
//! │  receive ───────│──────│─▶ Transport::receive   ┌───────────┐ │
//! │  handlers       │      │                        │  Pub/Sub  │ │
//! │  send ──────────│──────│─▶ Transport::send  ───▶│ (pubsub-  │ │
//! │  commit/abort ──│──────│─▶ completion hooks     │ transport)│ │
//! │                 │      │                        └───────────┘ │
//! └─────────────────┘      └──────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use messaging::{TransactionContext, Transport, TransportMessage};
//!
//! let mut ctx = TransactionContext::new();
//! if let Some(message) = transport.receive(&mut ctx, &cancel).await? {
//!     let reply = TransportMessage::with_id(Uuid::new_v4().to_string(), b"done".to_vec());
//!     transport.send("replies", reply, &mut ctx).await?;
//!     ctx.commit().await?;
//! }
//! ```

mod config;
mod error;
mod message;
mod transaction;
mod transport;

pub use config::{BackoffStrategy, RetryPolicy};
pub use error::{BoxError, ErrorCategory, TransportError};
pub use message::{headers, OutgoingMessage, TransportMessage};
pub use transaction::{TransactionContext, TransactionOutcome};
pub use transport::Transport;

// Re-exported so transports and runtimes agree on the token type
pub use tokio_util::sync::CancellationToken;
