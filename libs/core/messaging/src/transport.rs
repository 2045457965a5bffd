//! The contract between the bus runtime and a message transport.

use crate::error::TransportError;
use crate::message::TransportMessage;
use crate::transaction::TransactionContext;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Transport trait.
///
/// The bus runtime calls [`initialize`](Transport::initialize) once, then
/// loops on [`receive`](Transport::receive) inside a transaction and calls
/// [`send`](Transport::send) for every message its handlers produce.
/// Settlement of received messages and delivery of sent ones happen when the
/// transaction is committed or aborted.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The input queue, or `None` for a send-only transport.
    fn address(&self) -> Option<&str>;

    /// One-time setup before any traffic flows.
    async fn initialize(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Make sure the queue behind `address` exists. Idempotent.
    async fn create_queue(&self, address: &str) -> Result<(), TransportError>;

    /// Queue `message` for delivery to `destination` when `context` commits.
    async fn send(
        &self,
        destination: &str,
        message: TransportMessage,
        context: &mut TransactionContext,
    ) -> Result<(), TransportError>;

    /// Receive the next message, or `None` when nothing is available.
    ///
    /// A cancelled `cancel` token makes the call return `None` promptly.
    async fn receive(
        &self,
        context: &mut TransactionContext,
        cancel: &CancellationToken,
    ) -> Result<Option<TransportMessage>, TransportError>;
}
