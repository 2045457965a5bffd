//! Mapping between transport messages and Pub/Sub messages.
//!
//! Headers travel as attributes with their keys unchanged, the body travels
//! as the payload byte for byte, and the message-id header also fills the
//! service's message id field.

use crate::backend::PubsubMessage;
use messaging::{headers, TransportError, TransportMessage};
use tracing::warn;

/// Longest attribute value the service accepts, in characters.
pub const MAX_ATTRIBUTE_VALUE_LENGTH: usize = 1024;

/// Cut `value` down to [`MAX_ATTRIBUTE_VALUE_LENGTH`] characters.
///
/// Returns `None` when the value already fits.
pub fn truncate_attribute(value: &str) -> Option<String> {
    match value.char_indices().nth(MAX_ATTRIBUTE_VALUE_LENGTH) {
        Some((cut, _)) => Some(value[..cut].to_string()),
        None => None,
    }
}

/// Translate an outgoing transport message.
///
/// Fails when the message-id header is missing. Returns the message and the
/// number of header values that had to be truncated.
pub fn to_pubsub_message(
    message: TransportMessage,
) -> Result<(PubsubMessage, usize), TransportError> {
    let message_id = message
        .message_id()
        .ok_or_else(|| TransportError::MissingHeader(headers::MESSAGE_ID.to_string()))?
        .to_string();
    let (headers, body) = message.into_parts();

    let mut truncated = 0;
    let attributes = headers
        .into_iter()
        .map(|(key, value)| match truncate_attribute(&value) {
            Some(short) => {
                warn!(
                    message_id = %message_id,
                    header = %key,
                    length = value.chars().count(),
                    max = MAX_ATTRIBUTE_VALUE_LENGTH,
                    "Header value too long, truncating"
                );
                truncated += 1;
                (key, short)
            }
            None => (key, value),
        })
        .collect();

    Ok((
        PubsubMessage {
            data: body,
            attributes,
            message_id,
            publish_time: None,
        },
        truncated,
    ))
}

/// Translate a received Pub/Sub message.
///
/// The service message id stands in for a missing message-id attribute.
pub fn to_transport_message(message: &PubsubMessage) -> TransportMessage {
    let mut headers = message.attributes.clone();
    if !message.message_id.is_empty() {
        headers
            .entry(headers::MESSAGE_ID.to_string())
            .or_insert_with(|| message.message_id.clone());
    }
    TransportMessage::new(headers, message.data.clone())
}
