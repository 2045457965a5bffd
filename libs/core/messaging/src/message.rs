//! Transport messages and well-known headers.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::warn;

/// Well-known header names.
pub mod headers {
    /// Unique id of the message (required on send)
    pub const MESSAGE_ID: &str = "message-id";

    /// Absolute expiry as an RFC 3339 timestamp
    pub const EXPIRES_AT: &str = "expires-at";
}

/// A message as the bus runtime sees it: headers plus an opaque body.
///
/// Immutable once constructed; builder methods consume and return `Self`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransportMessage {
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

impl TransportMessage {
    /// Create a message from headers and body.
    pub fn new(headers: BTreeMap<String, String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    /// Create a message carrying only the message-id header.
    pub fn with_id(id: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::new(BTreeMap::new(), body).with_header(headers::MESSAGE_ID, id)
    }

    /// Add or replace a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the absolute expiry.
    pub fn with_expiry(self, expires_at: DateTime<Utc>) -> Self {
        self.with_header(headers::EXPIRES_AT, expires_at.to_rfc3339())
    }

    /// Set the expiry relative to now.
    pub fn with_time_to_live(self, ttl: std::time::Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.with_expiry(expires_at)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn message_id(&self) -> Option<&str> {
        self.header(headers::MESSAGE_ID)
    }

    /// Parse the expiry header.
    ///
    /// A value that is not RFC 3339 is treated as no expiry.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.header(headers::EXPIRES_AT)?;
        match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(e) => {
                warn!(
                    message_id = ?self.message_id(),
                    value = %raw,
                    error = %e,
                    "Ignoring unparsable expiry header"
                );
                None
            }
        }
    }

    /// Whether the message expired before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expires_at| expires_at < now)
    }

    pub fn into_parts(self) -> (BTreeMap<String, String>, Vec<u8>) {
        (self.headers, self.body)
    }
}

/// A message bound for a destination queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub destination: String,
    pub message: TransportMessage,
}

impl OutgoingMessage {
    pub fn new(destination: impl Into<String>, message: TransportMessage) -> Self {
        Self {
            destination: destination.into(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_with_id_sets_message_id_header() {
        let message = TransportMessage::with_id("m1", b"hello".to_vec());

        assert_eq!(message.message_id(), Some("m1"));
        assert_eq!(message.body(), b"hello");
        assert_eq!(message.headers().len(), 1);
    }

    #[test]
    fn test_past_expiry_is_expired() {
        let now = Utc::now();
        let message = TransportMessage::with_id("m1", Vec::new()).with_expiry(now - Duration::seconds(5));

        assert!(message.is_expired(now));
    }

    #[test]
    fn test_future_expiry_is_not_expired() {
        let message = TransportMessage::with_id("m1", Vec::new())
            .with_time_to_live(std::time::Duration::from_secs(60));

        assert!(!message.is_expired(Utc::now()));
        assert!(message.expires_at().is_some());
    }

    #[test]
    fn test_no_or_garbage_expiry_never_expires() {
        let now = Utc::now();
        let plain = TransportMessage::with_id("m1", Vec::new());
        let garbage = plain.clone().with_header(headers::EXPIRES_AT, "tomorrow-ish");

        assert!(!plain.is_expired(now));
        assert!(!garbage.is_expired(now));
        assert_eq!(garbage.expires_at(), None);
    }

    #[test]
    fn test_header_keys_are_case_preserving() {
        let message = TransportMessage::with_id("m1", Vec::new()).with_header("X-Tenant", "acme");

        assert_eq!(message.header("X-Tenant"), Some("acme"));
        assert_eq!(message.header("x-tenant"), None);
    }
}
