//! Error types surfaced by transports to the bus runtime.

use std::fmt;
use thiserror::Error;

/// Boxed error used as the preserved cause of a transport failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error categories determine how the bus runtime backs off.
///
/// # Categories
///
/// - **Transient**: Temporary failure, retry the transaction with exponential backoff
/// - **Permanent**: Unrecoverable, retrying the same operation will not help
/// - **RateLimited**: The backend is overloaded, retry with longer delays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Temporary failure (network error, generic backend fault)
    /// Retry 3x with 1-30s exponential backoff
    Transient,

    /// Permanent failure (missing header, provisioning exhausted, bad config)
    Permanent,

    /// Backend reported it is unavailable (too many outstanding pulls)
    /// Retry 5x with 5-120s exponential backoff
    RateLimited,
}

impl ErrorCategory {
    /// Get the maximum retry count for this error category.
    pub fn max_retries(&self) -> u32 {
        match self {
            ErrorCategory::Transient => 3,
            ErrorCategory::Permanent => 0,
            ErrorCategory::RateLimited => 5,
        }
    }

    /// Get the base backoff delay in milliseconds.
    pub fn base_backoff_ms(&self) -> u64 {
        match self {
            ErrorCategory::Transient => 1000,
            ErrorCategory::Permanent => 0,
            ErrorCategory::RateLimited => 5000,
        }
    }

    /// Get the maximum backoff delay in milliseconds.
    pub fn max_backoff_ms(&self) -> u64 {
        match self {
            ErrorCategory::Transient => 30_000,
            ErrorCategory::Permanent => 0,
            ErrorCategory::RateLimited => 120_000,
        }
    }

    /// Calculate backoff delay for a given retry count.
    pub fn backoff_delay_ms(&self, retry_count: u32) -> u64 {
        if *self == ErrorCategory::Permanent {
            return 0;
        }

        self.base_backoff_ms()
            .saturating_mul(2u64.saturating_pow(retry_count))
            .min(self.max_backoff_ms())
    }

    /// Check if the operation should be retried given the current retry count.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries()
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::Permanent => write!(f, "permanent"),
            ErrorCategory::RateLimited => write!(f, "rate_limited"),
        }
    }
}

/// Error returned by transport operations.
///
/// Conditions a transport recovers from on its own (a topic that does not
/// exist yet, a purge of something already gone) never surface as this type.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The backend refused the pull because it is overloaded.
    #[error("backend unavailable while receiving from '{queue}'")]
    Unavailable {
        queue: String,
        #[source]
        source: BoxError,
    },

    /// Any other failure while receiving.
    #[error("could not receive from '{queue}'")]
    Receive {
        queue: String,
        #[source]
        source: BoxError,
    },

    /// Publishing to a destination failed.
    #[error("could not send to '{destination}'")]
    Send {
        destination: String,
        #[source]
        source: BoxError,
    },

    /// Creating the outbound client for a destination failed.
    #[error("could not create publisher for '{destination}'")]
    Publisher {
        destination: String,
        #[source]
        source: BoxError,
    },

    /// A topic or subscription could not be looked up, created or deleted.
    #[error("could not provision {resource}")]
    Provisioning {
        resource: String,
        #[source]
        source: BoxError,
    },

    /// Subscription creation kept failing until the retry budget ran out.
    #[error("subscription for topic '{topic}' was not created after {attempts} attempts")]
    ProvisioningExhausted { topic: String, attempts: u32 },

    /// Acknowledging or releasing a received message failed.
    #[error("could not settle message {ack_id} on '{queue}'")]
    Settle {
        queue: String,
        ack_id: String,
        #[source]
        source: BoxError,
    },

    /// An outgoing message lacks a header the transport requires.
    #[error("message is missing required header '{0}'")]
    MissingHeader(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl TransportError {
    /// Create a send error for a destination.
    pub fn send(
        destination: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Send {
            destination: destination.into(),
            source: source.into(),
        }
    }

    /// Create a publisher creation error for a destination.
    pub fn publisher(
        destination: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Publisher {
            destination: destination.into(),
            source: source.into(),
        }
    }

    /// Create a provisioning error naming the resource involved.
    pub fn provisioning(resource: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Provisioning {
            resource: resource.into(),
            source: source.into(),
        }
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            TransportError::Unavailable { .. } => ErrorCategory::RateLimited,
            TransportError::ProvisioningExhausted { .. } => ErrorCategory::Permanent,
            TransportError::MissingHeader(_) => ErrorCategory::Permanent,
            TransportError::Config(_) => ErrorCategory::Permanent,
            TransportError::Receive { .. }
            | TransportError::Send { .. }
            | TransportError::Publisher { .. }
            | TransportError::Provisioning { .. }
            | TransportError::Settle { .. } => ErrorCategory::Transient,
        }
    }

    /// Check if the failed operation should be retried.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        self.category().should_retry(retry_count)
    }

    /// Calculate backoff delay for a given retry count.
    pub fn backoff_delay_ms(&self, retry_count: u32) -> u64 {
        self.category().backoff_delay_ms(retry_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn io_error() -> io::Error {
        io::Error::new(io::ErrorKind::Other, "boom")
    }

    #[test]
    fn test_error_category_backoff() {
        assert_eq!(ErrorCategory::Transient.backoff_delay_ms(0), 1000);
        assert_eq!(ErrorCategory::Transient.backoff_delay_ms(1), 2000);
        assert_eq!(ErrorCategory::Transient.backoff_delay_ms(5), 30_000);

        assert_eq!(ErrorCategory::Permanent.backoff_delay_ms(3), 0);

        assert_eq!(ErrorCategory::RateLimited.backoff_delay_ms(0), 5000);
        assert_eq!(ErrorCategory::RateLimited.backoff_delay_ms(5), 120_000);
    }

    #[test]
    fn test_backoff_caps_large_retry_counts() {
        assert_eq!(ErrorCategory::Transient.backoff_delay_ms(60), 30_000);
        assert_eq!(ErrorCategory::Transient.backoff_delay_ms(u32::MAX), 30_000);
        assert_eq!(ErrorCategory::RateLimited.backoff_delay_ms(u32::MAX), 120_000);

        let err = TransportError::send("invoices", io_error());
        assert_eq!(err.backoff_delay_ms(u32::MAX), 30_000);
    }

    #[test]
    fn test_unavailable_is_distinct_from_receive_failure() {
        let unavailable = TransportError::Unavailable {
            queue: "orders".to_string(),
            source: Box::new(io_error()),
        };
        let receive = TransportError::Receive {
            queue: "orders".to_string(),
            source: Box::new(io_error()),
        };

        assert_eq!(unavailable.category(), ErrorCategory::RateLimited);
        assert_eq!(receive.category(), ErrorCategory::Transient);
        assert!(unavailable.to_string().contains("unavailable"));
    }

    #[test]
    fn test_exhausted_names_topic_and_is_permanent() {
        let err = TransportError::ProvisioningExhausted {
            topic: "projects/p/topics/orders".to_string(),
            attempts: 10,
        };

        assert!(err.to_string().contains("projects/p/topics/orders"));
        assert!(!err.should_retry(0));
    }

    #[test]
    fn test_source_is_preserved() {
        let err = TransportError::send("invoices", io_error());
        let source = std::error::Error::source(&err).expect("source");
        assert_eq!(source.to_string(), "boom");
        assert!(err.to_string().contains("invoices"));
    }
}
