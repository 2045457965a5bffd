//! Shared test utilities for transport testing
//!
//! This crate provides reusable test infrastructure for the transport crates:
//! - `TestPubSub`: Pub/Sub emulator container with automatic cleanup (feature: "pubsub")
//! - `TestDataBuilder`: Deterministic queue and message names (always available)
//! - `init_tracing`: Log output for tests, filtered by `RUST_LOG` (always available)
//!
//! # Features
//!
//! - `pubsub`: Enables the Pub/Sub emulator container
//!
//! # Usage
//!
//! Add `features = ["pubsub"]` to your dev-dependencies:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["pubsub"] }
//! ```
//!
//! Then in your tests:
//!
//! ```rust,ignore
//! use test_utils::{TestDataBuilder, TestPubSub};
//!
//! #[tokio::test]
//! #[ignore] // Requires Docker
//! async fn my_pubsub_test() {
//!     test_utils::init_tracing();
//!     let pubsub = TestPubSub::new().await;
//!     let builder = TestDataBuilder::from_test_name("my_pubsub_test");
//!
//!     let queue = builder.queue("orders");
//! }
//! ```

use tracing_subscriber::EnvFilter;

#[cfg(feature = "pubsub")]
mod pubsub;

#[cfg(feature = "pubsub")]
pub use pubsub::{TestPubSub, TEST_PROJECT};

/// Install a test-friendly tracing subscriber.
///
/// Output goes through the test harness writer, so it only shows for failing
/// tests or with `--nocapture`. Safe to call from every test.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,pubsub_transport=debug,messaging=debug"));

    // Silently ignore if another test already installed one
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Builder for test data with deterministic names
///
/// This keeps tests that share a backend from stepping on each other's queues.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    /// Create a new builder with a seed (for deterministic tests)
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_receive_commit");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Generate a queue name unique to this test
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::new(7);
    /// assert_eq!(builder.queue("orders"), "test-7-orders");
    /// ```
    pub fn queue(&self, name: &str) -> String {
        format!("test-{}-{}", self.seed, name)
    }

    /// Generate a message id unique to this test
    pub fn message_id(&self, n: u32) -> String {
        format!("msg-{}-{}", self.seed, n)
    }
}
