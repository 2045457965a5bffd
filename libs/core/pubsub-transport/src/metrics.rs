//! Metrics for the Pub/Sub transport.
//!
//! Recorded through the `metrics` facade; installing a recorder is up to the host.

use metrics::counter;

/// Metrics for one transport instance.
#[derive(Clone)]
pub struct PubSubMetrics {
    queue: String,
}

impl PubSubMetrics {
    /// Create metrics labelled with the input queue (`-` when send-only).
    pub fn new(queue: Option<&str>) -> Self {
        Self {
            queue: queue.unwrap_or("-").to_string(),
        }
    }

    /// Record a message handed to the bus.
    pub fn message_received(&self) {
        counter!(
            "pubsub_transport_messages_received_total",
            "queue" => self.queue.clone()
        )
        .increment(1);
    }

    /// Record an expired message dropped on receive.
    pub fn message_expired(&self) {
        counter!(
            "pubsub_transport_messages_expired_total",
            "queue" => self.queue.clone()
        )
        .increment(1);
    }

    /// Record a message acknowledged on commit.
    pub fn message_acknowledged(&self) {
        counter!(
            "pubsub_transport_messages_acknowledged_total",
            "queue" => self.queue.clone()
        )
        .increment(1);
    }

    /// Record a lease released on abort.
    pub fn message_lease_reset(&self) {
        counter!(
            "pubsub_transport_messages_lease_reset_total",
            "queue" => self.queue.clone()
        )
        .increment(1);
    }

    /// Record messages published to a destination.
    pub fn messages_published(&self, destination: &str, count: usize) {
        counter!(
            "pubsub_transport_messages_published_total",
            "destination" => destination.to_string()
        )
        .increment(count as u64);
    }

    /// Record a failed publish to a destination.
    pub fn publish_failed(&self, destination: &str) {
        counter!(
            "pubsub_transport_publish_failures_total",
            "destination" => destination.to_string()
        )
        .increment(1);
    }

    /// Record header values truncated on send.
    pub fn headers_truncated(&self, destination: &str, count: usize) {
        if count == 0 {
            return;
        }
        counter!(
            "pubsub_transport_headers_truncated_total",
            "destination" => destination.to_string()
        )
        .increment(count as u64);
    }
}

/// Recorder that tallies counters by name, for use with
/// `metrics::with_local_recorder`.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct CountingRecorder {
    counts: std::sync::Arc<std::sync::Mutex<std::collections::HashMap<String, u64>>>,
}

#[cfg(test)]
impl CountingRecorder {
    pub(crate) fn count(&self, name: &str) -> u64 {
        self.counts.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

#[cfg(test)]
struct NamedCounter {
    name: String,
    counts: std::sync::Arc<std::sync::Mutex<std::collections::HashMap<String, u64>>>,
}

#[cfg(test)]
impl metrics::CounterFn for NamedCounter {
    fn increment(&self, value: u64) {
        *self.counts.lock().unwrap().entry(self.name.clone()).or_default() += value;
    }

    fn absolute(&self, value: u64) {
        self.counts.lock().unwrap().insert(self.name.clone(), value);
    }
}

#[cfg(test)]
impl metrics::Recorder for CountingRecorder {
    fn describe_counter(&self, _: metrics::KeyName, _: Option<metrics::Unit>, _: metrics::SharedString) {}

    fn describe_gauge(&self, _: metrics::KeyName, _: Option<metrics::Unit>, _: metrics::SharedString) {}

    fn describe_histogram(&self, _: metrics::KeyName, _: Option<metrics::Unit>, _: metrics::SharedString) {}

    fn register_counter(&self, key: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Counter {
        metrics::Counter::from_arc(std::sync::Arc::new(NamedCounter {
            name: key.name().to_string(),
            counts: std::sync::Arc::clone(&self.counts),
        }))
    }

    fn register_gauge(&self, _: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Gauge {
        metrics::Gauge::noop()
    }

    fn register_histogram(&self, _: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Histogram {
        metrics::Histogram::noop()
    }
}
