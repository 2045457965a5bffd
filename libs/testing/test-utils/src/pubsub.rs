//! Pub/Sub emulator test infrastructure
//!
//! Provides a `TestPubSub` helper that runs the Cloud SDK Pub/Sub emulator in a container.

use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

const IMAGE: &str = "gcr.io/google.com/cloudsdktool/google-cloud-cli";
const TAG: &str = "emulators";
const PORT: u16 = 8085;

/// Project the emulator is started with.
pub const TEST_PROJECT: &str = "test-project";

/// Test Pub/Sub emulator wrapper that ensures proper cleanup
///
/// The container is automatically stopped and removed when this struct is dropped.
///
/// # Example
///
/// ```no_run
/// use test_utils::TestPubSub;
///
/// # async fn example() {
/// let pubsub = TestPubSub::new().await;
///
/// // Point the transport at the emulator
/// let host = pubsub.emulator_host();
/// # }
/// ```
pub struct TestPubSub {
    #[allow(dead_code)]
    container: ContainerAsync<GenericImage>,
    host_port: u16,
}

impl TestPubSub {
    /// Start the emulator and wait until it accepts requests.
    pub async fn new() -> Self {
        let container = GenericImage::new(IMAGE, TAG)
            .with_exposed_port(PORT.tcp())
            .with_wait_for(WaitFor::message_on_stderr("Server started"))
            .with_cmd(emulator_cmd())
            .start()
            .await
            .expect("Failed to start Pub/Sub emulator container");

        let host_port = container
            .get_host_port_ipv4(PORT)
            .await
            .expect("Failed to get Pub/Sub emulator port");

        tracing::info!(port = host_port, "Test Pub/Sub emulator ready");

        Self {
            container,
            host_port,
        }
    }

    /// Host and port in the form expected by `PUBSUB_EMULATOR_HOST`.
    pub fn emulator_host(&self) -> String {
        format!("127.0.0.1:{}", self.host_port)
    }

    /// Base URL of the emulator's REST API.
    pub fn endpoint(&self) -> String {
        format!("http://{}", self.emulator_host())
    }

    pub fn project_id(&self) -> &str {
        TEST_PROJECT
    }
}

impl Drop for TestPubSub {
    fn drop(&mut self) {
        tracing::debug!("Cleaning up test Pub/Sub emulator container");
    }
}

/// Command line that starts the emulator on `PORT` for `TEST_PROJECT`.
fn emulator_cmd() -> Vec<String> {
    ["gcloud", "beta", "emulators", "pubsub", "start"]
        .into_iter()
        .map(String::from)
        .chain([
            format!("--host-port=0.0.0.0:{PORT}"),
            format!("--project={TEST_PROJECT}"),
        ])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emulator_cmd_uses_project_and_port() {
        let cmd = emulator_cmd();

        assert_eq!(cmd[..5], ["gcloud", "beta", "emulators", "pubsub", "start"]);
        assert!(cmd.contains(&format!("--project={TEST_PROJECT}")));
        assert!(cmd.contains(&format!("--host-port=0.0.0.0:{PORT}")));
    }
}
