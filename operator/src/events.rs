//! K8s Events about LoadTest resources.
//!
//! Events are fire-and-forget: a failure to publish is logged and never fails a reconcile pass.
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::{
    runtime::events::{Event, EventType, Recorder, Reporter},
    Client,
};
use tracing::warn;

/// Reason of the event emitted when the worker Job is created.
pub const CREATED: &str = "Created";
/// Reason of the events emitted for each worker pod once a load test runs.
pub const RUNNING: &str = "Running";
/// Reason of the event emitted when all workers succeeded.
pub const COMPLETED: &str = "Completed";
/// Reason of the event emitted when a load test finished with failed workers.
pub const FAILED: &str = "Failed";
/// Reason of the event emitted when the test script ConfigMap does not exist.
pub const MISSING_TEST_SCRIPT: &str = "MissingTestScript";

/// Publishes K8s Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event about the referenced object.
    async fn publish(
        &self,
        reference: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: String,
    );
}

/// Publishes events through the K8s API.
pub struct KubeEventPublisher {
    client: Client,
    reporter: Reporter,
    timeout: Duration,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as the given controller.
    /// Publishing gives up after `timeout`.
    pub fn new(client: Client, controller: &str, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            reporter: Reporter {
                controller: controller.to_owned(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        reference: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: String,
    ) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), reference.clone());
        let event = Event {
            type_,
            reason: reason.to_owned(),
            note: Some(note),
            action: "Reconcile".to_owned(),
            secondary: None,
        };
        let name = reference.name.as_deref().unwrap_or_default();
        match tokio::time::timeout(self.timeout, recorder.publish(event)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(%error, reason, name, "failed to publish event"),
            Err(_) => warn!(reason, name, "timed out publishing event"),
        }
    }
}
