//! Utils is shared functions and constants for the controller

use k8s_openapi::chrono::{DateTime, Utc};
use kube::Client;

use crate::{
    config::OperatorConfig,
    events::{EventPublisher, KubeEventPublisher},
    loadtest::client::{KubeLoadTestClient, LoadTestClient},
    telemetry::Telemetry,
    CONTROLLER_NAME,
};

/// Operator Context
pub struct Context<C, E, K> {
    /// Client for the API server
    pub client: C,
    /// Sink for K8s events
    pub events: E,
    /// Usage telemetry
    pub telemetry: Telemetry,
    /// Clock that provide the current time
    pub clock: K,
    /// Operator configuration
    pub config: OperatorConfig,
}

impl Context<KubeLoadTestClient, KubeEventPublisher, UtcClock> {
    /// Create new context
    pub fn new(k_client: Client, config: OperatorConfig) -> Self {
        Context {
            client: KubeLoadTestClient::new(k_client.clone()),
            events: KubeEventPublisher::new(k_client, CONTROLLER_NAME, config.request_timeout),
            telemetry: Telemetry::from_config(&config),
            clock: UtcClock,
            config,
        }
    }
}

impl<C, E, K> Context<C, E, K>
where
    C: LoadTestClient,
    E: EventPublisher,
    K: Clock,
{
    /// Create a context from its parts.
    pub fn with_parts(
        client: C,
        events: E,
        telemetry: Telemetry,
        clock: K,
        config: OperatorConfig,
    ) -> Self {
        Self {
            client,
            events,
            telemetry,
            clock,
            config,
        }
    }
}

/// Provides the current time.
pub trait Clock: Send + Sync {
    /// Report the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Provides the current time using real time.
pub struct UtcClock;
impl Clock for UtcClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// True when the API server reported that the object does not exist.
pub fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 404)
}

/// True when the API server rejected a write because of a concurrent modification,
/// or because the object already exists.
pub fn is_conflict(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 409)
}
