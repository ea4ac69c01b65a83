//! Anonymized usage telemetry.
//!
//! Events never carry raw identifiers or test script content: names and namespaces are hashed
//! before they leave the operator. Delivery is fire-and-forget, failures are only logged.
use std::{
    collections::BTreeMap,
    net::{IpAddr, UdpSocket},
    time::Duration,
};

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use k8s_openapi::api::core::v1::EnvVar;
use kube::ResourceExt;
#[cfg(test)]
use mockall::automock;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::{config::OperatorConfig, loadtest::LoadTest};

const DISABLE_ENV: &str = "LOADTEST_DISABLE_TELEMETRY";
const DEBUG_ENV: &str = "LOADTEST_TELEMETRY_DEBUG";
const DEFAULTS_ENV: &str = "LOADTEST_TELEMETRY_DEFAULTS";

/// Name of the event sent when the workers of a load test start running.
pub const TEST_STARTED: &str = "operator test started";
/// Name of the event sent when a load test finishes.
pub const TEST_COMPLETED: &str = "operator test completed";

/// Usage telemetry settings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Do not send any telemetry.
    pub disable: bool,
    /// Log telemetry properties instead of sending them.
    pub debug: bool,
    /// Endpoint receiving capture documents.
    pub endpoint: String,
    /// API key sent with each capture document.
    pub api_key: String,
}

impl TelemetryConfig {
    /// Read the disable and debug flags from the environment.
    pub fn from_env() -> Self {
        Self {
            disable: env_flag(DISABLE_ENV, std::env::var(DISABLE_ENV).ok()),
            debug: env_flag(DEBUG_ENV, std::env::var(DEBUG_ENV).ok()),
            ..Default::default()
        }
    }

    /// Environment passed to workers so they honor the same telemetry settings.
    pub fn to_env_vars(&self, app_name: &str) -> Vec<EnvVar> {
        vec![
            EnvVar {
                name: DISABLE_ENV.to_owned(),
                value: Some(self.disable.to_string()),
                ..Default::default()
            },
            EnvVar {
                name: DEBUG_ENV.to_owned(),
                value: Some(self.debug.to_string()),
                ..Default::default()
            },
            EnvVar {
                name: DEFAULTS_ENV.to_owned(),
                value: Some(json!({ "testRunner": app_name }).to_string()),
                ..Default::default()
            },
        ]
    }
}

fn env_flag(name: &str, value: Option<String>) -> bool {
    let Some(value) = value else {
        info!(name, "telemetry flag was not set");
        return false;
    };
    match value.trim().to_lowercase().as_str() {
        "1" | "t" | "true" => true,
        "0" | "f" | "false" => false,
        _ => {
            info!(name, %value, "telemetry flag is not a boolean, ignoring it");
            false
        }
    }
}

/// A single usage event.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TelemetryEvent {
    /// Name of the event.
    pub name: String,
    /// Properties sent along with the event.
    pub properties: BTreeMap<String, Value>,
}

/// Define the behavior we consume from a telemetry backend.
#[cfg_attr(test, automock)]
pub trait TelemetryClient: Send + Sync {
    /// Queue an event for delivery without waiting for it to be sent.
    fn enqueue(&self, distinct_id: &str, event: TelemetryEvent) -> Result<()>;
}

/// Client used when telemetry is disabled.
pub struct NoopClient;

impl TelemetryClient for NoopClient {
    fn enqueue(&self, _distinct_id: &str, _event: TelemetryEvent) -> Result<()> {
        Ok(())
    }
}

/// Client posting capture documents over HTTP.
pub struct HttpTelemetryClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpTelemetryClient {
    /// Create a client for the configured endpoint, giving up on requests after `timeout`.
    pub fn new(config: &TelemetryConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn request(&self, distinct_id: &str, event: &TelemetryEvent) -> reqwest::RequestBuilder {
        self.client.post(&self.endpoint).json(&json!({
            "api_key": self.api_key,
            "event": event.name,
            "distinct_id": distinct_id,
            "properties": event.properties,
        }))
    }
}

async fn send(request: reqwest::RequestBuilder) -> reqwest::Result<reqwest::Response> {
    request.send().await?.error_for_status()
}

impl TelemetryClient for HttpTelemetryClient {
    fn enqueue(&self, distinct_id: &str, event: TelemetryEvent) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|err| anyhow!("telemetry requires a tokio runtime: {err}"))?;
        let request = self.request(distinct_id, &event);
        handle.spawn(async move {
            match send(request).await {
                Ok(_) => debug!(event = %event.name, "telemetry sent"),
                Err(error) => warn!(%error, event = %event.name, "could not send telemetry"),
            }
        });
        Ok(())
    }
}

/// Address of the interface used for outbound traffic, empty when there is no route.
///
/// Connecting a UDP socket only selects a route, no packet is sent.
fn outbound_ip() -> String {
    let local = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip())
    };
    local().map(|ip| ip.to_string()).unwrap_or_default()
}

/// Hash a value so it can be reported without revealing it.
pub fn hash_encode(value: &str) -> String {
    STANDARD.encode(Sha256::digest(value.as_bytes()))
}

/// Builds and enqueues the usage events of the operator.
pub struct Telemetry {
    config: TelemetryConfig,
    client: Box<dyn TelemetryClient>,
    distinct_id: String,
    defaults: BTreeMap<String, Value>,
}

impl Telemetry {
    /// Create telemetry for the operator, picking a client based on the configuration.
    pub fn from_config(config: &OperatorConfig) -> Self {
        let client: Box<dyn TelemetryClient> = if config.telemetry.disable {
            Box::new(NoopClient)
        } else {
            match HttpTelemetryClient::new(&config.telemetry, config.request_timeout) {
                Ok(client) => Box::new(client),
                Err(error) => {
                    warn!(%error, "could not build telemetry client, telemetry is disabled");
                    Box::new(NoopClient)
                }
            }
        };
        Self::new(config, client)
    }

    /// Create telemetry sending events through the given client.
    pub fn new(config: &OperatorConfig, client: Box<dyn TelemetryClient>) -> Self {
        let hostname = gethostname::gethostname().to_string_lossy().into_owned();
        let defaults = BTreeMap::from_iter(vec![
            ("source".to_owned(), json!(config.app_name)),
            ("version".to_owned(), json!(config.version)),
            ("containerOS".to_owned(), json!(std::env::consts::OS)),
            ("workerImage".to_owned(), json!(config.worker_image)),
            ("ipHash".to_owned(), json!(hash_encode(&outbound_ip()))),
            ("hostnameHash".to_owned(), json!(hash_encode(&hostname))),
            // Ask the backend not to record the sender address.
            ("$ip".to_owned(), Value::Null),
        ]);
        Self {
            config: config.telemetry.clone(),
            client,
            distinct_id: hash_encode(&format!("{}/{}", config.app_name, hostname)),
            defaults,
        }
    }

    /// Telemetry that never sends anything.
    pub fn disabled(config: &OperatorConfig) -> Self {
        Self::new(config, Box::new(NoopClient))
    }

    /// Report that the workers of a load test started running.
    pub fn test_started(&self, load_test: &LoadTest) {
        self.enqueue(TEST_STARTED, load_test)
    }

    /// Report that a load test finished.
    pub fn test_completed(&self, load_test: &LoadTest) {
        self.enqueue(TEST_COMPLETED, load_test)
    }

    fn enqueue(&self, name: &str, load_test: &LoadTest) {
        if self.config.disable {
            return;
        }
        let event = self.event(name, load_test);
        if self.config.debug {
            for (key, value) in &event.properties {
                info!(event = name, key = %key, %value, "telemetry debug");
            }
            return;
        }
        if let Err(error) = self.client.enqueue(&self.distinct_id, event) {
            warn!(
                %error,
                event = name,
                disable = self.config.disable,
                debug = self.config.debug,
                "could not broadcast telemetry"
            );
        }
    }

    fn event(&self, name: &str, load_test: &LoadTest) -> TelemetryEvent {
        let mut properties = self.defaults.clone();
        properties.extend(vec![
            ("name".to_owned(), json!(hash_encode(&load_test.name_any()))),
            (
                "namespace".to_owned(),
                json!(hash_encode(&load_test.namespace().unwrap_or_default())),
            ),
            ("count".to_owned(), json!(load_test.spec.count)),
            (
                "environment".to_owned(),
                json!(!load_test.spec.environment.is_empty()),
            ),
        ]);
        TelemetryEvent {
            name: name.to_owned(),
            properties,
        }
    }
}
