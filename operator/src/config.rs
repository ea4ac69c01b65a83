//! Operator wide configuration, built once at start up.
use std::time::Duration;

use clap::Args;

use crate::{loadtest::TEST_SCRIPT_KEY, telemetry::TelemetryConfig};

/// Immutable configuration shared by the workload builder and the reconciler.
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Name of the operator, reported with telemetry and to workers.
    pub app_name: String,
    /// Version of the operator.
    pub version: String,
    /// Image used by every load test worker.
    pub worker_image: String,
    /// Pull policy for the worker image.
    pub image_pull_policy: String,
    /// Prefix of the labels attached to load test objects.
    pub label_prefix: String,
    /// Name of the volume holding the test script.
    pub script_volume: String,
    /// Directory the test script is mounted into.
    pub script_mount_path: String,
    /// File name of the test script inside its ConfigMap.
    pub script_filename: String,
    /// Delay before polling a load test that has not finished.
    pub poll_interval: Duration,
    /// Delay before retrying a pass that failed.
    pub retry_interval: Duration,
    /// Deadline of every call made to the API server.
    pub request_timeout: Duration,
    /// Number of attempts to write a status before giving up on conflicts.
    pub status_update_attempts: u32,
    /// Delay between status write attempts.
    pub status_update_backoff: Duration,
    /// Usage telemetry settings.
    pub telemetry: TelemetryConfig,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            app_name: crate::CONTROLLER_NAME.to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            worker_image: "artilleryio/artillery:latest".to_owned(),
            image_pull_policy: "Always".to_owned(),
            label_prefix: "loadtest.dev".to_owned(),
            script_volume: "test-script".to_owned(),
            script_mount_path: "/data".to_owned(),
            script_filename: TEST_SCRIPT_KEY.to_owned(),
            poll_interval: Duration::from_secs(5),
            retry_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
            status_update_attempts: 5,
            status_update_backoff: Duration::from_millis(10),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl OperatorConfig {
    /// Path of the test script inside a worker container.
    pub fn script_path(&self) -> String {
        format!(
            "{}/{}",
            self.script_mount_path.trim_end_matches('/'),
            self.script_filename
        )
    }
}

/// Command line options of the operator daemon.
#[derive(Args, Debug)]
pub struct Opts {
    /// Image used by every load test worker.
    #[arg(
        long,
        env = "LOADTEST_WORKER_IMAGE",
        default_value = "artilleryio/artillery:latest"
    )]
    worker_image: String,

    /// Pull policy for the worker image.
    #[arg(long, env = "LOADTEST_IMAGE_PULL_POLICY", default_value = "Always")]
    image_pull_policy: String,

    /// Seconds between polls of a load test that has not finished.
    #[arg(long, env = "LOADTEST_POLL_INTERVAL_SECS", default_value_t = 5)]
    poll_interval_secs: u64,

    /// Seconds before retrying a failed reconcile pass.
    #[arg(long, env = "LOADTEST_RETRY_INTERVAL_SECS", default_value_t = 1)]
    retry_interval_secs: u64,

    /// Seconds before a call to the API server times out.
    #[arg(long, env = "LOADTEST_REQUEST_TIMEOUT_SECS", default_value_t = 10)]
    request_timeout_secs: u64,

    /// Attempts to write a LoadTest status when it is concurrently modified.
    #[arg(long, env = "LOADTEST_STATUS_UPDATE_ATTEMPTS", default_value_t = 5)]
    status_update_attempts: u32,

    /// Endpoint receiving usage telemetry.
    #[arg(
        long,
        env = "LOADTEST_TELEMETRY_ENDPOINT",
        default_value = "https://app.posthog.com/capture/"
    )]
    telemetry_endpoint: String,

    /// API key sent with usage telemetry.
    #[arg(long, env = "LOADTEST_TELEMETRY_API_KEY", default_value = "")]
    telemetry_api_key: String,
}

impl From<Opts> for OperatorConfig {
    fn from(opts: Opts) -> Self {
        let default = Self::default();
        let mut telemetry = TelemetryConfig::from_env();
        telemetry.endpoint = opts.telemetry_endpoint;
        telemetry.api_key = opts.telemetry_api_key;
        Self {
            worker_image: opts.worker_image,
            image_pull_policy: opts.image_pull_policy,
            poll_interval: Duration::from_secs(opts.poll_interval_secs),
            retry_interval: Duration::from_secs(opts.retry_interval_secs),
            request_timeout: Duration::from_secs(opts.request_timeout_secs),
            status_update_attempts: opts.status_update_attempts.max(1),
            telemetry,
            ..default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_path_joins_mount_and_filename() {
        let mut config = OperatorConfig::default();
        assert_eq!(config.script_path(), "/data/test-script.yaml");
        config.script_mount_path = "/scripts/".to_owned();
        assert_eq!(config.script_path(), "/scripts/test-script.yaml");
    }
}
