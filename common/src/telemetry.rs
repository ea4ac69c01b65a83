//! Provides helper functions for initializing telemetry collection and publication.
use std::time::Duration;

use anyhow::Result;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{metrics::MeterProvider, runtime, trace::Tracer, Resource};
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter, Registry};

/// Interval between two exports of the collected metrics.
const METRICS_PERIOD: Duration = Duration::from_secs(10);

/// Output format of log lines written to stdout.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable, one line per event.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

/// Initialize tracing and metrics.
///
/// Spans and metrics are exported over OTLP when an endpoint is provided, otherwise only logs
/// are written. The returned meter provider must be passed to [`shutdown`] to flush it.
pub async fn init(
    service_name: &'static str,
    otlp_endpoint: Option<String>,
    format: LogFormat,
) -> Result<Option<MeterProvider>> {
    // Default to INFO if no env is specified
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;

    let (telemetry, meter_provider) = match otlp_endpoint {
        Some(endpoint) => {
            let tracer = tracer(service_name, endpoint.clone())?;
            (
                Some(tracing_opentelemetry::layer().with_tracer(tracer)),
                Some(meter_provider(service_name, endpoint)?),
            )
        }
        None => (None, None),
    };
    let compact = (format == LogFormat::Compact)
        .then(|| tracing_subscriber::fmt::layer().with_ansi(true).compact());
    let json = (format == LogFormat::Json).then(|| tracing_subscriber::fmt::layer().json());

    let collector = Registry::default()
        .with(env_filter)
        .with(telemetry)
        .with(compact)
        .with(json);

    tracing::subscriber::set_global_default(collector)?;
    Ok(meter_provider)
}

/// Flush any pending spans and metrics.
pub fn shutdown(meter_provider: Option<MeterProvider>) {
    opentelemetry::global::shutdown_tracer_provider();
    if let Some(provider) = meter_provider {
        if let Err(error) = provider.shutdown() {
            tracing::warn!(%error, "could not flush metrics");
        }
    }
}

fn resource(service_name: &'static str) -> Resource {
    Resource::new(vec![
        KeyValue::new(
            "hostname",
            gethostname::gethostname().to_string_lossy().into_owned(),
        ),
        KeyValue::new("service.name", service_name),
    ])
}

fn tracer(service_name: &'static str, endpoint: String) -> Result<Tracer> {
    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(opentelemetry_sdk::trace::config().with_resource(resource(service_name)))
        .install_batch(runtime::Tokio)?;
    Ok(tracer)
}

/// Build a periodic OTLP metrics pipeline and install it as the global meter provider.
fn meter_provider(service_name: &'static str, endpoint: String) -> Result<MeterProvider> {
    let provider = opentelemetry_otlp::new_pipeline()
        .metrics(runtime::Tokio)
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_resource(resource(service_name))
        .with_period(METRICS_PERIOD)
        .build()?;
    opentelemetry::global::set_meter_provider(provider.clone());
    Ok(provider)
}
