use anyhow::{Context, Result};
use opentelemetry::{trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::{
    runtime::Tokio,
    trace::{Config, TracerProvider},
    Resource,
};
use std::time::Duration;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Spans are exported only when an OTLP endpoint is configured.
const ENV_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Install the global subscriber: formatted logs filtered by `verbosity_level`
/// (or `RUST_LOG`), plus OTLP span export when an endpoint is set.
///
/// # Errors
/// Returns an error if the exporter cannot be built or a global subscriber
/// is already installed.
pub fn init(verbosity_level: Option<tracing::Level>) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false);

    // RUST_LOG=
    let env_filter = EnvFilter::builder()
        .with_default_directive(verbosity_level.unwrap_or(tracing::Level::ERROR).into())
        .from_env_lossy();

    let telemetry = if std::env::var_os(ENV_OTLP_ENDPOINT).is_some() {
        let exporter = SpanExporter::builder()
            .with_tonic()
            .with_timeout(Duration::from_secs(3))
            .build()
            .context("Failed to build OTLP span exporter")?;

        let provider = TracerProvider::builder()
            .with_batch_exporter(exporter, Tokio)
            .with_config(Config::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            ])))
            .build();

        let tracer = provider.tracer(env!("CARGO_PKG_NAME"));
        opentelemetry::global::set_tracer_provider(provider);

        Some(OpenTelemetryLayer::new(tracer))
    } else {
        None
    };

    let subscriber = Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .with(telemetry);

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

/// Flush pending spans.
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}
