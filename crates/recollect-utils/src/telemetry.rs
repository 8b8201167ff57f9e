use opentelemetry::{KeyValue, trace::TracerProvider};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    trace::{RandomIdGenerator, SdkTracerProvider},
};
use opentelemetry_semantic_conventions::{SCHEMA_URL, resource::SERVICE_VERSION};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing::Subscriber;
use tracing_log::LogTracer;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Env var that disables OTLP export even when an endpoint is configured.
pub const NO_TELEMETRY_ENV: &str = "RECOLLECT_NO_TELEMETRY";

const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Keeps the tracer provider alive for the life of the process.
///
/// Hook processes exit within milliseconds, so dropping the guard shuts the
/// provider down and flushes any batched spans before `main` returns.
#[must_use = "dropping the guard immediately shuts telemetry down"]
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    pub fn exporting(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("telemetry shutdown failed: {e}");
        }
    }
}

/// Build a resource with service name & version
fn resource(service_name: &str, service_version: &str) -> Resource {
    Resource::builder()
        .with_service_name(service_name.to_string())
        .with_schema_url(
            [KeyValue::new(SERVICE_VERSION, service_version.to_string())],
            SCHEMA_URL,
        )
        .build()
}

/// Initialize an OTLP tracer provider
fn init_tracer_provider(
    service_name: &str,
    service_version: &str,
    endpoint: &str,
) -> Option<SdkTracerProvider> {
    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("OTLP exporter init failed, continuing without export: {e}");
            return None;
        }
    };

    Some(
        SdkTracerProvider::builder()
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(resource(service_name, service_version))
            .with_batch_exporter(exporter)
            .build(),
    )
}

/// OTLP endpoint to export to, if export is enabled at all.
///
/// Unlike the interactive tools, hook processes never phone home by
/// default: an endpoint has to be configured explicitly.
pub fn otlp_endpoint() -> Option<String> {
    if std::env::var_os(NO_TELEMETRY_ENV).is_some() {
        return None;
    }
    std::env::var(OTLP_ENDPOINT_ENV)
        .ok()
        .filter(|endpoint| !endpoint.trim().is_empty())
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Formatting layer for the structured log.
///
/// Stdout belongs to the hook protocol, so output goes either to the log
/// file as JSON lines or to stderr.
fn fmt_layer<S>(log_file: Option<&Path>) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    if let Some(path) = log_file {
        match open_log_file(path) {
            Ok(file) => {
                return fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_writer(Mutex::new(file))
                    .boxed();
            }
            Err(e) => eprintln!("cannot open log file {}: {e}", path.display()),
        }
    }
    fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .boxed()
}

/// Setup logging and telemetry for a hook binary.
///
/// # Behavior
/// - `log` records are bridged into `tracing` via `LogTracer`
/// - Log lines go to `log_file` as JSON when given, otherwise to stderr
/// - OTLP export is enabled only when `OTEL_EXPORTER_OTLP_ENDPOINT` is set
///   and `RECOLLECT_NO_TELEMETRY` is not
///
/// # Environment Variables
/// - `RUST_LOG`: Controls log filtering (via EnvFilter, defaults to `info`)
/// - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP collector to export spans to
/// - `RECOLLECT_NO_TELEMETRY`: If set (any value), disables OTLP export
pub fn setup_telemetry(
    service_name: &str,
    service_version: &str,
    log_file: Option<&Path>,
) -> TelemetryGuard {
    // A second call (tests, embedders) keeps the first bridge.
    let _ = LogTracer::init();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let provider = otlp_endpoint().and_then(|endpoint| {
        init_tracer_provider(service_name, service_version, &endpoint)
    });
    let otel_layer = provider
        .as_ref()
        .map(|tp| OpenTelemetryLayer::new(tp.tracer("recollect-tracer")));

    let subscriber = Registry::default()
        .with(filter)
        .with(fmt_layer(log_file))
        .with(otel_layer);

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        log::debug!("tracing subscriber already installed, keeping the existing one");
    }

    TelemetryGuard { provider }
}
