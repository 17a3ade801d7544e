//! Logging and trace export setup.
//!
//! `tagpose` logs through `tracing` to stderr; stdout is reserved for the
//! records a replay prints.  Knobs:
//!
//! - `RUST_LOG`: filter directives, `info` when unset.
//! - `TAGPOSE_LOG_FORMAT=json`: one JSON object per log line.
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: when set, the `on_image` and `assemble`
//!   spans are also exported over OTLP/HTTP to that collector.
//!
//! ```rust,no_run
//! let _guard = tagpose_runtime::telemetry::init_tracing("tagpose");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FORMAT_VAR: &str = "TAGPOSE_LOG_FORMAT";
const OTLP_ENDPOINT_VAR: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Install the global subscriber for `service_name`.  Call once, and keep the
/// guard alive until exit so buffered spans are flushed.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let provider = build_provider(service_name);
    let otel = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("tagpose")));

    // Exactly one of the two formatters is installed.
    let (json, compact) = if json_requested(std::env::var(LOG_FORMAT_VAR).ok().as_deref()) {
        (Some(fmt::layer().json().with_writer(std::io::stderr)), None)
    } else {
        (None, Some(fmt::layer().compact().with_writer(std::io::stderr)))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(otel)
        .with(json)
        .with(compact)
        .init();

    TracerProviderGuard(provider)
}

fn json_requested(format: Option<&str>) -> bool {
    format.is_some_and(|f| f.eq_ignore_ascii_case("json"))
}

/// Shuts the span exporter down when dropped.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("tagpose: span exporter shutdown failed: {e}");
        }
    }
}

/// `None` without an endpoint, or when the exporter cannot be built.  The
/// subscriber is not installed yet at this point, hence `eprintln!`.
fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var(OTLP_ENDPOINT_VAR).ok()?;
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .inspect_err(|e| eprintln!("tagpose: OTLP exporter disabled: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    // The replay CLI has no async runtime, so spans are exported inline.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}
