//! Logging and optional span export.
//!
//! Logs go to stderr so they never interleave with REPL output on stdout.
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Filter directives; replaces [`DEFAULT_FILTER`]. |
//! | `MNEMOS_LOG_FORMAT` | `json` for newline-delimited JSON, anything else for compact text. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | Export spans over OTLP/HTTP to this collector. |
//!
//! ```rust,no_run
//! use mnemos_runtime::telemetry::{TelemetryConfig, init_tracing};
//!
//! let _guard = init_tracing(&TelemetryConfig::from_env("mnemos", env!("CARGO_PKG_VERSION")));
//! ```

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Store and pipeline events at `info`, HTTP client internals only when they
/// warn.
pub const DEFAULT_FILTER: &str = "info,hyper=warn,hyper_util=warn,reqwest=warn,h2=warn";

const TRACER_NAME: &str = "mnemos";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Compact
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: String,
    pub filter: String,
    pub format: LogFormat,
    pub otlp_endpoint: Option<String>,
}

impl TelemetryConfig {
    pub fn from_env(service_name: &str, service_version: &str) -> Self {
        Self::from_vars(service_name, service_version, |key| std::env::var(key).ok())
    }

    fn from_vars(service_name: &str, service_version: &str, var: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            service_name: service_name.to_string(),
            service_version: service_version.to_string(),
            filter: var("RUST_LOG")
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FILTER.to_string()),
            format: var("MNEMOS_LOG_FORMAT").map_or(LogFormat::Compact, |f| LogFormat::parse(&f)),
            otlp_endpoint: var("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|e| !e.trim().is_empty()),
        }
    }
}

/// Install the global subscriber. Hold the returned guard until exit; its
/// drop flushes exported spans.
///
/// An invalid filter falls back to [`DEFAULT_FILTER`]. A second call keeps
/// the first subscriber.
pub fn init_tracing(config: &TelemetryConfig) -> TracerProviderGuard {
    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|e| {
        eprintln!("[mnemos] invalid log filter {:?} ({e}); using {DEFAULT_FILTER}", config.filter);
        EnvFilter::new(DEFAULT_FILTER)
    });
    let provider = config.otlp_endpoint.as_deref().and_then(|endpoint| build_provider(config, endpoint));
    let otel = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer(TRACER_NAME)));
    let (json, compact) = match config.format {
        LogFormat::Json => (Some(fmt::layer().json().with_writer(std::io::stderr)), None),
        LogFormat::Compact => (None, Some(fmt::layer().compact().with_writer(std::io::stderr))),
    };

    if let Err(e) = tracing_subscriber::registry()
        .with(filter)
        .with(otel)
        .with(json)
        .with(compact)
        .try_init()
    {
        eprintln!("[mnemos] logging already initialised: {e}");
    }
    TracerProviderGuard(provider)
}

/// Shuts the span exporter down on drop.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[mnemos] span exporter shutdown failed: {e}");
        }
    }
}

fn build_provider(config: &TelemetryConfig, endpoint: &str) -> Option<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[mnemos] OTLP exporter for {endpoint} failed: {e}"))
        .ok()?;
    let resource = Resource::builder()
        .with_service_name(config.service_name.clone())
        .with_attribute(KeyValue::new("service.version", config.service_version.clone()))
        .build();
    // No async runtime exists yet when the CLI starts logging.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}
