//! Logging and trace export.
//!
//! [`LoggingSettings::from_env`] reads the environment once; [`init`] installs
//! the global subscriber from those settings and must run before the Tokio
//! runtime is built.
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter, default `info`. |
//! | `QUADBRIDGE_LOG_FORMAT` | `json` for newline-delimited JSON; anything else is compact text. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP/HTTP collector URL. Spans are exported only when this is set and non-empty. |

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "info";

/// Console output style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    fn from_env_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub service_name: String,
    pub filter: String,
    pub format: LogFormat,
    pub otlp_endpoint: Option<String>,
}

impl LoggingSettings {
    pub fn from_env(service_name: &str) -> Self {
        Self::from_lookup(service_name, |key| std::env::var(key).ok())
    }

    fn from_lookup(service_name: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            service_name: service_name.to_string(),
            filter: non_empty("RUST_LOG").unwrap_or_else(|| DEFAULT_FILTER.to_string()),
            format: LogFormat::from_env_value(lookup("QUADBRIDGE_LOG_FORMAT").as_deref()),
            otlp_endpoint: non_empty("OTEL_EXPORTER_OTLP_ENDPOINT"),
        }
    }
}

/// Flushes and shuts down the span exporter when dropped. Keep it alive in
/// `main`.
#[must_use = "dropping the guard stops span export"]
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    pub fn is_exporting(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        let Some(provider) = self.provider.take() else {
            return;
        };
        if let Err(e) = provider.shutdown() {
            eprintln!("quadbridge: span exporter shutdown failed: {e}");
        }
    }
}

/// Install the global subscriber.
///
/// An unusable filter falls back to `info`; an exporter that cannot be built
/// is reported on stderr and logging continues without it.
pub fn init(settings: &LoggingSettings) -> TelemetryGuard {
    let filter = EnvFilter::try_new(&settings.filter).unwrap_or_else(|e| {
        eprintln!("quadbridge: ignoring log filter '{}': {e}", settings.filter);
        EnvFilter::new(DEFAULT_FILTER)
    });

    let console = match settings.format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer().compact().boxed(),
    };

    let provider = settings
        .otlp_endpoint
        .as_deref()
        .and_then(|endpoint| span_provider(&settings.service_name, endpoint));
    let spans = provider.as_ref().map(|p| {
        tracing_opentelemetry::layer().with_tracer(p.tracer(settings.service_name.clone()))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(spans)
        .init();

    TelemetryGuard { provider }
}

fn span_provider(service_name: &str, endpoint: &str) -> Option<SdkTracerProvider> {
    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("quadbridge: OTLP exporter for {endpoint} unavailable: {e}");
            return None;
        }
    };

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();
    // Simple exporter: no runtime exists yet to drive a batch processor.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}
