//! Tracing subscriber setup.
//!
//! Lifecycle events are emitted at `info`/`debug`. Request and response
//! bodies are emitted at `trace` under the [`PAYLOAD_TARGET`] target, so
//! `RUST_LOG=info,conclave::payload=trace` shows them without the rest of
//! the trace output.
//!
//! With the `otel` feature and `telemetry.otlp_endpoint` set, spans are also
//! exported over OTLP/HTTP to an external collector.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::{LogFormat, TelemetryConfig};
use crate::error::{ConclaveError, Result};

pub const PAYLOAD_TARGET: &str = "conclave::payload";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Returned by [`init_tracing`]. Holds the span exporter, if any, until
/// [`TracingGuard::shutdown`] flushes it.
#[must_use = "dropping the guard without `shutdown` may lose buffered spans"]
#[derive(Default)]
pub struct TracingGuard {
    #[cfg(feature = "otel")]
    provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
}

impl std::fmt::Debug for TracingGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracingGuard")
            .field("exporting", &self.is_exporting())
            .finish()
    }
}

impl TracingGuard {
    pub fn is_exporting(&self) -> bool {
        #[cfg(feature = "otel")]
        {
            self.provider.is_some()
        }
        #[cfg(not(feature = "otel"))]
        {
            false
        }
    }

    /// Tracer provider backing the OTLP layer, for callers that manage it themselves.
    #[cfg(feature = "otel")]
    pub fn provider(&self) -> Option<&opentelemetry_sdk::trace::SdkTracerProvider> {
        self.provider.as_ref()
    }

    /// Flush pending spans and stop the exporter.
    pub fn shutdown(self) -> Result<()> {
        #[cfg(feature = "otel")]
        if let Some(provider) = self.provider {
            provider
                .shutdown()
                .map_err(|err| ConclaveError::Config(format!("trace export shutdown failed: {err}")))?;
        }
        Ok(())
    }
}

/// `RUST_LOG` when set and valid, otherwise the configured directives.
pub fn env_filter(config: &TelemetryConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|err| {
            ConclaveError::Config(format!("invalid log filter `{}`: {err}", config.filter))
        }),
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> Result<TracingGuard> {
    let filter = env_filter(config)?;
    let mut layers: Vec<BoxedLayer> = vec![match config.format {
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
        LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
    }];

    let guard = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => otlp_layer(endpoint, &config.service_name, &mut layers)?,
        None => TracingGuard::default(),
    };

    Registry::default()
        .with(layers.with_filter(filter))
        .try_init()
        .map_err(|err| ConclaveError::Config(format!("failed to install tracing subscriber: {err}")))?;
    Ok(guard)
}

#[cfg(feature = "otel")]
fn otlp_layer(endpoint: &str, service_name: &str, layers: &mut Vec<BoxedLayer>) -> Result<TracingGuard> {
    use opentelemetry::trace::TracerProvider;

    let provider = otlp_provider(endpoint, service_name)?;
    let tracer = provider.tracer("conclave");
    layers.push(tracing_opentelemetry::layer().with_tracer(tracer).boxed());
    Ok(TracingGuard {
        provider: Some(provider),
    })
}

#[cfg(not(feature = "otel"))]
fn otlp_layer(endpoint: &str, _service_name: &str, _layers: &mut Vec<BoxedLayer>) -> Result<TracingGuard> {
    Err(ConclaveError::Config(format!(
        "OTLP export to `{endpoint}` requires the `otel` feature"
    )))
}

#[cfg(feature = "otel")]
fn otlp_provider(endpoint: &str, service_name: &str) -> Result<opentelemetry_sdk::trace::SdkTracerProvider> {
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_protocol(opentelemetry_otlp::Protocol::HttpBinary)
        .with_endpoint(endpoint)
        .build()
        .map_err(|err| ConclaveError::Config(format!("failed to build OTLP exporter: {err}")))?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(Resource::builder().with_service_name(service_name.to_string()).build())
        .build())
}
