//! Tracing setup with optional OpenTelemetry export.

use common::LogFormat;
use opentelemetry::{KeyValue, trace::TracerProvider as _};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource, runtime,
    trace::{RandomIdGenerator, Sampler, Tracer, TracerProvider},
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// OpenTelemetry tracer guard
///
/// When dropped, flushes all pending spans and shuts down the tracer
pub struct TelemetryGuard;

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        opentelemetry::global::shutdown_tracer_provider();
    }
}

/// Build an OTLP (gRPC) tracer and install its provider globally.
pub fn init_tracer(
    service_name: &str,
    otlp_endpoint: &str,
) -> Result<Tracer, Box<dyn std::error::Error>> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(otlp_endpoint)
        .build()?;

    let resource = Resource::new(vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION").to_string()),
    ]);

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource),
        )
        .build();

    let tracer = provider.tracer(service_name.to_string());
    opentelemetry::global::set_tracer_provider(provider);
    Ok(tracer)
}

/// Install the global subscriber: level filter, plain or JSON lines, and the
/// OpenTelemetry layer when enabled.
///
/// Must run inside a tokio runtime when `otel_enabled` is set.
pub fn setup_tracing(
    service_name: &str,
    otlp_endpoint: &str,
    otel_enabled: bool,
    log_level: &str,
    format: LogFormat,
) -> Result<Option<TelemetryGuard>, Box<dyn std::error::Error>> {
    let tracer = if otel_enabled {
        Some(init_tracer(service_name, otlp_endpoint)?)
    } else {
        None
    };
    let guard = tracer.as_ref().map(|_| TelemetryGuard);
    let otel_layer = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    let (plain, json) = match format {
        LogFormat::Plain => (Some(fmt::layer()), None),
        LogFormat::Json => (None, Some(fmt::layer().json())),
    };

    tracing_subscriber::registry()
        .with(common::logging::filter(log_level))
        .with(plain)
        .with(json)
        .with(otel_layer)
        .try_init()?;

    tracing::info!(
        service_name,
        otel = otel_enabled,
        "Tracing initialized"
    );
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test owns the global subscriber for this binary
    #[test]
    fn test_tracing_without_otel() {
        let first = setup_tracing("test-service", "http://localhost:4317", false, "debug", LogFormat::Json);
        assert!(first.is_ok());
        assert!(first.unwrap().is_none());

        let second = setup_tracing("test-service", "http://localhost:4317", false, "info", LogFormat::Plain);
        assert!(second.is_err());
    }
}
