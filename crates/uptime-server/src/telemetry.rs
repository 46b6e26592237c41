//! OpenTelemetry integration for distributed tracing
//!
//! Spans from the scheduler and prober can be exported to an OTLP collector
//! in addition to the regular log output.

use crate::types::LogFormat;
use opentelemetry::{KeyValue, trace::TracerProvider as _};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource, runtime,
    trace::{RandomIdGenerator, Sampler, TracerProvider},
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// OpenTelemetry tracer guard
///
/// When dropped, flushes all pending spans and shuts down the tracer
pub struct TelemetryGuard {
    provider: TracerProvider,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Err(e) = self.provider.shutdown() {
            eprintln!("Failed to shut down tracer provider: {}", e);
        }
    }
}

/// Build an OTLP (gRPC) tracer provider.
///
/// Returns `None` when tracing export is disabled.
pub fn init_telemetry(
    service_name: &str,
    otlp_endpoint: &str,
    enabled: bool,
) -> Result<Option<TracerProvider>, common::Error> {
    if !enabled {
        return Ok(None);
    }

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(otlp_endpoint)
        .build()
        .map_err(common::Error::telemetry)?;

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

    opentelemetry::global::set_tracer_provider(provider.clone());
    Ok(Some(provider))
}

/// Setup tracing-subscriber, with an OpenTelemetry layer when enabled.
///
/// `RUST_LOG` overrides `log_level`. Must be called from within a Tokio
/// runtime when `enabled` is set.
pub fn setup_tracing_with_otel(
    service_name: &str,
    otlp_endpoint: &str,
    enabled: bool,
    log_level: &str,
    format: LogFormat,
) -> Result<Option<TelemetryGuard>, common::Error> {
    let Some(provider) = init_telemetry(service_name, otlp_endpoint, enabled)? else {
        match format {
            LogFormat::Text => common::logging::init(log_level),
            LogFormat::Json => common::logging::init_json(log_level),
        }
        tracing::info!("Tracing initialized without OpenTelemetry");
        return Ok(None);
    };

    let telemetry_layer =
        tracing_opentelemetry::layer().with_tracer(provider.tracer(service_name.to_string()));
    let registry = tracing_subscriber::registry()
        .with(common::logging::env_filter(log_level))
        .with(telemetry_layer);

    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }

    tracing::info!(
        service_name,
        otlp_endpoint,
        "Tracing initialized with OpenTelemetry integration"
    );

    Ok(Some(TelemetryGuard { provider }))
}
