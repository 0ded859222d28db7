//! Log subscriber and OpenTelemetry tracing setup

use opentelemetry::{trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    runtime,
    trace::{RandomIdGenerator, Sampler, Tracer, TracerProvider},
    Resource,
};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::{LogFormat, LoggingConfig, TelemetryConfig};

const SERVICE_NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize logging with optional OpenTelemetry export
///
/// `RUST_LOG` overrides the configured level when set.
pub fn init_tracing(logging_config: &LoggingConfig, telemetry: &TelemetryConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging_config.level));

    let (tracer, otel_error) = match telemetry.otlp_endpoint.as_deref() {
        Some(endpoint) => match init_otel_tracer(endpoint, telemetry.sampling_ratio) {
            Ok(tracer) => (Some(tracer), None),
            Err(e) => (None, Some(e)),
        },
        None => (None, None),
    };

    let exporting = tracer.is_some();
    let telemetry_layer = tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(telemetry_layer);

    match logging_config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .init(),
    }

    if let Some(e) = otel_error {
        tracing::warn!(
            "Failed to initialize OpenTelemetry: {}. Tracing export disabled.",
            e
        );
    } else if exporting {
        tracing::info!(
            endpoint = telemetry.otlp_endpoint.as_deref().unwrap_or_default(),
            "Tracing initialized with OpenTelemetry export"
        );
    }

    tracing::info!(level = %logging_config.level, "Logging initialized");
}

fn init_otel_tracer(
    endpoint: &str,
    sampling_ratio: f64,
) -> Result<Tracer, opentelemetry::trace::TraceError> {
    let resource = Resource::new(vec![KeyValue::new("service.name", SERVICE_NAME)]);

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = TracerProvider::builder()
        .with_sampler(sampler_for(sampling_ratio))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .with_batch_exporter(exporter, runtime::Tokio)
        .build();

    let tracer = provider.tracer(SERVICE_NAME);
    opentelemetry::global::set_tracer_provider(provider);

    Ok(tracer)
}

fn sampler_for(ratio: f64) -> Sampler {
    if ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(ratio)
    }
}

/// Shutdown tracing and flush pending spans
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
    tracing::info!("Tracing shutdown complete");
}
