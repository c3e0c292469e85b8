use std::time::Duration;

use opentelemetry::{KeyValue, global};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{self, Protocol, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::util::config::Config;

pub type Result<T> = core::result::Result<T, Box<dyn std::error::Error>>;

const DEFAULT_FILTER: &str = "rather_server=debug,tower_http=debug,axum=debug,info";

/// OTLP exporters, present only when a collector endpoint is configured
#[derive(Debug, Clone)]
struct Exporters {
    tracer_name: String,
    logger_provider: SdkLoggerProvider,
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

#[derive(Debug, Clone)]
pub struct Telemetry {
    exporters: Option<Exporters>,
}

impl Telemetry {
    pub fn new(config: &Config) -> Result<Telemetry> {
        let Some(collector_url) = config.otel_exporter_otlp_endpoint.as_deref() else {
            return Ok(Self { exporters: None });
        };

        let base_resource = base_attrs(&config.api_service_name, env!("CARGO_PKG_VERSION"));

        Ok(Self {
            exporters: Some(Exporters {
                tracer_name: config.api_tracer_name.clone(),
                logger_provider: build_logger_provider(collector_url, base_resource.clone())?,
                meter_provider: build_meter_provider(collector_url, base_resource.clone())?,
                tracer_provider: build_tracer_provider(collector_url, base_resource)?,
            }),
        })
    }

    /// Installs the global subscriber. Console output is always enabled; OTLP layers are added
    /// on top when exporters were built.
    pub fn register(self) -> Self {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        match &self.exporters {
            Some(exporters) => {
                global::set_tracer_provider(exporters.tracer_provider.clone());
                let tracer = global::tracer(exporters.tracer_name.clone());
                let trace_layer = tracing_opentelemetry::layer().with_tracer(tracer);

                let log_layer = OpenTelemetryTracingBridge::new(&exporters.logger_provider);
                let meter_layer =
                    tracing_opentelemetry::MetricsLayer::new(exporters.meter_provider.clone());

                tracing_subscriber::registry()
                    .with(trace_layer)
                    .with(log_layer)
                    .with(meter_layer)
                    .with(filter)
                    .with(console_layer())
                    .init();
            }
            None => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(console_layer())
                    .init();
            }
        }

        self
    }

    pub fn shutdown(self) {
        let Some(exporters) = self.exporters else {
            return;
        };

        if let Err(e) = exporters.meter_provider.shutdown() {
            eprintln!("error during metering shutdown: {e:?}");
        }

        if let Err(e) = exporters.logger_provider.shutdown() {
            eprintln!("error during logging shutdown: {e:?}");
        }

        if let Err(e) = exporters.tracer_provider.shutdown() {
            eprintln!("error during tracing shutdown: {e:?}");
        }
    }
}

/// Console output; generic over the stack it lands on, which differs with and without OTLP
fn console_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
}

fn build_logger_provider(collector_url: &str, base_resource: Resource) -> Result<SdkLoggerProvider> {
    let exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(Endpoint::Logs.to_url(collector_url))
        .with_timeout(Duration::from_secs(5))
        .build()?;

    Ok(SdkLoggerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(base_resource)
        .build())
}

fn build_tracer_provider(collector_url: &str, base_resource: Resource) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(Endpoint::Traces.to_url(collector_url))
        .with_timeout(Duration::from_secs(5))
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(base_resource)
        .build())
}

fn build_meter_provider(collector_url: &str, base_resource: Resource) -> Result<SdkMeterProvider> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(Endpoint::Metrics.to_url(collector_url))
        .with_timeout(Duration::from_secs(5))
        .build()?;

    Ok(SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .with_resource(base_resource)
        .build())
}

fn base_attrs(name: &str, version: &'static str) -> Resource {
    Resource::builder()
        .with_attributes([
            KeyValue::new("service.name", name.to_string()),
            KeyValue::new("service.version", version),
        ])
        .build()
}

enum Endpoint {
    Logs,
    Traces,
    Metrics,
}

impl Endpoint {
    fn to_url(&self, collector_endpoint: &str) -> String {
        let location = match self {
            Endpoint::Logs => "/v1/logs",
            Endpoint::Traces => "/v1/traces",
            Endpoint::Metrics => "/v1/metrics",
        };

        format!("{}{location}", collector_endpoint.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_endpoint_urls() {
        assert_eq!(
            Endpoint::Traces.to_url("http://collector:4317/"),
            "http://collector:4317/v1/traces"
        );
        assert_eq!(
            Endpoint::Metrics.to_url("http://collector:4317"),
            "http://collector:4317/v1/metrics"
        );
    }

    #[test]
    fn test_disabled_without_endpoint() {
        let config = crate::util::config::test_config("http://localhost:54321");
        let telemetry = Telemetry::new(&config).unwrap();
        assert!(telemetry.exporters.is_none());
    }

    #[test]
    fn test_register_console_only() {
        let config = crate::util::config::test_config("http://localhost:54321");
        let telemetry = Telemetry::new(&config).unwrap().register();

        tracing::info!("console subscriber installed");
        assert!(tracing::dispatcher::has_been_set());

        telemetry.shutdown();
    }
}
