use anyhow::{Context, Result};
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, Resource};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

static OTLP_EXPORTER_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Telemetry configuration structure
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: String,
    pub environment: String,
    pub otlp_endpoint: Option<String>,
    pub enable_tracing: bool,
    pub export_timeout: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: env!("CARGO_PKG_NAME").to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            enable_tracing: std::env::var("OTEL_TRACES_ENABLED")
                .map(|v| v.parse().unwrap_or(true))
                .unwrap_or(true),
            export_timeout: Duration::from_secs(30),
        }
    }
}

/// Telemetry handles for graceful shutdown
pub struct TelemetryHandles {
    _config: TelemetryConfig,
}

impl TelemetryHandles {
    /// Flush pending spans and shut the providers down.
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down telemetry providers...");
        global::shutdown_tracer_provider();
        info!("Telemetry providers shutdown completed");
        Ok(())
    }
}

/// Install the log subscriber and, when an OTLP endpoint is configured, the trace exporter.
pub async fn init_telemetry(config: Option<TelemetryConfig>) -> Result<TelemetryHandles> {
    let config = config.unwrap_or_default();

    setup_tracing_subscriber(&config)?;

    info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = %config.environment,
        "Initializing telemetry"
    );

    if config.enable_tracing {
        let resource = create_resource(&config);
        init_tracing(&config, &resource)?;
    }

    Ok(TelemetryHandles { _config: config })
}

fn create_resource(config: &TelemetryConfig) -> Resource {
    Resource::new(vec![
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.version", config.service_version.clone()),
        KeyValue::new("deployment.environment", config.environment.clone()),
    ])
}

fn init_tracing(config: &TelemetryConfig, resource: &Resource) -> Result<()> {
    let Some(endpoint) = &config.otlp_endpoint else {
        info!("No OTLP endpoint configured, using console-only tracing");
        return Ok(());
    };

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_timeout(config.export_timeout),
        )
        .with_trace_config(
            opentelemetry_sdk::trace::config()
                .with_resource(resource.clone())
                .with_sampler(opentelemetry_sdk::trace::Sampler::AlwaysOn),
        )
        .install_batch(runtime::Tokio)
        .context("Failed to initialize OTLP tracer")?;

    OTLP_EXPORTER_INSTALLED.store(true, Ordering::Relaxed);
    info!(endpoint = %endpoint, "Distributed tracing initialized with OTLP exporter");
    Ok(())
}

fn setup_tracing_subscriber(_config: &TelemetryConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("{}=debug", env!("CARGO_CRATE_NAME")).into());

    Registry::default()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}

/// Get a meter for the named component. Measurements are emitted as debug
/// log events until a metrics exporter is wired in.
pub fn get_meter(name: &str) -> LogMeter {
    LogMeter { name: name.to_string() }
}

#[derive(Debug)]
pub struct LogMeter {
    name: String,
}

impl LogMeter {
    pub fn u64_counter(&self, name: &str) -> LogCounter {
        LogCounter {
            meter: self.name.clone(),
            name: name.to_string(),
            total: AtomicU64::new(0),
        }
    }

    pub fn f64_histogram(&self, name: &str) -> LogHistogram {
        LogHistogram {
            meter: self.name.clone(),
            name: name.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct LogCounter {
    meter: String,
    name: String,
    total: AtomicU64,
}

impl LogCounter {
    pub fn add(&self, value: u64, attributes: &[KeyValue]) {
        self.total.fetch_add(value, Ordering::Relaxed);
        tracing::debug!(
            meter = %self.meter,
            counter = %self.name,
            value,
            attributes = ?attributes,
            "Counter incremented"
        );
    }

    /// Sum of every value added since the counter was created.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct LogHistogram {
    meter: String,
    name: String,
}

impl LogHistogram {
    pub fn record(&self, value: f64, attributes: &[KeyValue]) {
        tracing::debug!(
            meter = %self.meter,
            histogram = %self.name,
            value,
            attributes = ?attributes,
            "Histogram recorded"
        );
    }
}

/// Health check for telemetry components
pub fn telemetry_health_check() -> HashMap<String, bool> {
    let mut health = HashMap::new();
    health.insert("log_subscriber".to_string(), true);
    health.insert(
        "otlp_exporter".to_string(),
        OTLP_EXPORTER_INSTALLED.load(Ordering::Relaxed),
    );
    health
}
