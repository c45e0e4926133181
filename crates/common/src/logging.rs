use crate::config::Environment;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing subscriber with pretty formatting for development
/// and JSON formatting for production.
///
/// Uses RUST_LOG environment variable for filtering (defaults to "info" if not set).
///
/// The OpenTelemetry layer only exports once a global tracer provider exists;
/// binaries exporting traces use [`crate::TelemetryGuard`] instead.
pub fn setup_logging(environment: Environment) {
    init_subscriber(tracing_opentelemetry::layer(), environment);
}

pub(crate) fn init_subscriber<L>(otel_layer: L, environment: Environment)
where
    L: Layer<tracing_subscriber::Registry> + Send + Sync + 'static,
{
    let registry = tracing_subscriber::registry()
        .with(otel_layer)
        .with(env_filter());

    match environment {
        Environment::Production => {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_level(true))
                .init();
        }
        Environment::Development => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty().with_ansi(true))
                .init();
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
