use std::env;
use std::path::PathBuf;

pub use common::Environment;
use framebus::BusConfig;

#[derive(Debug, Clone)]
pub struct BusctlConfig {
    pub environment: Environment,
    /// OTLP collector; telemetry export is off when unset
    pub otel_endpoint: Option<String>,
    pub bus: BusConfig,
}

impl BusctlConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = Environment::from_env();

        let otel_endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .filter(|s| !s.is_empty());

        Ok(Self {
            environment,
            otel_endpoint,
            bus: BusConfig::from_env(),
        })
    }

    /// Command-line `--shm-dir` wins over `FRAMEBUS_SHM_DIR`.
    pub fn with_shm_dir(mut self, shm_dir: Option<PathBuf>) -> Self {
        if let Some(dir) = shm_dir {
            self.bus = self.bus.with_shm_dir(dir);
        }
        self
    }
}
