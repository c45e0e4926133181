use crate::paths::DEFAULT_SHM_DIR;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings shared by every buffer a process opens.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Directory holding the shared memory segments
    pub shm_dir: PathBuf,
    /// Longest time to wait for a buffer's cross-process lock
    pub lock_timeout: Duration,
    /// Age after which a buffer without writes is considered stale
    pub stale_after: Duration,
    /// Slot bytes reserved per tracked object in metadata channels
    pub metadata_bytes_per_object: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            shm_dir: PathBuf::from(DEFAULT_SHM_DIR),
            lock_timeout: Duration::from_millis(1000),
            stale_after: Duration::from_millis(5000),
            metadata_bytes_per_object: 256,
        }
    }
}

impl BusConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let shm_dir = env::var("FRAMEBUS_SHM_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.shm_dir);

        let lock_timeout = env::var("FRAMEBUS_LOCK_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.lock_timeout);

        let stale_after = env::var("FRAMEBUS_STALE_AFTER_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.stale_after);

        let metadata_bytes_per_object = env::var("FRAMEBUS_METADATA_BYTES_PER_OBJECT")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&n: &usize| n > 0)
            .unwrap_or(defaults.metadata_bytes_per_object);

        Self {
            shm_dir,
            lock_timeout,
            stale_after,
            metadata_bytes_per_object,
        }
    }

    /// Same settings with segments placed in `shm_dir` (useful for tests)
    pub fn with_shm_dir(mut self, shm_dir: impl Into<PathBuf>) -> Self {
        self.shm_dir = shm_dir.into();
        self
    }
}
