use crate::config::BusConfig;
use crate::errors::{FrameBusError, Result};
use crate::registry::{Registry, Teardown};
use crate::ring_buffer::RingBuffer;
use crate::types::{BufferKind, Frame, FrameDescriptor};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

impl Teardown for RingBuffer {
    fn close(&self) {
        RingBuffer::close(self);
    }

    fn unlink(&self) -> Result<()> {
        RingBuffer::unlink(self)
    }
}

/// Per-process table of frame buffers, keyed by stream name.
///
/// Create one per process and hand it to the workers that need it:
///
/// ```no_run
/// use framebus::{BusConfig, DType, Frame, FrameDescriptor, FrameManager};
/// use std::time::Duration;
///
/// # fn main() -> framebus::Result<()> {
/// let frames = FrameManager::new(BusConfig::from_env());
/// frames.register_frame("camera_raw", FrameDescriptor::new(&[480, 640, 3], DType::U8)?)?;
///
/// let frame = Frame::from_pixels(&[480, 640, 3], vec![0; 480 * 640 * 3])?;
/// frames.write_frame("camera_raw", &frame)?;
///
/// let latest = frames.force_read_frame("camera_raw")?;
/// let next = frames.read_frame("camera_raw", Duration::from_millis(100))?;
/// # let _ = (latest, next);
/// frames.cleanup_all();
/// # Ok(())
/// # }
/// ```
pub struct FrameManager {
    config: BusConfig,
    buffers: Registry<RingBuffer>,
}

impl FrameManager {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            buffers: Registry::new("frame"),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Register a stream for writing.
    ///
    /// Registering a name this manager already holds returns the existing
    /// buffer if the descriptor matches and fails with `ShapeMismatch`
    /// otherwise.
    pub fn register_frame(
        &self,
        name: &str,
        descriptor: FrameDescriptor,
    ) -> Result<Arc<RingBuffer>> {
        self.buffers.get_or_insert_with(
            name,
            |existing| ensure_descriptor(existing, &descriptor),
            || {
                let ring = RingBuffer::register(&self.config, name, descriptor)?;
                tracing::info!(buffer = name, descriptor = %descriptor, "Registered frame buffer");
                Ok(ring)
            },
        )
    }

    /// Attach to a stream registered by another process.
    pub fn attach_frame(&self, name: &str, descriptor: FrameDescriptor) -> Result<Arc<RingBuffer>> {
        self.buffers.get_or_insert_with(
            name,
            |existing| ensure_descriptor(existing, &descriptor),
            || {
                let ring = RingBuffer::attach(&self.config, name, descriptor)?;
                tracing::info!(buffer = name, descriptor = %descriptor, "Attached to frame buffer");
                Ok(ring)
            },
        )
    }

    /// Handle for a registered stream.
    pub fn buffer(&self, name: &str) -> Result<Arc<RingBuffer>> {
        self.buffers.require(name)
    }

    pub fn write_frame(&self, name: &str, frame: &Frame) -> Result<()> {
        self.buffers.require(name)?.write(frame)
    }

    /// Wait up to `timeout` for a new frame. `Ok(None)` on timeout.
    pub fn read_frame(&self, name: &str, timeout: Duration) -> Result<Option<Frame>> {
        self.buffers.require(name)?.read(timeout)
    }

    /// Latest frame without waiting.
    ///
    /// A stream this manager does not hold yet is attached on the fly, taking
    /// its descriptor from the shared control header. Fails with
    /// `NotRegistered` if no process has created it.
    pub fn force_read_frame(&self, name: &str) -> Result<Option<Frame>> {
        let ring = match self.buffers.get(name) {
            Some(ring) => ring,
            None => self.auto_attach(name)?,
        };
        ring.force_read()
    }

    /// [`Self::read_frame`] on tokio's blocking pool.
    #[cfg(feature = "tokio")]
    pub async fn read_frame_async(&self, name: &str, timeout: Duration) -> Result<Option<Frame>> {
        let ring = self.buffers.require(name)?;
        tokio::task::spawn_blocking(move || ring.read(timeout))
            .await
            .map_err(|e| FrameBusError::Io(std::io::Error::other(e)))?
    }

    fn auto_attach(&self, name: &str) -> Result<Arc<RingBuffer>> {
        self.buffers.get_or_insert_with(
            name,
            |_| Ok(()),
            || match RingBuffer::attach_existing(&self.config, name) {
                Ok(ring) if ring.layout().kind == BufferKind::Frame => {
                    tracing::info!(
                        buffer = name,
                        descriptor = %ring.descriptor(),
                        "Auto-attached to frame buffer"
                    );
                    Ok(ring)
                }
                Ok(_) | Err(FrameBusError::NotFound(_)) => {
                    Err(FrameBusError::NotRegistered(name.to_string()))
                }
                Err(e) => Err(e),
            },
        )
    }

    /// Wall-clock time of the stream's last write, `None` if never written.
    pub fn frame_update_time(&self, name: &str) -> Result<Option<SystemTime>> {
        Ok(self.buffers.require(name)?.last_write_time())
    }

    pub fn is_frame_stale(&self, name: &str, max_age: Duration) -> Result<bool> {
        Ok(self.buffers.require(name)?.is_stale(max_age))
    }

    /// Drop streams that saw no write within `max_age` from this manager.
    ///
    /// Their handles are closed, not unlinked: the writer may come back.
    /// Returns the names that were dropped.
    pub fn cleanup_stale_frames(&self, max_age: Duration) -> Vec<String> {
        let mut dropped = Vec::new();

        for name in self.buffers.names() {
            let stale = self
                .buffers
                .get(&name)
                .is_some_and(|ring| ring.is_stale(max_age));
            if !stale {
                continue;
            }
            if let Some(ring) = self.buffers.remove(&name) {
                ring.close();
                tracing::info!(buffer = %name, "Dropped stale frame buffer");
                dropped.push(name);
            }
        }

        dropped
    }

    pub fn names(&self) -> Vec<String> {
        self.buffers.names()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every buffer without removing the shared segments.
    pub fn close_all(&self) {
        self.buffers.close_all();
    }

    /// Unlink every buffer. Returns the number of failures.
    pub fn cleanup_all(&self) -> usize {
        self.buffers.cleanup_all()
    }
}

fn ensure_descriptor(existing: &RingBuffer, requested: &FrameDescriptor) -> Result<()> {
    if existing.layout().kind == BufferKind::Frame && existing.descriptor() == *requested {
        Ok(())
    } else {
        Err(FrameBusError::ShapeMismatch {
            name: existing.name().to_string(),
            expected: existing.descriptor(),
            actual: *requested,
        })
    }
}
