//! Double-buffered latest-value exchange between one writer and many readers
//!
//! The buffer is a **latest-value cache, not a queue**: readers may observe the
//! same frame twice or skip frames entirely when they are slower than the
//! writer. This is what keeps the writer from ever waiting on a reader.
//!
//! Only one process may write a given buffer. This is a usage contract, not an
//! enforced invariant; the control header records the last writer's pid so
//! a violation can be diagnosed.

use crate::config::BusConfig;
use crate::errors::{FrameBusError, Result};
use crate::header::{BufferLayout, ControlHeader};
use crate::region::{self, SharedRegion};
use crate::types::{BufferKind, Frame, FrameDescriptor, now_ns};
use common::span_debug;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Point-in-time view of a buffer's control state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferStatus {
    pub name: String,
    pub layout: BufferLayout,
    pub generation: u64,
    pub write_index: u32,
    pub ready: bool,
    pub last_write_ns: u64,
    pub writer_pid: u32,
}

impl BufferStatus {
    /// Time since the last completed write, `None` if never written.
    pub fn age(&self) -> Option<Duration> {
        if self.generation == 0 {
            return None;
        }
        let written = UNIX_EPOCH + Duration::from_nanos(self.last_write_ns);
        Some(
            SystemTime::now()
                .duration_since(written)
                .unwrap_or(Duration::ZERO),
        )
    }
}

/// Bytes copied out of the latest completed slot.
pub(crate) struct Snapshot {
    pub data: Vec<u8>,
    pub generation: u64,
    pub timestamp_ns: u64,
}

/// Handle on one shared double buffer.
///
/// `Send + Sync`: share it between threads with an `Arc`. Closing from one
/// thread while another is blocked in [`RingBuffer::read`] is safe; the read
/// returns `Ok(None)`.
pub struct RingBuffer {
    name: String,
    layout: BufferLayout,
    shm_dir: PathBuf,
    region: RwLock<Option<SharedRegion>>,
    closed: AtomicBool,
    unlinked: AtomicBool,
}

/// Longest a blocking read sleeps before checking whether its handle closed.
const CLOSE_POLL: Duration = Duration::from_millis(50);

impl RingBuffer {
    /// Create the buffer, or reclaim segments left by an earlier run.
    pub fn register(config: &BusConfig, name: &str, descriptor: FrameDescriptor) -> Result<Self> {
        Self::register_layout(config, name, BufferLayout::frame(descriptor))
    }

    /// Attach to a buffer created elsewhere, checking its descriptor.
    pub fn attach(config: &BusConfig, name: &str, descriptor: FrameDescriptor) -> Result<Self> {
        Self::attach_layout(config, name, Some(BufferLayout::frame(descriptor)))
    }

    /// Attach to a buffer created elsewhere, adopting whatever it stores.
    pub fn attach_existing(config: &BusConfig, name: &str) -> Result<Self> {
        Self::attach_layout(config, name, None)
    }

    pub(crate) fn register_layout(
        config: &BusConfig,
        name: &str,
        layout: BufferLayout,
    ) -> Result<Self> {
        let region = SharedRegion::register(config, name, &layout)?;
        Ok(Self::from_region(config, region))
    }

    pub(crate) fn attach_layout(
        config: &BusConfig,
        name: &str,
        layout: Option<BufferLayout>,
    ) -> Result<Self> {
        let region = SharedRegion::attach(config, name, layout.as_ref())?;
        Ok(Self::from_region(config, region))
    }

    fn from_region(config: &BusConfig, region: SharedRegion) -> Self {
        Self {
            name: region.name().to_string(),
            layout: *region.layout(),
            shm_dir: config.shm_dir.clone(),
            region: RwLock::new(Some(region)),
            closed: AtomicBool::new(false),
            unlinked: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> FrameDescriptor {
        self.layout.descriptor
    }

    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    /// Publish a frame. Fails with `ShapeMismatch` if it does not match the
    /// registered descriptor.
    pub fn write(&self, frame: &Frame) -> Result<()> {
        self.write_bytes(&frame.descriptor, &frame.data)
    }

    /// Publish raw bytes laid out as `descriptor`.
    pub fn write_bytes(&self, descriptor: &FrameDescriptor, data: &[u8]) -> Result<()> {
        if self.layout.kind != BufferKind::Frame || *descriptor != self.layout.descriptor {
            return Err(FrameBusError::ShapeMismatch {
                name: self.name.clone(),
                expected: self.layout.descriptor,
                actual: *descriptor,
            });
        }
        if data.len() != descriptor.byte_len() {
            return Err(FrameBusError::InvalidShape(format!(
                "{} needs {} bytes, got {}",
                descriptor,
                descriptor.byte_len(),
                data.len()
            )));
        }
        self.publish(data)
    }

    /// Publish a variable-length payload (payload buffers only).
    pub(crate) fn write_payload(&self, data: &[u8]) -> Result<()> {
        if data.len() > self.layout.slot_size {
            return Err(FrameBusError::PayloadTooLarge {
                name: self.name.clone(),
                size: data.len(),
                capacity: self.layout.slot_size,
            });
        }
        self.publish(data)
    }

    fn publish(&self, data: &[u8]) -> Result<()> {
        let _s = span_debug!("ring_buffer_write");

        let guard = self.region();
        let region = guard
            .as_ref()
            .ok_or_else(|| FrameBusError::Closed(self.name.clone()))?;

        let _lock = region.lock()?;
        let header = region.header();

        let target = header.write_index.load(Ordering::Acquire) as usize & 1;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), region.slot_ptr(target), data.len());
        }

        header.slot_len[target].store(data.len() as u64, Ordering::Release);
        header.last_write_ns.store(now_ns(), Ordering::Release);
        header
            .writer_pid
            .store(std::process::id(), Ordering::Relaxed);
        header.generation.fetch_add(1, Ordering::AcqRel);
        header
            .write_index
            .store((1 - target) as u32, Ordering::Release);

        // Signal while still holding the lock. The doorbell is capped at 1 so
        // a writer outpacing its readers never accumulates wakeups.
        header.ready.store(1, Ordering::Release);
        let doorbell = region.ready();
        if doorbell.value()? < 1 {
            doorbell.post()?;
        }

        Ok(())
    }

    /// Wait up to `timeout` for a frame no blocking reader has consumed yet.
    ///
    /// Returns `Ok(None)` on timeout: no new frame since the last read. Among
    /// competing blocking readers each new frame is delivered to at most one.
    pub fn read(&self, timeout: Duration) -> Result<Option<Frame>> {
        Ok(self
            .read_raw(timeout)?
            .map(|snapshot| self.to_frame(snapshot)))
    }

    /// Copy the most recently completed frame without waiting.
    ///
    /// Returns `Ok(None)` only if nothing was ever written. Repeated calls
    /// without an intervening write return the same frame.
    pub fn force_read(&self) -> Result<Option<Frame>> {
        Ok(self
            .force_read_raw()?
            .map(|snapshot| self.to_frame(snapshot)))
    }

    pub(crate) fn read_raw(&self, timeout: Duration) -> Result<Option<Snapshot>> {
        let _s = span_debug!("ring_buffer_read");
        // `None` means the timeout is too long to represent: wait until closed
        let deadline = Instant::now().checked_add(timeout);

        let doorbell = {
            let guard = self.region();
            let region = guard
                .as_ref()
                .ok_or_else(|| FrameBusError::Closed(self.name.clone()))?;
            Arc::clone(region.ready())
        };

        loop {
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => Duration::MAX,
            };
            if !doorbell.wait_timeout(remaining.min(CLOSE_POLL))? {
                if remaining <= CLOSE_POLL || self.closed.load(Ordering::Acquire) {
                    return Ok(None);
                }
                continue;
            }

            let guard = self.region();
            let Some(region) = guard.as_ref() else {
                // Closed while we were waiting. The wakeup belongs to the
                // other readers of this buffer, hand it back.
                if doorbell.value()? < 1 {
                    doorbell.post()?;
                }
                return Ok(None);
            };

            let _lock = region.lock()?;
            let header = region.header();

            // Another reader may have taken this frame between our wakeup and
            // the lock; keep waiting for the rest of the timeout.
            if header.ready.swap(0, Ordering::AcqRel) == 0 {
                continue;
            }

            return Ok(copy_latest(region, header));
        }
    }

    pub(crate) fn force_read_raw(&self) -> Result<Option<Snapshot>> {
        let guard = self.region();
        let region = guard
            .as_ref()
            .ok_or_else(|| FrameBusError::Closed(self.name.clone()))?;

        let _lock = region.lock()?;
        Ok(copy_latest(region, region.header()))
    }

    fn to_frame(&self, snapshot: Snapshot) -> Frame {
        Frame {
            descriptor: self.layout.descriptor,
            data: snapshot.data,
            generation: snapshot.generation,
            timestamp_ns: snapshot.timestamp_ns,
        }
    }

    /// Completed writes so far, 0 if never written or closed.
    pub fn generation(&self) -> u64 {
        self.status().map(|s| s.generation).unwrap_or(0)
    }

    /// Wall-clock time of the last completed write.
    pub fn last_write_time(&self) -> Option<SystemTime> {
        let status = self.status()?;
        (status.generation > 0).then(|| UNIX_EPOCH + Duration::from_nanos(status.last_write_ns))
    }

    /// `true` if nothing was written within `max_age` (or ever).
    pub fn is_stale(&self, max_age: Duration) -> bool {
        match self.status().and_then(|s| s.age()) {
            Some(age) => age > max_age,
            None => true,
        }
    }

    /// Lock-free snapshot of the control state. `None` once closed.
    pub fn status(&self) -> Option<BufferStatus> {
        let guard = self.region();
        let region = guard.as_ref()?;
        let header = region.header();

        Some(BufferStatus {
            name: self.name.clone(),
            layout: self.layout,
            generation: header.generation.load(Ordering::Acquire),
            write_index: header.write_index.load(Ordering::Acquire),
            ready: header.ready.load(Ordering::Acquire) != 0,
            last_write_ns: header.last_write_ns.load(Ordering::Acquire),
            writer_pid: header.writer_pid.load(Ordering::Relaxed),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.region().is_none()
    }

    /// Release this handle's view. No-op if already closed.
    ///
    /// Blocking reads on this handle return `Ok(None)`. The shared state is
    /// left alone: other handles and processes keep their pending frame.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);

        let mut guard = self.region.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(region) = guard.take() {
            region.close();
        }
    }

    /// Close and permanently remove the shared segments.
    ///
    /// Clears the data-ready signal first so no blocking reader elsewhere is
    /// left waiting on a frame from a buffer that is going away. Idempotent:
    /// unlinking a buffer that is already gone, here or by another process,
    /// is not an error.
    pub fn unlink(&self) -> Result<()> {
        self.clear_ready();
        self.close();

        if self.unlinked.swap(true, Ordering::AcqRel) {
            tracing::debug!(buffer = %self.name, "Ring buffer already unlinked");
            return Ok(());
        }

        match region::unlink_segments(&self.shm_dir, &self.name) {
            Ok(true) => {
                tracing::debug!(buffer = %self.name, "Unlinked ring buffer");
                Ok(())
            }
            Ok(false) => {
                tracing::debug!(
                    buffer = %self.name,
                    "Ring buffer already removed by another process"
                );
                Ok(())
            }
            Err(e) => {
                self.unlinked.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    fn clear_ready(&self) {
        let guard = self.region();
        let Some(region) = guard.as_ref() else {
            return;
        };

        match region.lock() {
            Ok(_lock) => {
                region.header().ready.store(0, Ordering::Release);
                if let Err(e) = region.ready().drain() {
                    tracing::warn!(
                        buffer = %self.name,
                        error = %e,
                        "Failed to drain data-ready signal"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    buffer = %self.name,
                    error = %e,
                    "Unlinking without clearing data-ready signal"
                );
            }
        }
    }

    fn region(&self) -> RwLockReadGuard<'_, Option<SharedRegion>> {
        self.region.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Copy out the last completed slot. Caller holds the buffer lock.
fn copy_latest(region: &SharedRegion, header: &ControlHeader) -> Option<Snapshot> {
    let generation = header.generation.load(Ordering::Acquire);
    if generation == 0 {
        return None;
    }

    let slot = header.latest_slot();
    let len = (header.slot_len[slot].load(Ordering::Acquire) as usize)
        .min(region.layout().slot_size);

    let mut data = vec![0u8; len];
    unsafe {
        std::ptr::copy_nonoverlapping(region.slot_ptr(slot), data.as_mut_ptr(), len);
    }

    Some(Snapshot {
        data,
        generation,
        timestamp_ns: header.last_write_ns.load(Ordering::Acquire),
    })
}
