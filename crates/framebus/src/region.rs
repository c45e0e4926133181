//! Shared region allocator
//!
//! Creates, attaches and destroys the OS objects behind one buffer: a control
//! segment, two data slots and two named semaphores. See [`crate::paths`] for
//! the naming scheme and [`crate::header`] for the control layout.

use crate::config::BusConfig;
use crate::errors::{FrameBusError, Result};
use crate::header::{BufferLayout, ControlHeader};
use crate::paths;
use crate::semaphore::{Semaphore, SemaphoreError, SemaphoreGuard};
use memmap2::MmapRaw;
use nix::errno::Errno;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SEGMENT_MODE: u32 = 0o600;

/// How long an unpublished control segment is given to finish initializing
/// before it is treated as a crash leftover.
const INIT_GRACE: Duration = Duration::from_millis(500);
const INIT_POLL: Duration = Duration::from_millis(10);

/// One process's view of a shared buffer.
///
/// Dropping the region closes this view (unmaps segments, closes semaphores)
/// without touching other processes. Destruction of the OS objects only
/// happens through [`unlink_segments`].
pub struct SharedRegion {
    name: String,
    layout: BufferLayout,
    ctrl: MmapRaw,
    slots: [MmapRaw; 2],
    lock: Semaphore,
    ready: Arc<Semaphore>,
    lock_timeout: Duration,
}

impl SharedRegion {
    /// Create a brand new buffer. Fails with `AlreadyExists` if the control
    /// segment is already present.
    pub fn create(config: &BusConfig, name: &str, layout: &BufferLayout) -> Result<Self> {
        paths::validate_name(name)?;

        let ctrl_path = paths::ctrl_path(&config.shm_dir, name);
        let ctrl_file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(SEGMENT_MODE)
            .open(&ctrl_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(FrameBusError::AlreadyExists(name.to_string()));
            }
            Err(e) => return Err(allocation_error(name, e)),
        };

        match Self::initialize(config, name, layout, &ctrl_file) {
            Ok(region) => {
                tracing::debug!(
                    buffer = name,
                    descriptor = %layout.descriptor,
                    slot_size = layout.slot_size,
                    "Created shared buffer"
                );
                Ok(region)
            }
            Err(e) => {
                // Leave nothing half-built behind for the next attempt
                if let Err(cleanup) = unlink_segments(&config.shm_dir, name) {
                    tracing::warn!(
                        buffer = name,
                        error = %cleanup,
                        "Failed to remove partial buffer"
                    );
                }
                Err(e)
            }
        }
    }

    fn initialize(
        config: &BusConfig,
        name: &str,
        layout: &BufferLayout,
        ctrl_file: &File,
    ) -> Result<Self> {
        ctrl_file
            .set_len(ControlHeader::SIZE as u64)
            .map_err(|e| allocation_error(name, e))?;

        let slots = [
            create_slot(config, name, 0, layout.slot_size)?,
            create_slot(config, name, 1, layout.slot_size)?,
        ];

        // Stale semaphores from a crashed run may be stuck at 0; start clean.
        let lock_name = paths::lock_semaphore(name);
        let ready_name = paths::ready_semaphore(name);
        Semaphore::unlink(&lock_name)?;
        Semaphore::unlink(&ready_name)?;
        let lock = Semaphore::create(&lock_name, 1)?;
        let ready = Semaphore::create(&ready_name, 0)?;

        let ctrl = MmapRaw::map_raw(ctrl_file).map_err(|e| allocation_error(name, e))?;
        unsafe { ControlHeader::initialize(ctrl.as_mut_ptr() as *mut ControlHeader, layout) };

        Ok(Self {
            name: name.to_string(),
            layout: *layout,
            ctrl,
            slots,
            lock,
            ready: Arc::new(ready),
            lock_timeout: config.lock_timeout,
        })
    }

    /// Attach to a buffer created by another process (or an earlier run).
    ///
    /// With `expected = Some(..)` the stored layout must match it, otherwise
    /// `ShapeMismatch`. With `None` the stored layout is adopted.
    pub fn attach(
        config: &BusConfig,
        name: &str,
        expected: Option<&BufferLayout>,
    ) -> Result<Self> {
        paths::validate_name(name)?;

        let ctrl_file = open_segment(name, &paths::ctrl_path(&config.shm_dir, name))?;
        if ctrl_file.metadata()?.len() < ControlHeader::SIZE as u64 {
            return Err(FrameBusError::NotFound(name.to_string()));
        }
        let ctrl = MmapRaw::map_raw(&ctrl_file)?;
        let header = unsafe { &*(ctrl.as_ptr() as *const ControlHeader) };

        let stored = header
            .layout()
            .ok_or_else(|| FrameBusError::NotFound(name.to_string()))?;

        if let Some(expected) = expected
            && (expected.kind != stored.kind
                || expected.descriptor != stored.descriptor
                || expected.slot_size != stored.slot_size)
        {
            return Err(FrameBusError::ShapeMismatch {
                name: name.to_string(),
                expected: expected.descriptor,
                actual: stored.descriptor,
            });
        }

        let slots = [
            attach_slot(config, name, 0, stored.slot_size)?,
            attach_slot(config, name, 1, stored.slot_size)?,
        ];

        let lock = open_semaphore(name, &paths::lock_semaphore(name))?;
        let ready = open_semaphore(name, &paths::ready_semaphore(name))?;

        tracing::debug!(
            buffer = name,
            descriptor = %stored.descriptor,
            "Attached to shared buffer"
        );

        Ok(Self {
            name: name.to_string(),
            layout: stored,
            ctrl,
            slots,
            lock,
            ready: Arc::new(ready),
            lock_timeout: config.lock_timeout,
        })
    }

    /// Attach if the buffer exists, create it otherwise.
    ///
    /// Leftover segments from a previous run are reclaimed with their last
    /// frame intact. Segments another process is still initializing are
    /// waited for; a leftover that stays unpublished past a short grace
    /// period is rebuilt.
    pub fn register(config: &BusConfig, name: &str, layout: &BufferLayout) -> Result<Self> {
        let grace = Instant::now() + INIT_GRACE;

        loop {
            match Self::create(config, name, layout) {
                Err(FrameBusError::AlreadyExists(_)) => {}
                other => return other,
            }

            match Self::attach(config, name, Some(layout)) {
                Ok(region) => {
                    tracing::info!(buffer = name, "Reclaimed existing shared buffer");
                    return Ok(region);
                }
                Err(FrameBusError::NotFound(_)) if Instant::now() < grace => {
                    thread::sleep(INIT_POLL);
                }
                Err(FrameBusError::NotFound(_)) => {
                    tracing::warn!(
                        buffer = name,
                        "Found incomplete shared buffer segments, recreating"
                    );
                    unlink_segments(&config.shm_dir, name)?;
                    return Self::create(config, name, layout);
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    pub fn header(&self) -> &ControlHeader {
        unsafe { &*(self.ctrl.as_ptr() as *const ControlHeader) }
    }

    /// Raw pointer to the start of slot `index` (0 or 1).
    ///
    /// Reads and writes through it must happen while holding [`Self::lock`].
    pub(crate) fn slot_ptr(&self, index: usize) -> *mut u8 {
        self.slots[index & 1].as_mut_ptr()
    }

    pub(crate) fn ready(&self) -> &Arc<Semaphore> {
        &self.ready
    }

    /// Acquire the cross-process lock, failing with `LockTimeout` after the
    /// configured timeout.
    pub(crate) fn lock(&self) -> Result<SemaphoreGuard<'_>> {
        self.lock
            .lock(self.lock_timeout)?
            .ok_or_else(|| FrameBusError::LockTimeout {
                name: self.name.clone(),
                timeout: self.lock_timeout,
            })
    }

    /// Release this process's view.
    pub fn close(self) {
        tracing::debug!(buffer = %self.name, "Closed shared buffer");
    }
}

/// Remove every OS object of buffer `name`.
///
/// Objects that are already gone are skipped. Returns `true` if anything was
/// actually removed. Processes still attached keep their mappings until they
/// close.
pub fn unlink_segments(shm_dir: &Path, name: &str) -> Result<bool> {
    paths::validate_name(name)?;

    let mut removed = false;
    let files: [PathBuf; 3] = [
        paths::ctrl_path(shm_dir, name),
        paths::slot_path(shm_dir, name, 0),
        paths::slot_path(shm_dir, name, 1),
    ];
    for path in &files {
        match fs::remove_file(path) {
            Ok(()) => removed = true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    removed |= Semaphore::unlink(&paths::lock_semaphore(name))?;
    removed |= Semaphore::unlink(&paths::ready_semaphore(name))?;

    if removed {
        tracing::debug!(buffer = name, "Unlinked shared buffer");
    } else {
        tracing::debug!(buffer = name, "Shared buffer already unlinked");
    }

    Ok(removed)
}

fn create_slot(config: &BusConfig, name: &str, slot: usize, size: usize) -> Result<MmapRaw> {
    let path = paths::slot_path(&config.shm_dir, name, slot);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(SEGMENT_MODE)
        .open(&path)
        .map_err(|e| allocation_error(name, e))?;

    if file.metadata()?.len() != size as u64 {
        file.set_len(size as u64)
            .map_err(|e| allocation_error(name, e))?;
    }

    MmapRaw::map_raw(&file).map_err(|e| allocation_error(name, e))
}

fn attach_slot(config: &BusConfig, name: &str, slot: usize, size: usize) -> Result<MmapRaw> {
    let file = open_segment(name, &paths::slot_path(&config.shm_dir, name, slot))?;
    if file.metadata()?.len() < size as u64 {
        return Err(FrameBusError::NotFound(name.to_string()));
    }
    Ok(MmapRaw::map_raw(&file)?)
}

fn open_segment(name: &str, path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => FrameBusError::NotFound(name.to_string()),
            _ => FrameBusError::Io(e),
        })
}

fn open_semaphore(name: &str, sem_name: &str) -> Result<Semaphore> {
    Semaphore::open(sem_name).map_err(|e| match e {
        SemaphoreError::Failed {
            errno: Errno::ENOENT,
            ..
        } => FrameBusError::NotFound(name.to_string()),
        other => other.into(),
    })
}

fn allocation_error(name: &str, source: io::Error) -> FrameBusError {
    FrameBusError::AllocationError {
        name: name.to_string(),
        source,
    }
}
