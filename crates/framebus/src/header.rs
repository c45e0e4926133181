use crate::types::{BufferKind, DType, FrameDescriptor, MAX_DIMS};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

pub const MAGIC: u64 = u64::from_le_bytes(*b"FRAMEBUS");
pub const VERSION: u32 = 1;

/// SAFETY & MEMORY ORDERING:
///
/// This header is the control segment shared by every process attached to a
/// buffer. It lives in its own mmap, separate from the two data slots.
///
/// Creation protocol:
/// 1. The creator owns the freshly created file exclusively
/// 2. It writes the static layout fields and zeroes the mutable state
/// 3. It publishes `magic` with `Ordering::Release`
///
/// Attach protocol:
/// 1. Load `magic` with `Ordering::Acquire`
/// 2. Only if it matches, read the static layout fields
///
/// The mutable fields (`write_index`, `ready`, `generation`, `slot_len`, ...)
/// are only modified while holding the buffer's lock semaphore. They are still
/// atomics so that lock-free introspection (`generation()`, staleness checks)
/// never races with a writer.
///
/// Alignment:
/// `#[repr(C, align(8))]` keeps every AtomicU64 8-byte aligned.
#[repr(C, align(8))]
pub struct ControlHeader {
    pub magic: AtomicU64,
    pub version: u32,
    pub kind: u32,
    pub dtype: u32,
    pub ndim: u32,
    pub dims: [u64; MAX_DIMS],
    pub slot_size: u64,
    /// Slot the next write targets. The last completed frame is in `1 - write_index`.
    pub write_index: AtomicU32,
    /// Data-ready flag: 1 when a write completed that no blocking read consumed yet
    pub ready: AtomicU32,
    /// Completed writes. 0 means nothing was ever written.
    pub generation: AtomicU64,
    pub last_write_ns: AtomicU64,
    /// Pid of the last writer, for diagnostics only
    pub writer_pid: AtomicU32,
    _reserved: u32,
    /// Bytes of payload held by each slot
    pub slot_len: [AtomicU64; 2],
}

/// Static description of a buffer stored in its control header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    pub kind: BufferKind,
    pub descriptor: FrameDescriptor,
    pub slot_size: usize,
}

impl BufferLayout {
    /// Fixed-size frames: each slot holds exactly one frame.
    pub fn frame(descriptor: FrameDescriptor) -> Self {
        Self {
            kind: BufferKind::Frame,
            descriptor,
            slot_size: descriptor.byte_len(),
        }
    }

    /// Variable-length payloads up to `capacity` bytes.
    pub fn payload(descriptor: FrameDescriptor) -> Self {
        Self {
            kind: BufferKind::Payload,
            descriptor,
            slot_size: descriptor.byte_len(),
        }
    }
}

impl ControlHeader {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Write a fresh header and publish it.
    ///
    /// # Safety
    ///
    /// `ptr` must point to at least `SIZE` writable, 8-byte aligned bytes that
    /// no other process treats as a published header yet.
    pub unsafe fn initialize(ptr: *mut ControlHeader, layout: &BufferLayout) {
        let dims = layout.descriptor.shape.dims();
        let mut stored_dims = [0u64; MAX_DIMS];
        for (slot, dim) in stored_dims.iter_mut().zip(dims) {
            *slot = *dim as u64;
        }

        unsafe {
            // Unpublish first in case this is a reinitialized leftover
            (*ptr).magic.store(0, Ordering::Release);

            std::ptr::addr_of_mut!((*ptr).version).write(VERSION);
            std::ptr::addr_of_mut!((*ptr).kind).write(layout.kind as u32);
            std::ptr::addr_of_mut!((*ptr).dtype).write(layout.descriptor.dtype.code());
            std::ptr::addr_of_mut!((*ptr).ndim).write(dims.len() as u32);
            std::ptr::addr_of_mut!((*ptr).dims).write(stored_dims);
            std::ptr::addr_of_mut!((*ptr).slot_size).write(layout.slot_size as u64);
            std::ptr::addr_of_mut!((*ptr)._reserved).write(0);

            let header = &*ptr;
            header.write_index.store(0, Ordering::Relaxed);
            header.ready.store(0, Ordering::Relaxed);
            header.generation.store(0, Ordering::Relaxed);
            header.last_write_ns.store(0, Ordering::Relaxed);
            header.writer_pid.store(0, Ordering::Relaxed);
            header.slot_len[0].store(0, Ordering::Relaxed);
            header.slot_len[1].store(0, Ordering::Relaxed);

            header.magic.store(MAGIC, Ordering::Release);
        }
    }

    pub fn is_published(&self) -> bool {
        self.magic.load(Ordering::Acquire) == MAGIC && self.version == VERSION
    }

    /// Decode the static layout. `None` if the header is unpublished or corrupt.
    pub fn layout(&self) -> Option<BufferLayout> {
        if !self.is_published() {
            return None;
        }

        let kind = BufferKind::from_u32(self.kind)?;
        let dtype = DType::from_code(self.dtype)?;
        let ndim = self.ndim as usize;
        if ndim == 0 || ndim > MAX_DIMS {
            return None;
        }
        let dims: Vec<usize> = self.dims[..ndim].iter().map(|&d| d as usize).collect();
        let descriptor = FrameDescriptor::new(&dims, dtype).ok()?;

        // Every write may fill a whole descriptor's worth of bytes
        let slot_size = usize::try_from(self.slot_size).ok()?;
        if slot_size < descriptor.byte_len() {
            return None;
        }

        Some(BufferLayout {
            kind,
            descriptor,
            slot_size,
        })
    }

    /// Slot holding the most recently completed write.
    pub fn latest_slot(&self) -> usize {
        1 - (self.write_index.load(Ordering::Acquire) as usize & 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::MaybeUninit;

    #[test]
    fn test_header_alignment() {
        assert_eq!(
            std::mem::align_of::<ControlHeader>(),
            8,
            "Header must be 8-byte aligned for AtomicU64"
        );
    }

    #[test]
    fn test_header_size() {
        assert_eq!(ControlHeader::SIZE, 112, "Header layout changed size");
    }

    #[test]
    fn test_initialize_publishes_layout() {
        let mut storage = MaybeUninit::<ControlHeader>::zeroed();
        let layout =
            BufferLayout::frame(FrameDescriptor::new(&[480, 640, 3], DType::U8).unwrap());

        let header = unsafe {
            assert!(!(*storage.as_ptr()).is_published());
            ControlHeader::initialize(storage.as_mut_ptr(), &layout);
            storage.assume_init_ref()
        };

        assert!(header.is_published());
        assert_eq!(header.layout(), Some(layout));
        assert_eq!(header.generation.load(Ordering::Acquire), 0);
        assert_eq!(header.latest_slot(), 1);
    }

    #[test]
    fn test_corrupt_header_has_no_layout() {
        let mut storage = MaybeUninit::<ControlHeader>::zeroed();
        let layout = BufferLayout::payload(FrameDescriptor::bytes(4096).unwrap());

        let header = unsafe {
            ControlHeader::initialize(storage.as_mut_ptr(), &layout);
            std::ptr::addr_of_mut!((*storage.as_mut_ptr()).dtype).write(99);
            storage.assume_init_ref()
        };

        assert!(header.is_published());
        assert_eq!(header.layout(), None);
    }

    #[test]
    fn test_slot_smaller_than_frame_has_no_layout() {
        let mut storage = MaybeUninit::<ControlHeader>::zeroed();
        let layout = BufferLayout::frame(FrameDescriptor::new(&[480, 640, 3], DType::U8).unwrap());

        let header = unsafe {
            ControlHeader::initialize(storage.as_mut_ptr(), &layout);
            std::ptr::addr_of_mut!((*storage.as_mut_ptr()).slot_size).write(16);
            storage.assume_init_ref()
        };

        assert!(header.is_published());
        assert_eq!(header.layout(), None);
    }
}
