//! Cross-process double-buffered frame exchange over shared memory.
//!
//! One writer process publishes frames into a named buffer at its own pace;
//! any number of reader processes either block until a new frame arrives
//! ([`RingBuffer::read`]) or grab the latest complete one without waiting
//! ([`RingBuffer::force_read`]). Readers never observe a half-written frame
//! and the writer never waits on readers.

pub mod config;
pub mod errors;
pub mod header;
pub mod manager;
pub mod metadata;
pub mod paths;
pub mod region;
pub mod registry;
pub mod ring_buffer;
pub mod semaphore;
pub mod types;

pub use config::BusConfig;
pub use errors::{FrameBusError, Result};
pub use header::BufferLayout;
pub use manager::FrameManager;
pub use metadata::{MetadataChannel, MetadataManager, TrackedObject};
pub use paths::streams;
pub use region::SharedRegion;
pub use registry::Teardown;
pub use ring_buffer::{BufferStatus, RingBuffer};
pub use semaphore::{Semaphore, SemaphoreError};
pub use types::{BufferKind, DType, Frame, FrameDescriptor, FrameShape};
