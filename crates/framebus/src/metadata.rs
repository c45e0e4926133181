//! Tracking metadata published next to the overlay frames
//!
//! Each channel carries the latest list of tracked objects for one camera
//! view, JSON-encoded into a payload ring buffer. Readers pair it with the
//! matching overlay stream (`metadata_top` with `camera_top_overlay`, ...).

use crate::config::BusConfig;
use crate::errors::{FrameBusError, Result};
use crate::header::BufferLayout;
use crate::registry::{Registry, Teardown};
use crate::ring_buffer::RingBuffer;
use crate::types::{BufferKind, FrameDescriptor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// One tracked object as seen by the detection worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    pub id: u64,
    /// `(x1, y1, x2, y2)` in frame pixels
    pub bbox: [f32; 4],
    pub confidence: f32,
    pub class_name: String,
    #[serde(default)]
    pub is_trusted: bool,
    #[serde(default)]
    pub face_name: Option<String>,
    #[serde(default)]
    pub camera_label: String,
    /// Seconds since the UNIX epoch
    #[serde(default)]
    pub last_seen: f64,
}

/// A named metadata channel backed by a payload ring buffer.
pub struct MetadataChannel {
    ring: RingBuffer,
    max_objects: usize,
}

impl MetadataChannel {
    /// Create a channel sized for `max_objects`, or reclaim a leftover one.
    pub fn create(config: &BusConfig, name: &str, max_objects: usize) -> Result<Self> {
        let capacity = max_objects
            .checked_mul(config.metadata_bytes_per_object)
            .ok_or_else(|| {
                FrameBusError::InvalidShape(format!(
                    "'{name}' cannot hold {max_objects} objects of {} bytes",
                    config.metadata_bytes_per_object
                ))
            })?;
        let layout = BufferLayout::payload(FrameDescriptor::bytes(capacity)?);
        let ring = RingBuffer::register_layout(config, name, layout)?;

        Ok(Self { ring, max_objects })
    }

    /// Attach to a channel created by another process.
    pub fn attach(config: &BusConfig, name: &str) -> Result<Self> {
        let ring = RingBuffer::attach_layout(config, name, None)?;
        if ring.layout().kind != BufferKind::Payload {
            return Err(FrameBusError::InvalidShape(format!(
                "'{name}' holds frames, not metadata"
            )));
        }

        let max_objects = ring.layout().slot_size / config.metadata_bytes_per_object.max(1);
        Ok(Self { ring, max_objects })
    }

    pub fn name(&self) -> &str {
        self.ring.name()
    }

    pub fn max_objects(&self) -> usize {
        self.max_objects
    }

    /// Slot size in bytes
    pub fn capacity(&self) -> usize {
        self.ring.layout().slot_size
    }

    pub fn generation(&self) -> u64 {
        self.ring.generation()
    }

    /// Publish `objects` as the channel's current list.
    ///
    /// An encoding larger than the slot fails with `PayloadTooLarge` and leaves
    /// the previous list in place.
    pub fn write_objects(&self, objects: &[TrackedObject]) -> Result<()> {
        let payload = serde_json::to_vec(objects)?;

        match self.ring.write_payload(&payload) {
            Err(e @ FrameBusError::PayloadTooLarge { .. }) => {
                tracing::warn!(
                    channel = %self.name(),
                    objects = objects.len(),
                    size = payload.len(),
                    capacity = self.capacity(),
                    "Metadata too large for channel"
                );
                Err(e)
            }
            other => {
                tracing::trace!(channel = %self.name(), objects = objects.len(), "Wrote metadata");
                other
            }
        }
    }

    /// Latest list without waiting. Empty if nothing was ever written.
    pub fn read_objects(&self) -> Result<Vec<TrackedObject>> {
        match self.ring.force_read_raw()? {
            Some(snapshot) => Ok(serde_json::from_slice(&snapshot.data)?),
            None => Ok(Vec::new()),
        }
    }

    /// Wait up to `timeout` for a list no blocking reader has consumed yet.
    pub fn wait_objects(&self, timeout: Duration) -> Result<Option<Vec<TrackedObject>>> {
        match self.ring.read_raw(timeout)? {
            Some(snapshot) => Ok(Some(serde_json::from_slice(&snapshot.data)?)),
            None => Ok(None),
        }
    }

    pub fn close(&self) {
        self.ring.close();
    }

    pub fn unlink(&self) -> Result<()> {
        self.ring.unlink()
    }
}

impl Teardown for MetadataChannel {
    fn close(&self) {
        MetadataChannel::close(self);
    }

    fn unlink(&self) -> Result<()> {
        MetadataChannel::unlink(self)
    }
}

/// Per-process table of metadata channels.
pub struct MetadataManager {
    config: BusConfig,
    channels: Registry<MetadataChannel>,
}

impl MetadataManager {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            channels: Registry::new("metadata"),
        }
    }

    /// Create a channel, or return the one this manager already holds.
    pub fn create_metadata(&self, name: &str, max_objects: usize) -> Result<Arc<MetadataChannel>> {
        self.channels.get_or_insert_with(
            name,
            |existing| {
                if existing.max_objects() == max_objects {
                    Ok(())
                } else {
                    Err(FrameBusError::InvalidShape(format!(
                        "'{name}' already holds {} objects, not {max_objects}",
                        existing.max_objects()
                    )))
                }
            },
            || {
                let channel = MetadataChannel::create(&self.config, name, max_objects)?;
                tracing::info!(
                    channel = name,
                    max_objects,
                    capacity = channel.capacity(),
                    "Created metadata channel"
                );
                Ok(channel)
            },
        )
    }

    pub fn attach_metadata(&self, name: &str) -> Result<Arc<MetadataChannel>> {
        self.channels.get_or_insert_with(
            name,
            |_| Ok(()),
            || {
                let channel = MetadataChannel::attach(&self.config, name)?;
                tracing::info!(channel = name, "Attached to metadata channel");
                Ok(channel)
            },
        )
    }

    pub fn channel(&self, name: &str) -> Result<Arc<MetadataChannel>> {
        self.channels.require(name)
    }

    pub fn write_objects(&self, name: &str, objects: &[TrackedObject]) -> Result<()> {
        self.channels.require(name)?.write_objects(objects)
    }

    pub fn read_objects(&self, name: &str) -> Result<Vec<TrackedObject>> {
        self.channels.require(name)?.read_objects()
    }

    pub fn wait_objects(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<TrackedObject>>> {
        self.channels.require(name)?.wait_objects(timeout)
    }

    pub fn names(&self) -> Vec<String> {
        self.channels.names()
    }

    pub fn close_all(&self) {
        self.channels.close_all();
    }

    /// Unlink every channel. Returns the number of failures.
    pub fn cleanup_all(&self) -> usize {
        self.channels.cleanup_all()
    }
}
