use crate::semaphore::SemaphoreError;
use crate::types::FrameDescriptor;
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameBusError {
    #[error("Failed to allocate shared memory for '{name}': {source}")]
    AllocationError {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Shared buffer '{0}' already exists")]
    AlreadyExists(String),

    #[error("Shared buffer '{0}' not found")]
    NotFound(String),

    #[error("Buffer '{0}' is closed")]
    Closed(String),

    #[error("Buffer '{0}' is not registered")]
    NotRegistered(String),

    #[error("Shape mismatch on '{name}': expected {expected}, got {actual}")]
    ShapeMismatch {
        name: String,
        expected: FrameDescriptor,
        actual: FrameDescriptor,
    },

    #[error("Invalid frame shape: {0}")]
    InvalidShape(String),

    #[error("Payload for '{name}' too large: {size} > {capacity} bytes")]
    PayloadTooLarge {
        name: String,
        size: usize,
        capacity: usize,
    },

    #[error("Timed out after {timeout:?} waiting for the lock on '{name}'")]
    LockTimeout { name: String, timeout: Duration },

    #[error("Invalid buffer name: {0:?}")]
    InvalidName(String),

    #[error("Semaphore error: {0}")]
    Semaphore(#[from] SemaphoreError),

    #[error("Metadata serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl FrameBusError {
    /// Errors that mean the writer and a reader disagree about the layout.
    /// Retrying cannot fix these.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            FrameBusError::ShapeMismatch { .. }
                | FrameBusError::InvalidShape(_)
                | FrameBusError::InvalidName(_)
        )
    }
}

pub type Result<T, E = FrameBusError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DType;

    #[test]
    fn test_error_display_formatting() {
        let err = FrameBusError::NotRegistered("camera_raw".to_string());
        assert_eq!(err.to_string(), "Buffer 'camera_raw' is not registered");

        let err = FrameBusError::ShapeMismatch {
            name: "cam".to_string(),
            expected: FrameDescriptor::new(&[480, 640, 3], DType::U8).unwrap(),
            actual: FrameDescriptor::new(&[720, 1280, 3], DType::U8).unwrap(),
        };
        assert_eq!(
            err.to_string(),
            "Shape mismatch on 'cam': expected (480, 640, 3) uint8, got (720, 1280, 3) uint8"
        );

        let err = FrameBusError::PayloadTooLarge {
            name: "metadata_top".to_string(),
            size: 9000,
            capacity: 5120,
        };
        assert_eq!(
            err.to_string(),
            "Payload for 'metadata_top' too large: 9000 > 5120 bytes"
        );
    }

    #[test]
    fn test_error_conversion_from_io_error() {
        fn returns_io_error() -> std::result::Result<(), io::Error> {
            Err(io::Error::other("test error"))
        }

        fn uses_question_mark() -> Result<()> {
            returns_io_error()?;
            Ok(())
        }

        match uses_question_mark().unwrap_err() {
            FrameBusError::Io(e) => assert_eq!(e.to_string(), "test error"),
            other => panic!("Expected Io variant, got {other:?}"),
        }
    }

    #[test]
    fn test_configuration_errors_are_flagged() {
        let mismatch = FrameBusError::ShapeMismatch {
            name: "x".to_string(),
            expected: FrameDescriptor::new(&[2, 2], DType::U8).unwrap(),
            actual: FrameDescriptor::new(&[2, 3], DType::U8).unwrap(),
        };
        assert!(mismatch.is_configuration_error());
        assert!(!FrameBusError::NotFound("x".to_string()).is_configuration_error());
    }
}
