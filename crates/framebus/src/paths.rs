//! Naming of the OS objects behind a shared buffer
//!
//! A buffer called `camera_raw` is made of:
//! - `<shm_dir>/camera_raw_ctrl`  control header
//! - `<shm_dir>/camera_raw_slot0` first slot
//! - `<shm_dir>/camera_raw_slot1` second slot
//! - `/camera_raw_lock`           POSIX semaphore used as the cross-process mutex
//! - `/camera_raw_ready`          POSIX semaphore used as the data-ready signal
//!
//! Writers and readers derive every name from here, so they can never disagree.

use crate::errors::{FrameBusError, Result};
use std::path::{Path, PathBuf};

/// Default directory for shared memory segments
pub const DEFAULT_SHM_DIR: &str = "/dev/shm";

pub const CTRL_SUFFIX: &str = "_ctrl";
pub const LOCK_SUFFIX: &str = "_lock";
pub const READY_SUFFIX: &str = "_ready";

/// Longest buffer name accepted. Semaphore names are limited to NAME_MAX - 4.
pub const MAX_NAME_LEN: usize = 200;

/// Stream names used by the camera pipeline.
pub mod streams {
    pub const CAMERA_RAW: &str = "camera_raw";
    pub const CAMERA_OVERLAY: &str = "camera_overlay";
    pub const CAMERA_FULL_RAW: &str = "camera_full_raw";
    pub const CAMERA_FULL_OVERLAY: &str = "camera_full_overlay";
    pub const CAMERA_TOP_RAW: &str = "camera_top_raw";
    pub const CAMERA_TOP_OVERLAY: &str = "camera_top_overlay";
    pub const CAMERA_BOTTOM_RAW: &str = "camera_bottom_raw";
    pub const CAMERA_BOTTOM_OVERLAY: &str = "camera_bottom_overlay";

    pub const METADATA: &str = "metadata";
    pub const METADATA_FULL: &str = "metadata_full";
    pub const METADATA_TOP: &str = "metadata_top";
    pub const METADATA_BOTTOM: &str = "metadata_bottom";
}

/// Reject names that cannot be used for both a file and a semaphore.
pub fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        && !name.starts_with('.');

    if valid {
        Ok(())
    } else {
        Err(FrameBusError::InvalidName(name.to_string()))
    }
}

pub fn ctrl_path(shm_dir: &Path, name: &str) -> PathBuf {
    shm_dir.join(format!("{name}{CTRL_SUFFIX}"))
}

pub fn slot_path(shm_dir: &Path, name: &str, slot: usize) -> PathBuf {
    shm_dir.join(format!("{name}_slot{slot}"))
}

pub fn lock_semaphore(name: &str) -> String {
    format!("/{name}{LOCK_SUFFIX}")
}

pub fn ready_semaphore(name: &str) -> String {
    format!("/{name}{READY_SUFFIX}")
}

/// Buffer names that have a control segment in `shm_dir`.
pub fn discover(shm_dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names: Vec<String> = std::fs::read_dir(shm_dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let file_name = entry.file_name();
            let file_name = file_name.to_str()?;
            file_name.strip_suffix(CTRL_SUFFIX).map(str::to_string)
        })
        .filter(|name| validate_name(name).is_ok())
        .collect();
    names.sort();
    Ok(names)
}
