use crate::cli::CleanupArgs;
use anyhow::Context;
use framebus::{BusConfig, paths, region};

/// Unlink the named buffers (or all of them). Missing buffers are skipped.
///
/// Returns how many buffers were actually removed. Every name is attempted
/// even if an earlier one fails.
pub fn run(bus: &BusConfig, args: &CleanupArgs) -> anyhow::Result<usize> {
    let names = if args.all {
        paths::discover(&bus.shm_dir)
            .with_context(|| format!("Failed to list {}", bus.shm_dir.display()))?
    } else {
        args.names.clone()
    };

    let mut removed = 0;
    let mut failed = Vec::new();

    for name in &names {
        match region::unlink_segments(&bus.shm_dir, name) {
            Ok(true) => {
                removed += 1;
                tracing::info!(buffer = %name, "Removed buffer");
            }
            Ok(false) => tracing::info!(buffer = %name, "Nothing to remove"),
            Err(e) => {
                tracing::error!(buffer = %name, error = %e, "Failed to remove buffer");
                failed.push(name.as_str());
            }
        }
    }

    if !failed.is_empty() {
        anyhow::bail!(
            "Removed {}/{} buffers, failed: {}",
            removed,
            names.len(),
            failed.join(", ")
        );
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use framebus::{DType, FrameDescriptor, RingBuffer};

    #[test]
    fn test_cleanup_named_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let bus = BusConfig::default().with_shm_dir(dir.path());
        let name = format!("busctl_clean_{}", std::process::id());

        let descriptor = FrameDescriptor::new(&[1], DType::U8).unwrap();
        let ring = RingBuffer::register(&bus, &name, descriptor).unwrap();
        ring.close();

        let args = CleanupArgs {
            names: vec![name.clone(), "busctl_clean_never_existed".to_string()],
            all: false,
        };
        assert_eq!(run(&bus, &args).unwrap(), 1);
        assert_eq!(run(&bus, &args).unwrap(), 0);
    }

    #[test]
    fn test_cleanup_all() {
        let dir = tempfile::tempdir().unwrap();
        let bus = BusConfig::default().with_shm_dir(dir.path());
        let pid = std::process::id();

        for tag in ["x", "y"] {
            let ring = RingBuffer::register(
                &bus,
                &format!("busctl_cleanall_{tag}_{pid}"),
                FrameDescriptor::new(&[1], DType::U8).unwrap(),
            )
            .unwrap();
            ring.close();
        }

        let args = CleanupArgs {
            names: Vec::new(),
            all: true,
        };
        assert_eq!(run(&bus, &args).unwrap(), 2);
        assert!(paths::discover(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_cleanup_invalid_name_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let bus = BusConfig::default().with_shm_dir(dir.path());
        let args = CleanupArgs {
            names: vec!["../etc".to_string()],
            all: false,
        };
        assert!(run(&bus, &args).is_err());
    }
}
