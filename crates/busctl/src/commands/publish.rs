use crate::cli::PublishArgs;
use crate::metrics::BusMetrics;
use crate::pattern::test_pattern;
use anyhow::Context;
use common::span;
use framebus::{BusConfig, FrameManager};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Write test frames at `args.fps` until the frame budget is spent or
/// shutdown is requested. Returns the number of frames written.
pub fn run(
    bus: &BusConfig,
    args: &PublishArgs,
    shutdown: &AtomicBool,
    metrics: &BusMetrics,
) -> anyhow::Result<u64> {
    if !(args.fps > 0.0 && args.fps.is_finite()) {
        anyhow::bail!("--fps must be a positive number, got {}", args.fps);
    }

    let descriptor = args.descriptor().context("Invalid --shape")?;
    let frames = FrameManager::new(bus.clone());
    frames
        .register_frame(&args.name, descriptor)
        .with_context(|| {
            format!(
                "Failed to register '{}' in {}",
                args.name,
                bus.shm_dir.display()
            )
        })?;

    tracing::info!(
        buffer = %args.name,
        descriptor = %descriptor,
        fps = args.fps,
        "Publishing test pattern"
    );

    let interval = Duration::from_secs_f64(1.0 / args.fps);
    let started = Instant::now();
    let mut written = 0u64;
    let mut next_deadline = Instant::now();

    let result = loop {
        if shutdown.load(Ordering::Relaxed) {
            tracing::info!("Shutdown requested");
            break Ok(());
        }
        if args.frames.is_some_and(|limit| written >= limit) {
            break Ok(());
        }

        let outcome = {
            let _s = span!("publish_frame");
            test_pattern(descriptor, written + 1)
                .and_then(|frame| frames.write_frame(&args.name, &frame))
        };
        if let Err(e) = outcome {
            break Err(e).with_context(|| format!("Failed to write frame {}", written + 1));
        }

        written += 1;
        metrics.record_write(&args.name);
        tracing::debug!(buffer = %args.name, frame = written, "Wrote frame");

        next_deadline += interval;
        let now = Instant::now();
        if next_deadline > now {
            thread::sleep(next_deadline - now);
        } else {
            // Fell behind; do not try to catch up with a burst
            next_deadline = now;
        }
    };

    let elapsed = started.elapsed().as_secs_f64();
    tracing::info!(
        buffer = %args.name,
        frames = written,
        fps = if elapsed > 0.0 { written as f64 / elapsed } else { 0.0 },
        "Publisher stopped"
    );

    if args.keep {
        frames.close_all();
    } else {
        let errors = frames.cleanup_all();
        if errors > 0 {
            tracing::warn!(buffer = %args.name, errors, "Buffer cleanup reported errors");
        }
    }

    result.map(|()| written)
}
