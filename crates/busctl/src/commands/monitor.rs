use crate::cli::MonitorArgs;
use crate::metrics::{BusMetrics, ReadOutcome};
use anyhow::Context;
use common::wait_for_resource;
use framebus::{BusConfig, Frame, FrameManager};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const REPORT_EVERY: Duration = Duration::from_secs(1);

/// Tally of force-read outcomes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MonitorStats {
    pub changed: u64,
    pub same: u64,
    pub empty: u64,
    last_generation: Option<u64>,
}

impl MonitorStats {
    pub fn observe(&mut self, frame: Option<&Frame>) -> ReadOutcome {
        let outcome = match frame {
            None => ReadOutcome::Empty,
            Some(frame) if self.last_generation == Some(frame.generation) => ReadOutcome::Same,
            Some(frame) => {
                self.last_generation = Some(frame.generation);
                ReadOutcome::Changed
            }
        };

        match outcome {
            ReadOutcome::Changed => self.changed += 1,
            ReadOutcome::Same => self.same += 1,
            ReadOutcome::Empty => self.empty += 1,
        }
        outcome
    }

    pub fn polls(&self) -> u64 {
        self.changed + self.same + self.empty
    }

    /// Distinct frames seen per second over `elapsed`.
    pub fn effective_fps(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 { self.changed as f64 / secs } else { 0.0 }
    }
}

/// Force-read `args.name` every interval and report how often it changes.
pub fn run(
    bus: &BusConfig,
    args: &MonitorArgs,
    shutdown: &AtomicBool,
    metrics: &BusMetrics,
) -> anyhow::Result<MonitorStats> {
    let frames = FrameManager::new(bus.clone());
    let interval = Duration::from_millis(args.interval_ms.max(1));

    let Some(first) = wait_for_resource(
        || frames.force_read_frame(&args.name),
        interval,
        &format!("buffer '{}'", args.name),
        shutdown,
    ) else {
        return Ok(MonitorStats::default());
    };

    let ring = frames.buffer(&args.name).context("Buffer vanished after attach")?;
    tracing::info!(buffer = %args.name, descriptor = %ring.descriptor(), "Monitoring");

    let started = Instant::now();
    let deadline = args.duration_s.map(|s| started + Duration::from_secs(s));
    let mut stats = MonitorStats::default();
    let mut window = MonitorStats::default();
    let mut window_start = started;

    let mut frame = first;
    loop {
        let outcome = stats.observe(frame.as_ref());
        window.observe(frame.as_ref());
        metrics.record_read(&args.name, outcome);

        if window_start.elapsed() >= REPORT_EVERY {
            tracing::info!(
                buffer = %args.name,
                changed = window.changed,
                same = window.same,
                empty = window.empty,
                fps = window.effective_fps(window_start.elapsed()),
                "Monitor window"
            );
            // Keep the last generation so the next window starts in sync
            window = MonitorStats {
                last_generation: window.last_generation,
                ..MonitorStats::default()
            };
            window_start = Instant::now();
        }

        if shutdown.load(Ordering::Relaxed) || deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }

        thread::sleep(interval);
        frame = frames
            .force_read_frame(&args.name)
            .with_context(|| format!("Failed to read '{}'", args.name))?;
    }

    let elapsed = started.elapsed();
    tracing::info!(
        buffer = %args.name,
        polls = stats.polls(),
        changed = stats.changed,
        same = stats.same,
        empty = stats.empty,
        fps = stats.effective_fps(elapsed),
        "Monitor finished"
    );

    frames.close_all();
    Ok(stats)
}
