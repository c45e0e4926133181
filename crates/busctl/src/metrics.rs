use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;

/// What a poll of a buffer found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Changed,
    Same,
    Empty,
}

impl ReadOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ReadOutcome::Changed => "changed",
            ReadOutcome::Same => "same",
            ReadOutcome::Empty => "empty",
        }
    }
}

/// Counters exported through the global meter. No-ops unless a
/// [`common::TelemetryGuard`] installed a meter provider.
pub struct BusMetrics {
    frames_written: Counter<u64>,
    reads: Counter<u64>,
}

impl BusMetrics {
    pub fn new() -> Self {
        let meter = global::meter("busctl");
        Self {
            frames_written: meter
                .u64_counter("framebus.frames_written")
                .with_description("Frames written to a shared buffer")
                .build(),
            reads: meter
                .u64_counter("framebus.reads")
                .with_description("Polls of a shared buffer by outcome")
                .build(),
        }
    }

    pub fn record_write(&self, buffer: &str) {
        self.frames_written
            .add(1, &[KeyValue::new("buffer", buffer.to_string())]);
    }

    pub fn record_read(&self, buffer: &str, outcome: ReadOutcome) {
        self.reads.add(
            1,
            &[
                KeyValue::new("buffer", buffer.to_string()),
                KeyValue::new("outcome", outcome.as_str()),
            ],
        );
    }
}

impl Default for BusMetrics {
    fn default() -> Self {
        Self::new()
    }
}
