use crate::stage::StageKind;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A simple percentile tracker that maintains a sliding window of measurements
#[derive(Debug, Clone)]
pub struct PercentileTracker {
    measurements: Arc<Mutex<VecDeque<u64>>>,
    window_size: usize,
}

impl PercentileTracker {
    /// Create a new percentile tracker with a specified window size
    pub fn new(window_size: usize) -> Self {
        Self {
            measurements: Arc::new(Mutex::new(VecDeque::with_capacity(window_size))),
            window_size,
        }
    }

    /// Record a measurement (in nanoseconds)
    pub fn record(&self, nanos: u64) {
        let mut measurements = self.measurements.lock();
        if measurements.len() >= self.window_size {
            measurements.pop_front();
        }
        measurements.push_back(nanos);
    }

    /// Median in microseconds
    pub fn p50_us(&self) -> f64 {
        self.percentile(0.50)
    }

    /// 99th percentile in microseconds
    pub fn p99_us(&self) -> f64 {
        self.percentile(0.99)
    }

    fn percentile(&self, p: f64) -> f64 {
        let mut sorted: Vec<_> = self.measurements.lock().iter().copied().collect();
        if sorted.is_empty() {
            return 0.0;
        }
        sorted.sort_unstable();

        let idx = ((sorted.len() as f64 * p).ceil() as usize).saturating_sub(1);
        sorted[idx] as f64 / 1000.0
    }

    /// Number of measurements currently in the window
    pub fn count(&self) -> usize {
        self.measurements.lock().len()
    }
}

/// Counters for one pipeline stage, shared between the stage thread and
/// the pipeline handle
#[derive(Debug, Clone)]
pub struct StageMetrics {
    kind: StageKind,
    units: Arc<AtomicU64>,
    /// Time spent inside the stage's collaborator call, per unit
    call_latency: PercentileTracker,
    start_time: Instant,
    finished_after: Arc<Mutex<Option<Duration>>>,
}

impl StageMetrics {
    /// Create a new metrics collector for a stage
    pub fn new(kind: StageKind) -> Self {
        Self {
            kind,
            units: Arc::new(AtomicU64::new(0)),
            call_latency: PercentileTracker::new(1000),
            start_time: Instant::now(),
            finished_after: Arc::new(Mutex::new(None)),
        }
    }

    /// Stage these metrics belong to
    pub fn kind(&self) -> StageKind {
        self.kind
    }

    /// Record one unit moved through the stage
    pub fn record_unit(&self) {
        self.units.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a collaborator call duration in nanoseconds
    pub fn record_latency(&self, nanos: u64) {
        self.call_latency.record(nanos);
    }

    /// Freeze the elapsed time used for throughput
    pub fn mark_finished(&self) {
        self.finished_after
            .lock()
            .get_or_insert_with(|| self.start_time.elapsed());
    }

    /// Units moved so far
    pub fn total_units(&self) -> u64 {
        self.units.load(Ordering::Relaxed)
    }

    /// Elapsed time since start, or until the stage finished
    pub fn elapsed(&self) -> Duration {
        let finished = *self.finished_after.lock();
        finished.unwrap_or_else(|| self.start_time.elapsed())
    }

    /// Units per second over the stage's lifetime
    pub fn throughput_ups(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.total_units() as f64 / elapsed
        }
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            stage: self.kind,
            total_units: self.total_units(),
            throughput_ups: self.throughput_ups(),
            latency_p50_us: self.call_latency.p50_us(),
            latency_p99_us: self.call_latency.p99_us(),
            elapsed: self.elapsed(),
        }
    }
}

/// A snapshot of stage metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub stage: StageKind,
    pub total_units: u64,
    pub throughput_ups: f64,
    pub latency_p50_us: f64,
    pub latency_p99_us: f64,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    /// Format metrics as a human-readable string
    pub fn format(&self) -> String {
        format!(
            "{}: Units: {}, Throughput: {:.2} units/s, Call P50: {:.2}µs, P99: {:.2}µs, Elapsed: {:.3}s",
            self.stage,
            self.total_units,
            self.throughput_ups,
            self.latency_p50_us,
            self.latency_p99_us,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Blocking counters for one buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferStats {
    pub name: &'static str,
    pub capacity: usize,
    pub producer_blocks: u64,
    pub consumer_blocks: u64,
}

/// Final accounting returned when the pipeline has been joined
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub stages: Vec<MetricsSnapshot>,
    pub buffers: Vec<BufferStats>,
}

impl PipelineReport {
    /// Units moved by `kind`
    pub fn units(&self, kind: StageKind) -> u64 {
        self.stages
            .iter()
            .find(|s| s.stage == kind)
            .map_or(0, |s| s.total_units)
    }

    /// Multi-line summary of every stage and buffer
    pub fn summary(&self) -> String {
        let mut summary = String::from("Pipeline Metrics Summary:\n");
        for stage in &self.stages {
            let _ = writeln!(summary, "  {}", stage.format());
        }
        for buffer in &self.buffers {
            let _ = writeln!(
                summary,
                "  {} buffer (capacity {}): producer blocked {} times, consumers blocked {} times",
                buffer.name, buffer.capacity, buffer.producer_blocks, buffer.consumer_blocks
            );
        }
        summary
    }
}
