use crate::buffer::{ConsumerRole, RingBuffer};
use crate::error::{PipelineError, Result};
use crate::metrics::StageMetrics;
use crate::pipeline::PipelineShared;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info};

/// Supplies units to the Acquire stage
pub trait Source<T>: Send + 'static {
    /// Next unit, or `None` once the stream has ended
    fn acquire(&mut self) -> Result<Option<T>>;

    /// Get a human-readable name for this source
    fn name(&self) -> &str {
        "source"
    }
}

/// Receives finished units from the Emit stage
pub trait Sink<T>: Send + 'static {
    /// Deliver one unit
    fn emit(&mut self, unit: T) -> Result<()>;

    /// Called once after the last unit has been emitted
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    /// Get a human-readable name for this sink
    fn name(&self) -> &str {
        "sink"
    }
}

/// Per-unit mapping applied by the Transform stage
pub trait Transform<T>: Send + 'static {
    fn apply(&mut self, unit: T) -> T;

    /// Get a human-readable name for this transform
    fn name(&self) -> &str {
        "transform"
    }
}

/// Observation bookkeeping shared by the two tally stages and pause callers
pub trait Tally<T>: Send + Sync + 'static {
    /// A unit was read from the input buffer
    fn record_input(&self, unit: &T);

    /// A unit was read from the output buffer
    fn record_output(&self, unit: &T);

    /// Report the current counts. Called while the pipeline is paused.
    fn snapshot_counts(&self) -> Result<()>;
}

/// A transform that passes every unit through unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl<T: Send + 'static> Transform<T> for Identity {
    fn apply(&mut self, unit: T) -> T {
        unit
    }

    fn name(&self) -> &str {
        "identity"
    }
}

/// A transform backed by a closure
pub struct MapTransform<F> {
    name: String,
    mapper: F,
}

impl<F> MapTransform<F> {
    /// Create a new map transform
    pub fn new(name: impl Into<String>, mapper: F) -> Self {
        Self {
            name: name.into(),
            mapper,
        }
    }
}

impl<T, F> Transform<T> for MapTransform<F>
where
    F: FnMut(T) -> T + Send + 'static,
{
    fn apply(&mut self, unit: T) -> T {
        (self.mapper)(unit)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// The collaborators a pipeline is started with
pub struct Collaborators<T> {
    pub(crate) source: Box<dyn Source<T>>,
    pub(crate) transform: Box<dyn Transform<T>>,
    pub(crate) tally: Arc<dyn Tally<T>>,
    pub(crate) sink: Box<dyn Sink<T>>,
}

impl<T: 'static> Collaborators<T> {
    pub fn new<S, X, K, E>(source: S, transform: X, tally: Arc<K>, sink: E) -> Self
    where
        S: Source<T>,
        X: Transform<T>,
        K: Tally<T>,
        E: Sink<T>,
    {
        Self {
            source: Box::new(source),
            transform: Box::new(transform),
            tally,
            sink: Box::new(sink),
        }
    }

    /// Split into one work item per stage, in [`StageKind::ALL`] order
    pub(crate) fn into_work(self) -> [StageWork<T>; 5] {
        [
            StageWork::Acquire(self.source),
            StageWork::TallyIn(Arc::clone(&self.tally)),
            StageWork::Transform(self.transform),
            StageWork::TallyOut(self.tally),
            StageWork::Emit(self.sink),
        ]
    }
}

/// The five workers of the pipeline, in data-flow order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Acquire,
    TallyIn,
    Transform,
    TallyOut,
    Emit,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        StageKind::Acquire,
        StageKind::TallyIn,
        StageKind::Transform,
        StageKind::TallyOut,
        StageKind::Emit,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Acquire => "acquire",
            StageKind::TallyIn => "tally-in",
            StageKind::Transform => "transform",
            StageKind::TallyOut => "tally-out",
            StageKind::Emit => "emit",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a stage thread works with
pub(crate) enum StageWork<T> {
    Acquire(Box<dyn Source<T>>),
    TallyIn(Arc<dyn Tally<T>>),
    Transform(Box<dyn Transform<T>>),
    TallyOut(Arc<dyn Tally<T>>),
    Emit(Box<dyn Sink<T>>),
}

impl<T> StageWork<T> {
    pub(crate) fn kind(&self) -> StageKind {
        match self {
            StageWork::Acquire(_) => StageKind::Acquire,
            StageWork::TallyIn(_) => StageKind::TallyIn,
            StageWork::Transform(_) => StageKind::Transform,
            StageWork::TallyOut(_) => StageKind::TallyOut,
            StageWork::Emit(_) => StageKind::Emit,
        }
    }
}

/// Tag a collaborator failure with the stage it surfaced in. Aborts and
/// errors that already name a stage pass through.
fn attribute(kind: StageKind, err: PipelineError) -> PipelineError {
    match err {
        PipelineError::Aborted | PipelineError::StageError { .. } => err,
        other => PipelineError::StageError {
            stage: kind.to_string(),
            message: other.to_string(),
        },
    }
}

/// Aborts the pipeline if the stage thread unwinds
struct AbortOnPanic<'a, T> {
    shared: &'a PipelineShared<T>,
    kind: StageKind,
}

impl<T> Drop for AbortOnPanic<'_, T> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!(stage = %self.kind, "stage panicked, aborting pipeline");
            self.shared.abort();
        }
    }
}

/// Runs one stage loop against the shared buffers
pub(crate) struct StageRunner<T> {
    shared: Arc<PipelineShared<T>>,
    metrics: StageMetrics,
}

impl<T: Clone + Send + 'static> StageRunner<T> {
    pub(crate) fn new(shared: Arc<PipelineShared<T>>, metrics: StageMetrics) -> Self {
        Self { shared, metrics }
    }

    /// Run the stage until its input is exhausted.
    ///
    /// A failure aborts the whole pipeline so that no other stage stays
    /// blocked on a buffer this one will never touch again.
    pub(crate) fn run(self, work: StageWork<T>) -> Result<()> {
        let kind = work.kind();
        let _guard = AbortOnPanic {
            shared: &self.shared,
            kind,
        };
        info!(stage = %kind, "starting stage");

        let result = match work {
            StageWork::Acquire(source) => self.acquire(source),
            StageWork::TallyIn(tally) => {
                self.drain(&self.shared.input, ConsumerRole::Count, |unit| {
                    tally.record_input(&unit);
                    Ok(())
                })
            }
            StageWork::Transform(transform) => self.transform(transform),
            StageWork::TallyOut(tally) => {
                self.drain(&self.shared.output, ConsumerRole::Count, |unit| {
                    tally.record_output(&unit);
                    Ok(())
                })
            }
            StageWork::Emit(sink) => self.emit(sink),
        }
        .map_err(|err| attribute(kind, err));

        self.metrics.mark_finished();
        match &result {
            Ok(()) => info!(stage = %kind, units = self.metrics.total_units(), "finished stage"),
            Err(err) if err.is_aborted() => debug!(stage = %kind, "stage stopped by abort"),
            Err(err) => {
                error!(stage = %kind, error = %err, "stage failed, aborting pipeline");
                self.shared.abort();
            }
        }
        result
    }

    fn acquire(&self, mut source: Box<dyn Source<T>>) -> Result<()> {
        let result = self.produce_all(source.as_mut());
        // End of stream, or a failure that is about to abort everything:
        // either way nothing more will be produced.
        self.shared.coordinator.mark_acquire_finished();
        self.shared.input.close();
        if result.is_ok() {
            debug!(source = source.name(), "source exhausted");
        }
        result
    }

    fn produce_all(&self, source: &mut dyn Source<T>) -> Result<()> {
        loop {
            let start = Instant::now();
            let next = source.acquire()?;
            self.record_latency(start);

            let Some(unit) = next else {
                return Ok(());
            };
            let _permit = self.shared.coordinator.begin_production()?;
            self.shared.input.produce(unit)?;
            self.metrics.record_unit();
        }
    }

    fn transform(&self, mut transform: Box<dyn Transform<T>>) -> Result<()> {
        let result = self.carry(transform.as_mut());
        self.shared.output.close();
        result
    }

    /// Move units from input to output. A unit keeps its input slot until
    /// its transformed value is in the output buffer, so it is pending
    /// somewhere for the whole time Transform holds it.
    fn carry(&self, transform: &mut dyn Transform<T>) -> Result<()> {
        let (input, output) = (&self.shared.input, &self.shared.output);
        while let Some(unit) = input.take(ConsumerRole::Consume)? {
            let start = Instant::now();
            let mapped = transform.apply(unit);
            self.record_latency(start);

            output.produce(mapped)?;
            input.commit(ConsumerRole::Consume);
            self.metrics.record_unit();
        }
        Ok(())
    }

    fn emit(&self, mut sink: Box<dyn Sink<T>>) -> Result<()> {
        self.drain(&self.shared.output, ConsumerRole::Consume, |unit| {
            let start = Instant::now();
            sink.emit(unit)?;
            self.record_latency(start);
            Ok(())
        })?;
        sink.finish()
    }

    /// Consume `role` until the buffer is closed and drained
    fn drain<F>(&self, buffer: &RingBuffer<T>, role: ConsumerRole, mut each: F) -> Result<()>
    where
        F: FnMut(T) -> Result<()>,
    {
        while let Some(unit) = buffer.consume(role)? {
            each(unit)?;
            self.metrics.record_unit();
        }
        Ok(())
    }

    fn record_latency(&self, start: Instant) {
        self.metrics
            .record_latency(u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let mut identity = Identity;
        assert_eq!(Transform::<u8>::apply(&mut identity, b'q'), b'q');
        assert_eq!(Transform::<u8>::name(&identity), "identity");
    }

    #[test]
    fn test_map_transform() {
        let mut double = MapTransform::new("double", |n: u32| n * 2);
        assert_eq!(Transform::<u32>::apply(&mut double, 21), 42);
        assert_eq!(Transform::<u32>::name(&double), "double");
    }

    #[test]
    fn test_failures_are_attributed_to_their_stage() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated");
        match attribute(StageKind::Acquire, io.into()) {
            PipelineError::StageError { stage, message } => {
                assert_eq!(stage, "acquire");
                assert!(message.contains("truncated"), "{message}");
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(attribute(StageKind::Emit, PipelineError::Aborted).is_aborted());
        let named = PipelineError::StageError {
            stage: "sink".into(),
            message: "disk full".into(),
        };
        assert!(matches!(
            attribute(StageKind::Emit, named),
            PipelineError::StageError { stage, .. } if stage == "sink"
        ));
    }

    #[test]
    fn test_stage_kind_order_and_names() {
        let names: Vec<_> = StageKind::ALL.iter().map(|k| k.to_string()).collect();
        assert_eq!(
            names,
            vec!["acquire", "tally-in", "transform", "tally-out", "emit"]
        );
    }
}
