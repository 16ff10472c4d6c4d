use crate::backpressure::ProgressSignal;
use crate::buffer::{ConsumerRole, RingBuffer};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::metrics::{BufferStats, PipelineReport, StageMetrics};
use crate::quiescence::{PauseGuard, QuiescenceCoordinator};
use crate::stage::{Collaborators, StageKind, StageRunner, Tally};
use std::fmt;
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};
use tracing::{debug, info, warn};

/// Identifies one of the two pipeline buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferId {
    /// Between Acquire and Transform; read by TallyIn and Transform
    Input,
    /// Between Transform and Emit; read by TallyOut and Emit
    Output,
}

/// State shared by every stage thread and every handle
pub(crate) struct PipelineShared<T> {
    pub(crate) input: RingBuffer<T>,
    pub(crate) output: RingBuffer<T>,
    pub(crate) progress: Arc<ProgressSignal>,
    pub(crate) coordinator: QuiescenceCoordinator,
}

impl<T> PipelineShared<T> {
    fn buffer(&self, id: BufferId) -> &RingBuffer<T> {
        match id {
            BufferId::Input => &self.input,
            BufferId::Output => &self.output,
        }
    }

    /// Wake and fail every blocked stage and pause caller
    pub(crate) fn abort(&self) {
        if !self.progress.is_aborted() {
            warn!("aborting pipeline");
        }
        self.progress.abort();
        self.coordinator.abort();
        self.input.abort();
        self.output.abort();
    }

    /// Whether a paused pipeline has drained far enough to observe.
    ///
    /// Every consumer of both buffers has at most one pending unit, and a
    /// unit still pending for Transform would not push either output
    /// consumer past one. Transform keeps its input slot until the mapped
    /// unit is in the output buffer, so the unit it is working on is always
    /// in `upstream`. With Acquire held, none of these counts can grow
    /// afterwards, so the bound holds until the pause is finished.
    fn converged(&self) -> bool {
        let upstream = self.input.pending(ConsumerRole::Consume);
        if upstream > 1 || self.input.max_pending() > 1 {
            return false;
        }
        ConsumerRole::ALL
            .iter()
            .all(|&role| self.output.pending(role) + upstream <= 1)
    }
}

/// Builder for constructing pipelines
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    config: PipelineConfig,
}

impl PipelineBuilder {
    /// Create a new pipeline builder with default capacities
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing config
    pub fn from_config(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Capacity of the Acquire → Transform buffer
    pub fn input_capacity(mut self, capacity: usize) -> Self {
        self.config.input_capacity = capacity;
        self
    }

    /// Capacity of the Transform → Emit buffer
    pub fn output_capacity(mut self, capacity: usize) -> Self {
        self.config.output_capacity = capacity;
        self
    }

    /// Validate the config and allocate both buffers
    pub fn build<T: Clone + Send + 'static>(self) -> Result<Pipeline<T>> {
        self.config.validate()?;

        let progress = Arc::new(ProgressSignal::new());
        let roles = ConsumerRole::ALL.len();
        let input = RingBuffer::with_progress(
            "input",
            self.config.input_capacity,
            roles,
            Arc::clone(&progress),
        )?;
        let output = RingBuffer::with_progress(
            "output",
            self.config.output_capacity,
            roles,
            Arc::clone(&progress),
        )?;
        debug!(
            input_capacity = self.config.input_capacity,
            output_capacity = self.config.output_capacity,
            "pipeline buffers allocated"
        );

        Ok(Pipeline {
            config: self.config,
            shared: Arc::new(PipelineShared {
                input,
                output,
                progress,
                coordinator: QuiescenceCoordinator::new(),
            }),
        })
    }
}

/// A configured pipeline whose stages have not been started
pub struct Pipeline<T> {
    config: PipelineConfig,
    shared: Arc<PipelineShared<T>>,
}

impl<T> fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + 'static> Pipeline<T> {
    /// Capacities this pipeline was built with
    pub fn config(&self) -> PipelineConfig {
        self.config
    }

    /// Read-only view of the lifecycle flags and pending counts
    pub fn liveness(&self) -> Liveness<T> {
        Liveness {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Spawn the five stage threads
    pub fn start(self, collaborators: Collaborators<T>) -> Result<RunningPipeline<T>> {
        let tally = Arc::clone(&collaborators.tally);
        let mut handles = Vec::with_capacity(StageKind::ALL.len());
        let mut metrics = Vec::with_capacity(StageKind::ALL.len());

        for work in collaborators.into_work() {
            let kind = work.kind();
            let stage_metrics = StageMetrics::new(kind);
            let runner = StageRunner::new(Arc::clone(&self.shared), stage_metrics.clone());

            let spawned = Builder::new()
                .name(format!("pipeline-{kind}"))
                .spawn(move || runner.run(work));

            match spawned {
                Ok(handle) => {
                    handles.push((kind, handle));
                    metrics.push(stage_metrics);
                }
                Err(err) => {
                    // Without all five stages the others would block forever.
                    self.shared.abort();
                    for (_, handle) in handles {
                        let _ = handle.join();
                    }
                    return Err(PipelineError::ThreadError(format!(
                        "failed to spawn {kind} stage: {err}"
                    )));
                }
            }
        }
        info!(
            input_capacity = self.config.input_capacity,
            output_capacity = self.config.output_capacity,
            "pipeline started"
        );

        Ok(RunningPipeline {
            control: PipelineControl {
                shared: self.shared,
                tally,
            },
            handles,
            metrics,
        })
    }
}

/// Cloneable handle for pausing or aborting a running pipeline from any
/// thread
pub struct PipelineControl<T> {
    shared: Arc<PipelineShared<T>>,
    tally: Arc<dyn Tally<T>>,
}

impl<T: 'static> Clone for PipelineControl<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            tally: Arc::clone(&self.tally),
        }
    }
}

impl<T: 'static> fmt::Debug for PipelineControl<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineControl")
            .field("coordinator", &self.shared.coordinator)
            .finish_non_exhaustive()
    }
}

impl<T: 'static> PipelineControl<T> {
    /// Hold Acquire, wait for the pipeline to drain, then report counts.
    ///
    /// Returns once the pipeline is paused and the tally snapshot has been
    /// taken. Acquire stays held until the returned guard is finished.
    pub fn request_pause(&self) -> Result<PauseGuard<'_>> {
        let shared = &self.shared;
        let guard = shared
            .coordinator
            .request_pause(&shared.progress, || shared.converged())?;
        self.tally.snapshot_counts()?;
        Ok(guard)
    }

    /// Read-only view of the lifecycle flags and pending counts
    pub fn liveness(&self) -> Liveness<T> {
        Liveness {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Tear the pipeline down; every stage exits with
    /// [`PipelineError::Aborted`]
    pub fn abort(&self) {
        self.shared.abort();
    }
}

/// Read-only view of pipeline lifecycle state
pub struct Liveness<T> {
    shared: Arc<PipelineShared<T>>,
}

impl<T> Clone for Liveness<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Liveness<T> {
    /// Acquire has reached end-of-stream and closed the input buffer
    pub fn producer_finished(&self) -> bool {
        self.shared.input.is_closed()
    }

    /// Transform has drained the input buffer and closed the output buffer
    pub fn transform_finished(&self) -> bool {
        self.shared.output.is_closed()
    }

    /// A pause is requested or in effect
    pub fn quiescence_requested(&self) -> bool {
        self.shared.coordinator.is_pause_requested()
    }

    /// Units written to `buffer` that `role` has not read yet
    pub fn pending(&self, buffer: BufferId, role: ConsumerRole) -> usize {
        self.shared.buffer(buffer).pending(role)
    }

    /// Capacity of `buffer`
    pub fn capacity(&self, buffer: BufferId) -> usize {
        self.shared.buffer(buffer).capacity()
    }
}

/// A running pipeline that can be paused, monitored and joined
pub struct RunningPipeline<T> {
    control: PipelineControl<T>,
    handles: Vec<(StageKind, JoinHandle<Result<()>>)>,
    metrics: Vec<StageMetrics>,
}

impl<T: 'static> RunningPipeline<T> {
    /// Handle usable from other threads
    pub fn control(&self) -> PipelineControl<T> {
        self.control.clone()
    }

    /// See [`PipelineControl::request_pause`]
    pub fn request_pause(&self) -> Result<PauseGuard<'_>> {
        self.control.request_pause()
    }

    /// Read-only view of the lifecycle flags and pending counts
    pub fn liveness(&self) -> Liveness<T> {
        self.control.liveness()
    }

    /// Get metrics for a stage
    pub fn stage_metrics(&self, kind: StageKind) -> Option<&StageMetrics> {
        self.metrics.iter().find(|m| m.kind() == kind)
    }

    /// Whether every stage thread has exited
    pub fn is_finished(&self) -> bool {
        self.handles.iter().all(|(_, handle)| handle.is_finished())
    }

    /// Join all five stages.
    ///
    /// If any stage failed, returns that stage's error rather than the
    /// [`PipelineError::Aborted`] the other stages saw.
    pub fn wait(self) -> Result<PipelineReport> {
        let mut first_error: Option<PipelineError> = None;

        for (kind, handle) in self.handles {
            let outcome = match handle.join() {
                Ok(result) => result,
                Err(_) => Err(PipelineError::ThreadError(format!("{kind} stage panicked"))),
            };
            if let Err(err) = outcome {
                let replace = match &first_error {
                    None => true,
                    Some(current) => current.is_aborted() && !err.is_aborted(),
                };
                if replace {
                    first_error = Some(err);
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        let shared = &self.control.shared;
        debug_assert!(shared.input.is_drained() && shared.output.is_drained());
        let report = PipelineReport {
            stages: self.metrics.iter().map(StageMetrics::snapshot).collect(),
            buffers: [&shared.input, &shared.output]
                .into_iter()
                .map(|buffer| BufferStats {
                    name: buffer.name(),
                    capacity: buffer.capacity(),
                    producer_blocks: buffer.producer_blocks(),
                    consumer_blocks: buffer.consumer_blocks(),
                })
                .collect(),
        };
        info!(
            emitted = report.units(StageKind::Emit),
            "pipeline finished"
        );
        debug!("{}", report.summary());
        Ok(report)
    }
}
