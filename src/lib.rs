//! A five-stage streaming pipeline over bounded fan-out ring buffers.
//!
//! Units flow `acquire → tally-in → transform → tally-out → emit`, each stage
//! on its own thread. Two ring buffers connect the halves of the pipeline; each
//! has one producer and two independent consumers (a tally stage and the next
//! stage in line), so both consumers see every unit in order at their own pace.
//!
//! # Features
//!
//! - Fan-out ring buffers with per-consumer cursors and pending counts
//! - Blocking backpressure: producers wait on full, consumers on empty
//! - End-of-stream cascade from Acquire to Emit; every stage drains and exits
//! - Pause-and-snapshot quiescence for consistent mid-run observations
//! - Per-stage metrics: units, call latency percentiles, buffer blocking
//!
//! # Example
//!
//! ```no_run
//! use fanout_pipeline::{CollectSink, Collaborators, Identity, IterSource, LetterTally, PipelineBuilder};
//! use std::sync::Arc;
//!
//! fn main() -> fanout_pipeline::Result<()> {
//!     let pipeline = PipelineBuilder::new()
//!         .input_capacity(2)
//!         .output_capacity(2)
//!         .build::<u8>()?;
//!
//!     let sink = CollectSink::new();
//!     let tally = Arc::new(LetterTally::new(std::io::stderr()));
//!     let running = pipeline.start(Collaborators::new(
//!         IterSource::new(b"abcde".to_vec()),
//!         Identity,
//!         tally,
//!         sink.clone(),
//!     ))?;
//!
//!     let pause = running.request_pause()?; // counts are logged here
//!     pause.finish();
//!
//!     running.wait()?;
//!     assert_eq!(sink.items(), b"abcde");
//!     Ok(())
//! }
//! ```

pub mod backpressure;
pub mod buffer;
pub mod cipher;
pub mod config;
pub mod error;
pub mod io;
pub mod metrics;
pub mod pipeline;
pub mod quiescence;
pub mod reset;
pub mod stage;
pub mod tally;

// Re-exports for convenience
pub use backpressure::ProgressSignal;
pub use buffer::{ConsumerRole, RingBuffer};
pub use cipher::{CipherKey, ShiftCipher};
pub use config::{PipelineConfig, DEFAULT_CAPACITY, MIN_CAPACITY};
pub use error::{PipelineError, Result};
pub use io::{CollectSink, IterSource, ReaderSource, WriterSink};
pub use metrics::{BufferStats, MetricsSnapshot, PipelineReport, StageMetrics};
pub use pipeline::{BufferId, Liveness, Pipeline, PipelineBuilder, PipelineControl, RunningPipeline};
pub use quiescence::{PauseGuard, PausePhase, QuiescenceCoordinator};
pub use reset::ResetScheduler;
pub use stage::{Collaborators, Identity, MapTransform, Sink, Source, StageKind, Tally, Transform};
pub use tally::{CountSnapshot, LetterTally, SideCounts};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
