//! Periodic pause-and-reset driver.
//!
//! Every interval the scheduler pauses the pipeline (which reports the
//! current counts), runs a reset hook while Acquire is held, and resumes.

use crate::error::{PipelineError, Result};
use crate::pipeline::PipelineControl;
use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use std::thread::{Builder, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

/// Background thread that brackets a reset hook with a pipeline pause
pub struct ResetScheduler {
    stop: Sender<()>,
    handle: JoinHandle<Result<u64>>,
}

impl ResetScheduler {
    /// Start resetting every `interval` until stopped, until the producer
    /// half of the pipeline has finished, or until the pipeline is aborted
    pub fn spawn<T, F>(
        control: PipelineControl<T>,
        interval: Duration,
        mut on_reset: F,
    ) -> Result<Self>
    where
        T: Send + 'static,
        F: FnMut() + Send + 'static,
    {
        let (stop, stopped) = bounded::<()>(1);
        let handle = Builder::new()
            .name("pipeline-reset".into())
            .spawn(move || -> Result<u64> {
                let liveness = control.liveness();
                let mut resets = 0u64;
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if liveness.producer_finished() {
                        debug!("producer finished, no more resets");
                        break;
                    }

                    let pause = match control.request_pause() {
                        Ok(pause) => pause,
                        // The stage that aborted reports the failure.
                        Err(err) if err.is_aborted() => {
                            debug!("pipeline aborted, no more resets");
                            break;
                        }
                        Err(err) => return Err(err),
                    };
                    on_reset();
                    pause.finish();
                    resets += 1;
                    debug!(resets, "reset complete");
                }
                Ok(resets)
            })
            .map_err(|err| PipelineError::ThreadError(err.to_string()))?;

        info!(interval_ms = interval.as_millis() as u64, "reset scheduler started");
        Ok(Self { stop, handle })
    }

    /// Stop the scheduler and return how many resets it performed
    pub fn stop(self) -> Result<u64> {
        // The thread may already have exited on its own.
        let _ = self.stop.try_send(());
        self.handle
            .join()
            .map_err(|_| PipelineError::ThreadError("reset scheduler panicked".into()))?
    }
}
