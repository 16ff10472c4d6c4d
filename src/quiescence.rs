//! Pause-and-snapshot protocol.
//!
//! An external caller brackets an observation with
//! [`QuiescenceCoordinator::request_pause`] and [`PauseGuard::finish`]. While a
//! pause is requested the Acquire stage completes the production it is in the
//! middle of and then holds off producing; the caller waits until the
//! downstream stages have drained the pipeline to its convergence condition,
//! observes, and releases Acquire, which resumes with the unit it was holding.
//!
//! The gate serializes callers, so overlapping requests queue up instead of
//! interleaving, and `finish` can only be reached through a guard returned by a
//! successful request.

use crate::backpressure::ProgressSignal;
use crate::error::{PipelineError, Result};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use tracing::debug;

/// Where the coordinator is in the pause bracket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PausePhase {
    /// Acquire produces freely
    Running,
    /// A caller is waiting for Acquire to step aside and the pipeline to drain
    Requested,
    /// Converged; Acquire is held until the guard is finished
    Paused,
}

#[derive(Debug)]
struct GateState {
    phase: PausePhase,
    /// Acquire holds a production permit
    producing: bool,
    acquire_finished: bool,
    aborted: bool,
}

/// Two-phase pause/resume handshake between external callers and Acquire
pub struct QuiescenceCoordinator {
    gate: Mutex<()>,
    state: Mutex<GateState>,
    changed: Condvar,
}

impl fmt::Debug for QuiescenceCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuiescenceCoordinator")
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl Default for QuiescenceCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl QuiescenceCoordinator {
    pub fn new() -> Self {
        Self {
            gate: Mutex::new(()),
            state: Mutex::new(GateState {
                phase: PausePhase::Running,
                producing: false,
                acquire_finished: false,
                aborted: false,
            }),
            changed: Condvar::new(),
        }
    }

    /// Current phase
    pub fn phase(&self) -> PausePhase {
        self.state.lock().phase
    }

    /// Whether a pause is requested or in effect
    pub fn is_pause_requested(&self) -> bool {
        self.phase() != PausePhase::Running
    }

    // ── Acquire side ────────────────────────────────────────────────

    /// Enter the production path.
    ///
    /// Blocks while a pause is requested or in effect. The returned permit
    /// marks Acquire as mid-production until it is dropped.
    pub fn begin_production(&self) -> Result<ProductionPermit<'_>> {
        let mut state = self.state.lock();
        if state.phase != PausePhase::Running && !state.aborted {
            debug!(phase = ?state.phase, "acquire held at pause gate");
        }
        while state.phase != PausePhase::Running && !state.aborted {
            self.changed.wait(&mut state);
        }
        if state.aborted {
            return Err(PipelineError::Aborted);
        }
        state.producing = true;
        Ok(ProductionPermit { coordinator: self })
    }

    /// Record that Acquire reached end-of-stream and will never produce again
    pub fn mark_acquire_finished(&self) {
        self.state.lock().acquire_finished = true;
        self.changed.notify_all();
    }

    /// Whether Acquire has terminated
    pub fn is_acquire_finished(&self) -> bool {
        self.state.lock().acquire_finished
    }

    fn end_production(&self) {
        self.state.lock().producing = false;
        self.changed.notify_all();
    }

    // ── Caller side ─────────────────────────────────────────────────

    /// Hold Acquire off and wait until `converged` holds.
    ///
    /// `converged` is re-evaluated after every cursor advance reported to
    /// `progress`. If Acquire has already terminated there is nothing left to
    /// hold off and the convergence wait is skipped.
    pub fn request_pause<F>(&self, progress: &ProgressSignal, converged: F) -> Result<PauseGuard<'_>>
    where
        F: FnMut() -> bool,
    {
        let gate = self.gate.lock();

        let acquire_finished = {
            let mut state = self.state.lock();
            state.phase = PausePhase::Requested;
            debug!("pause requested");
            while state.producing && !state.acquire_finished && !state.aborted {
                self.changed.wait(&mut state);
            }
            if state.aborted {
                state.phase = PausePhase::Running;
                return Err(PipelineError::Aborted);
            }
            state.acquire_finished
        };

        if !acquire_finished {
            if let Err(err) = progress.wait_until(converged) {
                self.resume();
                return Err(err);
            }
        }

        self.state.lock().phase = PausePhase::Paused;
        debug!(acquire_finished, "pipeline paused");

        Ok(PauseGuard {
            coordinator: self,
            _gate: gate,
        })
    }

    fn resume(&self) {
        self.state.lock().phase = PausePhase::Running;
        self.changed.notify_all();
    }

    /// Release everything blocked on the coordinator with an error
    pub fn abort(&self) {
        self.state.lock().aborted = true;
        self.changed.notify_all();
    }
}

/// Marks Acquire as mid-production; dropping it ends the production step
#[must_use = "dropping the permit immediately ends the production step"]
pub struct ProductionPermit<'a> {
    coordinator: &'a QuiescenceCoordinator,
}

impl Drop for ProductionPermit<'_> {
    fn drop(&mut self) {
        self.coordinator.end_production();
    }
}

/// An acknowledged pause. Acquire stays held until this guard is finished
/// or dropped.
#[must_use = "dropping the guard immediately resumes the pipeline"]
pub struct PauseGuard<'a> {
    coordinator: &'a QuiescenceCoordinator,
    _gate: MutexGuard<'a, ()>,
}

impl PauseGuard<'_> {
    /// Resume Acquire and release the gate
    pub fn finish(self) {}
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.resume();
        debug!("pause finished");
    }
}

impl fmt::Debug for PauseGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PauseGuard").finish_non_exhaustive()
    }
}
