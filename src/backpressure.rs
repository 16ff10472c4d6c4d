//! Cross-buffer progress notification.
//!
//! Each [`RingBuffer`](crate::buffer::RingBuffer) gates its own producer and
//! consumers with buffer-local condition variables. Some waits depend on the
//! state of *both* buffers at once (the quiescence convergence wait), so every
//! cursor advance also bumps a shared epoch here. Waiters read the epoch,
//! evaluate their predicate without holding this lock, and sleep only while the
//! epoch is unchanged, so no advance between the check and the sleep is lost.

use crate::error::{PipelineError, Result};
use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct ProgressState {
    epoch: u64,
    aborted: bool,
}

/// Epoch counter bumped on every produce and consume across the pipeline
#[derive(Debug, Default)]
pub struct ProgressSignal {
    state: Mutex<ProgressState>,
    changed: Condvar,
}

impl ProgressSignal {
    /// Create a new signal at epoch zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Current epoch
    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    /// Record that some cursor moved and wake every waiter
    pub fn advance(&self) {
        {
            let mut state = self.state.lock();
            state.epoch = state.epoch.wrapping_add(1);
        }
        self.changed.notify_all();
    }

    /// Block until the epoch differs from `seen`, returning the new epoch
    pub fn wait_past(&self, seen: u64) -> Result<u64> {
        let mut state = self.state.lock();
        while state.epoch == seen && !state.aborted {
            self.changed.wait(&mut state);
        }
        if state.aborted {
            return Err(PipelineError::Aborted);
        }
        Ok(state.epoch)
    }

    /// Block until `ready` returns true.
    ///
    /// `ready` runs without this signal's lock held, so it may take buffer
    /// locks freely.
    pub fn wait_until<F>(&self, mut ready: F) -> Result<()>
    where
        F: FnMut() -> bool,
    {
        loop {
            let seen = {
                let state = self.state.lock();
                if state.aborted {
                    return Err(PipelineError::Aborted);
                }
                state.epoch
            };
            if ready() {
                return Ok(());
            }
            self.wait_past(seen)?;
        }
    }

    /// Fail every current and future wait with [`PipelineError::Aborted`]
    pub fn abort(&self) {
        self.state.lock().aborted = true;
        self.changed.notify_all();
    }

    /// Whether [`abort`](Self::abort) has been called
    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }
}
