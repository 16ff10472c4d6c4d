//! Bounded fan-out ring buffer.
//!
//! One producer writes into a fixed ring of slots; every consumer role reads
//! the full sequence through its own cursor. The producer may only reuse a
//! slot once every role has read it, so it blocks while *any* role has
//! `capacity` unread items.

use crate::backpressure::ProgressSignal;
use crate::config::check_capacity;
use crate::error::{PipelineError, Result};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// The two independent readers of a pipeline buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumerRole {
    /// Observes units for tallying
    Count,
    /// Takes units onward to the next stage
    Consume,
}

impl ConsumerRole {
    /// Every role, in cursor order
    pub const ALL: [ConsumerRole; 2] = [ConsumerRole::Count, ConsumerRole::Consume];

    fn index(self) -> usize {
        match self {
            ConsumerRole::Count => 0,
            ConsumerRole::Consume => 1,
        }
    }

    /// Lowercase role name for logs
    pub fn as_str(self) -> &'static str {
        match self {
            ConsumerRole::Count => "count",
            ConsumerRole::Consume => "consume",
        }
    }
}

impl fmt::Display for ConsumerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read position and backlog of one consumer
#[derive(Debug, Default, Clone, Copy)]
struct ConsumerCursor {
    cursor: usize,
    /// Produced and not yet released, including `held`
    pending: usize,
    /// Taken but not committed; their slots stay reserved
    held: usize,
}

impl ConsumerCursor {
    fn available(&self) -> usize {
        self.pending - self.held
    }
}

struct Slot<T> {
    item: Option<T>,
    /// Consumers that have not read this slot yet
    unread: usize,
}

struct BufferState<T> {
    slots: Vec<Slot<T>>,
    producer_cursor: usize,
    consumers: Vec<ConsumerCursor>,
    closed: bool,
    aborted: bool,
}

impl<T> BufferState<T> {
    fn is_full(&self, capacity: usize) -> bool {
        self.consumers.iter().any(|c| c.pending == capacity)
    }
}

/// Fixed-capacity ring with one producer cursor and one cursor per consumer
pub struct RingBuffer<T> {
    name: &'static str,
    capacity: usize,
    state: Mutex<BufferState<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    progress: Arc<ProgressSignal>,
    producer_blocks: AtomicU64,
    consumer_blocks: AtomicU64,
}

impl<T> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("max_pending", &self.max_pending())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send> RingBuffer<T> {
    /// Create a buffer with the two standard consumer roles and its own
    /// progress signal
    pub fn new(name: &'static str, capacity: usize) -> Result<Self> {
        Self::with_progress(
            name,
            capacity,
            ConsumerRole::ALL.len(),
            Arc::new(ProgressSignal::new()),
        )
    }

    /// Create a buffer with `consumers` cursors that reports every cursor
    /// advance to `progress`
    pub fn with_progress(
        name: &'static str,
        capacity: usize,
        consumers: usize,
        progress: Arc<ProgressSignal>,
    ) -> Result<Self> {
        check_capacity(name, capacity)?;
        if consumers == 0 {
            return Err(PipelineError::ConfigError(format!(
                "{name} buffer needs at least one consumer"
            )));
        }

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| PipelineError::Allocation {
                buffer: name,
                capacity,
            })?;
        slots.extend((0..capacity).map(|_| Slot {
            item: None,
            unread: 0,
        }));

        Ok(Self {
            name,
            capacity,
            state: Mutex::new(BufferState {
                slots,
                producer_cursor: 0,
                consumers: vec![ConsumerCursor::default(); consumers],
                closed: false,
                aborted: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            progress,
            producer_blocks: AtomicU64::new(0),
            consumer_blocks: AtomicU64::new(0),
        })
    }

    /// Append `item`, blocking while any consumer is `capacity` items behind
    pub fn produce(&self, item: T) -> Result<()> {
        let mut state = self.state.lock();
        debug_assert!(!state.closed, "produce after close on {}", self.name);

        if state.is_full(self.capacity) && !state.aborted {
            self.producer_blocks.fetch_add(1, Ordering::Relaxed);
            trace!(buffer = self.name, "producer waiting for space");
        }
        while state.is_full(self.capacity) && !state.aborted {
            self.not_full.wait(&mut state);
        }
        if state.aborted {
            return Err(PipelineError::Aborted);
        }

        let index = state.producer_cursor;
        let readers = state.consumers.len();
        let slot = &mut state.slots[index];
        debug_assert_eq!(slot.unread, 0, "overwrote an unread slot");
        slot.item = Some(item);
        slot.unread = readers;

        state.producer_cursor = (index + 1) % self.capacity;
        for consumer in state.consumers.iter_mut() {
            consumer.pending += 1;
        }
        drop(state);

        self.not_empty.notify_all();
        self.progress.advance();
        Ok(())
    }

    /// Take the next item for `role`.
    ///
    /// Blocks while the role has nothing pending. Returns `Ok(None)` once the
    /// buffer is closed and the role has drained every item.
    pub fn consume(&self, role: ConsumerRole) -> Result<Option<T>> {
        self.consume_at(role.index())
    }

    /// Same as [`consume`](Self::consume) for buffers built with more than
    /// the two standard roles
    pub fn consume_at(&self, consumer: usize) -> Result<Option<T>> {
        self.read(consumer, false)
    }

    /// Read the next item for `role` without releasing its slot.
    ///
    /// The item still counts as pending for `role`, and the producer cannot
    /// reuse the slot, until [`commit`](Self::commit) is called.
    pub fn take(&self, role: ConsumerRole) -> Result<Option<T>> {
        self.read(role.index(), true)
    }

    fn read(&self, consumer: usize, hold: bool) -> Result<Option<T>> {
        let mut state = self.state.lock();
        if consumer >= state.consumers.len() {
            return Err(PipelineError::ConfigError(format!(
                "{} buffer has no consumer {consumer}",
                self.name
            )));
        }

        let idle = |s: &BufferState<T>| s.consumers[consumer].available() == 0 && !s.closed;
        if idle(&*state) && !state.aborted {
            self.consumer_blocks.fetch_add(1, Ordering::Relaxed);
            trace!(buffer = self.name, consumer, "consumer waiting for data");
        }
        while idle(&*state) && !state.aborted {
            self.not_empty.wait(&mut state);
        }
        if state.aborted {
            return Err(PipelineError::Aborted);
        }
        if state.consumers[consumer].available() == 0 {
            return Ok(None);
        }

        let index = state.consumers[consumer].cursor;
        let slot = &mut state.slots[index];
        slot.unread -= 1;
        // The last reader moves the unit out; earlier readers get a copy.
        let item = if slot.unread == 0 {
            slot.item.take()
        } else {
            slot.item.clone()
        };
        debug_assert!(item.is_some(), "read an empty slot");

        let cursor = &mut state.consumers[consumer];
        cursor.cursor = (index + 1) % self.capacity;
        if hold {
            cursor.held += 1;
            return Ok(item);
        }
        cursor.pending -= 1;
        drop(state);

        self.not_full.notify_one();
        self.progress.advance();
        Ok(item)
    }
}

impl<T> RingBuffer<T> {
    /// Release the oldest slot `role` has taken with [`take`](Self::take)
    pub fn commit(&self, role: ConsumerRole) {
        {
            let mut state = self.state.lock();
            let cursor = &mut state.consumers[role.index()];
            debug_assert!(cursor.held > 0, "commit without take on {}", self.name);
            if cursor.held == 0 {
                return;
            }
            cursor.held -= 1;
            cursor.pending -= 1;
        }
        self.not_full.notify_one();
        self.progress.advance();
    }

    /// Mark end-of-stream. Consumers drain what is left, then see `None`.
    ///
    /// Returns true on the first call only.
    pub fn close(&self) -> bool {
        let first = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.closed, true)
        };
        if first {
            self.not_empty.notify_all();
            self.progress.advance();
        }
        first
    }

    /// Wake every waiter and fail all further operations
    pub fn abort(&self) {
        self.state.lock().aborted = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Whether the producer has closed this buffer
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Items produced but not yet released by `role`; a taken, uncommitted
    /// item still counts
    pub fn pending(&self, role: ConsumerRole) -> usize {
        self.state.lock().consumers[role.index()].pending
    }

    /// Largest backlog across all consumers
    pub fn max_pending(&self) -> usize {
        self.state
            .lock()
            .consumers
            .iter()
            .map(|c| c.pending)
            .max()
            .unwrap_or(0)
    }

    /// Whether every consumer has read every produced item
    pub fn is_drained(&self) -> bool {
        self.max_pending() == 0
    }

    /// Buffer name used in logs and errors
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Fixed slot count
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of times the producer found the buffer full
    pub fn producer_blocks(&self) -> u64 {
        self.producer_blocks.load(Ordering::Relaxed)
    }

    /// Number of times a consumer found nothing to read
    pub fn consumer_blocks(&self) -> u64 {
        self.consumer_blocks.load(Ordering::Relaxed)
    }
}
