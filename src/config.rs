use crate::error::{PipelineError, Result};

/// Smallest buffer capacity the pipeline accepts.
///
/// With a single slot the full and empty conditions of a fan-out buffer alias
/// and the producer can wait on a consumer that is waiting on it.
pub const MIN_CAPACITY: usize = 2;

/// Default capacity used by [`PipelineConfig::default`]
pub const DEFAULT_CAPACITY: usize = 16;

/// Buffer sizing for the two halves of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Capacity of the buffer between Acquire and Transform
    pub input_capacity: usize,
    /// Capacity of the buffer between Transform and Emit
    pub output_capacity: usize,
}

impl PipelineConfig {
    /// Create a config with explicit capacities
    pub fn new(input_capacity: usize, output_capacity: usize) -> Self {
        Self {
            input_capacity,
            output_capacity,
        }
    }

    /// Reject capacities that would let the pipeline deadlock
    pub fn validate(&self) -> Result<()> {
        check_capacity("input", self.input_capacity)?;
        check_capacity("output", self.output_capacity)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_CAPACITY)
    }
}

pub(crate) fn check_capacity(buffer: &'static str, capacity: usize) -> Result<()> {
    if capacity < MIN_CAPACITY {
        return Err(PipelineError::InvalidCapacity { buffer, capacity });
    }
    Ok(())
}
