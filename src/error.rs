use thiserror::Error;

/// Result type for fanout pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while configuring or running the pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A buffer capacity below the two-slot minimum
    #[error("{buffer} buffer capacity must be greater than 1, got {capacity}")]
    InvalidCapacity {
        buffer: &'static str,
        capacity: usize,
    },

    /// Buffer storage could not be allocated
    #[error("Failed to allocate {capacity} slots for the {buffer} buffer")]
    Allocation {
        buffer: &'static str,
        capacity: usize,
    },

    /// A collaborator call failed inside a stage.
    ///
    /// Collaborators may return this directly; any other error they return
    /// is wrapped into it with the name of the stage it surfaced in.
    #[error("Stage {stage} failed: {message}")]
    StageError { stage: String, message: String },

    /// Thread spawn or join error
    #[error("Thread error: {0}")]
    ThreadError(String),

    /// The pipeline was torn down after another stage failed
    #[error("Pipeline aborted")]
    Aborted,

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O error from a source, sink or count log
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Whether this error only reports that some other stage failed first
    pub fn is_aborted(&self) -> bool {
        matches!(self, PipelineError::Aborted)
    }
}
