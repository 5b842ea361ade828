//! Error types for the fitting engine.
//!
//! Per-candidate fit failures are not errors; they are reported through
//! [`FitStatus`](crate::FitStatus). These variants cover the queue, the worker
//! threads and malformed input.

use thiserror::Error;

/// Errors raised by the engine and its collaborators.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Job queue is closed")]
    QueueClosed,

    #[error("Fit engine has already been stopped")]
    EngineStopped,

    #[error("Failed to spawn fit worker {id}: {source}")]
    Spawn {
        id: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Fit worker {id} panicked")]
    WorkerPanicked { id: usize },

    #[error("Fit worker {id} terminated: {source}")]
    WorkerFailed {
        id: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("Frame data has {actual} pixels, expected {expected}")]
    InvalidFrame { expected: usize, actual: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
