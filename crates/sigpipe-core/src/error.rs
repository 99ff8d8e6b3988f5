use thiserror::Error;

use crate::transform::ReassemblyError;

/// Why a transform could not process one envelope.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error(transparent)]
    Reassembly(#[from] ReassemblyError),

    #[error("payload decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("input rejected: {0}")]
    Rejected(String),

    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl TransformError {
    pub fn other(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Other(Box::new(err))
    }
}

#[derive(Debug, Error)]
pub enum PipeError {
    #[error("transform failed in pipe `{pipe}`: {source}")]
    Transform {
        pipe: String,
        #[source]
        source: TransformError,
    },

    #[error("worker of pipe `{pipe}` panicked: {message}")]
    WorkerPanicked { pipe: String, message: String },

    #[error("worker of pipe `{0}` was already joined")]
    AlreadyJoined(String),
}

/// Returned by `write` once the pipe is closed. The envelope is handed back.
#[derive(Debug, Error)]
#[error("pipe `{pipe}` is closed; write rejected")]
pub struct WriteRejected<T> {
    pipe: String,
    envelope: T,
}

impl<T> WriteRejected<T> {
    pub(crate) fn new(pipe: impl Into<String>, envelope: T) -> Self {
        Self {
            pipe: pipe.into(),
            envelope,
        }
    }

    pub fn pipe(&self) -> &str {
        &self.pipe
    }

    pub fn into_envelope(self) -> T {
        self.envelope
    }
}
