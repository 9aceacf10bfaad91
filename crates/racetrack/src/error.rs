use thiserror::Error;

use crate::TraceError;

/// Replay errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Trace(#[from] TraceError),
    #[error("detector error: {0}")]
    Detector(#[from] racetrack_core::Error),
    #[error("line {line}: {source}")]
    Event {
        line: usize,
        #[source]
        source: racetrack_core::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
