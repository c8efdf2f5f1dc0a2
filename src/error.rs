use std::path::PathBuf;

use thiserror::Error;

/// Result type for simulator operations.
pub type SimResult<T> = Result<T, SimError>;

/// Errors surfaced by the simulator outside of the cycle loop.
#[derive(Debug, Error)]
pub enum SimError {
    /// A workload template failed to load; the boot sequence is aborted.
    #[error("template {path:?}: {kind}")]
    Template {
        path: PathBuf,
        #[source]
        kind: TemplateError,
    },

    /// The templates directory could not be read.
    #[error("cannot read templates directory {0:?}")]
    TemplatesDirectory(PathBuf, #[source] std::io::Error),

    /// No usable template files were found, so there is nothing to simulate.
    #[error("no templates found in {0:?}")]
    NoTemplates(PathBuf),

    /// A boot request referenced more templates than were loaded.
    #[error("process counts given for {given} templates, but {loaded} are loaded")]
    WorkloadMismatch { given: usize, loaded: usize },
}

/// Ways a single workload template can be malformed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("first line must be `MEMORY_REQUIRED_MB: <integer>`")]
    MissingMemoryLine,

    #[error("memory requirement is not a positive integer: {0:?}")]
    InvalidMemoryValue(String),

    #[error("no operations were processed from template")]
    Empty,

    #[error("line {0}: new critical section formed before ending current one")]
    NestedCritical(usize),

    #[error("line {0}: ending a critical section where none exists")]
    UnmatchedCriticalEnd(usize),

    #[error("final critical section never terminated")]
    UnterminatedCritical,

    #[error("line {0}: unrecognized operation {1:?}")]
    UnknownOperation(usize, String),

    #[error("line {0}: cycle bound is not an integer: {1:?}")]
    InvalidCycleBound(usize, String),

    #[error("line {0}: min cycles must be less than max cycles")]
    InvalidCycleRange(usize),

    #[error("line {0}: wrong number of tokens")]
    WrongTokenCount(usize),
}
