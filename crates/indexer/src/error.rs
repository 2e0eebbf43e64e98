use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

/// Failures that abort the run.
#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("index storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }
}

/// Line- and task-scoped failures. These are collected and reported once the
/// run finishes; they never stop sibling work.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("{}: error accessing directory: {source}", path.display())]
    Access {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("command for {origin} ({source_tag}), line {line}: invalid number of fields: {found}")]
    MalformedRecord {
        origin: String,
        source_tag: String,
        line: usize,
        found: usize,
    },

    #[error("command for {origin} ({source_tag}), line {line}: not valid UTF-8")]
    UndecodableRecord {
        origin: String,
        source_tag: String,
        line: usize,
    },

    #[error("index line {line}: invalid number of fields: {found}")]
    MalformedIndexLine { line: usize, found: usize },

    /// The line is copied to the new index byte for byte.
    #[error("index line {line}: not valid UTF-8, kept unchanged")]
    UndecodableIndexLine { line: usize },

    #[error("command for {origin} ({source_tag}): {failure}")]
    Process {
        origin: String,
        source_tag: String,
        #[source]
        failure: ProcessFailure,
    },
}

#[derive(Error, Debug)]
pub enum ProcessFailure {
    #[error("error starting command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("stdout pipe unavailable")]
    Pipe,

    #[error("error reading stdout: {0}")]
    Read(#[source] std::io::Error),

    #[error("wait failed: {0}")]
    Wait(#[source] std::io::Error),

    #[error("exited with code: {code}")]
    Exit { code: i32 },

    #[error("terminated by signal")]
    Signal,

    #[error("timed out after {}s", after.as_secs_f64())]
    TimedOut { after: Duration },
}
