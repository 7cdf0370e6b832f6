//! Error types for isobatch operations.
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that stop a batch before any image is touched.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("source directory '{0}' does not exist")]
    SourceMissing(PathBuf),

    #[error("source '{0}' is not a directory")]
    NotADirectory(PathBuf),

    #[error("failed to create output directory '{0}': {1}")]
    OutputDir(PathBuf, #[source] io::Error),

    #[error("failed to enumerate images under '{0}': {1}")]
    Enumerate(PathBuf, #[source] walkdir::Error),
}

/// Failure of an attach or detach request.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("{0}")]
    Other(String),
}

/// Failure reported by a dumping capability.
#[derive(Debug, Error)]
pub enum DumpError {
    #[error("I/O error at '{0}': {1}")]
    Io(PathBuf, #[source] io::Error),

    #[error("nothing to dump under '{0}'")]
    Empty(PathBuf),

    #[error("verification failed for '{0}': hash mismatch")]
    Verify(PathBuf),

    #[error("failed to run dumper {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("dumper {program} exited with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },
}
