//! Unified error type for the daemon and its satellite executables.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PygmalionError>;

/// All errors that can occur in store, scheduler, worker, and transport operations.
#[derive(Error, Debug)]
pub enum PygmalionError {
    /// I/O error (file read/write, socket, subprocess).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Store open/query/write failure.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Config file is present but fails to parse as YAML.
    #[error("failed to parse {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// Store schema version does not match what this build requires.
    /// Fatal at startup; no automatic migration is attempted (§7).
    #[error("schema version mismatch: store has ({0}, {1}), this build requires ({2}, {3})")]
    SchemaVersionMismatch(i64, i64, i64, i64),

    /// The project root does not contain a readable directory.
    #[error("project root does not exist or is not a directory: {0}")]
    ProjectRootNotFound(String),

    /// A semantic-index worker exited without sending `EndOfDefs` for its
    /// current translation unit (§7, worker failure).
    #[error("worker exited unexpectedly (pid {pid:?}) while analyzing {file}")]
    WorkerDied { pid: Option<u32>, file: String },

    /// A length/tag read off the wire did not match any known framing value.
    #[error("protocol desynchronization while reading {context}: {detail}")]
    ProtocolDesync { context: String, detail: String },

    /// A string on the wire was not valid UTF-16.
    #[error("invalid UTF-16 string on the wire: {0}")]
    InvalidWireString(String),

    /// The writer thread's reply channel was dropped before a reply arrived.
    #[error("request was cancelled before a reply was produced")]
    RequestCancelled,

    /// Could not connect to, or lost the connection to, the daemon socket.
    #[error("daemon not reachable at {path}: {source}")]
    DaemonUnreachable {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_display() {
        let err = PygmalionError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));
        assert!(err.to_string().contains("I/O error"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn schema_version_mismatch_display() {
        let err = PygmalionError::SchemaVersionMismatch(0, 7, 0, 8);
        let msg = err.to_string();
        assert!(msg.contains("(0, 7)"));
        assert!(msg.contains("(0, 8)"));
    }

    #[test]
    fn worker_died_display_without_pid() {
        let err = PygmalionError::WorkerDied {
            pid: None,
            file: "a.cpp".to_string(),
        };
        assert!(err.to_string().contains("a.cpp"));
    }

    #[test]
    fn io_error_from_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: PygmalionError = io_err.into();
        assert!(matches!(err, PygmalionError::Io(_)));
    }
}
