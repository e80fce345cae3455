use kv_skiplist::{SnapshotDumpError, SnapshotLoadError};

/// Failures that can prevent the service from starting or shutting down cleanly.
///
/// Per-connection protocol errors are handled inline by [`crate::server`] (a malformed request
/// closes that connection, nothing more); they are not modeled here.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The listening socket could not be bound.
    #[error("failed to bind TCP listener on port {port}: {source}")]
    Bind {
        /// The port that failed to bind.
        port:   u16,
        #[source]
        source: std::io::Error,
    },

    /// The snapshot file existed but could not be loaded at startup.
    #[error("failed to load snapshot at startup: {0}")]
    Snapshot(#[from] SnapshotLoadError),

    /// The snapshot file could not be written at orderly shutdown.
    #[error("failed to write snapshot at shutdown: {0}")]
    Shutdown(#[from] SnapshotDumpError),
}
