use std::io;


/// Returned by [`MapWriter::insert`](crate::MapWriter::insert) when asked to insert the
/// reserved sentinel footer key.
///
/// The footer key is used internally to terminate every level's forward chain; accepting it
/// as a user key would make it indistinguishable from the sentinel, corrupting traversal.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("cannot insert the reserved sentinel footer key")]
pub struct ReservedKeyError;

/// Failures that can occur while loading a snapshot written by
/// [`MapWriter::dump`](crate::MapWriter::dump).
#[derive(Debug, thiserror::Error)]
pub enum SnapshotLoadError {
    /// The snapshot file could not be read.
    #[error("failed to read snapshot file: {0}")]
    Io(#[from] io::Error),

    /// A line in the snapshot file was not valid `<key> <value>` text.
    #[error("malformed snapshot line {line_number}: {text:?}")]
    Parse {
        /// 1-indexed line number of the offending line.
        line_number: usize,
        /// The offending line's raw text.
        text:        String,
    },

    /// A well-formed line named the reserved sentinel footer key.
    #[error("snapshot line {line_number} names the reserved footer key")]
    ReservedKey {
        /// 1-indexed line number of the offending line.
        line_number: usize,
    },
}

/// Failures that can occur while dumping a snapshot.
///
/// Per the documented policy, a dump failure during orderly shutdown is logged and ignored by
/// callers (the process is already stopping); it is still a typed error so callers that dump
/// at other times can choose to handle it.
#[derive(Debug, thiserror::Error)]
#[error("failed to write snapshot file: {0}")]
pub struct SnapshotDumpError(#[from] pub io::Error);
