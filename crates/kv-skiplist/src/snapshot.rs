#![expect(unsafe_code, reason = "walks the raw level-0 node chain to write a snapshot")]

use std::fmt::Display;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use crate::error::{SnapshotDumpError, SnapshotLoadError};
use crate::map::MapWriter;
use crate::node::SentinelKey;


impl<K, V> MapWriter<K, V>
where
    K: SentinelKey + Display + FromStr,
    V: Display + FromStr,
{
    /// Write every entry to `path`, one `<key> <value>` line per entry in level-0 ascending
    /// order. No header or trailer is written; an empty map produces an empty file.
    ///
    /// Intended to be called only from the single writer thread, typically at orderly shutdown.
    pub fn dump(&self, path: impl AsRef<Path>) -> Result<(), SnapshotDumpError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|err| {
            tracing::error!(path = %path.display(), %err, "failed to create snapshot file");
            SnapshotDumpError(err)
        })?;
        let mut out = BufWriter::new(file);

        // Safety: `header` is valid for the lifetime of the map, and the writer is the only
        // mutator, so walking the level-0 chain with relaxed loads cannot race a concurrent
        // write.
        let header = unsafe { &*self.shared_header() };
        let footer = self.shared_footer();

        let mut current = header.next_relaxed(0);
        let mut entries = 0_usize;
        while current != footer {
            // Safety: every node strictly between `header` and `footer` is live and has an
            // initialized value (it is not a sentinel).
            let node = unsafe { &*current };
            writeln!(out, "{} {}", node.key, unsafe { node.value_ref() })
                .map_err(SnapshotDumpError)?;
            current = node.next_relaxed(0);
            entries += 1;
        }

        out.flush().map_err(SnapshotDumpError)?;
        tracing::info!(path = %path.display(), entries, "wrote snapshot");
        Ok(())
    }

    /// Populate the map from a snapshot previously written by [`MapWriter::dump`].
    ///
    /// Must run before the map is exposed to any reader or writer besides this call: it inserts
    /// through the ordinary `insert` path (so it participates in the same hazard/GC bookkeeping),
    /// which would otherwise race concurrent traffic. A missing file is treated as an empty
    /// snapshot, not an error; a malformed line or a line naming the reserved footer key fails
    /// the whole load.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), SnapshotLoadError> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no snapshot file found, starting empty");
                return Ok(());
            },
            Err(err) => {
                tracing::error!(path = %path.display(), %err, "failed to open snapshot file");
                return Err(SnapshotLoadError::Io(err));
            },
        };

        let mut entries = 0_usize;
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line_number = index + 1;
            let line = line.map_err(SnapshotLoadError::Io)?;

            let mut tokens = line.split_whitespace();
            let (Some(key_text), Some(value_text), None) =
                (tokens.next(), tokens.next(), tokens.next())
            else {
                tracing::error!(line_number, text = %line, "malformed snapshot line");
                return Err(SnapshotLoadError::Parse { line_number, text: line });
            };

            let key = key_text.parse::<K>().map_err(|_| {
                tracing::error!(line_number, text = %line, "malformed snapshot line");
                SnapshotLoadError::Parse { line_number, text: line.clone() }
            })?;
            let value = value_text.parse::<V>().map_err(|_| {
                tracing::error!(line_number, text = %line, "malformed snapshot line");
                SnapshotLoadError::Parse { line_number, text: line.clone() }
            })?;

            self.insert(key, value).map_err(|_| {
                tracing::error!(line_number, "snapshot line names the reserved footer key");
                SnapshotLoadError::ReservedKey { line_number }
            })?;
            entries += 1;
        }

        tracing::info!(path = %path.display(), entries, "loaded snapshot");
        Ok(())
    }
}
