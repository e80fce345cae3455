//! Serializes concurrent write requests against a [`kv_skiplist::MapWriter`] through a bounded
//! MPSC queue and one dedicated writer thread.
//!
//! Any number of [`WriteQueue`] handles (cheaply `Clone`, `Send`, `Sync`) may be shared across
//! connection-handling threads; each enqueues a tagged [`WriteOp`] and blocks only on its own
//! single-shot reply, never on the map itself. Exactly one writer thread, spawned by
//! [`spawn_writer`], drains the queue and applies operations to the map in the order it receives
//! them.

use std::fmt::{self, Debug, Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::TrySendError;
use kv_skiplist::{MapWriter, ReservedKeyError, SentinelKey, SnapshotDumpError};


/// Returned when a write cannot be enqueued because the writer's queue is at capacity, or the
/// writer thread has already exited.
///
/// Per the documented fast-fail policy, callers should surface this to their own caller (e.g.
/// as a 404/failure response) rather than retrying indefinitely.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("write queue is full or the writer thread has stopped")]
pub struct QueueFull;

/// A single mutation (or snapshot instruction) destined for the writer thread, paired with a
/// single-shot reply channel back to whichever thread enqueued it.
enum WriteOp<K, V> {
    Put {
        key:   K,
        value: V,
        reply: mpsc::Sender<Result<bool, ReservedKeyError>>,
    },
    Remove {
        key:   K,
        reply: mpsc::Sender<Option<V>>,
    },
    Dump {
        path:  PathBuf,
        reply: mpsc::Sender<Result<(), SnapshotDumpError>>,
    },
}

/// A cloneable handle used to enqueue writes for the single writer thread to apply.
///
/// Dropping every clone of a given map's `WriteQueue` closes the underlying channel, which is
/// how the writer thread in [`spawn_writer`] learns to stop: it drains whatever is already
/// queued, then returns.
pub struct WriteQueue<K, V> {
    sender: crossbeam_channel::Sender<WriteOp<K, V>>,
}

impl<K, V> Clone for WriteQueue<K, V> {
    fn clone(&self) -> Self {
        Self { sender: self.sender.clone() }
    }
}

impl<K, V> Debug for WriteQueue<K, V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteQueue").finish_non_exhaustive()
    }
}

impl<K, V> WriteQueue<K, V> {
    /// Enqueue an insert/update of `key` to `value`, and block for the writer thread's reply.
    ///
    /// Returns `Ok(Ok(true))` for a fresh insert, `Ok(Ok(false))` for an update, `Ok(Err(_))` if
    /// `key` is the reserved footer key, and `Err(QueueFull)` if the request could not be
    /// enqueued at all.
    pub fn put(&self, key: K, value: V) -> Result<Result<bool, ReservedKeyError>, QueueFull> {
        let (reply, response) = mpsc::channel();
        self.enqueue(WriteOp::Put { key, value, reply })?;
        Ok(response.recv().expect("writer thread dropped the reply sender without replying"))
    }

    /// Enqueue a removal of `key`, and block for the writer thread's reply.
    pub fn remove(&self, key: K) -> Result<Option<V>, QueueFull> {
        let (reply, response) = mpsc::channel();
        self.enqueue(WriteOp::Remove { key, reply })?;
        Ok(response.recv().expect("writer thread dropped the reply sender without replying"))
    }

    /// Enqueue a snapshot dump to `path`, serialized through the same single-writer discipline
    /// as every other write (so it never races a concurrent `insert`/`remove`), and block for
    /// the writer thread's reply.
    pub fn dump(&self, path: impl Into<PathBuf>) -> Result<Result<(), SnapshotDumpError>, QueueFull> {
        let (reply, response) = mpsc::channel();
        self.enqueue(WriteOp::Dump { path: path.into(), reply })?;
        Ok(response.recv().expect("writer thread dropped the reply sender without replying"))
    }

    fn enqueue(&self, op: WriteOp<K, V>) -> Result<(), QueueFull> {
        self.sender.try_send(op).map_err(|err| {
            match err {
                TrySendError::Full(_)       => tracing::warn!("write queue is full, rejecting request"),
                TrySendError::Disconnected(_) => tracing::warn!("writer thread has exited, rejecting request"),
            }
            QueueFull
        })
    }
}

/// Spawn the dedicated writer thread for `map_writer`, fed by a bounded queue of capacity
/// `queue_capacity`.
///
/// Returns a [`WriteQueue`] handle to clone across caller threads, and a [`JoinHandle`] that
/// yields the [`MapWriter`] back once every `WriteQueue` clone has been dropped and the queue has
/// drained. Callers that want an orderly shutdown should enqueue a final [`WriteQueue::dump`],
/// drop every clone of the queue, and then join the handle.
pub fn spawn_writer<K, V>(
    mut map_writer: MapWriter<K, V>,
    queue_capacity: usize,
) -> (WriteQueue<K, V>, JoinHandle<MapWriter<K, V>>)
where
    K: SentinelKey + Display + FromStr + Send + 'static,
    V: Display + FromStr + Send + 'static,
{
    let (sender, receiver) = crossbeam_channel::bounded(queue_capacity);

    let handle = thread::spawn(move || {
        for op in receiver {
            match op {
                WriteOp::Put { key, value, reply } => {
                    let result = map_writer.insert(key, value);
                    let _ignored_if_caller_stopped_waiting = reply.send(result);
                },
                WriteOp::Remove { key, reply } => {
                    let result = map_writer.remove(&key);
                    let _ignored_if_caller_stopped_waiting = reply.send(result);
                },
                WriteOp::Dump { path, reply } => {
                    let result = dump_and_log(&map_writer, &path);
                    let _ignored_if_caller_stopped_waiting = reply.send(result);
                },
            }
        }

        tracing::info!("write queue closed, writer thread stopping");
        map_writer
    });

    (WriteQueue { sender }, handle)
}

fn dump_and_log<K, V>(map_writer: &MapWriter<K, V>, path: &Path) -> Result<(), SnapshotDumpError>
where
    K: SentinelKey + Display + FromStr,
    V: Display + FromStr,
{
    map_writer.dump(path).inspect_err(|err| {
        // A dump failure during shutdown is logged and otherwise ignored by callers: the
        // process is already stopping, and there is nothing further to roll back.
        tracing::error!(%err, path = %path.display(), "failed to write snapshot");
    })
}

#[cfg(test)]
mod tests {
    use kv_skiplist::MapWriter;

    use super::*;

    #[test]
    fn put_get_via_the_queue_round_trips() {
        let (writer, _reader) = MapWriter::<i32, String>::new(1);
        let (queue, handle) = spawn_writer(writer, 8);

        assert!(queue.put(1, "a".to_owned()).unwrap().unwrap());
        assert!(!queue.put(1, "b".to_owned()).unwrap().unwrap());

        drop(queue);
        let writer = handle.join().unwrap();
        assert_eq!(writer.len(), 1);
    }

    #[test]
    fn remove_via_the_queue_returns_the_prior_value() {
        let (writer, _reader) = MapWriter::<i32, String>::new(1);
        let (queue, handle) = spawn_writer(writer, 8);

        queue.put(5, "x".to_owned()).unwrap().unwrap();
        assert_eq!(queue.remove(5).unwrap(), Some("x".to_owned()));
        assert_eq!(queue.remove(5).unwrap(), None);

        drop(queue);
        handle.join().unwrap();
    }

    #[test]
    fn dump_through_the_queue_writes_a_file() {
        let (writer, _reader) = MapWriter::<i32, String>::new(1);
        let (queue, handle) = spawn_writer(writer, 8);

        queue.put(1, "a".to_owned()).unwrap().unwrap();
        let file = tempfile::NamedTempFile::new().unwrap();
        queue.dump(file.path()).unwrap().unwrap();

        drop(queue);
        handle.join().unwrap();

        let contents = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(contents, "1 a\n");
    }

    #[test]
    fn dropping_the_last_queue_handle_lets_the_writer_thread_exit() {
        let (writer, _reader) = MapWriter::<i32, String>::new(1);
        let (queue, handle) = spawn_writer(writer, 8);
        drop(queue);
        handle.join().unwrap();
    }
}
