//! The TCP accept loop and per-connection request handler.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use kv_skiplist::{MapWriter, OrderedMap};
use kv_writer::{spawn_writer, WriteQueue};

use crate::config::Config;
use crate::error::ServiceError;
use crate::protocol::{parse_request, Request, Response};

/// How long an accept-loop poll blocks before re-checking the stop flag.
///
/// Chosen so `shutdown` returns promptly without busy-spinning the accept thread.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A running instance of the key/value service: a bound listener, a reader handle shared with
/// every connection thread, and the single writer thread serializing mutations.
///
/// There is no signal-handling machinery here; callers that want orderly shutdown on, say,
/// `Ctrl+C` are expected to wire that up themselves and call [`Service::shutdown`].
pub struct Service {
    listener:      TcpListener,
    reader:        OrderedMap<i32, String>,
    queue:         WriteQueue<i32, String>,
    writer_handle: Option<JoinHandle<MapWriter<i32, String>>>,
    dump_file:     PathBuf,
    stopping:      Arc<AtomicBool>,
}

impl Service {
    /// Load any existing snapshot, spawn the writer thread, and bind the listening socket.
    pub fn start(config: Config) -> Result<Self, ServiceError> {
        let (mut map_writer, reader) = MapWriter::<i32, String>::new(0x5EED);

        map_writer.load(&config.dump_file)?;

        let (queue, writer_handle) = spawn_writer(map_writer, config.write_queue_capacity);

        let listener = TcpListener::bind(("0.0.0.0", config.port))
            .map_err(|source| ServiceError::Bind { port: config.port, source })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ServiceError::Bind { port: config.port, source })?;

        tracing::info!(port = config.port, dump_file = %config.dump_file.display(), "service started");

        Ok(Self {
            listener,
            reader,
            queue,
            writer_handle: Some(writer_handle),
            dump_file: config.dump_file,
            stopping: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Run the accept loop on the calling thread until [`Service::shutdown`] is called from
    /// another thread (or a clone of the stop flag is otherwise set).
    ///
    /// Each accepted connection is handled on its own spawned thread; this method returns once
    /// the stop flag is observed, without waiting for in-flight connections to finish.
    pub fn serve(&self) {
        for stream in self.incoming() {
            let reader = self.reader.clone();
            let queue = self.queue.clone();
            thread::spawn(move || handle_connection(stream, reader, queue));
        }
    }

    fn incoming(&self) -> impl Iterator<Item = TcpStream> + '_ {
        std::iter::from_fn(move || {
            loop {
                if self.stopping.load(Ordering::Acquire) {
                    return None;
                }
                match self.listener.accept() {
                    Ok((stream, _addr)) => return Some(stream),
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(ACCEPT_POLL_INTERVAL);
                    },
                    Err(err) => {
                        tracing::warn!(%err, "error accepting connection");
                        thread::sleep(ACCEPT_POLL_INTERVAL);
                    },
                }
            }
        })
    }

    /// Stop the accept loop, write a final snapshot, and join the writer thread.
    ///
    /// Safe to call from a different thread than the one running [`Service::serve`]; that is in
    /// fact the expected usage (e.g. a signal handler the caller installs).
    pub fn shutdown(mut self) -> Result<(), ServiceError> {
        self.stopping.store(true, Ordering::Release);

        match self.queue.dump(self.dump_file.clone()) {
            Ok(result) => result?,
            Err(_queue_full) => tracing::warn!("write queue full at shutdown, snapshot not written"),
        }

        drop(self.queue);

        if let Some(handle) = self.writer_handle.take() {
            // The writer thread can only still be running if it panicked; joining surfaces
            // that rather than silently dropping it.
            handle.join().expect("writer thread panicked");
        }

        Ok(())
    }

    /// A clone of the stop flag [`Service::serve`] watches, for callers that want to trigger
    /// shutdown from outside (e.g. a signal handler) without holding the `Service` itself.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stopping)
    }

    /// The address actually bound, useful when [`Config::port`](crate::Config::port) was `0`
    /// and the OS chose an ephemeral port (e.g. in tests).
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }
}

fn handle_connection(stream: TcpStream, reader: OrderedMap<i32, String>, queue: WriteQueue<i32, String>) {
    let peer = stream.peer_addr().ok();
    let mut writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(err) => {
            tracing::warn!(%err, "failed to clone connection for writing");
            return;
        },
    };
    let mut lines = BufReader::new(stream).lines();

    while let Some(line) = lines.next() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(?peer, %err, "error reading from connection");
                return;
            },
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = dispatch(&line, &reader, &queue);
        if writeln!(writer, "{response}").is_err() {
            tracing::warn!(?peer, "error writing response, closing connection");
            return;
        }
    }
}

fn dispatch(line: &str, reader: &OrderedMap<i32, String>, queue: &WriteQueue<i32, String>) -> Response {
    let request = match parse_request(line) {
        Ok(request) => request,
        Err(_) => return Response::malformed(),
    };

    match request {
        Request::Get { key, request_id } => match reader.search(&key) {
            Some(value) => Response::ok(request_id, value),
            None => Response::not_found(request_id),
        },
        Request::Put { key, value, request_id } => match queue.put(key, value) {
            Ok(Ok(_fresh_insert)) => Response::ok(request_id, "ok"),
            Ok(Err(_reserved_key)) => Response::reserved_key(request_id),
            Err(_queue_full) => Response::queue_full(request_id),
        },
        Request::Remove { key, request_id } => match queue.remove(key) {
            Ok(Some(value)) => Response::ok(request_id, value),
            Ok(None) => Response::not_found(request_id),
            Err(_queue_full) => Response::queue_full(request_id),
        },
    }
}
