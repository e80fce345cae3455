#![allow(unused_crate_dependencies, reason = "These are tests, not the main crate.")]

//! Drives a running [`Service`] over a real TCP socket and checks the wire responses match the
//! documented service contract.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::atomic::Ordering;

use kv_service::{Config, Service};

fn config_with_ephemeral_port(dump_file: impl Into<std::path::PathBuf>) -> Config {
    Config {
        port: 0,
        dump_file: dump_file.into(),
        ..Config::default()
    }
}

fn send(addr: std::net::SocketAddr, line: &str) -> String {
    let mut stream = TcpStream::connect(addr).unwrap();
    writeln!(stream, "{line}").unwrap();
    let mut reply = String::new();
    BufReader::new(stream).read_line(&mut reply).unwrap();
    reply.trim_end().to_owned()
}

/// Start `service`'s accept loop on a scoped thread, run `with_addr` against it, then signal
/// shutdown and persist the final snapshot.
fn drive(service: &Service, with_addr: impl FnOnce(std::net::SocketAddr)) {
    let addr = service.local_addr().unwrap();
    std::thread::scope(|scope| {
        let handle = scope.spawn(|| service.serve());
        with_addr(addr);
        service.stop_flag().store(true, Ordering::Release);
        handle.join().unwrap();
    });
}

#[test]
fn put_then_get_returns_the_stored_value() {
    let dump_file = tempfile::NamedTempFile::new().unwrap();
    let service = Service::start(config_with_ephemeral_port(dump_file.path())).unwrap();

    drive(&service, |addr| {
        assert_eq!(send(addr, "PUT 1 a req-1"), "200 req-1 ok");
        assert_eq!(send(addr, "GET 1 req-2"), "200 req-2 a");
    });

    service.shutdown().unwrap();
}

#[test]
fn get_on_an_empty_map_is_a_miss() {
    let dump_file = tempfile::NamedTempFile::new().unwrap();
    let service = Service::start(config_with_ephemeral_port(dump_file.path())).unwrap();

    drive(&service, |addr| {
        assert_eq!(send(addr, "GET 42 req-1"), "404 req-1 not_found");
    });

    service.shutdown().unwrap();
}

#[test]
fn put_twice_updates_in_place() {
    let dump_file = tempfile::NamedTempFile::new().unwrap();
    let service = Service::start(config_with_ephemeral_port(dump_file.path())).unwrap();

    drive(&service, |addr| {
        assert_eq!(send(addr, "PUT 1 a req-1"), "200 req-1 ok");
        assert_eq!(send(addr, "PUT 1 b req-2"), "200 req-2 ok");
        assert_eq!(send(addr, "GET 1 req-3"), "200 req-3 b");
    });

    service.shutdown().unwrap();
}

#[test]
fn remove_then_get_is_a_miss_and_repeat_remove_is_a_miss() {
    let dump_file = tempfile::NamedTempFile::new().unwrap();
    let service = Service::start(config_with_ephemeral_port(dump_file.path())).unwrap();

    drive(&service, |addr| {
        assert_eq!(send(addr, "PUT 5 x req-1"), "200 req-1 ok");
        assert_eq!(send(addr, "REMOVE 5 req-2"), "200 req-2 x");
        assert_eq!(send(addr, "GET 5 req-3"), "404 req-3 not_found");
        assert_eq!(send(addr, "REMOVE 5 req-4"), "404 req-4 not_found");
    });

    service.shutdown().unwrap();
}

#[test]
fn a_malformed_request_line_gets_a_400_without_closing_other_requests() {
    let dump_file = tempfile::NamedTempFile::new().unwrap();
    let service = Service::start(config_with_ephemeral_port(dump_file.path())).unwrap();

    drive(&service, |addr| {
        assert_eq!(send(addr, "FROB nonsense"), "400  malformed_request");
        assert_eq!(send(addr, "PUT 1 a req-1"), "200 req-1 ok");
    });

    service.shutdown().unwrap();
}

#[test]
fn shutdown_persists_a_snapshot_that_the_next_startup_loads() {
    let dump_file = tempfile::NamedTempFile::new().unwrap();
    let config = config_with_ephemeral_port(dump_file.path());
    let service = Service::start(config.clone()).unwrap();

    drive(&service, |addr| {
        assert_eq!(send(addr, "PUT 1 a req-1"), "200 req-1 ok");
        assert_eq!(send(addr, "PUT 3 c req-2"), "200 req-2 ok");
        assert_eq!(send(addr, "PUT 2 b req-3"), "200 req-3 ok");
    });
    service.shutdown().unwrap();

    let contents = std::fs::read_to_string(&config.dump_file).unwrap();
    assert_eq!(contents, "1 a\n2 b\n3 c\n");

    // Restart into a fresh service and confirm the snapshot round-tripped.
    let reloaded = Service::start(config).unwrap();
    drive(&reloaded, |addr| {
        assert_eq!(send(addr, "GET 2 req-4"), "200 req-4 b");
    });
    reloaded.shutdown().unwrap();
}
