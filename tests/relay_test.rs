//! End-to-end relay tests against an echo upstream.

mod common;

use common::{connect, relay_config, spawn_echo_server, spawn_relay};
use std::io::{Read, Write};
use std::net::TcpStream;

#[test]
fn test_bytes_echo_through_relay() {
    let echo = spawn_echo_server();
    let relay = spawn_relay(&relay_config(echo));

    let mut client = connect(relay.addr);
    for tx in 0u8..42 {
        client.write_all(&[tx]).unwrap();
        let mut rx = [0u8; 1];
        client.read_exact(&mut rx).unwrap();
        assert_eq!(rx[0], tx);
    }
    drop(client);

    relay.handle.terminate();
    relay.thread.join().unwrap().unwrap();
}

#[test]
fn test_sequential_clients_each_get_a_pair() {
    let echo = spawn_echo_server();
    let relay = spawn_relay(&relay_config(echo));

    for round in 0..3u8 {
        let mut client = connect(relay.addr);
        let msg = [round; 32];
        client.write_all(&msg).unwrap();
        let mut echoed = [0u8; 32];
        client.read_exact(&mut echoed).unwrap();
        assert_eq!(echoed, msg);
    }

    relay.handle.terminate();
    relay.thread.join().unwrap().unwrap();
}

#[test]
fn test_concurrent_clients_stay_separate() {
    let echo = spawn_echo_server();
    let relay = spawn_relay(&relay_config(echo));

    let mut a = connect(relay.addr);
    let mut b = connect(relay.addr);

    a.write_all(b"from a").unwrap();
    b.write_all(b"from b").unwrap();

    let mut buf = [0u8; 6];
    b.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"from b");
    a.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"from a");

    relay.handle.terminate();
    relay.thread.join().unwrap().unwrap();
}

#[test]
fn test_dead_upstream_closes_client() {
    let dead = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let relay = spawn_relay(&relay_config(dead));

    let mut client = connect(relay.addr);
    let mut buf = [0u8; 8];
    match client.read(&mut buf) {
        Ok(0) => {}
        Err(ref e) if e.kind() == std::io::ErrorKind::ConnectionReset => {}
        other => panic!("expected closed connection, got {other:?}"),
    }

    relay.handle.terminate();
    relay.thread.join().unwrap().unwrap();
}

#[test]
fn test_terminate_releases_listener() {
    let echo = spawn_echo_server();
    let relay = spawn_relay(&relay_config(echo));
    let addr = relay.addr;

    relay.handle.terminate();
    relay.thread.join().unwrap().unwrap();

    assert!(TcpStream::connect(addr).is_err());
}
