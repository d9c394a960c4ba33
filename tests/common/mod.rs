//! Shared fixtures for the relay integration tests.

#![allow(dead_code)]

use killerrabbit::config::Config;
use killerrabbit::logging::{LogLevel, LogLevelControl};
use killerrabbit::runtime::{RelayEngine, RelayHandle};
use std::error::Error;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Echo server that bounces every byte back, one thread per client.
pub fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        for stream in listener.incoming() {
            let mut stream = match stream {
                Ok(stream) => stream,
                Err(_) => continue,
            };
            thread::spawn(move || {
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    addr
}

pub fn relay_config(upstream: SocketAddr) -> Config {
    Config {
        listen: "127.0.0.1:0".to_string(),
        upstream: upstream.to_string(),
        control: "127.0.0.1:0".to_string(),
        connect_timeout: Duration::from_millis(500),
        poll_timeout: Duration::from_millis(50),
        ..Config::default()
    }
}

/// A relay engine running on its own thread.
pub struct RunningRelay {
    pub addr: SocketAddr,
    pub handle: RelayHandle,
    pub thread: JoinHandle<io::Result<()>>,
}

pub fn spawn_relay(config: &Config) -> RunningRelay {
    let engine = RelayEngine::bind(config).unwrap();
    let addr = engine.local_addr();
    let handle = engine.handle();
    let thread = thread::spawn(move || engine.run());

    RunningRelay {
        addr,
        handle,
        thread,
    }
}

pub fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    stream
}

/// Level control that only remembers what it was told.
#[derive(Default)]
pub struct RecordingLevels {
    pub levels: Mutex<Vec<LogLevel>>,
}

impl LogLevelControl for RecordingLevels {
    fn set_level(&self, level: LogLevel) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.levels.lock().unwrap().push(level);
        Ok(())
    }
}

/// Read from the control port up to and including the next prompt,
/// returning the reply lines before it.
pub fn read_until_prompt(stream: &mut TcpStream) -> Vec<String> {
    let mut text = Vec::new();
    let mut byte = [0u8; 1];

    while !text.ends_with(b"> ") {
        match stream.read(&mut byte) {
            Ok(0) => panic!("control session closed early: {:?}", String::from_utf8_lossy(&text)),
            Ok(_) => text.push(byte[0]),
            Err(e) => panic!("control read failed: {e}"),
        }
    }
    text.truncate(text.len() - 2);

    String::from_utf8(text)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Send a command and collect its reply lines.
pub fn command(stream: &mut TcpStream, line: &str) -> Vec<String> {
    stream.write_all(format!("{line}\n").as_bytes()).unwrap();
    read_until_prompt(stream)
}
