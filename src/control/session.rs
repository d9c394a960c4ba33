//! Operator control server.
//!
//! Serves one operator at a time over a plain text line protocol. Every
//! read is preceded by a `> ` prompt and every reply ends with a newline.
//! A session ends when the operator disconnects or sends `q`; only `q` also
//! stops the relay and the control loop.

use crate::control::command::{self, Command, ParseResult};
use crate::logging::{LogLevel, LogLevelControl};
use crate::runtime::{create_listener, RelayHandle};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::{debug, info, warn};

const GREETING: &str = "Control session established (? for available commands)";
const PROMPT: &[u8] = b"> ";

/// Longest command line accepted in one read.
const MAX_LINE: u64 = 1024;

const CONTROL_BACKLOG: i32 = 16;

/// Listener for operator sessions.
pub struct ControlServer {
    listener: TcpListener,
    relay: RelayHandle,
    levels: Arc<dyn LogLevelControl>,
}

impl ControlServer {
    /// Bind the control port. Failure here is fatal to startup.
    pub fn bind(
        addr: &str,
        relay: RelayHandle,
        levels: Arc<dyn LogLevelControl>,
    ) -> io::Result<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let listener = create_listener(addr, CONTROL_BACKLOG)?;
        listener.set_nonblocking(false)?;

        info!(addr = %listener.local_addr()?, "Control server listening");

        Ok(Self {
            listener,
            relay,
            levels,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept operators one after another until one of them quits.
    pub fn serve(self) {
        loop {
            let (stream, operator) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(ref e)
                    if e.kind() == io::ErrorKind::Interrupted
                        || e.kind() == io::ErrorKind::ConnectionAborted =>
                {
                    continue
                }
                Err(e) => {
                    warn!(error = %e, "Control accept failed, control server stopping");
                    return;
                }
            };

            info!(operator = %operator, "Control session established");

            let session = match Session::new(stream, &self.relay, self.levels.as_ref()) {
                Ok(session) => session,
                Err(e) => {
                    warn!(operator = %operator, error = %e, "Failed to set up control session");
                    continue;
                }
            };

            match session.run() {
                SessionEnd::Quit => break,
                SessionEnd::Disconnected => {
                    info!(operator = %operator, "Control session closed");
                }
            }
        }

        info!("Control server stopped");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Quit,
    Disconnected,
}

/// One connected operator.
struct Session<'a> {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    relay: &'a RelayHandle,
    levels: &'a dyn LogLevelControl,
}

impl<'a> Session<'a> {
    fn new(
        stream: TcpStream,
        relay: &'a RelayHandle,
        levels: &'a dyn LogLevelControl,
    ) -> io::Result<Self> {
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
            relay,
            levels,
        })
    }

    fn run(mut self) -> SessionEnd {
        self.send(GREETING);

        loop {
            self.prompt();

            let line = match self.read_line() {
                Some(line) => line,
                None => return SessionEnd::Disconnected,
            };

            match command::parse(&line) {
                ParseResult::Empty => {}
                ParseResult::Unknown(token) => self.send(&format!("{token} - no such command")),
                ParseResult::Complete(command) => {
                    if self.execute(command).is_break() {
                        return SessionEnd::Quit;
                    }
                }
            }
        }
    }

    fn execute(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Help => {
                for line in command::help_lines() {
                    self.send(&line);
                }
            }
            Command::Quit => {
                info!("Terminating application");
                self.relay.terminate();
                let _ = self.writer.shutdown(Shutdown::Both);
                return ControlFlow::Break(());
            }
            Command::ToggleForwarding => {
                let enabled = self.relay.toggle_forwarding();
                info!(was = !enabled, now = enabled, "Toggled data forwarding");
                self.send(if enabled {
                    "Data forwarding enabled"
                } else {
                    "Data forwarding disabled"
                });
            }
            Command::LogDebug => self.set_level(LogLevel::Debug),
            Command::LogInfo => self.set_level(LogLevel::Info),
        }
        ControlFlow::Continue(())
    }

    fn set_level(&mut self, level: LogLevel) {
        info!(level = %level, "Changing log level");
        match self.levels.set_level(level) {
            Ok(()) => self.send(&format!("Log level set to {level}")),
            Err(e) => {
                warn!(level = %level, error = %e, "Failed to change log level");
                self.send(&format!("Failed to change log level: {e}"));
            }
        }
    }

    /// Read one line. `None` means the operator is gone.
    fn read_line(&mut self) -> Option<String> {
        let mut buf = Vec::with_capacity(64);
        loop {
            buf.clear();
            match (&mut self.reader).take(MAX_LINE).read_until(b'\n', &mut buf) {
                Ok(0) => return None,
                Ok(_) => return Some(String::from_utf8_lossy(&buf).into_owned()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(error = %e, "Control receive failed");
                    return None;
                }
            }
        }
    }

    fn send(&mut self, msg: &str) {
        if let Err(e) = self.writer.write_all(format!("{msg}\n").as_bytes()) {
            debug!(error = %e, "Control send failed");
        }
    }

    fn prompt(&mut self) {
        if let Err(e) = self.writer.write_all(PROMPT) {
            debug!(error = %e, "Control prompt failed");
        }
    }
}
