//! mio event loop for the relay.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! ## Socket lifecycle
//!
//! Every accepted client is paired with a fresh upstream connection. Both
//! sockets live in one slab (slab index == poll token) and are linked in the
//! [`ChannelTable`]. A pair is created whole on accept and torn down whole on
//! close; an EOF or error on either side closes both.

use crate::config::Config;
use crate::runtime::channel::ChannelTable;
use crate::runtime::handle::RelayHandle;
use crate::runtime::socket;
use bytes::{Buf, BytesMut};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use slab::Slab;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const WAKER_TOKEN: Token = Token(usize::MAX - 1);

const MAX_EVENTS: usize = 256;

/// Reads from a socket pause once its peer has this many read buffers queued.
const PENDING_LIMIT_BUFFERS: usize = 64;

/// Which end of a pair a socket is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Downstream,
    Upstream,
}

/// One relayed socket.
struct Endpoint {
    stream: TcpStream,
    addr: SocketAddr,
    side: Side,
    /// Bytes destined for this socket that it has not accepted yet.
    pending: BytesMut,
}

impl Endpoint {
    fn new(stream: TcpStream, addr: SocketAddr, side: Side) -> Self {
        Self {
            stream,
            addr,
            side,
            pending: BytesMut::new(),
        }
    }
}

/// Readiness copied out of an event so the batch can be walked while the
/// engine mutates itself.
#[derive(Debug, Clone, Copy)]
struct Ready {
    token: Token,
    readable: bool,
    writable: bool,
}

impl Ready {
    fn from_event(event: &mio::event::Event) -> Self {
        Self {
            token: event.token(),
            readable: event.is_readable() || event.is_read_closed() || event.is_error(),
            writable: event.is_writable(),
        }
    }
}

/// Single-threaded relay between downstream clients and one upstream target.
pub struct RelayEngine {
    poll: Poll,
    events: Events,
    ready: Vec<Ready>,
    listener: TcpListener,
    local_addr: SocketAddr,
    upstream: Vec<SocketAddr>,
    connect_timeout: Duration,
    poll_timeout: Duration,
    sockets: Slab<Endpoint>,
    channels: ChannelTable,
    read_buf: Vec<u8>,
    pending_limit: usize,
    handle: RelayHandle,
}

impl RelayEngine {
    /// Bind the relay listener and resolve the upstream target.
    ///
    /// Any failure here is fatal to startup.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let addr: SocketAddr = config
            .listen
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let upstream = socket::resolve(&config.upstream)?;

        let poll = Poll::new()?;
        let mut listener = TcpListener::from_std(socket::create_listener(addr, config.backlog)?);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        let local_addr = listener.local_addr()?;

        info!(
            addr = %local_addr,
            upstream = %config.upstream,
            "Relay listening"
        );

        Ok(Self {
            poll,
            events: Events::with_capacity(MAX_EVENTS),
            ready: Vec::with_capacity(MAX_EVENTS),
            listener,
            local_addr,
            upstream,
            connect_timeout: config.connect_timeout,
            poll_timeout: config.poll_timeout,
            sockets: Slab::new(),
            channels: ChannelTable::new(),
            read_buf: vec![0u8; config.buffer_size],
            pending_limit: config.buffer_size * PENDING_LIMIT_BUFFERS,
            handle: RelayHandle::new(waker),
        })
    }

    /// Handle for flipping flags from another thread.
    pub fn handle(&self) -> RelayHandle {
        self.handle.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of live connection pairs.
    pub fn pair_count(&self) -> usize {
        self.channels.pairs()
    }

    /// Number of relayed sockets registered with the poller.
    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    /// Run until the termination flag is set.
    ///
    /// All sockets, the listener included, are closed when this returns.
    pub fn run(mut self) -> io::Result<()> {
        info!("Relay engine started");

        while !self.handle.is_terminated() {
            self.poll_once(Some(self.poll_timeout))?;
        }

        info!(pairs = self.channels.pairs(), "Relay engine stopped");
        Ok(())
    }

    /// Wait for one batch of readiness events and process all of it.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        let mut ready = std::mem::take(&mut self.ready);
        ready.clear();
        ready.extend(self.events.iter().map(Ready::from_event));

        for r in &ready {
            match r.token {
                LISTENER_TOKEN => self.accept_all(),
                WAKER_TOKEN => debug!("Relay engine woken"),
                token => {
                    if r.writable {
                        self.flush(token);
                    }
                    if r.readable {
                        self.receive(token);
                    }
                }
            }
        }

        self.ready = ready;
        Ok(())
    }

    fn accept_all(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => self.on_accept(stream, addr),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e)
                    if e.kind() == io::ErrorKind::Interrupted
                        || e.kind() == io::ErrorKind::ConnectionAborted =>
                {
                    continue
                }
                Err(e) => {
                    warn!(error = %e, "Accept error");
                    break;
                }
            }
        }
    }

    fn on_accept(&mut self, client: TcpStream, client_addr: SocketAddr) {
        let upstream = match socket::connect_upstream(&self.upstream, self.connect_timeout) {
            Ok(stream) => TcpStream::from_std(stream),
            Err(e) => {
                warn!(
                    upstream = ?self.upstream,
                    error = %e,
                    "Cannot connect to upstream"
                );
                warn!(client = %client_addr, "Closing connection with client");
                drop(client);
                return;
            }
        };
        let _ = client.set_nodelay(true);
        let upstream_addr = upstream.peer_addr().unwrap_or(self.upstream[0]);

        let down = Token(
            self.sockets
                .insert(Endpoint::new(client, client_addr, Side::Downstream)),
        );
        let up = Token(
            self.sockets
                .insert(Endpoint::new(upstream, upstream_addr, Side::Upstream)),
        );

        if let Err(e) = self.register(down).and_then(|_| self.register(up)) {
            warn!(client = %client_addr, error = %e, "Failed to register connection pair");
            self.discard(down);
            self.discard(up);
            return;
        }

        self.channels.pair(down, up);
        info!(
            client = %client_addr,
            upstream = %upstream_addr,
            pairs = self.channels.pairs(),
            "Client connected"
        );
    }

    fn register(&mut self, token: Token) -> io::Result<()> {
        let endpoint = self
            .sockets
            .get_mut(token.0)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "socket not found"))?;
        self.poll
            .registry()
            .register(&mut endpoint.stream, token, Interest::READABLE)
    }

    /// Drop a socket that never became part of a pair.
    fn discard(&mut self, token: Token) {
        if let Some(mut endpoint) = self.sockets.try_remove(token.0) {
            let _ = self.poll.registry().deregister(&mut endpoint.stream);
        }
    }

    fn receive(&mut self, token: Token) {
        loop {
            if self.handle.is_forwarding() && self.peer_backlogged(token) {
                // Resumed from flush() once the peer drains
                return;
            }

            let endpoint = match self.sockets.get_mut(token.0) {
                Some(endpoint) => endpoint,
                None => {
                    debug!(token = token.0, "Readiness for closed socket");
                    return;
                }
            };
            let from = endpoint.addr;

            let n = match endpoint.stream.read(&mut self.read_buf) {
                Ok(0) => {
                    debug!(peer = %from, "Received EOF");
                    self.close(token);
                    return;
                }
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(peer = %from, error = %e, "Read error");
                    self.close(token);
                    return;
                }
            };

            if !self.handle.is_forwarding() {
                debug!(from = %from, bytes = n, "Forwarding disabled, dropping data");
                continue;
            }

            let peer = match self.channels.peer(token) {
                Some(peer) => peer,
                None => {
                    warn!(from = %from, bytes = n, "No peer for socket, dropping data");
                    continue;
                }
            };

            debug!(
                from = %from,
                bytes = n,
                data = %hex::encode(&self.read_buf[..n]),
                "Relaying data"
            );

            if let Err(e) = write_to(
                self.poll.registry(),
                &mut self.sockets,
                peer,
                &self.read_buf[..n],
            ) {
                // Surfaces as the peer's own error on its next readiness turn
                debug!(from = %from, error = %e, "Write to peer failed");
            }
        }
    }

    fn peer_backlogged(&self, token: Token) -> bool {
        self.channels
            .peer(token)
            .and_then(|peer| self.sockets.get(peer.0))
            .map_or(false, |peer| peer.pending.len() >= self.pending_limit)
    }

    fn flush(&mut self, token: Token) {
        let drained = match self.sockets.get_mut(token.0) {
            Some(endpoint) => match drain_pending(endpoint) {
                Ok(true) => {
                    if let Err(e) = self.poll.registry().reregister(
                        &mut endpoint.stream,
                        token,
                        Interest::READABLE,
                    ) {
                        debug!(peer = %endpoint.addr, error = %e, "Reregister failed");
                    }
                    true
                }
                Ok(false) => false,
                Err(e) => {
                    debug!(peer = %endpoint.addr, error = %e, "Flush failed");
                    false
                }
            },
            None => return,
        };

        if drained {
            if let Some(source) = self.channels.peer(token) {
                self.receive(source);
            }
        }
    }

    /// Close a socket and its peer.
    ///
    /// Safe to call on a socket that is already gone or has no peer.
    fn close(&mut self, token: Token) {
        let peer = self.channels.unpair(token);

        match self.sockets.try_remove(token.0) {
            Some(mut endpoint) => {
                let _ = self.poll.registry().deregister(&mut endpoint.stream);
                info!(peer = %endpoint.addr, side = ?endpoint.side, "Disconnected");
            }
            None => debug!(token = token.0, "Close for socket that is already gone"),
        }

        match peer {
            Some(peer) => match self.sockets.try_remove(peer.0) {
                Some(mut endpoint) => {
                    let _ = drain_pending(&mut endpoint);
                    let _ = self.poll.registry().deregister(&mut endpoint.stream);
                    debug!(peer = %endpoint.addr, side = ?endpoint.side, "Closed peer");
                }
                None => warn!(token = token.0, peer = peer.0, "Peer socket already gone"),
            },
            None => warn!(token = token.0, "No peer found when closing"),
        }
    }
}

/// Write `data` to the socket at `token`, queueing what it cannot take yet.
fn write_to(
    registry: &Registry,
    sockets: &mut Slab<Endpoint>,
    token: Token,
    data: &[u8],
) -> io::Result<()> {
    let endpoint = sockets
        .get_mut(token.0)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "peer already closed"))?;

    // Keep ordering behind anything already queued
    if !endpoint.pending.is_empty() {
        endpoint.pending.extend_from_slice(data);
        return Ok(());
    }

    let mut written = 0;
    while written < data.len() {
        match endpoint.stream.write(&data[written..]) {
            Ok(0) => {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
            }
            Ok(n) => written += n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    if written < data.len() {
        endpoint.pending.extend_from_slice(&data[written..]);
        registry.reregister(
            &mut endpoint.stream,
            token,
            Interest::READABLE | Interest::WRITABLE,
        )?;
    }

    Ok(())
}

/// Push queued bytes out. Returns `true` once the queue is empty.
fn drain_pending(endpoint: &mut Endpoint) -> io::Result<bool> {
    while !endpoint.pending.is_empty() {
        match endpoint.stream.write(&endpoint.pending) {
            Ok(0) => {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
            }
            Ok(n) => endpoint.pending.advance(n),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}
