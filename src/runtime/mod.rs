//! Relay runtime.
//!
//! A single mio event loop owns every relayed socket:
//! - `socket`: listener setup and the bounded upstream connector
//! - `channel`: peer lookup for connection pairs
//! - `event_loop`: the accept/receive/close state machine
//! - `handle`: flags other threads flip on the running loop

mod channel;
mod event_loop;
mod handle;
mod socket;

pub use event_loop::RelayEngine;
pub use handle::RelayHandle;
pub(crate) use socket::create_listener;
