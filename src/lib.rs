//! killerrabbit: a TCP relay you can strangle and kill at runtime.
//!
//! Clients connecting to the relay port are each paired with a fresh
//! connection to one fixed upstream target, and bytes are shuttled between
//! the two unmodified. A separate control port lets an operator:
//! - Stop forwarding (bytes are read and dropped, connections stay up)
//! - Resume forwarding
//! - Switch the log level between DEBUG and INFO
//! - Shut the relay down

pub mod config;
pub mod control;
pub mod logging;
pub mod runtime;
