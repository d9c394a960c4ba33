//! Operator control channel.
//!
//! A line-oriented text protocol on its own port for steering the running
//! relay:
//!
//! ```text
//! ?   Show help
//! q   Terminate application
//! t   Toggle data forwarding
//! ld  Change log level to DEBUG
//! li  Change log level to INFO
//! ```

pub mod command;
mod session;

pub use session::ControlServer;
