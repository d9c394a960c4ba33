//! Log sink setup and runtime level switching.
//!
//! The relay core only ever talks to the sink through [`LogLevelControl`],
//! so the control session can flip between DEBUG and INFO without knowing
//! how the subscriber is assembled.

use std::error::Error;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

/// Levels the operator can switch to at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    /// Filter directive understood by `EnvFilter`.
    pub fn directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
        }
    }
}

/// Something that can change the active log level.
pub trait LogLevelControl: Send + Sync {
    fn set_level(&self, level: LogLevel) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// Level control backed by a reloadable `EnvFilter`.
pub struct ReloadLevel {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl LogLevelControl for ReloadLevel {
    fn set_level(&self, level: LogLevel) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.handle.reload(EnvFilter::new(level.directive()))?;
        Ok(())
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `level` at startup; afterwards the returned handle
/// replaces the filter wholesale.
pub fn init(level: &str) -> ReloadLevel {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();

    ReloadLevel { handle }
}
