//! killerrabbit: a TCP relay with an operator kill switch
//!
//! Features:
//! - Relays raw bytes between each client and a fixed upstream target
//! - Control port to toggle forwarding, change log level and quit
//! - Configuration via CLI arguments or TOML file

use killerrabbit::config::Config;
use killerrabbit::control::ControlServer;
use killerrabbit::logging;
use killerrabbit::runtime::RelayEngine;
use std::sync::Arc;
use std::thread;
use tracing::{error, info};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let levels = Arc::new(logging::init(&config.log_level));

    info!(
        listen = %config.listen,
        upstream = %config.upstream,
        control = %config.control,
        connect_timeout_ms = config.connect_timeout.as_millis() as u64,
        "Starting killerrabbit"
    );

    // Bind both ports before serving anything
    let engine = RelayEngine::bind(&config)?;
    let control = ControlServer::bind(&config.control, engine.handle(), levels)?;

    thread::Builder::new()
        .name("control".to_string())
        .spawn(move || control.serve())?;

    if let Err(e) = engine.run() {
        error!(error = %e, "Relay engine failed");
        return Err(e.into());
    }

    info!("Shutdown complete");
    Ok(())
}
