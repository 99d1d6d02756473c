//! # BMS CANopen Node Emulator
//!
//! Emulates a read-only battery-management-system node on a CAN bus:
//! - Builds its object dictionary from an EDS device description
//! - Serves simulated parameter values loaded from a flat JSON file
//! - Answers expedited SDO upload requests addressed to its node id
//!
//! ## Usage
//!
//! ```bash
//! # Start the emulator on vcan0 as node 5
//! RUST_LOG=info cargo run -p bms-emulator -- --interface vcan0 --node-id 5
//! ```
//!
//! Paths and defaults come from `bms-emulator.toml` (see `--config`);
//! `--interface` and `--node-id` override the file.

mod config;
mod eds;
mod sdo_server;
mod values;

use std::error::Error;
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{error, info, warn};
use socketcan::{CanSocket, Socket};

use canopen_common::sdo::SDO_REQUEST_BASE;
use config::{ConfigError, EmulatorConfig};
use eds::EdsError;
use sdo_server::SdoServer;
use values::{ValueStore, ValueStoreError};

#[derive(Debug)]
enum EmulatorError {
    Config(ConfigError),
    Eds(EdsError),
    Values(ValueStoreError),
    Socket { interface: String, source: io::Error },
    Transport(io::Error),
    Signal(ctrlc::Error),
}

impl fmt::Display for EmulatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "{}", e),
            Self::Eds(e) => write!(f, "malformed EDS document: {}", e),
            Self::Values(e) => write!(f, "{}", e),
            Self::Socket { interface, source } => {
                write!(f, "failed to open CAN interface {:?}: {}", interface, source)
            }
            Self::Transport(e) => write!(f, "CAN transport failure: {}", e),
            Self::Signal(e) => write!(f, "failed to install stop handler: {}", e),
        }
    }
}

impl Error for EmulatorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Eds(e) => Some(e),
            Self::Values(e) => Some(e),
            Self::Socket { source, .. } => Some(source),
            Self::Transport(e) => Some(e),
            Self::Signal(e) => Some(e),
        }
    }
}

impl From<ConfigError> for EmulatorError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<EdsError> for EmulatorError {
    fn from(e: EdsError) -> Self {
        Self::Eds(e)
    }
}

impl From<ValueStoreError> for EmulatorError {
    fn from(e: ValueStoreError) -> Self {
        Self::Values(e)
    }
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), EmulatorError> {
    let config = load_config()?;
    info!(
        "starting BMS emulator: interface={} node_id={}",
        config.can_interface, config.node_id
    );

    let dictionary = eds::parse_eds_file(Path::new(&config.eds_path))?;
    info!(
        "object dictionary loaded from {:?}: {} entries",
        config.eds_path,
        dictionary.len()
    );
    dictionary.log_summary();
    if dictionary.is_empty() {
        warn!("object dictionary has no addressable entries; every read will abort");
    }

    let values = ValueStore::load(Path::new(&config.values_path))?;
    info!(
        "value store loaded from {:?}: {} parameters",
        config.values_path,
        values.len()
    );
    if values.is_empty() {
        warn!("value store is empty; every read will abort");
    }

    let socket = CanSocket::open(&config.can_interface).map_err(|source| EmulatorError::Socket {
        interface: config.can_interface.clone(),
        source,
    })?;
    // Short timeout so the stop flag is observed promptly.
    socket
        .set_read_timeout(Duration::from_millis(10))
        .map_err(EmulatorError::Transport)?;

    let running = Arc::new(AtomicBool::new(true));
    let stop_flag = running.clone();
    ctrlc::set_handler(move || stop_flag.store(false, Ordering::SeqCst))
        .map_err(EmulatorError::Signal)?;

    let server = SdoServer::new(config.node_id, dictionary, values);
    info!(
        "listening for SDO requests on COB-ID 0x{:03X}",
        SDO_REQUEST_BASE + config.node_id as u16
    );

    serve(&socket, &server, &running)?;

    info!("stop requested, shutting down");
    Ok(())
}

/// Drain one frame at a time until the stop flag clears or the bus fails.
///
/// A receive timeout means "no frame this tick" and is not an error; any
/// other I/O failure is fatal. The current frame is always handled to
/// completion before the flag is rechecked, and the socket is released by
/// scope on every exit path.
fn serve(
    socket: &CanSocket,
    server: &SdoServer,
    running: &AtomicBool,
) -> Result<(), EmulatorError> {
    while running.load(Ordering::SeqCst) {
        match socket.read_frame() {
            Ok(frame) => {
                if let Some(response) = server.handle_frame(&frame) {
                    socket
                        .write_frame(&response)
                        .map_err(EmulatorError::Transport)?;
                }
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => return Err(EmulatorError::Transport(e)),
        }
    }
    Ok(())
}

/// Read the TOML config, then apply command-line overrides.
fn load_config() -> Result<EmulatorConfig, EmulatorError> {
    let args: Vec<String> = std::env::args().collect();

    let mut config_path = "bms-emulator.toml".to_string();
    let mut interface = None;
    let mut node_id = None;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => config_path = iter.next().cloned().unwrap_or(config_path),
            "--interface" => interface = iter.next().cloned(),
            "--node-id" => node_id = iter.next().and_then(|s| s.parse::<u8>().ok()),
            _ => {}
        }
    }

    let mut config = EmulatorConfig::load(Path::new(&config_path))?;
    if let Some(interface) = interface {
        config.can_interface = interface;
    }
    if let Some(node_id) = node_id {
        config.node_id = node_id;
    }
    Ok(config)
}
