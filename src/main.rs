pub mod config;
pub mod controller;
pub mod report;
pub mod session;
pub mod trigger;

use crate::config::{PadFamily, RigConfig};
use crate::controller::{discover_gamepads, ControllerPad, SerialFramePad};
use crate::report::ResultBoard;
use crate::session::{SessionHandle, SessionSettings, SessionVerdict};
use crate::trigger::SerialTrigger;
use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = RigConfig::config_path();
    info!("Reading configuration from {}", config_path.display());
    let config = RigConfig::load(&config_path)?;

    list_trigger_ports();
    config.validate()?;

    let devices = build_devices(&config)?;
    let trigger = SerialTrigger::open(&config.port)?;

    let settings = SessionSettings {
        trial_count: config.trial_count,
        ..Default::default()
    };
    let board = ResultBoard::new();

    let handle = match SessionHandle::spawn(settings, devices, Box::new(trigger), board.clone()) {
        Ok(handle) => handle,
        Err(e) => {
            for line in board.snapshot() {
                println!("{line}");
            }
            return Err(eyre!("failed to start session: {e}"));
        }
    };

    // Presentation side: print lines as the aggregator appends them.
    let summary_rx = handle.summary();
    let mut revision = board.watch_revision();
    let mut printed = 0;
    let mut watching = true;
    let mut join = Box::pin(handle.join());
    let verdict = loop {
        tokio::select! {
            changed = revision.changed(), if watching => {
                printed = print_new(&board, printed);
                if changed.is_err() {
                    watching = false;
                }
            }
            verdict = &mut join => {
                let _ = print_new(&board, printed);
                break verdict?;
            }
        }
    };

    if let Some(summary) = *summary_rx.borrow() {
        info!(
            "Measured {} trials: average {:.2} ms, min {:.2} ms, max {:.2} ms",
            summary.count, summary.average_ms, summary.min_ms, summary.max_ms
        );
    }

    match verdict {
        SessionVerdict::Completed { trials } => {
            info!("Session completed: {} trials", trials);
            Ok(())
        }
        SessionVerdict::Aborted { after_trial, cause } => {
            warn!("Session aborted after trial {}: {}", after_trial, cause);
            Err(eyre!("session aborted after trial {after_trial}: {cause}"))
        }
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

/// Log the serial ports present on this host so the operator can pick the
/// trigger port for the config file.
fn list_trigger_ports() {
    match serialport::available_ports() {
        Ok(ports) if ports.is_empty() => warn!("No serial ports found on this host"),
        Ok(ports) => {
            info!("Available serial ports:");
            for port in ports {
                match &port.port_type {
                    serialport::SerialPortType::UsbPort(usb) => info!(
                        "  {} (USB {:04x}:{:04x})",
                        port.port_name, usb.vid, usb.pid
                    ),
                    other => info!("  {} ({:?})", port.port_name, other),
                }
            }
        }
        Err(e) => warn!("Failed to enumerate serial ports: {}", e),
    }
}

fn build_devices(config: &RigConfig) -> Result<Vec<Box<dyn ControllerPad>>> {
    let devices: Vec<Box<dyn ControllerPad>> = match config.pad_family {
        PadFamily::Gamepad => discover_gamepads()?,
        PadFamily::SerialFrame => {
            // validate() guarantees the pad port is present for this family.
            let path = config.pad_port.as_deref().unwrap_or_default();
            vec![Box::new(SerialFramePad::open(path)?)]
        }
    };

    for pad in &devices {
        if !pad.is_connected() {
            warn!("{} reports disconnected before the session", pad.name());
        }
    }

    Ok(devices)
}

fn print_new(board: &ResultBoard, from: usize) -> usize {
    let lines = board.snapshot();
    for line in &lines[from..] {
        println!("{line}");
    }
    lines.len()
}
