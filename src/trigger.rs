//! Trigger channel driving the stimulus actuator.
//!
//! Half-duplex, fire-and-forget: the rig reacts to two single-byte signals
//! and sends nothing back. No acknowledgment is read, so serial
//! transmission time is part of every measured interval.

use std::io::Write;
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, info, warn};

pub const TRIGGER_BAUD: u32 = 115_200;

const ARM_SIGNAL: u8 = 1;
const DISARM_SIGNAL: u8 = 0;

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("failed to open trigger port {port}: {source}")]
    Open {
        port: String,
        source: serialport::Error,
    },

    #[error("trigger write failed: {0}")]
    Write(#[from] std::io::Error),
}

/// Transport for the two stimulus signals.
///
/// The measurement loop guarantees arm/disarm calls strictly alternate;
/// `close` performs one best-effort final disarm so the actuator is never
/// left engaged, swallowing the failure (it must not mask an error that was
/// already reported).
pub trait TriggerChannel: Send {
    fn send_arm(&mut self) -> Result<(), TriggerError>;

    fn send_disarm(&mut self) -> Result<(), TriggerError>;

    fn close(&mut self);
}

/// Serial-line trigger at a fixed 115200 baud.
pub struct SerialTrigger {
    port_name: String,
    port: Box<dyn SerialPort>,
}

impl SerialTrigger {
    pub fn open(port_name: &str) -> Result<Self, TriggerError> {
        info!("Opening trigger port {} at {} baud", port_name, TRIGGER_BAUD);
        let port = serialport::new(port_name, TRIGGER_BAUD)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|source| TriggerError::Open {
                port: port_name.to_string(),
                source,
            })?;

        Ok(Self {
            port_name: port_name.to_string(),
            port,
        })
    }

    fn send(&mut self, signal: u8) -> Result<(), TriggerError> {
        self.port.write_all(&[signal])?;
        self.port.flush()?;
        Ok(())
    }
}

impl TriggerChannel for SerialTrigger {
    fn send_arm(&mut self) -> Result<(), TriggerError> {
        debug!("Arming stimulus on {}", self.port_name);
        self.send(ARM_SIGNAL)
    }

    fn send_disarm(&mut self) -> Result<(), TriggerError> {
        debug!("Disarming stimulus on {}", self.port_name);
        self.send(DISARM_SIGNAL)
    }

    fn close(&mut self) {
        if let Err(e) = self.send(DISARM_SIGNAL) {
            warn!("Final disarm on {} failed: {}", self.port_name, e);
        }
        debug!("Trigger port {} released", self.port_name);
    }
}
