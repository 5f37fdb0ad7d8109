//! Serial-frame pad family: a rig-attached pad that streams its button
//! state over UART instead of a native gamepad API.
//!
//! Wire format, one ASCII frame per state change:
//!
//! ```text
//! G<4 hex digits buttons>*<2 hex digit checksum>\n
//! ```
//!
//! The checksum is the XOR of the four payload characters. Frames that fail
//! the checksum or arrive garbled are skipped; the parser resyncs on the
//! next `G`.

use std::io::Read;
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, info, warn};

use super::buttons::ButtonMask;
use super::gamepad::{ControllerPad, PadError};

const PAD_BAUD: u32 = 115_200;
const FRAME_LEN: usize = 8;

/// Accumulates serial bytes into complete frames across partial reads.
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    buf: Vec<u8>,
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns the mask of the last valid frame seen, if any.
    pub fn feed(&mut self, bytes: &[u8]) -> Option<ButtonMask> {
        let mut latest = None;
        for &byte in bytes {
            match byte {
                b'\n' | b'\r' => {
                    if let Some(mask) = parse_frame(&self.buf) {
                        latest = Some(mask);
                    } else if !self.buf.is_empty() {
                        debug!("Discarding malformed frame: {:?}", self.buf);
                    }
                    self.buf.clear();
                }
                b'G' => {
                    // Start of frame; anything buffered is an aborted frame.
                    if !self.buf.is_empty() {
                        debug!("Resyncing on frame start, dropping {} bytes", self.buf.len());
                        self.buf.clear();
                    }
                    self.buf.push(byte);
                }
                _ => {
                    if self.buf.len() < FRAME_LEN {
                        self.buf.push(byte);
                    } else {
                        self.buf.clear();
                    }
                }
            }
        }
        latest
    }
}

fn parse_frame(frame: &[u8]) -> Option<ButtonMask> {
    if frame.len() != FRAME_LEN || frame[0] != b'G' || frame[5] != b'*' {
        return None;
    }

    let payload = &frame[1..5];
    let buttons = u16::from_str_radix(std::str::from_utf8(payload).ok()?, 16).ok()?;

    let stated = u8::from_str_radix(std::str::from_utf8(&frame[6..8]).ok()?, 16).ok()?;
    let computed = payload.iter().fold(0u8, |acc, &b| acc ^ b);
    if stated != computed {
        return None;
    }

    Some(ButtonMask::from_bits_truncate(u32::from(buttons)))
}

/// Serial-frame pad handle.
///
/// `poll` drains whatever bytes are pending without blocking and returns the
/// last decoded mask; between frames the previous state is repeated. A
/// transport fault marks the pad disconnected for the rest of the session.
pub struct SerialFramePad {
    name: String,
    port: Box<dyn SerialPort>,
    frames: FrameAccumulator,
    mask: ButtonMask,
    connected: bool,
}

impl SerialFramePad {
    pub fn open(path: &str) -> Result<Self, PadError> {
        info!("Opening serial pad on {} at {} baud", path, PAD_BAUD);
        let port = serialport::new(path, PAD_BAUD)
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(|e| PadError::Backend(format!("{path}: {e}")))?;

        Ok(Self {
            name: format!("serial pad ({path})"),
            port,
            frames: FrameAccumulator::new(),
            mask: ButtonMask::empty(),
            connected: true,
        })
    }
}

impl ControllerPad for SerialFramePad {
    fn name(&self) -> &str {
        &self.name
    }

    fn poll(&mut self) -> Result<ButtonMask, PadError> {
        if !self.connected {
            return Err(PadError::Unavailable(self.name.clone()));
        }

        let pending = match self.port.bytes_to_read() {
            Ok(n) => n,
            Err(e) => {
                warn!("{} dropped: {}", self.name, e);
                self.connected = false;
                return Err(PadError::Unavailable(format!("{}: {e}", self.name)));
            }
        };

        if pending > 0 {
            let mut buf = vec![0u8; pending.min(256) as usize];
            match self.port.read(&mut buf) {
                Ok(n) => {
                    if let Some(mask) = self.frames.feed(&buf[..n]) {
                        self.mask = mask;
                    }
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    warn!("{} dropped: {}", self.name, e);
                    self.connected = false;
                    return Err(PadError::Unavailable(format!("{}: {e}", self.name)));
                }
            }
        }

        Ok(self.mask)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
