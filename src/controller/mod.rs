//! Controller subsystem for input-device polling
//!
//! One capability interface, two interchangeable device families:
//!
//! 1. [`gamepad`] - native gamepads enumerated through gilrs
//! 2. [`serial_pad`] - rig-attached pads streaming state frames over UART
//!
//! # Architecture
//!
//! ```text
//! Gamepad ────► GamepadPad ──────┐
//!                                ├──► poll() -> ButtonMask
//! UART rig ───► SerialFramePad ──┘
//! ```
//!
//! A session polls one family only, selected at setup; the device list
//! order is the fixed polling order for the whole session.

pub mod buttons;
pub mod gamepad;
pub mod serial_pad;

pub use buttons::ButtonMask;
pub use gamepad::{discover_gamepads, ControllerPad, GamepadPad, PadError};
pub use serial_pad::SerialFramePad;
