use std::sync::{Arc, Mutex, MutexGuard};

use gilrs::{Gamepad, GamepadId, Gilrs};
use tracing::{debug, info, warn};

use super::buttons::{ButtonMask, BUTTON_TABLE};

// Controller errors
#[derive(Debug, thiserror::Error)]
pub enum PadError {
    #[error("failed to initialize controller backend: {0}")]
    Backend(String),

    #[error("controller unavailable: {0}")]
    Unavailable(String),
}

/// Capability interface for one pollable input device.
///
/// The measurement loop polls each configured pad in fixed order every tick.
/// `poll` returns the device's current button mask; a pad that has become
/// unreachable reports [`PadError::Unavailable`], which the loop treats as a
/// lost device for the trial in progress.
pub trait ControllerPad: Send {
    fn name(&self) -> &str;

    fn poll(&mut self) -> Result<ButtonMask, PadError>;

    fn is_connected(&self) -> bool;
}

/// Gamepad family: one handle per pad enumerated by gilrs.
///
/// All handles of a session share one event-pump context. Each poll drains
/// the pump so the cached state is current, then reads this pad's buttons.
pub struct GamepadPad {
    gilrs: Arc<Mutex<Gilrs>>,
    id: GamepadId,
    name: String,
}

impl GamepadPad {
    fn context(&self) -> MutexGuard<'_, Gilrs> {
        match self.gilrs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn read_mask(pad: &Gamepad<'_>) -> ButtonMask {
        let mut mask = ButtonMask::empty();
        for (button, bit) in BUTTON_TABLE {
            if pad.is_pressed(button) {
                mask |= bit;
            }
        }
        mask
    }
}

impl ControllerPad for GamepadPad {
    fn name(&self) -> &str {
        &self.name
    }

    fn poll(&mut self) -> Result<ButtonMask, PadError> {
        let mut gilrs = self.context();

        // Drain the event pump so cached gamepad state is current.
        while gilrs.next_event().is_some() {}

        match gilrs.connected_gamepad(self.id) {
            Some(pad) => Ok(Self::read_mask(&pad)),
            None => Err(PadError::Unavailable(self.name.clone())),
        }
    }

    fn is_connected(&self) -> bool {
        let mut gilrs = self.context();
        while gilrs.next_event().is_some() {}
        gilrs.connected_gamepad(self.id).is_some()
    }
}

/// Enumerate connected gamepads in gilrs id order.
///
/// The returned order is the session's fixed polling order: on a tick where
/// several pads report a press, the lowest slot wins.
pub fn discover_gamepads() -> Result<Vec<Box<dyn ControllerPad>>, PadError> {
    info!("Initializing gilrs controller interface");
    let gilrs = match Gilrs::new() {
        Ok(g) => {
            info!("Successfully initialized gilrs");
            g
        }
        Err(e) => {
            warn!("Failed to initialize gilrs: {}", e);
            return Err(PadError::Backend(e.to_string()));
        }
    };

    let found: Vec<(GamepadId, String)> = gilrs
        .gamepads()
        .map(|(id, pad)| (id, pad.name().to_string()))
        .collect();

    if found.is_empty() {
        warn!("No gamepad connected");
    } else {
        info!("Found {} gamepads:", found.len());
        for (idx, (id, name)) in found.iter().enumerate() {
            info!("  [{}] ID: {}, Name: {}", idx, id, name);
        }
    }

    let shared = Arc::new(Mutex::new(gilrs));
    let pads = found
        .into_iter()
        .map(|(id, name)| {
            debug!("Creating handle for gamepad {}", name);
            Box::new(GamepadPad {
                gilrs: shared.clone(),
                id,
                name,
            }) as Box<dyn ControllerPad>
        })
        .collect();

    Ok(pads)
}
