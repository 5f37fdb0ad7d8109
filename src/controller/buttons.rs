use bitflags::bitflags;
use gilrs::Button;

bitflags! {
    /// Bitmask of pad buttons currently held down.
    ///
    /// A trial's detection edge is the first poll tick on which any pad
    /// reports a non-empty mask; which bit is set does not matter to the
    /// measurement.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ButtonMask: u32 {
        const SOUTH = 1 << 0;
        const EAST = 1 << 1;
        const WEST = 1 << 2;
        const NORTH = 1 << 3;
        const START = 1 << 4;
        const SELECT = 1 << 5;
        const LEFT_BUMPER = 1 << 6;
        const RIGHT_BUMPER = 1 << 7;
        const LEFT_STICK = 1 << 8;
        const RIGHT_STICK = 1 << 9;
        const DPAD_UP = 1 << 10;
        const DPAD_DOWN = 1 << 11;
        const DPAD_LEFT = 1 << 12;
        const DPAD_RIGHT = 1 << 13;
        const GUIDE = 1 << 14;
    }
}

// Buttons checked when building a gamepad poll mask, in fixed order.
pub(crate) const BUTTON_TABLE: [(Button, ButtonMask); 15] = [
    (Button::South, ButtonMask::SOUTH),
    (Button::East, ButtonMask::EAST),
    (Button::West, ButtonMask::WEST),
    (Button::North, ButtonMask::NORTH),
    (Button::Start, ButtonMask::START),
    (Button::Select, ButtonMask::SELECT),
    (Button::LeftTrigger, ButtonMask::LEFT_BUMPER),
    (Button::RightTrigger, ButtonMask::RIGHT_BUMPER),
    (Button::LeftThumb, ButtonMask::LEFT_STICK),
    (Button::RightThumb, ButtonMask::RIGHT_STICK),
    (Button::DPadUp, ButtonMask::DPAD_UP),
    (Button::DPadDown, ButtonMask::DPAD_DOWN),
    (Button::DPadLeft, ButtonMask::DPAD_LEFT),
    (Button::DPadRight, ButtonMask::DPAD_RIGHT),
    (Button::Mode, ButtonMask::GUIDE),
];
