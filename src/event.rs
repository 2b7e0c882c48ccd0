//! Public input and window events
//!
//! Pointer button and scroll events are bit-packed so they can be passed
//! around by value as cheaply as an integer. Packing is checked with
//! [`verify!`](crate::verify): a value that does not fit its field is a
//! programmer error, not a recoverable one.

use crate::verify;

/// Pressed/released state shared by keys and pointer buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ButtonState {
    Released = 0,
    Pressed = 1,
}

impl ButtonState {
    fn from_bit(bit: u8) -> Self {
        if bit & 1 == 1 {
            ButtonState::Pressed
        } else {
            ButtonState::Released
        }
    }
}

/// Modifier keys active when a key event was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub logo: bool,
    pub caps_lock: bool,
    pub num_lock: bool,
}

/// One physical key transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    /// Keysym after applying the current keymap and modifiers
    pub key: u32,
    /// Hardware scancode as sent by the compositor (evdev numbering)
    pub scancode: u32,
    pub state: ButtonState,
    pub modifiers: Modifiers,
    /// UTF-8 text the key produces, if any
    pub text: Option<String>,
}

/// Pointer position in surface-local coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MouseMotionEvent {
    pub x: f64,
    pub y: f64,
}

/// Compact identifiers for pointer buttons.
pub mod mouse_button {
    pub const LEFT: u8 = 0;
    pub const RIGHT: u8 = 1;
    pub const MIDDLE: u8 = 2;
    pub const SIDE: u8 = 3;
    pub const EXTRA: u8 = 4;
    pub const FORWARD: u8 = 5;
    pub const BACK: u8 = 6;
    pub const TASK: u8 = 7;
}

const BUTTON_BITS: u8 = 5;
const BUTTON_MASK: u8 = (1 << BUTTON_BITS) - 1;

/// Number of distinct button identifiers a [`MouseButtonEvent`] can carry
pub const MAX_MOUSE_BUTTONS: u8 = 1 << BUTTON_BITS;

/// Pointer button transition packed into one byte:
/// bits 0..5 button, bit 5 state, bits 6..8 zero.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MouseButtonEvent(u8);

impl MouseButtonEvent {
    pub fn new(button: u8, state: ButtonState) -> Self {
        verify!(
            button < MAX_MOUSE_BUTTONS,
            "mouse button {} does not fit in {} bits",
            button,
            BUTTON_BITS
        );
        Self(button | ((state as u8) << BUTTON_BITS))
    }

    pub fn button(self) -> u8 {
        self.0 & BUTTON_MASK
    }

    pub fn state(self) -> ButtonState {
        ButtonState::from_bit(self.0 >> BUTTON_BITS)
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl std::fmt::Debug for MouseButtonEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MouseButtonEvent")
            .field("button", &self.button())
            .field("state", &self.state())
            .finish()
    }
}

/// What produced a scroll event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ScrollSource {
    Wheel = 0,
    Finger = 1,
    Continuous = 2,
    WheelTilt = 3,
}

impl ScrollSource {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => ScrollSource::Wheel,
            1 => ScrollSource::Finger,
            2 => ScrollSource::Continuous,
            _ => ScrollSource::WheelTilt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ScrollAxis {
    Vertical = 0,
    Horizontal = 1,
}

/// Largest magnitude a decoded scroll value can have
pub const MAX_SCROLL_VALUE: i8 = 8;

/// Scroll step packed into two bytes:
/// bits 0..2 source, bit 2 axis, bits 8..16 the signed value in
/// `-MAX_SCROLL_VALUE..=MAX_SCROLL_VALUE`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MouseScrollEvent(u16);

impl MouseScrollEvent {
    pub fn new(source: ScrollSource, axis: ScrollAxis, value: i8) -> Self {
        verify!(
            (-MAX_SCROLL_VALUE..=MAX_SCROLL_VALUE).contains(&value),
            "scroll value {} outside [-{}, {}]",
            value,
            MAX_SCROLL_VALUE,
            MAX_SCROLL_VALUE
        );
        let low = (source as u16) | ((axis as u16) << 2);
        Self(low | ((value as u8 as u16) << 8))
    }

    pub fn source(self) -> ScrollSource {
        ScrollSource::from_bits(self.0 as u8)
    }

    pub fn axis(self) -> ScrollAxis {
        if (self.0 >> 2) & 1 == 1 {
            ScrollAxis::Horizontal
        } else {
            ScrollAxis::Vertical
        }
    }

    pub fn value(self) -> i8 {
        (self.0 >> 8) as u8 as i8
    }
}

impl std::fmt::Debug for MouseScrollEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MouseScrollEvent")
            .field("source", &self.source())
            .field("axis", &self.axis())
            .field("value", &self.value())
            .finish()
    }
}

/// Everything the backend can report about one window
#[derive(Debug, Clone, PartialEq)]
pub enum WindowEvent {
    /// The compositor asked for the window to close
    Close,
    /// The window's size changed to (width, height)
    Resize(i32, i32),
    Key(KeyEvent),
    MouseMotion(MouseMotionEvent),
    MouseButton(MouseButtonEvent),
    MouseScroll(MouseScrollEvent),
}
