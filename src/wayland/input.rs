//! Input event aggregation
//!
//! `wl_pointer` splits one user gesture across many small events (a scroll
//! tick arrives as source + value120 + relative direction + axis value) and
//! terminates the batch with `wl_pointer.frame`. Pointer events are staged in
//! per-category slots and turned into public events at the frame boundary.
//! Keyboard events are not split up and go straight to the focused window.

use std::fs::File;
use std::os::fd::OwnedFd;

use log::{debug, trace, warn};
use memmap2::MmapOptions;
use wayland_client::protocol::{
    wl_keyboard::{self, WlKeyboard},
    wl_pointer::{self, WlPointer},
    wl_seat::{self, WlSeat},
    wl_surface::WlSurface,
};
use wayland_client::{Connection, Dispatch, Proxy, QueueHandle, WEnum};
use xkbcommon::xkb;

use super::WaylandState;
use crate::backend::WindowId;
use crate::config::InputConfig;
use crate::event::{
    mouse_button, ButtonState, KeyEvent, Modifiers, MouseButtonEvent, MouseMotionEvent,
    MouseScrollEvent, ScrollAxis, ScrollSource, WindowEvent, MAX_MOUSE_BUTTONS, MAX_SCROLL_VALUE,
};
use crate::error::verify_failed;
use crate::verify;

/// One wheel notch in the high-resolution scroll convention
pub const VALUE120_PER_NOTCH: i32 = 120;

/// value120 units per unit of the public scroll range
const VALUE120_PER_STEP: i32 = VALUE120_PER_NOTCH / MAX_SCROLL_VALUE as i32;

/// Offset between evdev scancodes and xkb keycodes
const EVDEV_KEYCODE_OFFSET: u32 = 8;

/// xkb keycode for an evdev scancode, if it has one
pub fn xkb_keycode(scancode: u32) -> Option<xkb::Keycode> {
    scancode.checked_add(EVDEV_KEYCODE_OFFSET).map(xkb::Keycode::from)
}

/// Pointer versions before this have no `frame` event
const POINTER_FRAME_SINCE: u32 = 5;

/// Linux input-event-codes button values, indexed by public button id
const BUTTON_CODES: [(u32, u8); 8] = [
    (0x110, mouse_button::LEFT),    // BTN_LEFT
    (0x111, mouse_button::RIGHT),   // BTN_RIGHT
    (0x112, mouse_button::MIDDLE),  // BTN_MIDDLE
    (0x113, mouse_button::SIDE),    // BTN_SIDE
    (0x114, mouse_button::EXTRA),   // BTN_EXTRA
    (0x115, mouse_button::FORWARD), // BTN_FORWARD
    (0x116, mouse_button::BACK),    // BTN_BACK
    (0x117, mouse_button::TASK),    // BTN_TASK
];

/// Map a compositor button code to the public button id.
///
/// An unknown code is fatal: the public event packs buttons into five bits
/// and there is no slot for one we cannot name.
pub fn button_from_code(code: u32) -> u8 {
    let Some(&(_, button)) = BUTTON_CODES.iter().find(|(known, _)| *known == code) else {
        verify_failed(
            "BUTTON_CODES contains code",
            format_args!("unknown pointer button code {:#x}", code),
        );
    };
    verify!(
        button < MAX_MOUSE_BUTTONS,
        "pointer button {} does not fit the packed event",
        button
    );
    button
}

/// Convert a value120 scroll amount into the public `[-8, 8]` range.
///
/// `natural` is the compositor's inverted relative direction; `invert` is the
/// user's global flip. Each one negates the result.
pub fn decode_scroll_value(value120: i32, natural: bool, invert: bool) -> i8 {
    let direction = if natural != invert { -1 } else { 1 };
    let max = MAX_SCROLL_VALUE as i32;
    ((value120 / VALUE120_PER_STEP).clamp(-max, max) * direction) as i8
}

fn scroll_source(source: wl_pointer::AxisSource) -> ScrollSource {
    match source {
        wl_pointer::AxisSource::Finger => ScrollSource::Finger,
        wl_pointer::AxisSource::Continuous => ScrollSource::Continuous,
        wl_pointer::AxisSource::WheelTilt => ScrollSource::WheelTilt,
        _ => ScrollSource::Wheel,
    }
}

fn scroll_axis(axis: wl_pointer::Axis) -> ScrollAxis {
    match axis {
        wl_pointer::Axis::HorizontalScroll => ScrollAxis::Horizontal,
        _ => ScrollAxis::Vertical,
    }
}

/// Scroll data for one axis within the current frame
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct AxisSlot {
    active: bool,
    /// Accumulated high-resolution steps
    value120: Option<i32>,
    /// Accumulated legacy wheel notches
    discrete: Option<i32>,
    /// Accumulated surface-unit axis value
    continuous: f64,
    natural: bool,
    /// Set by `axis_stop`: the axis reported a terminating zero step
    skip: bool,
}

/// Pending pointer state, one slot per event category
#[derive(Debug, Default, Clone, PartialEq)]
struct PendingPointer {
    motion: Option<MouseMotionEvent>,
    button: Option<MouseButtonEvent>,
    source: Option<ScrollSource>,
    scroll: [AxisSlot; 2],
}

impl PendingPointer {
    fn is_empty(&self) -> bool {
        self.motion.is_none() && self.button.is_none() && self.scroll.iter().all(|s| !s.active)
    }
}

/// Coalesces raw pointer events into frame-aligned window events
#[derive(Debug, Clone)]
pub struct PointerAggregator {
    focus: Option<WindowId>,
    pending: PendingPointer,
    /// value120 left over after the last emitted step, per axis
    remainder: [i32; 2],
    scroll_invert: bool,
    continuous_scroll_step: f64,
}

impl PointerAggregator {
    pub fn new(config: &InputConfig) -> Self {
        Self {
            focus: None,
            pending: PendingPointer::default(),
            remainder: [0; 2],
            scroll_invert: config.scroll_invert,
            continuous_scroll_step: config.continuous_scroll_step,
        }
    }

    pub fn focus(&self) -> Option<WindowId> {
        self.focus
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn enter(&mut self, window: WindowId, x: f64, y: f64) {
        self.focus = Some(window);
        self.pending = PendingPointer::default();
        self.remainder = [0; 2];
        self.pending.motion = Some(MouseMotionEvent { x, y });
    }

    pub fn leave(&mut self) {
        self.focus = None;
        self.pending = PendingPointer::default();
        self.remainder = [0; 2];
    }

    /// Forget the focused window if it is being destroyed.
    pub fn forget(&mut self, window: WindowId) {
        if self.focus == Some(window) {
            self.leave();
        }
    }

    pub fn motion(&mut self, x: f64, y: f64) {
        self.pending.motion = Some(MouseMotionEvent { x, y });
    }

    /// Stage a button transition. A second button in the same frame pushes
    /// the first one out immediately so no transition is lost.
    pub fn button(&mut self, code: u32, state: ButtonState, out: &mut Vec<(WindowId, WindowEvent)>) {
        let event = MouseButtonEvent::new(button_from_code(code), state);
        if let Some(previous) = self.pending.button.replace(event) {
            if let Some(window) = self.focus {
                out.push((window, WindowEvent::MouseButton(previous)));
            }
        }
    }

    pub fn axis_source(&mut self, source: ScrollSource) {
        self.pending.source = Some(source);
    }

    fn slot(&mut self, axis: ScrollAxis) -> &mut AxisSlot {
        let slot = &mut self.pending.scroll[axis as usize];
        slot.active = true;
        slot
    }

    pub fn axis(&mut self, axis: ScrollAxis, value: f64) {
        self.slot(axis).continuous += value;
    }

    /// Legacy wheel notches, only used when no value120 arrives.
    pub fn axis_discrete(&mut self, axis: ScrollAxis, discrete: i32) {
        let slot = self.slot(axis);
        slot.discrete = Some(slot.discrete.unwrap_or(0).saturating_add(discrete));
    }

    pub fn axis_value120(&mut self, axis: ScrollAxis, value120: i32) {
        let slot = self.slot(axis);
        slot.value120 = Some(slot.value120.unwrap_or(0).saturating_add(value120));
    }

    pub fn axis_relative_direction(&mut self, axis: ScrollAxis, inverted: bool) {
        self.slot(axis).natural = inverted;
    }

    pub fn axis_stop(&mut self, axis: ScrollAxis) {
        self.slot(axis).skip = true;
    }

    /// Turn one axis slot into a scroll event. Amounts below one public
    /// step are carried into the next frame until the axis stops, the
    /// pointer leaves or the direction reverses.
    fn decode_axis(&mut self, axis: ScrollAxis) -> Option<MouseScrollEvent> {
        let slot = self.pending.scroll[axis as usize];
        let remainder = &mut self.remainder[axis as usize];
        if slot.skip {
            *remainder = 0;
            return None;
        }
        if !slot.active {
            return None;
        }

        let notched = slot
            .value120
            .or(slot.discrete.map(|notches| notches.saturating_mul(VALUE120_PER_NOTCH)));
        // Float to int casts saturate
        let value120 = notched.unwrap_or_else(|| {
            (slot.continuous / self.continuous_scroll_step * VALUE120_PER_NOTCH as f64).round() as i32
        });
        if value120 == 0 {
            return None;
        }
        if value120.signum() != remainder.signum() {
            *remainder = 0;
        }

        let total = remainder.saturating_add(value120);
        *remainder = total % VALUE120_PER_STEP;
        let value = decode_scroll_value(total, slot.natural, self.scroll_invert);
        if value == 0 {
            return None;
        }

        let source = self.pending.source.unwrap_or(if notched.is_some() {
            ScrollSource::Wheel
        } else {
            ScrollSource::Continuous
        });
        Some(MouseScrollEvent::new(source, axis, value))
    }

    /// End of a pointer frame: emit at most one event per category to the
    /// focused window and clear every slot.
    pub fn frame(&mut self, out: &mut Vec<(WindowId, WindowEvent)>) {
        let Some(window) = self.focus else {
            self.pending = PendingPointer::default();
            return;
        };
        if self.pending.is_empty() {
            return;
        }

        if let Some(motion) = self.pending.motion {
            out.push((window, WindowEvent::MouseMotion(motion)));
        }
        if let Some(button) = self.pending.button {
            out.push((window, WindowEvent::MouseButton(button)));
        }
        for axis in [ScrollAxis::Vertical, ScrollAxis::Horizontal] {
            match self.decode_axis(axis) {
                Some(scroll) => out.push((window, WindowEvent::MouseScroll(scroll))),
                None if self.pending.scroll[axis as usize].active => {
                    trace!("No whole {:?} scroll step this frame", axis)
                }
                None => {}
            }
        }

        self.pending = PendingPointer::default();
    }
}

/// xkb keymap and modifier state for the seat's keyboard
pub struct KeyboardState {
    context: xkb::Context,
    xkb: Option<(xkb::Keymap, xkb::State)>,
    focus: Option<WindowId>,
    repeat: Option<KeyRepeatInfo>,
}

/// Key repeat parameters advertised by the compositor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRepeatInfo {
    /// Characters per second; 0 disables repeat
    pub rate: i32,
    /// Delay before the first repeat, in milliseconds
    pub delay: i32,
}

impl Default for KeyboardState {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyboardState {
    pub fn new() -> Self {
        Self {
            context: xkb::Context::new(xkb::CONTEXT_NO_FLAGS),
            xkb: None,
            focus: None,
            repeat: None,
        }
    }

    pub fn focus(&self) -> Option<WindowId> {
        self.focus
    }

    pub fn has_keymap(&self) -> bool {
        self.xkb.is_some()
    }

    pub fn repeat_info(&self) -> Option<KeyRepeatInfo> {
        self.repeat
    }

    /// Replace the keymap with one compiled from `text`. The previous
    /// keymap is kept if compilation fails.
    pub fn set_keymap_text(&mut self, text: &str) -> bool {
        let text = text.split('\0').next().unwrap_or_default();
        match xkb::Keymap::new_from_string(
            &self.context,
            text.to_string(),
            xkb::KEYMAP_FORMAT_TEXT_V1,
            xkb::KEYMAP_COMPILE_NO_FLAGS,
        ) {
            Some(keymap) => {
                let state = xkb::State::new(&keymap);
                self.xkb = Some((keymap, state));
                true
            }
            None => false,
        }
    }

    fn load_keymap(&mut self, fd: OwnedFd, size: u32) -> std::io::Result<bool> {
        let file = File::from(fd);
        // SAFETY: the compositor hands us a private, read-only keymap file;
        // a copy-on-write mapping cannot observe later writes to it.
        let map = unsafe { MmapOptions::new().len(size as usize).map_copy_read_only(&file)? };
        let text = String::from_utf8_lossy(&map);
        Ok(self.set_keymap_text(&text))
    }

    pub fn update_modifiers(&mut self, depressed: u32, latched: u32, locked: u32, group: u32) {
        if let Some((_, state)) = self.xkb.as_mut() {
            state.update_mask(depressed, latched, locked, 0, 0, group);
        }
    }

    pub fn modifiers(&self) -> Modifiers {
        let Some((_, state)) = self.xkb.as_ref() else {
            return Modifiers::default();
        };
        let active = |name: &str| state.mod_name_is_active(name, xkb::STATE_MODS_EFFECTIVE);
        Modifiers {
            shift: active(xkb::MOD_NAME_SHIFT),
            ctrl: active(xkb::MOD_NAME_CTRL),
            alt: active(xkb::MOD_NAME_ALT),
            logo: active(xkb::MOD_NAME_LOGO),
            caps_lock: active(xkb::MOD_NAME_CAPS),
            num_lock: active(xkb::MOD_NAME_NUM),
        }
    }

    /// Translate one evdev scancode transition.
    pub fn key_event(&self, scancode: u32, state: ButtonState) -> KeyEvent {
        let (key, text) = match (self.xkb.as_ref(), xkb_keycode(scancode)) {
            (Some((_, xkb_state)), Some(keycode)) => {
                let keysym = xkb_state.key_get_one_sym(keycode).raw();
                let text = match state {
                    ButtonState::Pressed => Some(xkb_state.key_get_utf8(keycode))
                        .filter(|t| !t.is_empty() && !t.chars().any(char::is_control)),
                    ButtonState::Released => None,
                };
                (keysym, text)
            }
            _ => (0, None),
        };

        KeyEvent {
            key,
            scancode,
            state,
            modifiers: self.modifiers(),
            text,
        }
    }
}

impl std::fmt::Debug for KeyboardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyboardState")
            .field("has_keymap", &self.has_keymap())
            .field("focus", &self.focus)
            .field("repeat", &self.repeat)
            .finish()
    }
}

/// Seat devices plus the aggregation state built from their events
#[derive(Debug)]
pub struct Input {
    pub pointer: PointerAggregator,
    pub keyboard: KeyboardState,
    wl_pointer: Option<WlPointer>,
    wl_keyboard: Option<WlKeyboard>,
}

impl Input {
    pub fn new(config: &InputConfig) -> Self {
        Self {
            pointer: PointerAggregator::new(config),
            keyboard: KeyboardState::new(),
            wl_pointer: None,
            wl_keyboard: None,
        }
    }

    /// Drop focus held by a window that is going away.
    pub fn forget_window(&mut self, window: WindowId) {
        self.pointer.forget(window);
        if self.keyboard.focus == Some(window) {
            self.keyboard.focus = None;
        }
    }

    pub fn has_devices(&self) -> bool {
        self.wl_pointer.is_some() || self.wl_keyboard.is_some()
    }

    #[cfg(test)]
    pub(crate) fn attach_devices(&mut self, pointer: WlPointer, keyboard: WlKeyboard) {
        self.wl_pointer = Some(pointer);
        self.wl_keyboard = Some(keyboard);
    }

    /// Release pointer and keyboard objects, e.g. when the seat goes away.
    pub fn release_devices(&mut self) {
        if let Some(pointer) = self.wl_pointer.take() {
            if pointer.version() >= 3 {
                pointer.release();
            }
        }
        if let Some(keyboard) = self.wl_keyboard.take() {
            if keyboard.version() >= 3 {
                keyboard.release();
            }
        }
        self.pointer.leave();
        self.keyboard.focus = None;
    }
}

fn surface_window(surface: &WlSurface) -> Option<WindowId> {
    surface.data::<WindowId>().copied()
}

impl Dispatch<WlSeat, ()> for WaylandState {
    fn event(
        state: &mut Self,
        seat: &WlSeat,
        event: wl_seat::Event,
        _data: &(),
        _conn: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_seat::Event::Capabilities {
                capabilities: WEnum::Value(capabilities),
            } => {
                let input = &mut state.input;
                let has_pointer = capabilities.contains(wl_seat::Capability::Pointer);
                let has_keyboard = capabilities.contains(wl_seat::Capability::Keyboard);
                debug!("Seat capabilities: pointer={} keyboard={}", has_pointer, has_keyboard);

                match (has_pointer, input.wl_pointer.take()) {
                    (true, None) => input.wl_pointer = Some(seat.get_pointer(qh, ())),
                    (true, existing) => input.wl_pointer = existing,
                    (false, Some(pointer)) => {
                        if pointer.version() >= 3 {
                            pointer.release();
                        }
                        input.pointer.leave();
                    }
                    (false, None) => {}
                }

                match (has_keyboard, input.wl_keyboard.take()) {
                    (true, None) => input.wl_keyboard = Some(seat.get_keyboard(qh, ())),
                    (true, existing) => input.wl_keyboard = existing,
                    (false, Some(keyboard)) => {
                        if keyboard.version() >= 3 {
                            keyboard.release();
                        }
                        input.keyboard.focus = None;
                    }
                    (false, None) => {}
                }
            }
            wl_seat::Event::Name { name } => debug!("Seat name: {}", name),
            _ => {}
        }
    }
}

impl Dispatch<WlPointer, ()> for WaylandState {
    fn event(
        state: &mut Self,
        pointer: &WlPointer,
        event: wl_pointer::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let aggregator = &mut state.input.pointer;
        let events = &mut state.events;

        match event {
            wl_pointer::Event::Enter {
                surface,
                surface_x,
                surface_y,
                ..
            } => match surface_window(&surface) {
                Some(window) => aggregator.enter(window, surface_x, surface_y),
                None => trace!("Pointer entered a foreign surface"),
            },
            wl_pointer::Event::Leave { .. } => aggregator.leave(),
            wl_pointer::Event::Motion {
                surface_x,
                surface_y,
                ..
            } => aggregator.motion(surface_x, surface_y),
            wl_pointer::Event::Button {
                button,
                state: button_state,
                ..
            } => {
                let pressed = matches!(button_state, WEnum::Value(wl_pointer::ButtonState::Pressed));
                let button_state = if pressed {
                    ButtonState::Pressed
                } else {
                    ButtonState::Released
                };
                aggregator.button(button, button_state, events);
            }
            wl_pointer::Event::Axis {
                axis: WEnum::Value(axis),
                value,
                ..
            } => aggregator.axis(scroll_axis(axis), value),
            wl_pointer::Event::AxisSource {
                axis_source: WEnum::Value(source),
            } => aggregator.axis_source(scroll_source(source)),
            wl_pointer::Event::AxisStop {
                axis: WEnum::Value(axis),
                ..
            } => aggregator.axis_stop(scroll_axis(axis)),
            wl_pointer::Event::AxisDiscrete {
                axis: WEnum::Value(axis),
                discrete,
            } => aggregator.axis_discrete(scroll_axis(axis), discrete),
            wl_pointer::Event::AxisValue120 {
                axis: WEnum::Value(axis),
                value120,
            } => aggregator.axis_value120(scroll_axis(axis), value120),
            wl_pointer::Event::AxisRelativeDirection {
                axis: WEnum::Value(axis),
                direction,
            } => aggregator.axis_relative_direction(
                scroll_axis(axis),
                matches!(direction, WEnum::Value(wl_pointer::AxisRelativeDirection::Inverted)),
            ),
            wl_pointer::Event::Frame => aggregator.frame(events),
            _ => {}
        }

        // Without frame events every event is its own frame
        if pointer.version() < POINTER_FRAME_SINCE && aggregator.has_pending() {
            aggregator.frame(events);
        }
    }
}

impl Dispatch<WlKeyboard, ()> for WaylandState {
    fn event(
        state: &mut Self,
        _keyboard: &WlKeyboard,
        event: wl_keyboard::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let keyboard = &mut state.input.keyboard;

        match event {
            wl_keyboard::Event::Keymap { format, fd, size } => {
                if !matches!(format, WEnum::Value(wl_keyboard::KeymapFormat::XkbV1)) {
                    warn!("Ignoring keymap in unsupported format {:?}", format);
                    return;
                }
                match keyboard.load_keymap(fd, size) {
                    Ok(true) => debug!("Loaded {} byte keymap", size),
                    Ok(false) => warn!("Compositor sent a keymap xkbcommon could not compile"),
                    Err(e) => warn!("Failed to map keymap: {}", e),
                }
            }
            wl_keyboard::Event::Enter { surface, .. } => {
                keyboard.focus = surface_window(&surface);
            }
            wl_keyboard::Event::Leave { .. } => keyboard.focus = None,
            wl_keyboard::Event::Modifiers {
                mods_depressed,
                mods_latched,
                mods_locked,
                group,
                ..
            } => keyboard.update_modifiers(mods_depressed, mods_latched, mods_locked, group),
            wl_keyboard::Event::Key {
                key,
                state: key_state,
                ..
            } => {
                let Some(window) = keyboard.focus else {
                    return;
                };
                let key_state = match key_state {
                    WEnum::Value(wl_keyboard::KeyState::Released) => ButtonState::Released,
                    _ => ButtonState::Pressed,
                };
                let event = keyboard.key_event(key, key_state);
                state.events.push((window, WindowEvent::Key(event)));
            }
            wl_keyboard::Event::RepeatInfo { rate, delay } => {
                keyboard.repeat = Some(KeyRepeatInfo { rate, delay });
            }
            _ => {}
        }
    }
}
