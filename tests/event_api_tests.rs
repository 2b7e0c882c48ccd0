//! Integration tests for the public event types and the input aggregator
//!
//! These run without a compositor: they drive the pointer aggregator with
//! the same sequences a compositor sends and check what reaches the window.

use mwl::config::InputConfig;
use mwl::wayland::input::{button_from_code, decode_scroll_value, PointerAggregator};
use mwl::{
    mouse_button, ButtonState, MouseButtonEvent, MouseMotionEvent, MouseScrollEvent, ScrollAxis,
    ScrollSource, WindowEvent, WindowId,
};
use proptest::prelude::*;

const BTN_LEFT: u32 = 0x110;
const BTN_MIDDLE: u32 = 0x112;

fn focused_pointer(config: &InputConfig) -> (PointerAggregator, WindowId) {
    let mut pointer = PointerAggregator::new(config);
    let window = WindowId::from_raw(1);
    pointer.enter(window, 0.0, 0.0);
    pointer.frame(&mut Vec::new());
    (pointer, window)
}

#[test]
fn test_scroll_reference_values() {
    assert_eq!(decode_scroll_value(120, false, false), 8);
    assert_eq!(decode_scroll_value(15, false, false), 1);
    assert_eq!(decode_scroll_value(120, true, false), -8);
}

#[test]
fn test_button_reference_packing() {
    let event = MouseButtonEvent::new(5, ButtonState::Pressed);
    assert_eq!(event.button(), 5);
    assert_eq!(event.state(), ButtonState::Pressed);
}

#[test]
#[should_panic(expected = "verify failed")]
fn test_button_code_beyond_five_bits_is_fatal() {
    let _ = MouseButtonEvent::new(32, ButtonState::Released);
}

#[test]
fn test_click_and_drag_gesture() {
    let (mut pointer, window) = focused_pointer(&InputConfig::default());
    let mut out = Vec::new();

    // Press
    pointer.button(BTN_LEFT, ButtonState::Pressed, &mut out);
    pointer.frame(&mut out);

    // Drag across several motion events in one frame
    for step in 1..=4 {
        pointer.motion(step as f64 * 10.0, 5.0);
    }
    pointer.frame(&mut out);

    // Release
    pointer.button(BTN_LEFT, ButtonState::Released, &mut out);
    pointer.frame(&mut out);

    assert_eq!(
        out,
        vec![
            (
                window,
                WindowEvent::MouseButton(MouseButtonEvent::new(
                    mouse_button::LEFT,
                    ButtonState::Pressed
                ))
            ),
            (window, WindowEvent::MouseMotion(MouseMotionEvent { x: 40.0, y: 5.0 })),
            (
                window,
                WindowEvent::MouseButton(MouseButtonEvent::new(
                    mouse_button::LEFT,
                    ButtonState::Released
                ))
            ),
        ]
    );
}

#[test]
fn test_motion_and_button_in_one_frame() {
    let (mut pointer, window) = focused_pointer(&InputConfig::default());
    let mut out = Vec::new();

    pointer.motion(3.0, 4.0);
    pointer.button(BTN_MIDDLE, ButtonState::Pressed, &mut out);
    pointer.frame(&mut out);

    assert_eq!(out.len(), 2);
    assert!(out.iter().all(|(w, _)| *w == window));
    assert!(matches!(out[0].1, WindowEvent::MouseMotion(_)));
    assert!(matches!(out[1].1, WindowEvent::MouseButton(b) if b.button() == mouse_button::MIDDLE));
}

#[test]
fn test_diagonal_scroll_yields_one_event_per_axis() {
    let (mut pointer, _) = focused_pointer(&InputConfig::default());
    let mut out = Vec::new();

    pointer.axis_source(ScrollSource::Wheel);
    pointer.axis_value120(ScrollAxis::Vertical, 120);
    pointer.axis_value120(ScrollAxis::Horizontal, -60);
    pointer.frame(&mut out);

    let scrolls: Vec<MouseScrollEvent> = out
        .into_iter()
        .filter_map(|(_, e)| match e {
            WindowEvent::MouseScroll(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(
        scrolls,
        vec![
            MouseScrollEvent::new(ScrollSource::Wheel, ScrollAxis::Vertical, 8),
            MouseScrollEvent::new(ScrollSource::Wheel, ScrollAxis::Horizontal, -4),
        ]
    );
}

#[test]
fn test_global_scroll_invert() {
    let config = InputConfig {
        scroll_invert: true,
        ..InputConfig::default()
    };
    let (mut pointer, _) = focused_pointer(&config);
    let mut out = Vec::new();

    pointer.axis_value120(ScrollAxis::Vertical, 30);
    pointer.frame(&mut out);

    match &out[..] {
        [(_, WindowEvent::MouseScroll(scroll))] => assert_eq!(scroll.value(), -2),
        other => panic!("unexpected events {other:?}"),
    }
}

#[test]
fn test_focus_moves_between_windows() {
    let mut pointer = PointerAggregator::new(&InputConfig::default());
    let first = WindowId::from_raw(1);
    let second = WindowId::from_raw(2);
    let mut out = Vec::new();

    pointer.enter(first, 1.0, 1.0);
    pointer.frame(&mut out);
    pointer.leave();
    pointer.frame(&mut out);
    pointer.enter(second, 2.0, 2.0);
    pointer.motion(9.0, 9.0);
    pointer.frame(&mut out);

    let targets: Vec<WindowId> = out.iter().map(|(w, _)| *w).collect();
    assert_eq!(targets, vec![first, second]);
}

#[test]
fn test_known_button_codes() {
    let ids: Vec<u8> = (0x110..=0x117).map(button_from_code).collect();
    assert_eq!(ids, (0..8).collect::<Vec<u8>>());
}

proptest! {
    #[test]
    fn test_decoded_scroll_stays_in_range(value120 in -100_000i32..100_000, natural: bool, invert: bool) {
        let value = decode_scroll_value(value120, natural, invert);
        prop_assert!((-8..=8).contains(&value));
        // Flipping either flag negates the result
        prop_assert_eq!(decode_scroll_value(value120, !natural, invert), -value);
    }

    #[test]
    fn test_button_packing_keeps_fields(button in 0u8..32, pressed: bool) {
        let state = if pressed { ButtonState::Pressed } else { ButtonState::Released };
        let event = MouseButtonEvent::new(button, state);
        prop_assert_eq!(event.button(), button);
        prop_assert_eq!(event.state(), state);
        prop_assert_eq!(event.bits() >> 6, 0);
    }

    #[test]
    fn test_motion_only_reports_last_position(points in prop::collection::vec((0.0f64..4096.0, 0.0f64..4096.0), 1..32)) {
        let (mut pointer, window) = focused_pointer(&InputConfig::default());
        for (x, y) in &points {
            pointer.motion(*x, *y);
        }
        let mut out = Vec::new();
        pointer.frame(&mut out);

        let (x, y) = points[points.len() - 1];
        prop_assert_eq!(out, vec![(window, WindowEvent::MouseMotion(MouseMotionEvent { x, y }))]);
    }
}
