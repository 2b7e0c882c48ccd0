//! # mwl - minimal window layer
//!
//! Native windows, input callbacks and a writable pixel buffer you present
//! every frame, without a GUI toolkit.
//!
//! ## Architecture
//!
//! - `state`: the public handles (`State`, `Window`, `ScreenBuffer`)
//! - `backend`: backend selection and native resource identity
//! - `wayland`: the Wayland client (registry, shared-memory buffers, input
//!   aggregation, toplevel state)
//! - `event`: input and window event types
//! - `config`: TOML configuration
//! - `error`: error type and the `verify!` assertion
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mwl::{Desc, State, Window};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! fn main() -> anyhow::Result<()> {
//!     let state = State::create(Desc::default())?;
//!     let window = Window::create(&state, "Hello", 800, 600)?;
//!
//!     let running = Rc::new(Cell::new(true));
//!     let flag = Rc::clone(&running);
//!     window.set_close_callback(move || flag.set(false));
//!     window.show();
//!
//!     while running.get() {
//!         state.dispatch_events()?;
//!         let mut buffer = window.fetch_screen_buffer();
//!         if buffer.is_valid() {
//!             buffer.fill(0x00FF_8800);
//!             window.present_screen_buffer(buffer);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod event;
pub mod state;
pub mod wayland;

// Re-export main types for easy access
pub use backend::{ClientApi, NativeResource, ResourceKind, WindowId};
pub use config::MwlConfig;
pub use error::{MwlError, Result};
pub use event::{
    mouse_button, ButtonState, KeyEvent, Modifiers, MouseButtonEvent, MouseMotionEvent,
    MouseScrollEvent, ScrollAxis, ScrollSource, WindowEvent,
};
pub use state::{Desc, ScreenBuffer, State, Window};
pub use wayland::input::KeyRepeatInfo;
pub use wayland::registry::OutputInfo;
pub use wayland::shm::BufferStats;

/// Version information for mwl
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
