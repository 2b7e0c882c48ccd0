//! Error types and the fatal `verify!` assertion
//!
//! Two tiers of failure exist in mwl:
//!
//! - **Environment failures** (no compositor, a missing global, shared memory
//!   exhausted) are recoverable and surface as [`MwlError`] or as an invalid
//!   [`ScreenBuffer`](crate::ScreenBuffer).
//! - **Programmer errors** (indexing an invalid buffer, presenting an invalid
//!   buffer, asking a handle for a resource it does not expose) are fatal and
//!   go through [`verify!`](crate::verify).

use std::backtrace::Backtrace;
use std::io;
use thiserror::Error;

/// Recoverable failures reported by the library
#[derive(Debug, Error)]
pub enum MwlError {
    /// `ClientApi::Auto` found no display server to talk to
    #[error("no display server found (WAYLAND_DISPLAY is unset)")]
    NoDisplay,

    /// The requested client API is not compiled into this build
    #[error("client API {0} is not supported by this build")]
    UnsupportedClientApi(&'static str),

    /// Connecting to the compositor failed
    #[error("failed to connect to the compositor: {0}")]
    Connect(#[from] wayland_client::ConnectError),

    /// The protocol connection broke while dispatching
    #[error("failed to dispatch compositor events: {0}")]
    Dispatch(#[from] wayland_client::DispatchError),

    /// A global this operation depends on has not been announced
    #[error("required global {0} is not bound")]
    MissingGlobal(&'static str),

    /// Creating, sizing or mapping shared memory failed
    #[error("shared memory failure: {0}")]
    Shm(#[from] io::Error),

    /// The configuration passed to `State::create` failed validation
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The window handle no longer refers to a live backend window
    #[error("window {0} does not exist")]
    UnknownWindow(u32),
}

pub type Result<T> = std::result::Result<T, MwlError>;

/// Report a failed `verify!` and stop the process.
///
/// Not called directly; `verify!` expands to this.
#[doc(hidden)]
#[cold]
#[track_caller]
pub fn verify_failed(condition: &str, message: std::fmt::Arguments<'_>) -> ! {
    let stack = Backtrace::force_capture();
    log::error!(
        "MWL: Verify Failed. Condition: {}\nMessage: {}\nStack: {}",
        condition,
        message,
        stack
    );

    if cfg!(feature = "trap-on-verify") {
        // SAFETY: raising a signal on the current process has no memory-safety
        // preconditions.
        unsafe {
            libc::raise(libc::SIGTRAP);
        }
    }

    panic!("verify failed: {condition}: {message}");
}

/// Fatal assertion for invariant violations.
///
/// Logs the condition, the formatted message and a backtrace, optionally
/// traps into an attached debugger, then panics.
///
/// ```should_panic
/// let idx = 4;
/// mwl::verify!(idx < 3, "index {} out of range", idx);
/// ```
#[macro_export]
macro_rules! verify {
    ($cond:expr, $($arg:tt)+) => {
        if !($cond) {
            $crate::error::verify_failed(stringify!($cond), format_args!($($arg)+));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_passes_when_condition_holds() {
        let len = 4usize;
        crate::verify!(len == 4, "unexpected length {}", len);
    }

    #[test]
    #[should_panic(expected = "verify failed")]
    fn test_verify_panics_with_condition() {
        let idx = 10usize;
        crate::verify!(idx < 3, "index {} out of range", idx);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            MwlError::MissingGlobal("wl_compositor").to_string(),
            "required global wl_compositor is not bound"
        );
        assert!(MwlError::NoDisplay.to_string().contains("WAYLAND_DISPLAY"));
    }
}
