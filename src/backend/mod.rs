//! Backend selection and native resource identity
//!
//! The set of backends is closed, so selection is a plain enum chosen once
//! in [`Backend::create`] and every operation is a `match` over it.
//! Native handles are requested through [`ResourceKind`], an explicit list of
//! what a backend is willing to hand out.

use std::env;

use log::info;
use wayland_client::protocol::{
    wl_compositor::WlCompositor, wl_display::WlDisplay, wl_registry::WlRegistry, wl_seat::WlSeat,
    wl_shm::WlShm, wl_surface::WlSurface,
};
use wayland_client::Connection;
use wayland_protocols::xdg::shell::client::{
    xdg_surface::XdgSurface, xdg_toplevel::XdgToplevel, xdg_wm_base::XdgWmBase,
};

use crate::config::MwlConfig;
use crate::error::{MwlError, Result};
use crate::event::WindowEvent;
use crate::wayland::input::KeyRepeatInfo;
use crate::wayland::registry::OutputInfo;
use crate::wayland::shm::{BufferStats, PixelBuffer};
use crate::wayland::toplevel::FullscreenRequest;
use crate::wayland::WaylandBackend;

/// Which windowing system to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientApi {
    /// Pick the first available backend for this session
    #[default]
    Auto,
    Wayland,
}

impl ClientApi {
    /// Resolve `Auto` against the environment.
    pub fn resolve(self) -> Result<ClientApi> {
        match self {
            ClientApi::Auto => {
                if env::var_os("WAYLAND_DISPLAY").is_some_and(|v| !v.is_empty()) {
                    Ok(ClientApi::Wayland)
                } else {
                    Err(MwlError::NoDisplay)
                }
            }
            api => Ok(api),
        }
    }
}

/// Backend-local window identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(u32);

impl WindowId {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Native objects a caller may ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Connection,
    Display,
    Registry,
    Compositor,
    Shm,
    WmBase,
    Seat,
    Surface,
    XdgSurface,
    Toplevel,
}

impl ResourceKind {
    /// Kinds that belong to a window rather than the connection
    pub fn is_window_level(self) -> bool {
        matches!(
            self,
            ResourceKind::Surface | ResourceKind::XdgSurface | ResourceKind::Toplevel
        )
    }
}

/// A native handle, cloned out of the backend
#[derive(Debug, Clone)]
pub enum NativeResource {
    Connection(Connection),
    Display(WlDisplay),
    Registry(WlRegistry),
    Compositor(WlCompositor),
    Shm(WlShm),
    WmBase(XdgWmBase),
    Seat(WlSeat),
    Surface(WlSurface),
    XdgSurface(XdgSurface),
    Toplevel(XdgToplevel),
}

/// The live backend, one variant per supported client API
#[derive(Debug)]
pub enum Backend {
    Wayland(WaylandBackend),
}

impl Backend {
    pub fn create(client_api: ClientApi, config: MwlConfig) -> Result<Self> {
        match client_api.resolve()? {
            ClientApi::Wayland => {
                info!("Using the Wayland backend");
                Ok(Backend::Wayland(WaylandBackend::connect(config)?))
            }
            ClientApi::Auto => Err(MwlError::UnsupportedClientApi("auto")),
        }
    }

    pub fn client_api(&self) -> ClientApi {
        match self {
            Backend::Wayland(_) => ClientApi::Wayland,
        }
    }

    pub fn dispatch(&mut self) -> Result<Vec<(WindowId, WindowEvent)>> {
        match self {
            Backend::Wayland(backend) => backend.dispatch(),
        }
    }

    pub fn poll(&mut self) -> Result<Vec<(WindowId, WindowEvent)>> {
        match self {
            Backend::Wayland(backend) => backend.poll(),
        }
    }

    pub fn create_window(&mut self, title: &str, width: i32, height: i32) -> Result<WindowId> {
        match self {
            Backend::Wayland(backend) => backend.create_window(title, width, height),
        }
    }

    pub fn destroy_window(&mut self, id: WindowId) {
        match self {
            Backend::Wayland(backend) => backend.destroy_window(id),
        }
    }

    pub fn show(&mut self, id: WindowId) {
        match self {
            Backend::Wayland(backend) => backend.show(id),
        }
    }

    pub fn size(&self, id: WindowId) -> Option<(i32, i32)> {
        match self {
            Backend::Wayland(backend) => backend
                .window(id)
                .ok()
                .map(|w| (w.state.width(), w.state.height())),
        }
    }

    pub fn scale_factor(&self, id: WindowId) -> Option<f64> {
        match self {
            Backend::Wayland(backend) => backend.window(id).ok().map(|w| w.state.scale_factor()),
        }
    }

    pub fn bounds(&self, id: WindowId) -> Option<(i32, i32)> {
        match self {
            Backend::Wayland(backend) => backend.window(id).ok().and_then(|w| w.state.bounds()),
        }
    }

    pub fn is_fullscreen(&self, id: WindowId) -> bool {
        match self {
            Backend::Wayland(backend) => backend
                .window(id)
                .map(|w| w.state.is_fullscreen())
                .unwrap_or(false),
        }
    }

    pub fn set_fullscreen(&mut self, id: WindowId, fullscreen: bool) -> Result<FullscreenRequest> {
        match self {
            Backend::Wayland(backend) => backend.set_fullscreen(id, fullscreen),
        }
    }

    pub fn set_title(&mut self, id: WindowId, title: &str) -> Result<()> {
        match self {
            Backend::Wayland(backend) => backend.set_title(id, title),
        }
    }

    pub fn fetch_buffer(&mut self, id: WindowId) -> Option<PixelBuffer> {
        match self {
            Backend::Wayland(backend) => backend.fetch_buffer(id),
        }
    }

    pub fn present(&mut self, id: WindowId, buffer: PixelBuffer) {
        match self {
            Backend::Wayland(backend) => backend.present(id, buffer),
        }
    }

    pub fn outputs(&self) -> Vec<OutputInfo> {
        match self {
            Backend::Wayland(backend) => backend.outputs(),
        }
    }

    pub fn buffer_stats(&self) -> BufferStats {
        match self {
            Backend::Wayland(backend) => backend.buffer_stats(),
        }
    }

    pub fn key_repeat_info(&self) -> Option<KeyRepeatInfo> {
        match self {
            Backend::Wayland(backend) => backend.key_repeat_info(),
        }
    }

    pub fn resource(&self, kind: ResourceKind) -> Option<NativeResource> {
        match self {
            Backend::Wayland(backend) => backend.resource(kind),
        }
    }

    pub fn window_resource(&self, id: WindowId, kind: ResourceKind) -> Result<NativeResource> {
        match self {
            Backend::Wayland(backend) => backend.window_resource(id, kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_auto_without_display_fails() {
        let saved = env::var_os("WAYLAND_DISPLAY");
        env::remove_var("WAYLAND_DISPLAY");

        assert!(matches!(ClientApi::Auto.resolve(), Err(MwlError::NoDisplay)));
        assert_eq!(ClientApi::Wayland.resolve().unwrap(), ClientApi::Wayland);

        if let Some(value) = saved {
            env::set_var("WAYLAND_DISPLAY", value);
        }
    }

    #[test]
    #[serial]
    fn test_auto_with_display_selects_wayland() {
        let saved = env::var_os("WAYLAND_DISPLAY");
        env::set_var("WAYLAND_DISPLAY", "wayland-test");

        assert_eq!(ClientApi::Auto.resolve().unwrap(), ClientApi::Wayland);

        match saved {
            Some(value) => env::set_var("WAYLAND_DISPLAY", value),
            None => env::remove_var("WAYLAND_DISPLAY"),
        }
    }

    #[test]
    fn test_window_level_kinds() {
        assert!(ResourceKind::Surface.is_window_level());
        assert!(ResourceKind::Toplevel.is_window_level());
        assert!(!ResourceKind::Connection.is_window_level());
        assert!(!ResourceKind::Seat.is_window_level());
    }

    #[test]
    fn test_window_id_roundtrip() {
        assert_eq!(WindowId::from_raw(7).raw(), 7);
        assert!(WindowId::from_raw(1) < WindowId::from_raw(2));
    }
}
