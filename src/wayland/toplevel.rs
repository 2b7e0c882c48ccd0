//! Toplevel window state
//!
//! A surface gets the xdg_toplevel role, commits without a buffer and then
//! waits for `xdg_surface.configure`. Only after that configure has been
//! acknowledged may a buffer be attached. Size, fullscreen state and
//! capabilities all come from the compositor; requests we send are hints and
//! the cached state changes only when the compositor confirms it.

use log::{debug, info, trace};
use wayland_client::protocol::{wl_compositor::WlCompositor, wl_surface::{self, WlSurface}};
use wayland_client::{Connection, Dispatch, Proxy, QueueHandle, WEnum};
use wayland_protocols::wp::fractional_scale::v1::client::{
    wp_fractional_scale_manager_v1::WpFractionalScaleManagerV1,
    wp_fractional_scale_v1::{self, WpFractionalScaleV1},
};
use wayland_protocols::xdg::decoration::zv1::client::{
    zxdg_decoration_manager_v1::ZxdgDecorationManagerV1,
    zxdg_toplevel_decoration_v1::{self, ZxdgToplevelDecorationV1},
};
use wayland_protocols::xdg::shell::client::{
    xdg_surface::{self, XdgSurface},
    xdg_toplevel::{self, XdgToplevel},
    xdg_wm_base::{self, XdgWmBase},
};

use super::registry::{GlobalKind, Globals};
use super::WaylandState;
use crate::backend::WindowId;
use crate::config::WindowConfig;
use crate::error::{MwlError, Result};
use crate::event::WindowEvent;

/// `xdg_toplevel.state` value for fullscreen
const STATE_FULLSCREEN: u32 = 2;

/// Highest `xdg_toplevel.wm_capabilities` value we track
const MAX_CAPABILITY: u32 = 4;

/// `preferred_scale` is in 1/120ths
const FRACTIONAL_SCALE_DENOMINATOR: f64 = 120.0;

/// Window management features the compositor offers for a toplevel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const WINDOW_MENU: u32 = 1;
    pub const MAXIMIZE: u32 = 2;
    pub const FULLSCREEN: u32 = 3;
    pub const MINIMIZE: u32 = 4;

    pub const fn none() -> Self {
        Self(0)
    }

    /// What to assume when the compositor cannot tell us (xdg_wm_base < 5)
    pub const fn all() -> Self {
        Self(((1u16 << (MAX_CAPABILITY + 1)) - 2) as u8)
    }

    /// Rebuild from a `wm_capabilities` array of native-endian u32s.
    pub fn from_wire(array: &[u8]) -> Self {
        let mut caps = Self::none();
        for value in wire_u32s(array) {
            if (1..=MAX_CAPABILITY).contains(&value) {
                caps.0 |= 1 << value;
            } else {
                trace!("Ignoring unknown wm capability {}", value);
            }
        }
        caps
    }

    pub fn contains(self, capability: u32) -> bool {
        capability <= MAX_CAPABILITY && self.0 & (1 << capability) != 0
    }
}

fn wire_u32s(array: &[u8]) -> impl Iterator<Item = u32> + '_ {
    array
        .chunks_exact(4)
        .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}

/// Where a surface is in the configure handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Role objects exist, nothing committed yet
    Created,
    /// Initial commit sent, waiting for the first configure
    AwaitingConfigure,
    /// A configure has been acknowledged; buffers may be attached
    Mapped,
}

/// Outcome of a fullscreen request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullscreenRequest {
    Sent,
    Unsupported,
}

/// Compositor-driven state of one toplevel, independent of the protocol
/// objects so the transitions can be exercised directly.
#[derive(Debug, Clone, PartialEq)]
pub struct ToplevelState {
    phase: Phase,
    width: i32,
    height: i32,
    fullscreen: bool,
    capabilities: Capabilities,
    bounds: Option<(i32, i32)>,
    fractional_scale: Option<f64>,
    buffer_scale: i32,
}

impl ToplevelState {
    pub fn new(width: i32, height: i32, capabilities: Capabilities) -> Self {
        Self {
            phase: Phase::Created,
            width,
            height,
            fullscreen: false,
            capabilities,
            bounds: None,
            fractional_scale: None,
            buffer_scale: 1,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_mapped(&self) -> bool {
        self.phase == Phase::Mapped
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn bounds(&self) -> Option<(i32, i32)> {
        self.bounds
    }

    /// Fractional scale if the compositor sent one, else the integer buffer scale
    pub fn scale_factor(&self) -> f64 {
        self.fractional_scale.unwrap_or(self.buffer_scale as f64)
    }

    pub fn committed(&mut self) {
        if self.phase == Phase::Created {
            self.phase = Phase::AwaitingConfigure;
        }
    }

    /// Record an acknowledged `xdg_surface.configure`. Returns true the
    /// first time, when the surface becomes mapped.
    pub fn surface_configured(&mut self) -> bool {
        let first = self.phase != Phase::Mapped;
        self.phase = Phase::Mapped;
        first
    }

    /// Apply an `xdg_toplevel.configure`. Returns the new size if it changed.
    ///
    /// A zero dimension means "client's choice" and leaves the size alone.
    pub fn on_configure(&mut self, width: i32, height: i32, states: &[u8]) -> Option<(i32, i32)> {
        self.fullscreen = wire_u32s(states).any(|s| s == STATE_FULLSCREEN);

        if width <= 0 || height <= 0 {
            return None;
        }
        if (width, height) == (self.width, self.height) {
            return None;
        }
        self.width = width;
        self.height = height;
        Some((width, height))
    }

    pub fn on_wm_capabilities(&mut self, array: &[u8]) {
        self.capabilities = Capabilities::from_wire(array);
    }

    pub fn on_configure_bounds(&mut self, width: i32, height: i32) {
        self.bounds = (width > 0 && height > 0).then_some((width, height));
    }

    pub fn on_preferred_scale(&mut self, scale: u32) {
        self.fractional_scale = Some(scale as f64 / FRACTIONAL_SCALE_DENOMINATOR);
    }

    pub fn on_buffer_scale(&mut self, factor: i32) {
        self.buffer_scale = factor.max(1);
    }

    pub fn fullscreen_request(&self) -> FullscreenRequest {
        if self.capabilities.contains(Capabilities::FULLSCREEN) {
            FullscreenRequest::Sent
        } else {
            FullscreenRequest::Unsupported
        }
    }
}

/// One window's surface, its role objects and its toplevel state
#[derive(Debug)]
pub struct WaylandWindow {
    pub id: WindowId,
    pub surface: WlSurface,
    pub xdg_surface: XdgSurface,
    pub toplevel: XdgToplevel,
    decoration: Option<ZxdgToplevelDecorationV1>,
    fractional_scale: Option<WpFractionalScaleV1>,
    pub state: ToplevelState,
}

impl WaylandWindow {
    /// Create the surface and its role objects and send the initial commit.
    ///
    /// The caller must roundtrip before the window can be presented to.
    pub fn new(
        id: WindowId,
        globals: &Globals,
        config: &WindowConfig,
        qh: &QueueHandle<WaylandState>,
        title: &str,
        width: i32,
        height: i32,
    ) -> Result<Self> {
        let compositor = globals
            .compositor
            .as_ref()
            .ok_or(MwlError::MissingGlobal(GlobalKind::Compositor.interface()))?;
        let wm_base = globals
            .wm_base
            .as_ref()
            .ok_or(MwlError::MissingGlobal(GlobalKind::WmBase.interface()))?;
        if globals.shm.is_none() {
            return Err(MwlError::MissingGlobal(GlobalKind::Shm.interface()));
        }

        let surface = compositor.proxy.create_surface(qh, id);
        let xdg_surface = wm_base.proxy.get_xdg_surface(&surface, qh, id);
        let toplevel = xdg_surface.get_toplevel(qh, id);
        toplevel.set_app_id(config.app_id.clone());
        toplevel.set_title(title.to_string());

        let decoration = globals
            .decoration_manager
            .as_ref()
            .filter(|_| config.server_side_decorations)
            .map(|manager| {
                let decoration = manager.proxy.get_toplevel_decoration(&toplevel, qh, id);
                decoration.set_mode(zxdg_toplevel_decoration_v1::Mode::ServerSide);
                decoration
            });

        let fractional_scale = globals
            .fractional_scale_manager
            .as_ref()
            .filter(|_| config.fractional_scale)
            .map(|manager| manager.proxy.get_fractional_scale(&surface, qh, id));

        // wm_capabilities only exists from v5; older compositors offer everything
        let capabilities = if wm_base.proxy.version() >= 5 {
            Capabilities::none()
        } else {
            Capabilities::all()
        };

        let mut state = ToplevelState::new(width, height, capabilities);
        surface.commit();
        state.committed();

        debug!(
            "Created window {:?} \"{}\" {}x{} (decoration: {}, fractional scale: {})",
            id,
            title,
            width,
            height,
            decoration.is_some(),
            fractional_scale.is_some()
        );

        Ok(Self {
            id,
            surface,
            xdg_surface,
            toplevel,
            decoration,
            fractional_scale,
            state,
        })
    }

    pub fn set_title(&self, title: &str) {
        self.toplevel.set_title(title.to_string());
    }

    /// Ask the compositor to enter or leave fullscreen. The cached state
    /// follows once the compositor's next configure arrives.
    pub fn set_fullscreen(&self, fullscreen: bool) -> FullscreenRequest {
        let request = self.state.fullscreen_request();
        match request {
            FullscreenRequest::Sent if fullscreen => self.toplevel.set_fullscreen(None),
            FullscreenRequest::Sent => self.toplevel.unset_fullscreen(),
            FullscreenRequest::Unsupported => {
                debug!("Compositor does not support fullscreen for {:?}", self.id)
            }
        }
        request
    }
}

#[cfg(test)]
impl WaylandWindow {
    /// A window whose protocol objects are inert, with fresh toplevel state
    pub(crate) fn detached(
        id: WindowId,
        backend: &wayland_backend::client::WeakBackend,
        width: i32,
        height: i32,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            id,
            surface: WlSurface::inert(backend.clone()),
            xdg_surface: XdgSurface::inert(backend.clone()),
            toplevel: XdgToplevel::inert(backend.clone()),
            decoration: None,
            fractional_scale: None,
            state: ToplevelState::new(width, height, capabilities),
        }
    }
}

impl Drop for WaylandWindow {
    fn drop(&mut self) {
        if let Some(fractional_scale) = self.fractional_scale.take() {
            fractional_scale.destroy();
        }
        if let Some(decoration) = self.decoration.take() {
            decoration.destroy();
        }
        self.toplevel.destroy();
        self.xdg_surface.destroy();
        self.surface.destroy();
    }
}

impl Dispatch<XdgWmBase, ()> for WaylandState {
    fn event(
        _state: &mut Self,
        wm_base: &XdgWmBase,
        event: xdg_wm_base::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let xdg_wm_base::Event::Ping { serial } = event {
            trace!("Ping {}", serial);
            wm_base.pong(serial);
        }
    }
}

impl Dispatch<XdgSurface, WindowId> for WaylandState {
    fn event(
        state: &mut Self,
        xdg_surface: &XdgSurface,
        event: xdg_surface::Event,
        id: &WindowId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let xdg_surface::Event::Configure { serial } = event {
            xdg_surface.ack_configure(serial);
            if let Some(window) = state.windows.get_mut(id) {
                if window.state.surface_configured() {
                    info!(
                        "Window {:?} mapped at {}x{}",
                        id,
                        window.state.width(),
                        window.state.height()
                    );
                }
            }
        }
    }
}

impl Dispatch<XdgToplevel, WindowId> for WaylandState {
    fn event(
        state: &mut Self,
        _toplevel: &XdgToplevel,
        event: xdg_toplevel::Event,
        id: &WindowId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let Some(window) = state.windows.get_mut(id) else {
            return;
        };

        match event {
            xdg_toplevel::Event::Configure {
                width,
                height,
                states,
            } => {
                trace!("Toplevel {:?} configure {}x{}", id, width, height);
                if let Some((width, height)) = window.state.on_configure(width, height, &states) {
                    state.events.push((*id, WindowEvent::Resize(width, height)));
                }
            }
            xdg_toplevel::Event::Close => {
                debug!("Compositor asked window {:?} to close", id);
                state.events.push((*id, WindowEvent::Close));
            }
            xdg_toplevel::Event::ConfigureBounds { width, height } => {
                window.state.on_configure_bounds(width, height);
            }
            xdg_toplevel::Event::WmCapabilities { capabilities } => {
                window.state.on_wm_capabilities(&capabilities);
                debug!("Window {:?} capabilities {:?}", id, window.state.capabilities());
            }
            _ => {}
        }
    }
}

impl Dispatch<WlSurface, WindowId> for WaylandState {
    fn event(
        state: &mut Self,
        _surface: &WlSurface,
        event: wl_surface::Event,
        id: &WindowId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_surface::Event::PreferredBufferScale { factor } => {
                if let Some(window) = state.windows.get_mut(id) {
                    window.state.on_buffer_scale(factor);
                }
            }
            other => trace!("Surface {:?}: {:?}", id, other),
        }
    }
}

impl Dispatch<ZxdgToplevelDecorationV1, WindowId> for WaylandState {
    fn event(
        _state: &mut Self,
        _decoration: &ZxdgToplevelDecorationV1,
        event: zxdg_toplevel_decoration_v1::Event,
        id: &WindowId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let zxdg_toplevel_decoration_v1::Event::Configure { mode } = event {
            match mode {
                WEnum::Value(zxdg_toplevel_decoration_v1::Mode::ServerSide) => {
                    debug!("Window {:?} uses server-side decorations", id)
                }
                other => debug!("Window {:?} decoration mode {:?}", id, other),
            }
        }
    }
}

impl Dispatch<WpFractionalScaleV1, WindowId> for WaylandState {
    fn event(
        state: &mut Self,
        _fractional_scale: &WpFractionalScaleV1,
        event: wp_fractional_scale_v1::Event,
        id: &WindowId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wp_fractional_scale_v1::Event::PreferredScale { scale } = event {
            if let Some(window) = state.windows.get_mut(id) {
                window.state.on_preferred_scale(scale);
                debug!("Window {:?} scale {}", id, window.state.scale_factor());
            }
        }
    }
}

wayland_client::delegate_noop!(WaylandState: ignore WlCompositor);
wayland_client::delegate_noop!(WaylandState: ignore ZxdgDecorationManagerV1);
wayland_client::delegate_noop!(WaylandState: ignore WpFractionalScaleManagerV1);

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(values: &[u32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_ne_bytes()).collect()
    }

    fn mapped(width: i32, height: i32) -> ToplevelState {
        let mut state = ToplevelState::new(width, height, Capabilities::all());
        state.committed();
        state.surface_configured();
        state
    }

    #[test]
    fn test_handshake_phases() {
        let mut state = ToplevelState::new(640, 480, Capabilities::all());
        assert_eq!(state.phase(), Phase::Created);
        assert!(!state.is_mapped());

        state.committed();
        assert_eq!(state.phase(), Phase::AwaitingConfigure);
        assert!(!state.is_mapped());

        assert!(state.surface_configured());
        assert!(state.is_mapped());
        // Later configures keep the window mapped
        assert!(!state.surface_configured());
        assert_eq!(state.phase(), Phase::Mapped);
    }

    #[test]
    fn test_zero_configure_keeps_size() {
        let mut state = mapped(800, 600);
        assert_eq!(state.on_configure(0, 0, &[]), None);
        assert_eq!(state.on_configure(0, 300, &[]), None);
        assert_eq!(state.on_configure(1024, 0, &[]), None);
        assert_eq!((state.width(), state.height()), (800, 600));
    }

    #[test]
    fn test_configure_reports_only_changes() {
        let mut state = mapped(800, 600);
        assert_eq!(state.on_configure(800, 600, &[]), None);
        assert_eq!(state.on_configure(1280, 720, &[]), Some((1280, 720)));
        assert_eq!((state.width(), state.height()), (1280, 720));
        assert_eq!(state.on_configure(1280, 720, &[]), None);
    }

    #[test]
    fn test_fullscreen_follows_configure_states() {
        let mut state = mapped(800, 600);
        assert!(!state.is_fullscreen());

        // activated (4) + fullscreen (2)
        state.on_configure(1920, 1080, &wire(&[4, STATE_FULLSCREEN]));
        assert!(state.is_fullscreen());

        state.on_configure(800, 600, &wire(&[4]));
        assert!(!state.is_fullscreen());
    }

    #[test]
    fn test_capabilities_from_wire() {
        let caps = Capabilities::from_wire(&wire(&[1, 3]));
        assert!(caps.contains(Capabilities::WINDOW_MENU));
        assert!(caps.contains(Capabilities::FULLSCREEN));
        assert!(!caps.contains(Capabilities::MAXIMIZE));
        assert!(!caps.contains(Capabilities::MINIMIZE));

        // Unknown values and trailing partial words are ignored
        let mut array = wire(&[0, 9, 2]);
        array.push(0xff);
        let caps = Capabilities::from_wire(&array);
        assert_eq!(caps, Capabilities::from_wire(&wire(&[2])));
    }

    #[test]
    fn test_all_capabilities() {
        let caps = Capabilities::all();
        for cap in 1..=MAX_CAPABILITY {
            assert!(caps.contains(cap));
        }
        assert!(!caps.contains(0));
        assert!(!caps.contains(MAX_CAPABILITY + 1));
    }

    #[test]
    fn test_capabilities_are_rebuilt_wholesale() {
        let mut state = mapped(800, 600);
        state.on_wm_capabilities(&wire(&[Capabilities::FULLSCREEN]));
        assert_eq!(state.fullscreen_request(), FullscreenRequest::Sent);

        state.on_wm_capabilities(&wire(&[Capabilities::MAXIMIZE]));
        assert_eq!(state.fullscreen_request(), FullscreenRequest::Unsupported);
    }

    #[test]
    fn test_unsupported_fullscreen_leaves_state() {
        let mut state = ToplevelState::new(800, 600, Capabilities::none());
        state.committed();
        state.surface_configured();

        assert_eq!(state.fullscreen_request(), FullscreenRequest::Unsupported);
        assert!(!state.is_fullscreen());
    }

    #[test]
    fn test_scale_factor_prefers_fractional() {
        let mut state = mapped(800, 600);
        assert_eq!(state.scale_factor(), 1.0);

        state.on_buffer_scale(2);
        assert_eq!(state.scale_factor(), 2.0);

        state.on_preferred_scale(180);
        assert_eq!(state.scale_factor(), 1.5);
    }

    #[test]
    fn test_configure_bounds() {
        let mut state = mapped(800, 600);
        assert_eq!(state.bounds(), None);
        state.on_configure_bounds(2560, 1400);
        assert_eq!(state.bounds(), Some((2560, 1400)));
        state.on_configure_bounds(0, 0);
        assert_eq!(state.bounds(), None);
    }
}
