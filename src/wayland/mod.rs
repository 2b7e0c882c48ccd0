//! Wayland backend
//!
//! [`WaylandBackend`] owns the connection, its event queue and all
//! client-side protocol state. Protocol listeners live next to the component
//! they feed ([`registry`], [`shm`], [`input`], [`toplevel`]) and are all
//! implemented on [`WaylandState`], so one `dispatch` pumps every component.
//! Listeners never call back into user code; they queue [`WindowEvent`]s that
//! the caller drains once the batch has been dispatched.

pub mod input;
pub mod registry;
pub mod shm;
pub mod toplevel;

use std::collections::HashMap;
use std::io;
use std::os::fd::AsRawFd;

use log::{debug, error, info, warn};
use wayland_backend::client::WaylandError;
use wayland_client::protocol::{wl_registry::WlRegistry, wl_surface::WlSurface};
use wayland_client::{Connection, DispatchError, EventQueue, Proxy, QueueHandle};

use crate::backend::{NativeResource, ResourceKind, WindowId};
use crate::config::MwlConfig;
use crate::error::{verify_failed, MwlError, Result};
use crate::event::WindowEvent;
use input::{Input, KeyRepeatInfo};
use registry::{GlobalKind, Globals, OutputInfo};
use shm::{BufferManager, BufferStats, PixelBuffer};
use toplevel::{FullscreenRequest, WaylandWindow};

/// Everything the protocol listeners mutate
#[derive(Debug)]
pub struct WaylandState {
    pub globals: Globals,
    pub input: Input,
    pub windows: HashMap<WindowId, WaylandWindow>,
    pub buffers: BufferManager,
    /// Window events produced by the current dispatch, in arrival order
    pub events: Vec<(WindowId, WindowEvent)>,
    pub config: MwlConfig,
}

impl WaylandState {
    pub fn new(config: MwlConfig) -> Self {
        Self {
            globals: Globals::default(),
            input: Input::new(&config.input),
            windows: HashMap::new(),
            buffers: BufferManager::new(),
            events: Vec::new(),
            config,
        }
    }

    /// The window if it can take a buffer: it exists and its first
    /// configure has been acknowledged.
    pub fn mapped_window(&self, id: WindowId) -> Option<&WaylandWindow> {
        let Some(window) = self.windows.get(&id) else {
            warn!("Window {:?} does not exist (destroyed?)", id);
            return None;
        };
        if !window.state.is_mapped() {
            warn!("Window {:?} has no acknowledged configure yet", id);
            return None;
        }
        Some(window)
    }
}

/// wl_surface version that introduced `damage_buffer`
const DAMAGE_BUFFER_SINCE: u32 = 4;

/// Mark the whole `width` x `height` buffer as damaged.
fn damage_all(surface: &WlSurface, width: i32, height: i32) {
    if has_damage_buffer(surface.version()) {
        surface.damage_buffer(0, 0, width, height);
    } else {
        // The buffer scale is never changed, so surface and buffer
        // coordinates agree
        surface.damage(0, 0, width, height);
    }
}

fn has_damage_buffer(surface_version: u32) -> bool {
    surface_version >= DAMAGE_BUFFER_SINCE
}

fn backend_error(err: WaylandError) -> MwlError {
    MwlError::Dispatch(DispatchError::Backend(err))
}

/// A live connection to a Wayland compositor
pub struct WaylandBackend {
    conn: Connection,
    queue: EventQueue<WaylandState>,
    qh: QueueHandle<WaylandState>,
    registry: WlRegistry,
    state: WaylandState,
    next_window: u32,
}

impl WaylandBackend {
    /// Connect using `WAYLAND_DISPLAY` and bind the globals we understand.
    pub fn connect(config: MwlConfig) -> Result<Self> {
        let conn = Connection::connect_to_env()?;
        let mut queue = conn.new_event_queue();
        let qh = queue.handle();
        let registry = conn.display().get_registry(&qh, ());
        let mut state = WaylandState::new(config);

        // The first roundtrip delivers the global announcements and binds
        // them; the second collects the initial events of what was bound
        // (seat capabilities, output geometry, keymap).
        queue.roundtrip(&mut state)?;
        queue.roundtrip(&mut state)?;

        let missing = state.globals.missing_required();
        if missing.is_empty() {
            info!(
                "Connected to compositor; {} globals bound, {} outputs",
                state.globals.bound_names().len(),
                state.globals.outputs.len()
            );
        } else {
            warn!(
                "Compositor lacks required globals ({}); windows cannot be created",
                missing.join(", ")
            );
        }
        if state.globals.seat.is_none() {
            warn!("No {} global; input is disabled", GlobalKind::Seat.interface());
        }

        Ok(Self {
            conn,
            queue,
            qh,
            registry,
            state,
            next_window: 1,
        })
    }

    fn take_events(&mut self) -> Vec<(WindowId, WindowEvent)> {
        std::mem::take(&mut self.state.events)
    }

    /// Block until at least one batch of events has been dispatched.
    pub fn dispatch(&mut self) -> Result<Vec<(WindowId, WindowEvent)>> {
        self.queue.blocking_dispatch(&mut self.state)?;
        Ok(self.take_events())
    }

    /// Dispatch whatever has arrived without blocking.
    pub fn poll(&mut self) -> Result<Vec<(WindowId, WindowEvent)>> {
        self.queue.dispatch_pending(&mut self.state)?;
        self.conn.flush().map_err(backend_error)?;

        if let Some(guard) = self.queue.prepare_read() {
            let mut fds = [libc::pollfd {
                fd: guard.connection_fd().as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            }];
            // SAFETY: `fds` is a valid array of one pollfd for the whole call.
            let ready = unsafe { libc::poll(fds.as_mut_ptr(), 1, 0) };
            if ready > 0 {
                match guard.read() {
                    Ok(_) => {}
                    Err(WaylandError::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(backend_error(e)),
                }
            } else if ready < 0 {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(backend_error(WaylandError::Io(err)));
                }
            }
            // Dropping an unread guard cancels the read
        }

        self.queue.dispatch_pending(&mut self.state)?;
        Ok(self.take_events())
    }

    /// Create a toplevel and wait until the compositor has configured it.
    pub fn create_window(&mut self, title: &str, width: i32, height: i32) -> Result<WindowId> {
        let id = WindowId::from_raw(self.next_window);
        let window = WaylandWindow::new(
            id,
            &self.state.globals,
            &self.state.config.window,
            &self.qh,
            title,
            width,
            height,
        )?;
        self.next_window += 1;
        self.state.windows.insert(id, window);

        if let Err(e) = self.queue.roundtrip(&mut self.state) {
            self.state.windows.remove(&id);
            return Err(e.into());
        }

        if let Some(window) = self.state.windows.get(&id) {
            if !window.state.is_mapped() {
                warn!(
                    "Window {:?} was not configured during creation; buffers are unavailable until it is",
                    id
                );
            }
        }
        Ok(id)
    }

    pub fn destroy_window(&mut self, id: WindowId) {
        if self.state.windows.remove(&id).is_none() {
            return;
        }
        self.state.input.forget_window(id);
        self.state.events.retain(|(window, _)| *window != id);
        if let Err(e) = self.conn.flush() {
            warn!("Failed to flush after destroying window {:?}: {}", id, e);
        }
        debug!("Destroyed window {:?}", id);
    }

    pub fn window(&self, id: WindowId) -> Result<&WaylandWindow> {
        self.state.windows.get(&id).ok_or(MwlError::UnknownWindow(id.raw()))
    }

    /// Allocate a buffer the size of the window. `None` if the window is
    /// not mapped yet or shared memory could not be set up.
    pub fn fetch_buffer(&mut self, id: WindowId) -> Option<PixelBuffer> {
        let window = self.state.mapped_window(id)?;
        let shm = self.state.globals.shm.as_ref()?;

        match self.state.buffers.allocate(
            &shm.proxy,
            &self.qh,
            window.state.width(),
            window.state.height(),
        ) {
            Ok(buffer) => Some(buffer),
            Err(e) => {
                error!("Failed to allocate buffer for window {:?}: {}", id, e);
                None
            }
        }
    }

    /// Attach and commit `buffer`. The compositor owns it from here on until
    /// it sends `release`.
    pub fn present(&mut self, id: WindowId, buffer: PixelBuffer) {
        let Some(window) = self.state.mapped_window(id) else {
            debug!("Rejected buffer for window {:?}", id);
            return;
        };

        window.surface.attach(Some(buffer.wl_buffer()), 0, 0);
        damage_all(&window.surface, buffer.width(), buffer.height());
        window.surface.commit();
        self.state.buffers.hand_to_server(buffer);

        if let Err(e) = self.conn.flush() {
            warn!("Failed to flush presented frame: {}", e);
        }
    }

    /// Present a buffer cleared to the configured color.
    pub fn show(&mut self, id: WindowId) {
        let color = self.state.config.window.clear_color;
        match self.fetch_buffer(id) {
            Some(mut buffer) => {
                buffer.pixels_mut().fill(color);
                self.present(id, buffer);
            }
            None => warn!("Cannot show window {:?} without a buffer", id),
        }
    }

    pub fn set_title(&self, id: WindowId, title: &str) -> Result<()> {
        self.window(id)?.set_title(title);
        Ok(())
    }

    pub fn set_fullscreen(&self, id: WindowId, fullscreen: bool) -> Result<FullscreenRequest> {
        Ok(self.window(id)?.set_fullscreen(fullscreen))
    }

    pub fn outputs(&self) -> Vec<OutputInfo> {
        self.state.globals.output_infos()
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.state.buffers.stats()
    }

    pub fn buffers_in_flight(&self) -> usize {
        self.state.buffers.in_flight()
    }

    pub fn key_repeat_info(&self) -> Option<KeyRepeatInfo> {
        self.state.input.keyboard.repeat_info()
    }

    pub fn config(&self) -> &MwlConfig {
        &self.state.config
    }

    /// Connection-level native object, if bound
    pub fn resource(&self, kind: ResourceKind) -> Option<NativeResource> {
        let globals = &self.state.globals;
        match kind {
            ResourceKind::Connection => Some(NativeResource::Connection(self.conn.clone())),
            ResourceKind::Display => Some(NativeResource::Display(self.conn.display())),
            ResourceKind::Registry => Some(NativeResource::Registry(self.registry.clone())),
            ResourceKind::Compositor => globals
                .compositor
                .as_ref()
                .map(|g| NativeResource::Compositor(g.proxy.clone())),
            ResourceKind::Shm => globals.shm.as_ref().map(|g| NativeResource::Shm(g.proxy.clone())),
            ResourceKind::WmBase => globals
                .wm_base
                .as_ref()
                .map(|g| NativeResource::WmBase(g.proxy.clone())),
            ResourceKind::Seat => globals.seat.as_ref().map(|g| NativeResource::Seat(g.proxy.clone())),
            ResourceKind::Surface | ResourceKind::XdgSurface | ResourceKind::Toplevel => {
                verify_failed(
                    "!kind.is_window_level()",
                    format_args!("{:?} belongs to a window; ask the window for it", kind),
                )
            }
        }
    }

    /// Per-window native object
    pub fn window_resource(&self, id: WindowId, kind: ResourceKind) -> Result<NativeResource> {
        let window = self.window(id)?;
        Ok(match kind {
            ResourceKind::Surface => NativeResource::Surface(window.surface.clone()),
            ResourceKind::XdgSurface => NativeResource::XdgSurface(window.xdg_surface.clone()),
            ResourceKind::Toplevel => NativeResource::Toplevel(window.toplevel.clone()),
            other => verify_failed(
                "kind.is_window_level()",
                format_args!("{:?} is not a window resource; ask the state for it", other),
            ),
        })
    }
}

impl Drop for WaylandBackend {
    fn drop(&mut self) {
        let windows = self.state.windows.len();
        self.state.windows.clear();
        self.state.input.release_devices();
        self.state.buffers.shutdown();

        // The compositor does not reliably send global_remove on disconnect
        self.state.globals.remove_all();
        // wl_registry has no destructor request; it goes away with the connection

        if let Err(e) = self.conn.flush() {
            debug!("Final flush failed: {}", e);
        }
        info!("Wayland backend shut down ({} windows still open)", windows);
    }
}

impl std::fmt::Debug for WaylandBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaylandBackend")
            .field("registry", &self.registry.id())
            .field("state", &self.state)
            .field("next_window", &self.next_window)
            .finish()
    }
}

/// Offline connections for exercising protocol state without a compositor.
///
/// Proxies created against them are inert: requests on them are dropped.
#[cfg(test)]
pub(crate) mod offline {
    use std::os::unix::net::UnixStream;

    use wayland_backend::client::{Backend, WeakBackend};
    use wayland_client::Connection;

    /// A connection whose peer end has already hung up
    pub fn connection() -> Connection {
        let (ours, theirs) = UnixStream::pair().expect("socket pair");
        drop(theirs);
        Connection::from_backend(Backend::connect(ours).expect("rust backend"))
    }

    pub fn weak(conn: &Connection) -> WeakBackend {
        conn.backend().downgrade()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::registry::Global;
    use super::toplevel::Capabilities;
    use wayland_client::protocol::{wl_compositor::WlCompositor, wl_shm::WlShm};
    use wayland_protocols::xdg::shell::client::xdg_wm_base::XdgWmBase;

    #[test]
    fn test_buffers_need_an_acknowledged_configure() {
        let conn = offline::connection();
        let weak = offline::weak(&conn);
        let mut state = WaylandState::new(MwlConfig::default());
        let id = WindowId::from_raw(1);
        state.windows.insert(
            id,
            WaylandWindow::detached(id, &weak, 320, 240, Capabilities::all()),
        );

        assert!(state.mapped_window(id).is_none());

        let window = state.windows.get_mut(&id).expect("window inserted");
        window.state.committed();
        assert!(state.mapped_window(id).is_none());

        let window = state.windows.get_mut(&id).expect("window inserted");
        assert!(window.state.surface_configured());
        let mapped = state.mapped_window(id).expect("mapped after configure");
        assert_eq!((mapped.state.width(), mapped.state.height()), (320, 240));

        assert!(state.mapped_window(WindowId::from_raw(2)).is_none());
    }

    #[test]
    fn test_failed_creation_roundtrip_forgets_window() {
        let conn = offline::connection();
        let weak = offline::weak(&conn);
        let queue = conn.new_event_queue();
        let qh = queue.handle();

        let mut state = WaylandState::new(MwlConfig::default());
        state.globals.compositor = Some(Global::new(WlCompositor::inert(weak.clone()), 1));
        state.globals.shm = Some(Global::new(WlShm::inert(weak.clone()), 2));
        state.globals.wm_base = Some(Global::new(XdgWmBase::inert(weak.clone()), 3));

        let mut backend = WaylandBackend {
            conn,
            queue,
            qh,
            registry: WlRegistry::inert(weak),
            state,
            next_window: 1,
        };

        assert!(backend.create_window("offline", 64, 64).is_err());
        assert!(backend.state.windows.is_empty());
        assert!(matches!(
            backend.window(WindowId::from_raw(1)),
            Err(MwlError::UnknownWindow(1))
        ));
    }

    #[test]
    fn test_damage_request_follows_surface_version() {
        // Compositors older than v4 are bound at their own version
        let version = GlobalKind::Compositor.negotiate_version(3);
        assert!(!has_damage_buffer(version));
        assert!(has_damage_buffer(GlobalKind::Compositor.negotiate_version(4)));
        assert!(has_damage_buffer(GlobalKind::Compositor.max_version()));
    }
}
