//! Global registry binding
//!
//! The compositor announces every protocol global it offers through
//! `wl_registry`. We bind the handful we understand at
//! `min(server_version, our_version)` and ignore the rest. A global is only
//! valid between its `global` and `global_remove` events; removal is matched
//! by the global's numeric name, which is the only identifier the server
//! reuses between the two notifications.

use log::{debug, info, trace, warn};
use wayland_client::protocol::{
    wl_compositor::WlCompositor,
    wl_output::{self, WlOutput},
    wl_registry::{self, WlRegistry},
    wl_seat::WlSeat,
    wl_shm::WlShm,
};
use wayland_client::{Connection, Dispatch, Proxy, QueueHandle, WEnum};
use wayland_protocols::wp::fractional_scale::v1::client::wp_fractional_scale_manager_v1::WpFractionalScaleManagerV1;
use wayland_protocols::xdg::decoration::zv1::client::zxdg_decoration_manager_v1::ZxdgDecorationManagerV1;
use wayland_protocols::xdg::shell::client::xdg_wm_base::XdgWmBase;

use super::WaylandState;

/// Interfaces this backend knows how to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalKind {
    Compositor,
    Shm,
    WmBase,
    Seat,
    DecorationManager,
    FractionalScaleManager,
    Output,
}

impl GlobalKind {
    const ALL: [GlobalKind; 7] = [
        GlobalKind::Compositor,
        GlobalKind::Shm,
        GlobalKind::WmBase,
        GlobalKind::Seat,
        GlobalKind::DecorationManager,
        GlobalKind::FractionalScaleManager,
        GlobalKind::Output,
    ];

    pub fn interface(self) -> &'static str {
        match self {
            GlobalKind::Compositor => WlCompositor::interface().name,
            GlobalKind::Shm => WlShm::interface().name,
            GlobalKind::WmBase => XdgWmBase::interface().name,
            GlobalKind::Seat => WlSeat::interface().name,
            GlobalKind::DecorationManager => ZxdgDecorationManagerV1::interface().name,
            GlobalKind::FractionalScaleManager => WpFractionalScaleManagerV1::interface().name,
            GlobalKind::Output => WlOutput::interface().name,
        }
    }

    /// Highest version of the interface this backend implements
    pub fn max_version(self) -> u32 {
        match self {
            GlobalKind::Compositor => 6,
            GlobalKind::Shm => 1,
            GlobalKind::WmBase => 6,
            GlobalKind::Seat => 9,
            GlobalKind::DecorationManager => 1,
            GlobalKind::FractionalScaleManager => 1,
            GlobalKind::Output => 4,
        }
    }

    /// Optional globals only soft-disable features when absent
    pub fn is_required(self) -> bool {
        matches!(
            self,
            GlobalKind::Compositor | GlobalKind::Shm | GlobalKind::WmBase
        )
    }

    pub fn from_interface(interface: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.interface() == interface)
    }

    pub fn negotiate_version(self, server_version: u32) -> u32 {
        server_version.min(self.max_version())
    }
}

/// A bound protocol object together with the registry name it was bound from
#[derive(Debug, Clone)]
pub struct Global<T> {
    pub proxy: T,
    pub name: u32,
}

impl<T> Global<T> {
    pub fn new(proxy: T, name: u32) -> Self {
        Self { proxy, name }
    }
}

/// Take the global out of `slot` if it was bound from registry name `name`.
pub fn take_if_named<T>(slot: &mut Option<Global<T>>, name: u32) -> Option<Global<T>> {
    if slot.as_ref().is_some_and(|global| global.name == name) {
        slot.take()
    } else {
        None
    }
}

/// Release the client side of a bound global.
///
/// Interfaces without a destructor request at the bound version are simply
/// dropped.
pub trait Unbind {
    fn unbind(&self);
}

impl Unbind for WlCompositor {
    fn unbind(&self) {}
}

// Bound at v1, which has no release request
impl Unbind for WlShm {
    fn unbind(&self) {}
}

impl Unbind for XdgWmBase {
    fn unbind(&self) {
        self.destroy();
    }
}

impl Unbind for WlSeat {
    fn unbind(&self) {
        if self.version() >= 5 {
            self.release();
        }
    }
}

impl Unbind for ZxdgDecorationManagerV1 {
    fn unbind(&self) {
        self.destroy();
    }
}

impl Unbind for WpFractionalScaleManagerV1 {
    fn unbind(&self) {
        self.destroy();
    }
}

impl Unbind for WlOutput {
    fn unbind(&self) {
        if self.version() >= 3 {
            self.release();
        }
    }
}

/// What the compositor told us about one monitor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputInfo {
    /// Registry name of the wl_output global
    pub global_name: u32,
    pub name: Option<String>,
    pub description: Option<String>,
    pub make: String,
    pub model: String,
    pub scale: i32,
    /// Current mode as (width, height, refresh in mHz)
    pub mode: Option<(i32, i32, i32)>,
}

#[derive(Debug)]
pub struct Output {
    pub global: Global<WlOutput>,
    pub info: OutputInfo,
}

/// Every global currently bound, one slot per singleton interface plus the
/// list of outputs
#[derive(Debug, Default)]
pub struct Globals {
    pub compositor: Option<Global<WlCompositor>>,
    pub shm: Option<Global<WlShm>>,
    pub wm_base: Option<Global<XdgWmBase>>,
    pub seat: Option<Global<WlSeat>>,
    pub decoration_manager: Option<Global<ZxdgDecorationManagerV1>>,
    pub fractional_scale_manager: Option<Global<WpFractionalScaleManagerV1>>,
    pub outputs: Vec<Output>,
}

fn bind_into<T>(
    slot: &mut Option<Global<T>>,
    kind: GlobalKind,
    registry: &WlRegistry,
    name: u32,
    version: u32,
    qh: &QueueHandle<WaylandState>,
) where
    T: Proxy + 'static,
    WaylandState: Dispatch<T, ()>,
{
    if let Some(existing) = slot {
        debug!(
            "Ignoring second {} global {} (already bound {})",
            kind.interface(),
            name,
            existing.name
        );
        return;
    }
    let proxy = registry.bind::<T, (), WaylandState>(name, version, qh, ());
    *slot = Some(Global::new(proxy, name));
}

impl Globals {
    /// Handle a `wl_registry.global` announcement.
    pub fn announce(
        &mut self,
        registry: &WlRegistry,
        name: u32,
        interface: &str,
        server_version: u32,
        qh: &QueueHandle<WaylandState>,
    ) -> Option<GlobalKind> {
        let Some(kind) = GlobalKind::from_interface(interface) else {
            trace!("Ignoring unknown global {} v{}", interface, server_version);
            return None;
        };
        let version = kind.negotiate_version(server_version);
        debug!(
            "Binding {} (name {}) at v{} (server offers v{})",
            interface, name, version, server_version
        );

        match kind {
            GlobalKind::Compositor => bind_into(&mut self.compositor, kind, registry, name, version, qh),
            GlobalKind::Shm => bind_into(&mut self.shm, kind, registry, name, version, qh),
            GlobalKind::WmBase => bind_into(&mut self.wm_base, kind, registry, name, version, qh),
            GlobalKind::Seat => bind_into(&mut self.seat, kind, registry, name, version, qh),
            GlobalKind::DecorationManager => {
                bind_into(&mut self.decoration_manager, kind, registry, name, version, qh)
            }
            GlobalKind::FractionalScaleManager => bind_into(
                &mut self.fractional_scale_manager,
                kind,
                registry,
                name,
                version,
                qh,
            ),
            GlobalKind::Output => {
                // Outputs are not singletons; each one gets its own record,
                // addressed by registry name from its listener.
                let proxy = registry.bind::<WlOutput, u32, WaylandState>(name, version, qh, name);
                self.outputs.push(Output {
                    global: Global::new(proxy, name),
                    info: OutputInfo {
                        global_name: name,
                        scale: 1,
                        ..OutputInfo::default()
                    },
                });
            }
        }
        Some(kind)
    }

    /// Handle a `wl_registry.global_remove`, unbinding whichever tracked
    /// global was bound from `name`. Unknown names are ignored.
    pub fn remove(&mut self, name: u32) -> Option<GlobalKind> {
        macro_rules! remove_from {
            ($slot:expr, $kind:expr) => {
                if let Some(global) = take_if_named(&mut $slot, name) {
                    global.proxy.unbind();
                    return Some($kind);
                }
            };
        }

        remove_from!(self.compositor, GlobalKind::Compositor);
        remove_from!(self.shm, GlobalKind::Shm);
        remove_from!(self.wm_base, GlobalKind::WmBase);
        remove_from!(self.seat, GlobalKind::Seat);
        remove_from!(self.decoration_manager, GlobalKind::DecorationManager);
        remove_from!(self.fractional_scale_manager, GlobalKind::FractionalScaleManager);

        let index = self.outputs.iter().position(|o| o.global.name == name)?;
        let output = self.outputs.remove(index);
        output.global.proxy.unbind();
        Some(GlobalKind::Output)
    }

    /// Registry names of every global still bound
    pub fn bound_names(&self) -> Vec<u32> {
        let singletons = [
            self.compositor.as_ref().map(|g| g.name),
            self.shm.as_ref().map(|g| g.name),
            self.wm_base.as_ref().map(|g| g.name),
            self.seat.as_ref().map(|g| g.name),
            self.decoration_manager.as_ref().map(|g| g.name),
            self.fractional_scale_manager.as_ref().map(|g| g.name),
        ];
        singletons
            .into_iter()
            .flatten()
            .chain(self.outputs.iter().map(|o| o.global.name))
            .collect()
    }

    /// Unbind everything, as if the server had removed every global.
    ///
    /// The server does not reliably send `global_remove` on disconnect.
    pub fn remove_all(&mut self) {
        for name in self.bound_names() {
            self.remove(name);
        }
    }

    /// Names of required interfaces that are not bound
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.compositor.is_none() {
            missing.push(GlobalKind::Compositor.interface());
        }
        if self.shm.is_none() {
            missing.push(GlobalKind::Shm.interface());
        }
        if self.wm_base.is_none() {
            missing.push(GlobalKind::WmBase.interface());
        }
        missing
    }

    pub fn output_mut(&mut self, global_name: u32) -> Option<&mut OutputInfo> {
        self.outputs
            .iter_mut()
            .find(|o| o.global.name == global_name)
            .map(|o| &mut o.info)
    }

    pub fn output_infos(&self) -> Vec<OutputInfo> {
        self.outputs.iter().map(|o| o.info.clone()).collect()
    }
}

impl WaylandState {
    /// Forget the global bound from `name`, along with anything created
    /// from it.
    pub fn remove_global(&mut self, name: u32) -> Option<GlobalKind> {
        if self.globals.seat.as_ref().is_some_and(|seat| seat.name == name) {
            // Pointer and keyboard die with their seat
            self.input.release_devices();
        }
        self.globals.remove(name)
    }
}

impl Dispatch<WlRegistry, ()> for WaylandState {
    fn event(
        state: &mut Self,
        registry: &WlRegistry,
        event: wl_registry::Event,
        _data: &(),
        _conn: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => {
                state.globals.announce(registry, name, &interface, version, qh);
            }
            wl_registry::Event::GlobalRemove { name } => match state.remove_global(name) {
                Some(kind) if kind.is_required() => {
                    warn!("Compositor removed required global {}", kind.interface())
                }
                Some(kind) => info!("Global {} (name {}) removed", kind.interface(), name),
                None => trace!("Removal of untracked global {}", name),
            },
            _ => {}
        }
    }
}

impl Dispatch<WlOutput, u32> for WaylandState {
    fn event(
        state: &mut Self,
        _output: &WlOutput,
        event: wl_output::Event,
        global_name: &u32,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let Some(info) = state.globals.output_mut(*global_name) else {
            return;
        };

        match event {
            wl_output::Event::Geometry { make, model, .. } => {
                info.make = make;
                info.model = model;
            }
            wl_output::Event::Mode {
                flags,
                width,
                height,
                refresh,
            } => {
                if let WEnum::Value(flags) = flags {
                    if flags.contains(wl_output::Mode::Current) {
                        info.mode = Some((width, height, refresh));
                    }
                }
            }
            wl_output::Event::Scale { factor } => info.scale = factor,
            wl_output::Event::Name { name } => info.name = Some(name),
            wl_output::Event::Description { description } => info.description = Some(description),
            wl_output::Event::Done => {
                debug!(
                    "Output {}: {} {} ({}) mode={:?} scale={}",
                    global_name,
                    info.make,
                    info.model,
                    info.name.as_deref().unwrap_or("unnamed"),
                    info.mode,
                    info.scale
                );
            }
            _ => {}
        }
    }
}
