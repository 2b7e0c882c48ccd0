//! Public handles: [`State`], [`Window`] and [`ScreenBuffer`]
//!
//! The handles own the backend through a shared `Rc<RefCell<..>>`; they add
//! no behavior beyond routing calls and delivering events to callbacks.
//! Callbacks run after a batch of protocol events has been dispatched, with
//! no backend borrow held, so a callback may freely call back into its
//! window (resize it, replace its own callback, fetch a buffer).

use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::{Index, IndexMut};
use std::rc::Rc;

use log::{debug, warn};

use crate::backend::{Backend, ClientApi, NativeResource, ResourceKind, WindowId};
use crate::config::MwlConfig;
use crate::error::{MwlError, Result};
use crate::event::{KeyEvent, MouseButtonEvent, MouseMotionEvent, MouseScrollEvent, WindowEvent};
use crate::verify;
use crate::wayland::input::KeyRepeatInfo;
use crate::wayland::registry::OutputInfo;
use crate::wayland::shm::{BufferStats, PixelBuffer};
use crate::wayland::toplevel::FullscreenRequest;

type CloseCallback = Box<dyn FnMut()>;
type SizeCallback = Box<dyn FnMut(i32, i32)>;
type KeyCallback = Box<dyn FnMut(KeyEvent)>;
type MouseMotionCallback = Box<dyn FnMut(MouseMotionEvent)>;
type MouseButtonCallback = Box<dyn FnMut(MouseButtonEvent)>;
type MouseScrollCallback = Box<dyn FnMut(MouseScrollEvent)>;

/// Parameters for [`State::create`]
#[derive(Debug, Clone, Default)]
pub struct Desc {
    pub client_api: ClientApi,
    pub config: MwlConfig,
}

#[derive(Default)]
struct Callbacks {
    close: Vec<CloseCallback>,
    /// Bumped whenever the close list is replaced wholesale
    close_generation: u64,
    size: Option<SizeCallback>,
    key: Option<KeyCallback>,
    mouse_motion: Option<MouseMotionCallback>,
    mouse_button: Option<MouseButtonCallback>,
    mouse_scroll: Option<MouseScrollCallback>,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("close", &self.close.len())
            .field("size", &self.size.is_some())
            .field("key", &self.key.is_some())
            .field("mouse_motion", &self.mouse_motion.is_some())
            .field("mouse_button", &self.mouse_button.is_some())
            .field("mouse_scroll", &self.mouse_scroll.is_some())
            .finish()
    }
}

/// Run the callback in one slot without keeping `cell` borrowed, then put it
/// back unless the callback installed a replacement.
fn call_slot<F: ?Sized>(
    cell: &RefCell<Callbacks>,
    slot: fn(&mut Callbacks) -> &mut Option<Box<F>>,
    invoke: impl FnOnce(&mut F),
) {
    let taken = slot(&mut cell.borrow_mut()).take();
    if let Some(mut callback) = taken {
        invoke(&mut *callback);
        let mut callbacks = cell.borrow_mut();
        let slot = slot(&mut callbacks);
        if slot.is_none() {
            *slot = Some(callback);
        }
    }
}

fn call_close(cell: &RefCell<Callbacks>) {
    let (mut handlers, generation) = {
        let mut callbacks = cell.borrow_mut();
        (std::mem::take(&mut callbacks.close), callbacks.close_generation)
    };

    for handler in handlers.iter_mut() {
        handler();
    }

    let mut callbacks = cell.borrow_mut();
    if callbacks.close_generation == generation {
        // Keep handlers appended while the list was out
        let added = std::mem::replace(&mut callbacks.close, handlers);
        callbacks.close.extend(added);
    }
}

fn deliver(cell: &RefCell<Callbacks>, event: WindowEvent) {
    match event {
        WindowEvent::Close => call_close(cell),
        WindowEvent::Resize(width, height) => {
            call_slot(cell, |c| &mut c.size, |f| f(width, height))
        }
        WindowEvent::Key(key) => call_slot(cell, |c| &mut c.key, |f| f(key)),
        WindowEvent::MouseMotion(motion) => {
            call_slot(cell, |c| &mut c.mouse_motion, |f| f(motion))
        }
        WindowEvent::MouseButton(button) => {
            call_slot(cell, |c| &mut c.mouse_button, |f| f(button))
        }
        WindowEvent::MouseScroll(scroll) => {
            call_slot(cell, |c| &mut c.mouse_scroll, |f| f(scroll))
        }
    }
}

#[derive(Debug)]
struct Shared {
    backend: Backend,
    windows: HashMap<WindowId, Rc<RefCell<Callbacks>>>,
}

impl Shared {
    fn deliver_all(shared: &RefCell<Shared>, events: Vec<(WindowId, WindowEvent)>) {
        for (id, event) in events {
            let callbacks = shared.borrow().windows.get(&id).cloned();
            match callbacks {
                Some(callbacks) => deliver(&callbacks, event),
                None => debug!("Dropping {:?} for closed window {:?}", event, id),
            }
        }
    }
}

/// A connection to the windowing system
///
/// Cloning is cheap and yields another handle to the same connection. The
/// connection closes once the last `State` and every [`Window`] created from
/// it are gone.
#[derive(Debug, Clone)]
pub struct State {
    shared: Rc<RefCell<Shared>>,
}

impl State {
    pub fn create(desc: Desc) -> Result<State> {
        desc.config
            .validate()
            .map_err(|e| MwlError::Config(e.to_string()))?;
        let backend = Backend::create(desc.client_api, desc.config)?;
        Ok(State {
            shared: Rc::new(RefCell::new(Shared {
                backend,
                windows: HashMap::new(),
            })),
        })
    }

    /// Give up this handle.
    pub fn destroy(self) {}

    /// Block until the compositor sends something, dispatch it, then run the
    /// callbacks it produced.
    pub fn dispatch_events(&self) -> Result<()> {
        let events = self.shared.borrow_mut().backend.dispatch()?;
        Shared::deliver_all(&self.shared, events);
        Ok(())
    }

    /// Like [`dispatch_events`](Self::dispatch_events) but never blocks.
    pub fn poll_events(&self) -> Result<()> {
        let events = self.shared.borrow_mut().backend.poll()?;
        Shared::deliver_all(&self.shared, events);
        Ok(())
    }

    pub fn client_api(&self) -> ClientApi {
        self.shared.borrow().backend.client_api()
    }

    pub fn outputs(&self) -> Vec<OutputInfo> {
        self.shared.borrow().backend.outputs()
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.shared.borrow().backend.buffer_stats()
    }

    pub fn key_repeat_info(&self) -> Option<KeyRepeatInfo> {
        self.shared.borrow().backend.key_repeat_info()
    }

    /// Fetch a connection-level native handle. `None` if the backing global
    /// was never announced. Asking for a window-level kind is fatal.
    pub fn native_resource(&self, kind: ResourceKind) -> Option<NativeResource> {
        self.shared.borrow().backend.resource(kind)
    }
}

/// A toplevel window
///
/// Dropping the handle destroys the window.
#[derive(Debug)]
pub struct Window {
    shared: Rc<RefCell<Shared>>,
    id: WindowId,
    callbacks: Rc<RefCell<Callbacks>>,
}

impl Window {
    pub fn create(state: &State, title: &str, width: i32, height: i32) -> Result<Window> {
        let shared = Rc::clone(&state.shared);
        let id = shared.borrow_mut().backend.create_window(title, width, height)?;
        let callbacks = Rc::new(RefCell::new(Callbacks::default()));
        shared.borrow_mut().windows.insert(id, Rc::clone(&callbacks));
        Ok(Window {
            shared,
            id,
            callbacks,
        })
    }

    pub fn destroy(self) {}

    pub fn id(&self) -> WindowId {
        self.id
    }

    /// Make the window visible by presenting a frame cleared to the
    /// configured color.
    pub fn show(&self) {
        self.shared.borrow_mut().backend.show(self.id);
    }

    pub fn width(&self) -> i32 {
        self.shared.borrow().backend.size(self.id).map_or(0, |(w, _)| w)
    }

    pub fn height(&self) -> i32 {
        self.shared.borrow().backend.size(self.id).map_or(0, |(_, h)| h)
    }

    pub fn scale_factor(&self) -> f64 {
        self.shared.borrow().backend.scale_factor(self.id).unwrap_or(1.0)
    }

    /// Largest size the compositor suggests, if it sent one
    pub fn bounds(&self) -> Option<(i32, i32)> {
        self.shared.borrow().backend.bounds(self.id)
    }

    /// Fullscreen state as last confirmed by the compositor.
    ///
    /// After [`set_fullscreen_state`](Self::set_fullscreen_state) this only
    /// changes once a later dispatch delivers the compositor's answer.
    pub fn is_fullscreen(&self) -> bool {
        self.shared.borrow().backend.is_fullscreen(self.id)
    }

    pub fn set_fullscreen_state(&self, fullscreen: bool) {
        match self.shared.borrow_mut().backend.set_fullscreen(self.id, fullscreen) {
            Ok(FullscreenRequest::Sent) => {}
            Ok(FullscreenRequest::Unsupported) => {
                debug!("Fullscreen request for {:?} ignored: unsupported", self.id)
            }
            Err(e) => warn!("Fullscreen request failed: {}", e),
        }
    }

    pub fn set_title(&self, title: &str) {
        if let Err(e) = self.shared.borrow_mut().backend.set_title(self.id, title) {
            warn!("Failed to set title: {}", e);
        }
    }

    /// Replace every close handler with `callback`.
    pub fn set_close_callback(&self, callback: impl FnMut() + 'static) {
        let mut callbacks = self.callbacks.borrow_mut();
        callbacks.close = vec![Box::new(callback)];
        callbacks.close_generation += 1;
    }

    /// Add a close handler; all handlers run in registration order.
    pub fn add_close_callback(&self, callback: impl FnMut() + 'static) {
        self.callbacks.borrow_mut().close.push(Box::new(callback));
    }

    pub fn set_size_callback(&self, callback: impl FnMut(i32, i32) + 'static) {
        self.callbacks.borrow_mut().size = Some(Box::new(callback));
    }

    pub fn set_key_callback(&self, callback: impl FnMut(KeyEvent) + 'static) {
        self.callbacks.borrow_mut().key = Some(Box::new(callback));
    }

    pub fn set_mouse_motion_callback(&self, callback: impl FnMut(MouseMotionEvent) + 'static) {
        self.callbacks.borrow_mut().mouse_motion = Some(Box::new(callback));
    }

    pub fn set_mouse_button_callback(&self, callback: impl FnMut(MouseButtonEvent) + 'static) {
        self.callbacks.borrow_mut().mouse_button = Some(Box::new(callback));
    }

    pub fn set_mouse_scroll_callback(&self, callback: impl FnMut(MouseScrollEvent) + 'static) {
        self.callbacks.borrow_mut().mouse_scroll = Some(Box::new(callback));
    }

    /// A fresh buffer the size of the window. Invalid if the compositor has
    /// not configured the window yet or shared memory ran out.
    pub fn fetch_screen_buffer(&self) -> ScreenBuffer {
        let buffer = self.shared.borrow_mut().backend.fetch_buffer(self.id);
        ScreenBuffer {
            window: self.id,
            buffer,
        }
    }

    /// Hand `buffer` to the compositor. The buffer is consumed; fetch a new
    /// one for the next frame.
    pub fn present_screen_buffer(&self, mut buffer: ScreenBuffer) {
        verify!(buffer.is_valid(), "presenting an invalid screen buffer");
        verify!(
            buffer.window == self.id,
            "buffer fetched from {:?} presented to {:?}",
            buffer.window,
            self.id
        );
        if let Some(pixels) = buffer.buffer.take() {
            self.shared.borrow_mut().backend.present(self.id, pixels);
        }
    }

    /// Fetch a native handle. Window-level kinds come from this window,
    /// connection-level kinds from its state.
    pub fn native_resource(&self, kind: ResourceKind) -> Option<NativeResource> {
        let shared = self.shared.borrow();
        if kind.is_window_level() {
            shared.backend.window_resource(self.id, kind).ok()
        } else {
            shared.backend.resource(kind)
        }
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        let mut shared = self.shared.borrow_mut();
        shared.windows.remove(&self.id);
        shared.backend.destroy_window(self.id);
    }
}

/// Pixels for one frame of one window, 0xXXRRGGBB per pixel, row-major
/// with a stride of exactly `width` pixels.
#[derive(Debug)]
pub struct ScreenBuffer {
    window: WindowId,
    buffer: Option<PixelBuffer>,
}

impl ScreenBuffer {
    pub fn is_valid(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn width(&self) -> i32 {
        self.buffer.as_ref().map_or(0, PixelBuffer::width)
    }

    pub fn height(&self) -> i32 {
        self.buffer.as_ref().map_or(0, PixelBuffer::height)
    }

    /// Number of pixels
    pub fn len(&self) -> usize {
        self.buffer.as_ref().map_or(0, |b| b.pixels().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fill(&mut self, color: u32) {
        self.pixels_mut().fill(color);
    }

    pub fn pixels_mut(&mut self) -> &mut [u32] {
        verify!(self.is_valid(), "writing to an invalid screen buffer");
        match self.buffer.as_mut() {
            Some(buffer) => buffer.pixels_mut(),
            None => &mut [],
        }
    }
}

impl From<&ScreenBuffer> for bool {
    fn from(buffer: &ScreenBuffer) -> bool {
        buffer.is_valid()
    }
}

impl Index<usize> for ScreenBuffer {
    type Output = u32;

    fn index(&self, idx: usize) -> &u32 {
        verify!(self.is_valid(), "indexing an invalid screen buffer");
        let pixels = self.buffer.as_ref().map_or(&[][..], PixelBuffer::pixels);
        verify!(
            idx < pixels.len(),
            "pixel index {} out of range for {} pixels",
            idx,
            pixels.len()
        );
        &pixels[idx]
    }
}

impl IndexMut<usize> for ScreenBuffer {
    fn index_mut(&mut self, idx: usize) -> &mut u32 {
        let pixels = self.pixels_mut();
        let len = pixels.len();
        verify!(idx < len, "pixel index {} out of range for {} pixels", idx, len);
        &mut pixels[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn invalid_buffer() -> ScreenBuffer {
        ScreenBuffer {
            window: WindowId::from_raw(1),
            buffer: None,
        }
    }

    #[test]
    fn test_invalid_buffer_reports_empty() {
        let buffer = invalid_buffer();
        assert!(!buffer.is_valid());
        assert!(!bool::from(&buffer));
        assert_eq!(buffer.width(), 0);
        assert_eq!(buffer.height(), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    #[should_panic(expected = "verify failed")]
    fn test_indexing_invalid_buffer_is_fatal() {
        let buffer = invalid_buffer();
        let _ = buffer[0];
    }

    #[test]
    #[should_panic(expected = "verify failed")]
    fn test_writing_invalid_buffer_is_fatal() {
        let mut buffer = invalid_buffer();
        buffer.fill(0);
    }

    #[test]
    fn test_size_callback_receives_values() {
        let callbacks = RefCell::new(Callbacks::default());
        let seen = Rc::new(Cell::new((0, 0)));
        let sink = Rc::clone(&seen);
        callbacks.borrow_mut().size = Some(Box::new(move |w, h| sink.set((w, h))));

        deliver(&callbacks, WindowEvent::Resize(1280, 720));
        assert_eq!(seen.get(), (1280, 720));
        // The callback is put back after running
        assert!(callbacks.borrow().size.is_some());
    }

    #[test]
    fn test_event_without_callback_is_dropped() {
        let callbacks = RefCell::new(Callbacks::default());
        deliver(&callbacks, WindowEvent::Resize(10, 10));
        deliver(&callbacks, WindowEvent::Close);
        assert!(callbacks.borrow().size.is_none());
    }

    #[test]
    fn test_close_handlers_run_in_order() {
        let callbacks = RefCell::new(Callbacks::default());
        let order = Rc::new(RefCell::new(Vec::new()));
        for n in 0..3 {
            let order = Rc::clone(&order);
            callbacks
                .borrow_mut()
                .close
                .push(Box::new(move || order.borrow_mut().push(n)));
        }

        deliver(&callbacks, WindowEvent::Close);
        deliver(&callbacks, WindowEvent::Close);
        assert_eq!(*order.borrow(), vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_callback_may_replace_itself() {
        let callbacks = Rc::new(RefCell::new(Callbacks::default()));
        let hits = Rc::new(Cell::new(0));

        let inner = Rc::clone(&callbacks);
        let first_hits = Rc::clone(&hits);
        callbacks.borrow_mut().size = Some(Box::new(move |_, _| {
            first_hits.set(first_hits.get() + 1);
            let second_hits = Rc::clone(&first_hits);
            inner.borrow_mut().size = Some(Box::new(move |_, _| {
                second_hits.set(second_hits.get() + 100)
            }));
        }));

        deliver(&callbacks, WindowEvent::Resize(1, 1));
        deliver(&callbacks, WindowEvent::Resize(2, 2));
        assert_eq!(hits.get(), 101);
    }

    #[test]
    fn test_close_callback_may_replace_handlers() {
        let callbacks = Rc::new(RefCell::new(Callbacks::default()));
        let log = Rc::new(RefCell::new(Vec::new()));

        let inner = Rc::clone(&callbacks);
        let first = Rc::clone(&log);
        callbacks.borrow_mut().close.push(Box::new(move || {
            first.borrow_mut().push("first");
            let replacement = Rc::clone(&first);
            let mut c = inner.borrow_mut();
            c.close = vec![Box::new(move || replacement.borrow_mut().push("replacement"))];
            c.close_generation += 1;
        }));

        deliver(&callbacks, WindowEvent::Close);
        deliver(&callbacks, WindowEvent::Close);
        assert_eq!(*log.borrow(), vec!["first", "replacement"]);
    }
}
