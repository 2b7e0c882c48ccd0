//! Shared-memory pixel buffers
//!
//! Every frame gets a fresh buffer: an anonymous POSIX shared-memory object,
//! mapped read/write, wrapped in a `wl_buffer`. Once presented, the buffer
//! belongs to the compositor until it sends `wl_buffer.release`; only then is
//! the protocol object destroyed and the mapping dropped. Buffers are never
//! recycled.

use std::cell::Cell;
use std::collections::HashMap;
use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::fd::{AsFd, FromRawFd};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, trace, warn};
use memmap2::MmapMut;
use wayland_backend::client::ObjectId;
use wayland_client::protocol::{
    wl_buffer::{self, WlBuffer},
    wl_shm::{self, WlShm},
    wl_shm_pool::WlShmPool,
};
use wayland_client::{Connection, Dispatch, Proxy, QueueHandle};

use super::WaylandState;
use crate::error::{MwlError, Result};

/// XRGB8888: one 32-bit word per pixel, top byte ignored
pub const BYTES_PER_PIXEL: i32 = 4;

/// How many random names to try before giving up on `shm_open`
const SHM_NAME_ATTEMPTS: u32 = 100;

const SHM_NAME_PREFIX: &str = "/wl_shm-";

/// Six characters from `[A-Pa-p]`, seeded from the wall clock's nanoseconds.
pub fn random_name_suffix() -> [u8; 6] {
    let mut r = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();

    let mut suffix = [0u8; 6];
    for c in suffix.iter_mut() {
        *c = b'A' + (r & 15) as u8 + ((r & 16) * 2) as u8;
        r >>= 5;
    }
    suffix
}

fn shm_object_name() -> io::Result<CString> {
    let mut name = SHM_NAME_PREFIX.as_bytes().to_vec();
    name.extend_from_slice(&random_name_suffix());
    CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

/// Create an unlinked shared-memory object, retrying on name collisions.
fn create_shm_file() -> io::Result<File> {
    for _ in 0..SHM_NAME_ATTEMPTS {
        let name = shm_object_name()?;
        // SAFETY: `name` is a valid NUL-terminated string for the duration of
        // the call.
        let fd = unsafe {
            libc::shm_open(
                name.as_ptr(),
                libc::O_RDWR | libc::O_CREAT | libc::O_EXCL | libc::O_CLOEXEC,
                0o600 as libc::mode_t,
            )
        };

        if fd >= 0 {
            // SAFETY: as above; the object stays alive through `fd`.
            unsafe {
                libc::shm_unlink(name.as_ptr());
            }
            // SAFETY: `fd` was just returned by shm_open and is owned by nobody else.
            return Ok(unsafe { File::from_raw_fd(fd) });
        }

        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::AlreadyExists {
            return Err(err);
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no unused shm name after {SHM_NAME_ATTEMPTS} attempts"),
    ))
}

/// Create a shared-memory file of exactly `size` bytes.
pub fn allocate_shm_file(size: usize) -> io::Result<File> {
    let file = create_shm_file()?;
    // set_len retries on EINTR
    file.set_len(size as u64)?;
    Ok(file)
}

/// Snapshot of the buffer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub created: u64,
    pub destroyed: u64,
}

impl BufferStats {
    /// Buffers allocated but not yet reclaimed
    pub fn outstanding(&self) -> u64 {
        self.created.saturating_sub(self.destroyed)
    }
}

/// Created/destroyed counters owned by the connection
#[derive(Debug, Default)]
pub struct BufferLedger {
    created: Cell<u64>,
    destroyed: Cell<u64>,
}

impl BufferLedger {
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            created: self.created.get(),
            destroyed: self.destroyed.get(),
        }
    }
}

/// Counts one buffer as created for as long as it lives and as destroyed
/// when dropped.
#[derive(Debug)]
pub struct LedgerEntry(Rc<BufferLedger>);

impl LedgerEntry {
    pub fn new(ledger: &Rc<BufferLedger>) -> Self {
        ledger.created.set(ledger.created.get() + 1);
        Self(Rc::clone(ledger))
    }
}

impl Drop for LedgerEntry {
    fn drop(&mut self) {
        self.0.destroyed.set(self.0.destroyed.get() + 1);
    }
}

/// A mapped shared-memory region and the `wl_buffer` that references it.
///
/// Dropping it destroys the protocol object and unmaps the memory.
pub struct PixelBuffer {
    wl_buffer: WlBuffer,
    mmap: MmapMut,
    width: i32,
    height: i32,
    _entry: LedgerEntry,
}

impl PixelBuffer {
    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn pixels(&self) -> &[u32] {
        bytemuck::cast_slice(&self.mmap[..])
    }

    pub fn pixels_mut(&mut self) -> &mut [u32] {
        bytemuck::cast_slice_mut(&mut self.mmap[..])
    }

    pub fn wl_buffer(&self) -> &WlBuffer {
        &self.wl_buffer
    }
}

impl Drop for PixelBuffer {
    fn drop(&mut self) {
        self.wl_buffer.destroy();
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("wl_buffer", &self.wl_buffer.id())
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Allocates pixel buffers and holds the ones the compositor currently owns
#[derive(Debug, Default)]
pub struct BufferManager {
    ledger: Rc<BufferLedger>,
    in_flight: HashMap<ObjectId, PixelBuffer>,
}

impl BufferManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a `width` x `height` XRGB8888 buffer.
    pub fn allocate(
        &self,
        shm: &WlShm,
        qh: &QueueHandle<WaylandState>,
        width: i32,
        height: i32,
    ) -> Result<PixelBuffer> {
        if width <= 0 || height <= 0 {
            return Err(MwlError::Shm(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot allocate a {width}x{height} buffer"),
            )));
        }

        let stride = width * BYTES_PER_PIXEL;
        let size = stride as usize * height as usize;
        let pool_size = i32::try_from(size).map_err(|_| {
            MwlError::Shm(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{width}x{height} buffer exceeds the shm pool size limit"),
            ))
        })?;

        let file = allocate_shm_file(size)?;
        // SAFETY: the object is unlinked and private to us; the compositor only
        // reads from it.
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        let pool = shm.create_pool(file.as_fd(), pool_size, qh, ());
        let wl_buffer = pool.create_buffer(
            0,
            width,
            height,
            stride,
            wl_shm::Format::Xrgb8888,
            qh,
            (),
        );
        // The buffer keeps the pool's memory alive; neither the pool nor the
        // fd are needed any more.
        pool.destroy();

        trace!("Allocated {}x{} buffer {}", width, height, wl_buffer.id());

        Ok(PixelBuffer {
            wl_buffer,
            mmap,
            width,
            height,
            _entry: LedgerEntry::new(&self.ledger),
        })
    }

    /// Hand a presented buffer to the compositor until it is released.
    pub fn hand_to_server(&mut self, buffer: PixelBuffer) {
        self.in_flight.insert(buffer.wl_buffer.id(), buffer);
    }

    /// Reclaim a buffer the compositor released. Returns false if the buffer
    /// was not in flight.
    pub fn release(&mut self, id: &ObjectId) -> bool {
        self.in_flight.remove(id).is_some()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> BufferStats {
        self.ledger.stats()
    }

    /// Report buffers the compositor never released, then free them.
    pub fn shutdown(&mut self) -> BufferStats {
        let stats = self.stats();
        if stats.outstanding() == 0 {
            info!(
                "Created {} buffers, destroyed {}",
                stats.created, stats.destroyed
            );
        } else {
            warn!(
                "Created {} buffers, destroyed {}: {} never released by the compositor",
                stats.created,
                stats.destroyed,
                stats.outstanding()
            );
        }
        self.in_flight.clear();
        stats
    }
}

impl Dispatch<WlBuffer, ()> for WaylandState {
    fn event(
        state: &mut Self,
        buffer: &WlBuffer,
        event: wl_buffer::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_buffer::Event::Release = event {
            if state.buffers.release(&buffer.id()) {
                trace!("Compositor released {}", buffer.id());
            } else {
                debug!("Release for buffer {} that was not in flight", buffer.id());
            }
        }
    }
}

impl Dispatch<WlShm, ()> for WaylandState {
    fn event(
        _state: &mut Self,
        _shm: &WlShm,
        event: wl_shm::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_shm::Event::Format { format } = event {
            trace!("wl_shm supports {:?}", format);
        }
    }
}

wayland_client::delegate_noop!(WaylandState: ignore WlShmPool);
