//! Fixed ring of reusable conversion buffers
//!
//! Each slot pairs a wire-side byte buffer (what the producer's bytes are
//! uploaded into) with an RGBA8 surface the decode kernels render to. The
//! ring is sized for one geometry at a time; any change of width or height
//! drops every slot and allocates a fresh ring. Slots still referenced by
//! in-flight work stay alive through their `Arc` until that work finishes,
//! so a resize never hands new work a buffer the old work is reading.

use crate::compute::ComputeBackend;
use crate::config::PipelineConfig;
use crate::error::{AllocationError, FrameError, PipelineError, SurfaceError};
use crate::types::SlotGeometry;
use parking_lot::{MappedRwLockReadGuard, Mutex, MutexGuard, RwLock, RwLockReadGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Allocate a zeroed buffer, reporting failure instead of aborting
pub fn try_alloc_zeroed(len: usize) -> Result<Vec<u8>, AllocationError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| AllocationError::OutOfMemory { requested: len })?;
    buffer.resize(len, 0);
    Ok(buffer)
}

struct SurfaceContents {
    /// Frame the pixels belong to, `None` until a decode succeeds
    sequence: Option<u64>,
    pixels: Vec<u8>,
}

/// Display-side RGBA8 render target.
///
/// Ring slots are reused, so the surface remembers which frame it holds.
/// Every read names the sequence it expects and gets nothing once a later
/// decode has taken the slot over.
pub struct Surface {
    geometry: SlotGeometry,
    bytes_per_row: usize,
    contents: RwLock<SurfaceContents>,
}

impl Surface {
    pub fn new(geometry: SlotGeometry, bytes_per_row: usize, pixels: Vec<u8>) -> Self {
        Self {
            geometry,
            bytes_per_row,
            contents: RwLock::new(SurfaceContents {
                sequence: None,
                pixels,
            }),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.geometry.width, self.geometry.height)
    }

    pub fn bytes_per_row(&self) -> usize {
        self.bytes_per_row
    }

    /// Sequence of the frame currently held
    pub fn sequence(&self) -> Option<u64> {
        self.contents.read().sequence
    }

    /// Raw rows of frame `sequence`, or `None` if the surface moved on
    pub fn pixels(&self, sequence: u64) -> Option<MappedRwLockReadGuard<'_, [u8]>> {
        let contents = self.contents.read();
        if contents.sequence != Some(sequence) {
            return None;
        }
        Some(RwLockReadGuard::map(contents, |c| c.pixels.as_slice()))
    }

    /// RGBA of a single pixel of frame `sequence`
    pub fn pixel(&self, sequence: u64, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.geometry.width || y >= self.geometry.height {
            return None;
        }
        let offset = y as usize * self.bytes_per_row + x as usize * 4;
        let pixels = self.pixels(sequence)?;
        let mut out = [0u8; 4];
        out.copy_from_slice(pixels.get(offset..offset + 4)?);
        Some(out)
    }

    /// Copy frame `sequence` tightly into `dst` using `dst_stride`
    pub fn copy_to(
        &self,
        sequence: u64,
        dst: &mut [u8],
        dst_stride: usize,
    ) -> Result<(), SurfaceError> {
        let row = self.geometry.width as usize * 4;
        let rows = self.geometry.height as usize;
        let required = dst_stride * rows.saturating_sub(1) + row;
        if dst_stride < row || dst.len() < required {
            return Err(SurfaceError::DestinationTooSmall {
                len: dst.len(),
                stride: dst_stride,
                required,
            });
        }

        let contents = self.contents.read();
        if contents.sequence != Some(sequence) {
            return Err(SurfaceError::Stale {
                expected: sequence,
                current: contents.sequence,
            });
        }
        for y in 0..rows {
            let src = &contents.pixels[y * self.bytes_per_row..y * self.bytes_per_row + row];
            dst[y * dst_stride..y * dst_stride + row].copy_from_slice(src);
        }
        Ok(())
    }

    /// Render frame `sequence` with `draw`. The surface only claims the
    /// frame if `draw` succeeds; on failure it holds no frame at all.
    pub(crate) fn render<E>(
        &self,
        sequence: u64,
        draw: impl FnOnce(&mut [u8]) -> Result<(), E>,
    ) -> Result<(), E> {
        let mut contents = self.contents.write();
        contents.sequence = None;
        draw(&mut contents.pixels)?;
        contents.sequence = Some(sequence);
        Ok(())
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("geometry", &self.geometry)
            .field("bytes_per_row", &self.bytes_per_row)
            .finish()
    }
}

/// One ring entry
pub struct BufferSlot {
    index: usize,
    geometry: SlotGeometry,
    wire_bytes_per_row: usize,
    wire: Mutex<Vec<u8>>,
    surface: Arc<Surface>,
}

impl BufferSlot {
    /// Bytes a slot needs: a two-plane wire buffer plus the surface
    pub fn required_bytes(geometry: SlotGeometry, row_alignment: usize) -> usize {
        let stride = geometry.bytes_per_row(row_alignment);
        let rows = geometry.height as usize;
        stride * rows * 2 + stride * rows
    }

    /// Host-memory allocation, the default for backends without device memory
    pub fn allocate(
        index: usize,
        geometry: SlotGeometry,
        row_alignment: usize,
    ) -> Result<Self, AllocationError> {
        let stride = geometry.bytes_per_row(row_alignment);
        let rows = geometry.height as usize;

        let wire = try_alloc_zeroed(stride * rows * 2)?;
        let pixels = try_alloc_zeroed(stride * rows)?;

        Ok(Self {
            index,
            geometry,
            wire_bytes_per_row: stride,
            wire: Mutex::new(wire),
            surface: Arc::new(Surface::new(geometry, stride, pixels)),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn geometry(&self) -> SlotGeometry {
        self.geometry
    }

    pub fn wire_bytes_per_row(&self) -> usize {
        self.wire_bytes_per_row
    }

    /// Second plane starts right after a full-height primary plane
    pub fn chroma_plane_offset(&self) -> usize {
        self.wire_bytes_per_row * self.geometry.height as usize
    }

    /// Locks the wire buffer; held by a dispatch for as long as it reads it
    pub fn wire(&self) -> MutexGuard<'_, Vec<u8>> {
        self.wire.lock()
    }

    pub fn surface(&self) -> &Arc<Surface> {
        &self.surface
    }
}

impl std::fmt::Debug for BufferSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferSlot")
            .field("index", &self.index)
            .field("geometry", &self.geometry)
            .field("wire_bytes_per_row", &self.wire_bytes_per_row)
            .finish()
    }
}

struct PoolState {
    geometry: Option<SlotGeometry>,
    slots: Vec<Arc<BufferSlot>>,
}

/// Ring of `capacity` slots at a single geometry
pub struct BufferPool {
    capacity: usize,
    row_alignment: usize,
    max_slot_bytes: Option<usize>,
    state: Mutex<PoolState>,
    reallocations: AtomicU64,
}

impl BufferPool {
    pub fn new(capacity: usize, row_alignment: usize, max_slot_bytes: Option<usize>) -> Self {
        Self {
            capacity,
            row_alignment,
            max_slot_bytes,
            state: Mutex::new(PoolState {
                geometry: None,
                slots: Vec::with_capacity(capacity),
            }),
            reallocations: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.in_flight_capacity,
            config.row_alignment,
            config.max_slot_bytes,
        )
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Return slot `slot_index` sized for `width`x`height`.
    ///
    /// A geometry change (or an empty ring) discards every slot and
    /// allocates the whole ring again. On allocation failure the ring is
    /// left empty so the next call retries from scratch.
    pub fn acquire(
        &self,
        backend: &dyn ComputeBackend,
        width: u32,
        height: u32,
        slot_index: usize,
    ) -> Result<Arc<BufferSlot>, PipelineError> {
        if slot_index >= self.capacity {
            return Err(PipelineError::InvalidSlot {
                index: slot_index,
                capacity: self.capacity,
            });
        }
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyGeometry { width, height }.into());
        }

        let geometry = SlotGeometry::new(width, height);
        let mut state = self.state.lock();

        if state.geometry == Some(geometry) && state.slots.len() == self.capacity {
            return Ok(Arc::clone(&state.slots[slot_index]));
        }

        let previous = state.geometry.take();
        state.slots.clear();

        let required = BufferSlot::required_bytes(geometry, self.row_alignment);
        if let Some(limit) = self.max_slot_bytes {
            if required > limit {
                log::warn!(
                    "Slot for {}x{} needs {} bytes, limit is {}",
                    width,
                    height,
                    required,
                    limit
                );
                return Err(PipelineError::Allocation {
                    width,
                    height,
                    bytes: required,
                });
            }
        }

        let mut slots = Vec::with_capacity(self.capacity);
        for index in 0..self.capacity {
            match backend.allocate_slot(index, geometry, self.row_alignment) {
                Ok(slot) => slots.push(Arc::new(slot)),
                Err(err) => {
                    log::warn!("Slot allocation failed at {}x{}: {}", width, height, err);
                    return Err(PipelineError::Allocation {
                        width,
                        height,
                        bytes: err.requested(),
                    });
                }
            }
        }

        log::debug!(
            "Reallocated {} slots: {:?} -> {}x{}",
            self.capacity,
            previous,
            width,
            height
        );

        self.reallocations.fetch_add(1, Ordering::Relaxed);
        state.geometry = Some(geometry);
        state.slots = slots;

        Ok(Arc::clone(&state.slots[slot_index]))
    }

    /// Drop every slot (teardown)
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.slots.clear();
        state.geometry = None;
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            capacity: self.capacity,
            allocated: state.slots.len(),
            reallocations: self.reallocations.load(Ordering::Relaxed),
            geometry: state.geometry,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub capacity: usize,
    pub allocated: usize,
    pub reallocations: u64,
    pub geometry: Option<SlotGeometry>,
}
