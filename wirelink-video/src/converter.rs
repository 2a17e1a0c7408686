//! Synchronous conversion entry points
//!
//! `convert_decode` and `convert_encode` each run one frame start to finish
//! on the caller's thread. The pipeline reuses the same preparation step but
//! hands the dispatch to its command queue instead.

use crate::buffer_pool::{BufferPool, BufferSlot, Surface};
use crate::classifier::{DecodeKernel, Direction, KernelSelection};
use crate::compute::{ComputeBackend, CpuBackend};
use crate::config::PipelineConfig;
use crate::error::{AllocationError, DispatchError, PipelineError, Result, SurfaceError};
use crate::format_conversion::{decode_input_format, wire_row_bytes, SourcePlanes, SurfaceMut};
use crate::in_flight::{InFlightController, InFlightPermit};
use crate::types::{align_up, ConversionParams, FourCc, FrameRecord, PixelFormat, WireBuffer};
use parking_lot::MappedRwLockReadGuard;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A decoded frame ready for display.
///
/// The pixels live in a ring slot that a later decode will reuse. Reads go
/// through this frame's sequence and come back empty once the slot has been
/// taken over, so pixels never get paired with the wrong frame.
#[derive(Debug, Clone)]
pub struct PresentedFrame {
    pub slot_index: usize,
    /// Position in submission order, strictly increasing
    pub sequence: u64,
    pub timestamp: i64,
    surface: Arc<Surface>,
}

impl PresentedFrame {
    pub fn dimensions(&self) -> (u32, u32) {
        self.surface.dimensions()
    }

    pub fn bytes_per_row(&self) -> usize {
        self.surface.bytes_per_row()
    }

    /// Whether the slot still holds this frame
    pub fn is_current(&self) -> bool {
        self.surface.sequence() == Some(self.sequence)
    }

    pub fn pixels(&self) -> Option<MappedRwLockReadGuard<'_, [u8]>> {
        self.surface.pixels(self.sequence)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        self.surface.pixel(self.sequence, x, y)
    }

    pub fn copy_to(
        &self,
        dst: &mut [u8],
        dst_stride: usize,
    ) -> std::result::Result<(), SurfaceError> {
        self.surface.copy_to(self.sequence, dst, dst_stride)
    }
}

/// Frame dropped because no kernel handles its format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkippedUnsupportedFormat {
    pub tag: FourCc,
}

#[derive(Debug, Clone)]
pub enum DecodeOutcome {
    Surface(PresentedFrame),
    Skipped(SkippedUnsupportedFormat),
}

/// Everything a decode dispatch needs, detached from the source frame
#[derive(Debug)]
pub struct DecodeJob {
    pub kernel: DecodeKernel,
    pub params: ConversionParams,
    pub slot: Arc<BufferSlot>,
    pub sequence: u64,
    pub timestamp: i64,
}

impl DecodeJob {
    /// Dispatch the kernel over the slot's wire buffer into its surface
    pub fn run(&self, backend: &dyn ComputeBackend) -> std::result::Result<(), DispatchError> {
        let wire = self.slot.wire();
        let surface = self.slot.surface();
        surface.render(self.sequence, |pixels| {
            backend.dispatch_decode(
                self.kernel,
                &self.params,
                &wire,
                SurfaceMut {
                    pixels,
                    bytes_per_row: surface.bytes_per_row(),
                },
            )
        })
    }

    pub fn presented(&self) -> PresentedFrame {
        PresentedFrame {
            slot_index: self.slot.index(),
            sequence: self.sequence,
            timestamp: self.timestamp,
            surface: Arc::clone(self.slot.surface()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConverterStats {
    pub decoded: u64,
    pub encoded: u64,
    pub skipped_unsupported: u64,
    pub allocation_failures: u64,
}

#[derive(Default)]
struct Counters {
    decoded: AtomicU64,
    encoded: AtomicU64,
    skipped_unsupported: AtomicU64,
    allocation_failures: AtomicU64,
}

pub struct Converter {
    backend: Arc<dyn ComputeBackend>,
    pool: BufferPool,
    gate: Arc<InFlightController>,
    cursor: AtomicU64,
    config: PipelineConfig,
    counters: Counters,
}

impl Converter {
    /// Converter on the CPU backend
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let backend = CpuBackend::new(&config)?;
        Self::with_backend(Arc::new(backend), config)
    }

    pub fn with_backend(backend: Arc<dyn ComputeBackend>, config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        let info = backend.info();
        log::info!(
            "Converter on '{}' backend, {} in flight, {}-byte row alignment",
            info.name,
            config.in_flight_capacity,
            config.row_alignment
        );

        Ok(Self {
            pool: BufferPool::from_config(&config),
            gate: Arc::new(InFlightController::new(config.in_flight_capacity)),
            cursor: AtomicU64::new(0),
            backend,
            config,
            counters: Counters::default(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn ComputeBackend> {
        &self.backend
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn in_flight(&self) -> &Arc<InFlightController> {
        &self.gate
    }

    /// Kernel selection as this converter's backend sees it
    pub fn classify(&self, tag: FourCc, direction: Direction) -> KernelSelection {
        let Some(format) = PixelFormat::from_fourcc(tag) else {
            return KernelSelection::Unsupported(tag);
        };
        let selection = match direction {
            Direction::Decode => self.backend.decode_kernel(format).map(KernelSelection::Decode),
            Direction::Encode => self.backend.encode_kernel(format).map(KernelSelection::Encode),
        };
        selection.unwrap_or(KernelSelection::Unsupported(tag))
    }

    /// Decode one frame into the next ring slot
    pub fn convert_decode(&self, frame: &FrameRecord<'_>) -> Result<DecodeOutcome> {
        let kernel = match self.decode_kernel(frame.format) {
            Ok(kernel) => kernel,
            Err(skipped) => return Ok(DecodeOutcome::Skipped(skipped)),
        };

        let permit = self.gate.acquire_permit();
        let job = self.prepare_decode(kernel, frame)?;
        job.run(self.backend.as_ref())?;
        drop(permit);

        self.counters.decoded.fetch_add(1, Ordering::Relaxed);
        Ok(DecodeOutcome::Surface(job.presented()))
    }

    /// Resolve the decode kernel for `tag`, counting and logging misses
    pub fn decode_kernel(
        &self,
        tag: FourCc,
    ) -> std::result::Result<DecodeKernel, SkippedUnsupportedFormat> {
        match self.classify(tag, Direction::Decode) {
            KernelSelection::Decode(kernel) => Ok(kernel),
            _ => {
                self.counters
                    .skipped_unsupported
                    .fetch_add(1, Ordering::Relaxed);
                log::warn!("Skipping frame with unsupported format {}", tag);
                Err(SkippedUnsupportedFormat { tag })
            }
        }
    }

    /// Pick the next slot and upload `frame` into it.
    ///
    /// The caller must already hold an in-flight permit.
    pub fn prepare_decode(&self, kernel: DecodeKernel, frame: &FrameRecord<'_>) -> Result<DecodeJob> {
        let format = decode_input_format(kernel);
        frame.validate(format)?;

        let sequence = self.cursor.fetch_add(1, Ordering::Relaxed);
        let slot_index = (sequence % self.config.in_flight_capacity as u64) as usize;

        let slot = self
            .pool
            .acquire(self.backend.as_ref(), frame.width, frame.height, slot_index)
            .inspect_err(|err| {
                if matches!(err, PipelineError::Allocation { .. }) {
                    self.counters
                        .allocation_failures
                        .fetch_add(1, Ordering::Relaxed);
                }
            })?;

        upload_planes(frame, format, &slot);

        let chroma_plane_offset = if format.is_planar() {
            slot.chroma_plane_offset() as u32
        } else {
            0
        };
        let params = ConversionParams::new(
            frame.width,
            frame.height,
            slot.wire_bytes_per_row() as u32,
            chroma_plane_offset,
            frame.effective_alpha(),
        );

        Ok(DecodeJob {
            kernel,
            params,
            slot,
            sequence,
            timestamp: frame.timestamp,
        })
    }

    pub(crate) fn record_decoded(&self) {
        self.counters.decoded.fetch_add(1, Ordering::Relaxed);
    }

    /// Encode `source` into `target` as packed 4:2:2.
    ///
    /// `target` is resized to the source geometry when needed; its contents
    /// are only valid after this returns `Ok`.
    pub fn convert_encode(&self, source: &FrameRecord<'_>, target: &mut WireBuffer) -> Result<()> {
        let format = source
            .pixel_format()
            .ok_or(PipelineError::UnsupportedSource(source.format))?;
        let kernel = self
            .backend
            .encode_kernel(format)
            .ok_or(PipelineError::UnsupportedSource(source.format))?;
        source.validate(format)?;

        let _permit: InFlightPermit = self.gate.acquire_permit();

        let (width, height) = (source.width, source.height);
        let bytes_per_row = align_up(wire_row_bytes(width), self.config.row_alignment);
        if !target.matches(width, height, bytes_per_row) {
            let data = self
                .allocate_wire(bytes_per_row * height as usize)
                .map_err(|err| {
                    self.counters
                        .allocation_failures
                        .fetch_add(1, Ordering::Relaxed);
                    log::warn!("Wire buffer allocation failed at {}x{}: {}", width, height, err);
                    PipelineError::Allocation {
                        width,
                        height,
                        bytes: err.requested(),
                    }
                })?;
            target.replace(width, height, bytes_per_row, data);
        }

        let chroma_plane_offset = if format.is_planar() {
            source.chroma_offset() as u32
        } else {
            0
        };
        let params = ConversionParams::new(
            width,
            height,
            bytes_per_row as u32,
            chroma_plane_offset,
            source.effective_alpha(),
        );

        self.backend.dispatch_encode(
            kernel,
            &params,
            SourcePlanes {
                data: source.data,
                bytes_per_row: source.line_stride as usize,
            },
            target.data_mut(),
        )?;

        self.counters.encoded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn allocate_wire(&self, len: usize) -> std::result::Result<Vec<u8>, AllocationError> {
        if let Some(limit) = self.config.max_slot_bytes {
            if len > limit {
                return Err(AllocationError::LimitExceeded {
                    requested: len,
                    limit,
                });
            }
        }
        self.backend.allocate_bytes(len)
    }

    pub fn stats(&self) -> ConverterStats {
        ConverterStats {
            decoded: self.counters.decoded.load(Ordering::Relaxed),
            encoded: self.counters.encoded.load(Ordering::Relaxed),
            skipped_unsupported: self.counters.skipped_unsupported.load(Ordering::Relaxed),
            allocation_failures: self.counters.allocation_failures.load(Ordering::Relaxed),
        }
    }
}

/// Copy the frame's planes into the slot's wire buffer at the slot stride,
/// second plane directly after a full-height first plane
fn upload_planes(frame: &FrameRecord<'_>, format: PixelFormat, slot: &BufferSlot) {
    let layout = format.plane_layout(frame.width, frame.height);
    let src_stride = frame.line_stride as usize;
    let dst_stride = slot.wire_bytes_per_row();
    let mut wire = slot.wire();

    for y in 0..layout.rows {
        let src = &frame.data[y * src_stride..y * src_stride + layout.row_bytes];
        wire[y * dst_stride..y * dst_stride + layout.row_bytes].copy_from_slice(src);
    }

    if layout.has_chroma_plane() {
        let src_base = frame.chroma_offset();
        let dst_base = slot.chroma_plane_offset();
        for y in 0..layout.chroma_rows {
            let src = src_base + y * src_stride;
            let dst = dst_base + y * dst_stride;
            wire[dst..dst + layout.chroma_row_bytes]
                .copy_from_slice(&frame.data[src..src + layout.chroma_row_bytes]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter() -> Converter {
        Converter::new(PipelineConfig::default().with_worker_threads(2)).unwrap()
    }

    #[test]
    fn test_decode_uyvy_with_padded_source_stride() {
        let converter = converter();
        // 2x2 UYVY, 16-byte stride: white macro-pixel on row 0, black on row 1
        let mut data = vec![0xEEu8; 32];
        data[0..4].copy_from_slice(&[128, 235, 128, 235]);
        data[16..20].copy_from_slice(&[128, 16, 128, 16]);
        let frame = FrameRecord::new(2, 2, FourCc::UYVY, 16, &data).with_timestamp(42);

        let DecodeOutcome::Surface(out) = converter.convert_decode(&frame).unwrap() else {
            panic!("expected a surface");
        };
        assert_eq!(out.timestamp, 42);
        assert_eq!(out.sequence, 0);
        assert_eq!(out.pixel(1, 0), Some([255, 255, 255, 255]));
        assert_eq!(out.pixel(0, 1), Some([0, 0, 0, 255]));
        assert_eq!(converter.in_flight().available(), 3);
    }

    #[test]
    fn test_reused_slot_invalidates_older_frame() {
        let converter = converter();
        let decode_solid = |value: u8| {
            let data = vec![value; 2 * 2 * 4];
            let frame = FrameRecord::new(2, 2, FourCc::RGBX, 8, &data);
            match converter.convert_decode(&frame).unwrap() {
                DecodeOutcome::Surface(out) => out,
                DecodeOutcome::Skipped(_) => panic!("expected a surface"),
            }
        };

        let first = decode_solid(10);
        let others: Vec<_> = [20, 30, 40].into_iter().map(decode_solid).collect();

        // Frame 3 was decoded into frame 0's slot
        assert_eq!(others[2].slot_index, first.slot_index);
        assert!(!first.is_current());
        assert_eq!(first.pixel(0, 0), None);
        assert!(first.pixels().is_none());
        assert!(matches!(
            first.copy_to(&mut [0u8; 16], 8),
            Err(SurfaceError::Stale {
                expected: 0,
                current: Some(3)
            })
        ));

        assert_eq!(others[0].pixel(0, 0), Some([20, 20, 20, 255]));
        assert_eq!(others[2].pixel(1, 1), Some([40, 40, 40, 255]));
        assert_eq!(others[2].pixel(2, 0), None);
    }

    #[test]
    fn test_decode_cycles_through_slots() {
        let converter = converter();
        let data = vec![0u8; 4 * 4 * 4];
        let frame = FrameRecord::new(4, 4, FourCc::BGRA, 16, &data);

        let slots: Vec<usize> = (0..5)
            .map(|_| match converter.convert_decode(&frame).unwrap() {
                DecodeOutcome::Surface(out) => out.slot_index,
                DecodeOutcome::Skipped(_) => panic!("BGRA is supported"),
            })
            .collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1]);
        assert_eq!(converter.pool().stats().reallocations, 1);
        assert_eq!(converter.stats().decoded, 5);
    }

    #[test]
    fn test_unsupported_tag_leaves_state_alone() {
        let converter = converter();
        let data = vec![0u8; 64];
        let tag = FourCc::from_bytes(*b"YV12");
        let frame = FrameRecord::new(4, 4, tag, 4, &data);

        let outcome = converter.convert_decode(&frame).unwrap();
        assert!(matches!(
            outcome,
            DecodeOutcome::Skipped(SkippedUnsupportedFormat { tag: t }) if t == tag
        ));
        assert_eq!(converter.pool().stats().allocated, 0);
        assert_eq!(converter.in_flight().stats().acquired, 0);
        assert_eq!(converter.stats().skipped_unsupported, 1);
    }

    #[test]
    fn test_invalid_frame_releases_permit() {
        let converter = converter();
        let data = vec![0u8; 10];
        let frame = FrameRecord::new(4, 4, FourCc::RGBA, 16, &data);
        assert!(matches!(
            converter.convert_decode(&frame),
            Err(PipelineError::InvalidFrame(_))
        ));
        assert_eq!(converter.in_flight().available(), 3);
    }

    #[test]
    fn test_allocation_failure_is_reported() {
        let config = PipelineConfig::default()
            .with_worker_threads(1)
            .with_max_slot_bytes(1024);
        let converter = Converter::new(config).unwrap();
        let data = vec![0u8; 64 * 64 * 4];
        let frame = FrameRecord::new(64, 64, FourCc::RGBA, 256, &data);

        assert!(matches!(
            converter.convert_decode(&frame),
            Err(PipelineError::Allocation { .. })
        ));
        assert_eq!(converter.in_flight().available(), 3);
        assert_eq!(converter.stats().allocation_failures, 1);
    }

    #[test]
    fn test_encode_two_red_pixels() {
        let converter = converter();
        let data = [255u8, 0, 0, 255, 255, 0, 0, 255];
        let frame = FrameRecord::new(2, 1, FourCc::RGBA, 8, &data);
        let mut wire = WireBuffer::new();

        converter.convert_encode(&frame, &mut wire).unwrap();
        assert_eq!(wire.dimensions(), (2, 1));
        assert_eq!(wire.bytes_per_row(), 64);
        assert_eq!(wire.macro_pixel(0, 0), Some([90, 81, 240, 81]));
    }

    #[test]
    fn test_encode_reuses_target_when_geometry_matches() {
        let converter = converter();
        let data = vec![0u8; 8 * 8 * 4];
        let frame = FrameRecord::new(8, 8, FourCc::BGRX, 32, &data);
        let mut wire = WireBuffer::new();

        converter.convert_encode(&frame, &mut wire).unwrap();
        let before = wire.as_bytes().as_ptr();
        converter.convert_encode(&frame, &mut wire).unwrap();
        assert_eq!(before, wire.as_bytes().as_ptr());
        assert_eq!(wire.macro_pixel(7, 7), Some([128, 16, 128, 16]));
        assert_eq!(wire.macro_pixel(8, 0), None);
        assert_eq!(wire.macro_pixel(0, 8), None);
    }

    #[test]
    fn test_encode_rejects_sources_without_kernel() {
        let converter = converter();
        let data = vec![0u8; 16];
        let frame = FrameRecord::new(2, 2, FourCc::UYVY, 4, &data);
        let mut wire = WireBuffer::new();
        assert!(matches!(
            converter.convert_encode(&frame, &mut wire),
            Err(PipelineError::UnsupportedSource(FourCc::UYVY))
        ));
    }

    #[test]
    fn test_encode_limit_maps_to_allocation_error() {
        let config = PipelineConfig::default()
            .with_worker_threads(1)
            .with_max_slot_bytes(16);
        let converter = Converter::new(config).unwrap();
        let data = vec![0u8; 16 * 16 * 4];
        let frame = FrameRecord::new(16, 16, FourCc::RGBA, 64, &data);
        let mut wire = WireBuffer::new();
        assert!(matches!(
            converter.convert_encode(&frame, &mut wire),
            Err(PipelineError::Allocation { width: 16, height: 16, .. })
        ));
        assert_eq!(converter.in_flight().available(), 3);
    }
}
