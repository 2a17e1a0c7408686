//! Compute backend abstraction
//!
//! The converter only talks to a [`ComputeBackend`]: it asks for kernels,
//! for buffer memory and for dispatches. [`CpuBackend`] runs the kernels
//! from [`crate::format_conversion`] over the same threadgroup grid a GPU
//! dispatch would use, one rayon task per output row.

use crate::buffer_pool::{try_alloc_zeroed, BufferSlot};
use crate::classifier::{decode_kernel_for, encode_kernel_for, DecodeKernel, EncodeKernel, Kernel};
use crate::config::{PipelineConfig, ThreadgroupSize};
use crate::error::{AllocationError, DispatchError, PipelineError};
use crate::format_conversion::{
    decode_invocation, encode_invocation, validate_decode, validate_encode, SourcePlanes,
    SurfaceMut,
};
use crate::types::{ConversionParams, PixelFormat, SlotGeometry};
use rayon::prelude::*;

/// Threadgroup grid for one dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSize {
    pub threadgroups_x: u32,
    pub threadgroups_y: u32,
    pub threads_per_group: ThreadgroupSize,
}

impl DispatchSize {
    /// Grid covering `width`x`height`. Encode kernels handle two pixels per
    /// invocation, so their grid covers `ceil(width / 2)` columns.
    pub fn for_kernel(kernel: Kernel, width: u32, height: u32, group: ThreadgroupSize) -> Self {
        let columns = width.div_ceil(kernel.pixels_per_invocation());
        Self {
            threadgroups_x: columns.div_ceil(group.width),
            threadgroups_y: height.div_ceil(group.height),
            threads_per_group: group,
        }
    }

    /// Invocations per grid row, including padding
    pub fn grid_width(&self) -> u32 {
        self.threadgroups_x * self.threads_per_group.width
    }

    pub fn grid_height(&self) -> u32 {
        self.threadgroups_y * self.threads_per_group.height
    }

    pub fn invocations(&self) -> u64 {
        self.grid_width() as u64 * self.grid_height() as u64
    }
}

/// What a backend reports about itself
#[derive(Debug, Clone, Copy)]
pub struct BackendInfo {
    pub name: &'static str,
    pub worker_threads: usize,
}

/// Device that owns buffer memory and runs conversion kernels
pub trait ComputeBackend: Send + Sync {
    fn info(&self) -> BackendInfo;

    fn decode_kernel(&self, format: PixelFormat) -> Option<DecodeKernel> {
        decode_kernel_for(format)
    }

    fn encode_kernel(&self, source: PixelFormat) -> Option<EncodeKernel> {
        encode_kernel_for(source)
    }

    fn dispatch_size(&self, kernel: Kernel, width: u32, height: u32) -> DispatchSize;

    /// Allocate one ring slot; host memory unless the backend overrides it
    fn allocate_slot(
        &self,
        index: usize,
        geometry: SlotGeometry,
        row_alignment: usize,
    ) -> Result<BufferSlot, AllocationError> {
        BufferSlot::allocate(index, geometry, row_alignment)
    }

    /// Allocate a zeroed byte buffer shared with the device
    fn allocate_bytes(&self, len: usize) -> Result<Vec<u8>, AllocationError> {
        try_alloc_zeroed(len)
    }

    /// Run a decode kernel to completion
    fn dispatch_decode(
        &self,
        kernel: DecodeKernel,
        params: &ConversionParams,
        wire: &[u8],
        surface: SurfaceMut<'_>,
    ) -> Result<(), DispatchError>;

    /// Run an encode kernel to completion
    fn dispatch_encode(
        &self,
        kernel: EncodeKernel,
        params: &ConversionParams,
        source: SourcePlanes<'_>,
        wire: &mut [u8],
    ) -> Result<(), DispatchError>;
}

/// Kernels executed on a dedicated rayon pool
pub struct CpuBackend {
    pool: rayon::ThreadPool,
    threadgroup: ThreadgroupSize,
}

impl CpuBackend {
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let mut builder =
            rayon::ThreadPoolBuilder::new().thread_name(|i| format!("wirelink-compute-{}", i));
        if config.worker_threads > 0 {
            builder = builder.num_threads(config.worker_threads);
        }

        if config.pin_worker_threads {
            let cores = core_affinity::get_core_ids().unwrap_or_default();
            if cores.is_empty() {
                log::warn!("Core pinning requested but no core ids are available");
            } else {
                builder = builder.start_handler(move |index| {
                    let core = cores[index % cores.len()];
                    if !core_affinity::set_for_current(core) {
                        log::warn!("Failed to pin compute worker {} to core {:?}", index, core);
                    }
                });
            }
        }

        let pool = builder
            .build()
            .map_err(|e| PipelineError::Construction(format!("compute thread pool: {}", e)))?;

        log::info!(
            "CPU compute backend ready ({} workers, {}x{} threadgroups)",
            pool.current_num_threads(),
            config.threadgroup_size.width,
            config.threadgroup_size.height
        );

        Ok(Self {
            pool,
            threadgroup: config.threadgroup_size,
        })
    }
}

impl ComputeBackend for CpuBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: "cpu",
            worker_threads: self.pool.current_num_threads(),
        }
    }

    fn dispatch_size(&self, kernel: Kernel, width: u32, height: u32) -> DispatchSize {
        DispatchSize::for_kernel(kernel, width, height, self.threadgroup)
    }

    fn dispatch_decode(
        &self,
        kernel: DecodeKernel,
        params: &ConversionParams,
        wire: &[u8],
        surface: SurfaceMut<'_>,
    ) -> Result<(), DispatchError> {
        validate_decode(kernel, params, wire.len(), &surface)?;
        if params.width == 0 || params.height == 0 {
            return Ok(());
        }

        let grid = self.dispatch_size(Kernel::Decode(kernel), params.width, params.height);
        let columns = grid.grid_width();
        let rows = params.height as usize;
        let SurfaceMut {
            pixels,
            bytes_per_row,
        } = surface;

        // Grid rows past the frame have no backing row to hand out
        self.pool.install(|| {
            pixels
                .par_chunks_mut(bytes_per_row)
                .take(rows)
                .enumerate()
                .for_each(|(y, row)| {
                    for x in 0..columns {
                        decode_invocation(kernel, params, wire, x, y as u32, row);
                    }
                });
        });

        Ok(())
    }

    fn dispatch_encode(
        &self,
        kernel: EncodeKernel,
        params: &ConversionParams,
        source: SourcePlanes<'_>,
        wire: &mut [u8],
    ) -> Result<(), DispatchError> {
        validate_encode(kernel, params, &source, wire.len())?;
        if params.width == 0 || params.height == 0 {
            return Ok(());
        }

        let grid = self.dispatch_size(Kernel::Encode(kernel), params.width, params.height);
        let columns = grid.grid_width();
        let rows = params.height as usize;
        let stride = params.bytes_per_row as usize;

        self.pool.install(|| {
            wire.par_chunks_mut(stride)
                .take(rows)
                .enumerate()
                .for_each(|(y, row)| {
                    for mx in 0..columns {
                        encode_invocation(kernel, params, &source, mx, y as u32, row);
                    }
                });
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ChannelOrder;
    use crate::format_conversion::wire_row_bytes;

    const CANARY: u8 = 0xA5;

    fn backend() -> CpuBackend {
        CpuBackend::new(&PipelineConfig::default().with_worker_threads(2)).unwrap()
    }

    #[test]
    fn test_dispatch_size_720p() {
        let group = ThreadgroupSize::default();
        let decode = DispatchSize::for_kernel(
            Kernel::Decode(DecodeKernel::Uyvy),
            1280,
            720,
            group,
        );
        assert_eq!((decode.threadgroups_x, decode.threadgroups_y), (80, 45));

        let encode = DispatchSize::for_kernel(
            Kernel::Encode(EncodeKernel::Nv12),
            1280,
            720,
            group,
        );
        assert_eq!((encode.threadgroups_x, encode.threadgroups_y), (40, 45));
    }

    #[test]
    fn test_dispatch_size_rounds_up() {
        let group = ThreadgroupSize::default();
        let decode =
            DispatchSize::for_kernel(Kernel::Decode(DecodeKernel::Nv12), 1281, 721, group);
        assert_eq!((decode.threadgroups_x, decode.threadgroups_y), (81, 46));
        assert!(decode.grid_width() >= 1281);

        let encode = DispatchSize::for_kernel(
            Kernel::Encode(EncodeKernel::WideGamutFloat),
            1281,
            1,
            group,
        );
        // ceil(1281 / 2) = 641 macro-pixels → 41 groups
        assert_eq!(encode.threadgroups_x, 41);
        assert_eq!(encode.invocations(), 41 * 16 * 16);
    }

    #[test]
    fn test_decode_leaves_padding_untouched() {
        let backend = backend();
        for width in [1u32, 3, 5, 17, 33] {
            let height = 3u32;
            let wire_stride = (width as usize * 4).next_multiple_of(64);
            let wire = vec![128u8; wire_stride * height as usize * 2];
            let surface_stride = wire_stride;
            let mut pixels = vec![CANARY; surface_stride * height as usize];

            let kernel = DecodeKernel::PackedRgb {
                order: ChannelOrder::Rgba,
            };
            let params = ConversionParams::new(width, height, wire_stride as u32, 0, false);
            backend
                .dispatch_decode(
                    kernel,
                    &params,
                    &wire,
                    SurfaceMut {
                        pixels: &mut pixels,
                        bytes_per_row: surface_stride,
                    },
                )
                .unwrap();

            for y in 0..height as usize {
                let row = &pixels[y * surface_stride..(y + 1) * surface_stride];
                let (image, padding) = row.split_at(width as usize * 4);
                assert!(image.chunks(4).all(|px| px == [128, 128, 128, 255]));
                assert!(padding.iter().all(|&b| b == CANARY), "width {}", width);
            }
        }
    }

    #[test]
    fn test_encode_exact_source_and_padding() {
        let backend = backend();
        for width in [1u32, 3, 5, 17] {
            let height = 2u32;
            // Exactly sized source: no slack after the last pixel
            let source = vec![255u8; width as usize * 4 * height as usize];
            let stride = wire_row_bytes(width).next_multiple_of(64);
            let mut wire = vec![CANARY; stride * height as usize];

            let params = ConversionParams::new(width, height, stride as u32, 0, false);
            backend
                .dispatch_encode(
                    EncodeKernel::PackedRgb {
                        order: ChannelOrder::Bgra,
                    },
                    &params,
                    SourcePlanes {
                        data: &source,
                        bytes_per_row: width as usize * 4,
                    },
                    &mut wire,
                )
                .unwrap();

            for y in 0..height as usize {
                let row = &wire[y * stride..(y + 1) * stride];
                let (image, padding) = row.split_at(wire_row_bytes(width));
                assert!(image.chunks(4).all(|m| m == [128, 235, 128, 235]));
                assert!(padding.iter().all(|&b| b == CANARY), "width {}", width);
            }
        }
    }

    #[test]
    fn test_undersized_buffers_are_rejected() {
        let backend = backend();
        let params = ConversionParams::new(4, 4, 8, 0, false);
        let wire = vec![0u8; 8 * 3];
        let mut pixels = vec![0u8; 16 * 4];
        let result = backend.dispatch_decode(
            DecodeKernel::Uyvy,
            &params,
            &wire,
            SurfaceMut {
                pixels: &mut pixels,
                bytes_per_row: 16,
            },
        );
        assert!(matches!(result, Err(DispatchError::BufferTooSmall { .. })));
    }

    #[test]
    fn test_info_reports_workers() {
        let info = backend().info();
        assert_eq!(info.name, "cpu");
        assert_eq!(info.worker_threads, 2);
    }
}
