//! Wirelink FFI - C Foreign Function Interface
//!
//! Exposes the conversion pipeline to a C host. A header is generated with
//! cbindgen into OUT_DIR at build time.

use libc::{c_char, c_int, size_t};
use parking_lot::Mutex;
use std::ptr;
use std::slice;

use wirelink_video::{
    classify, wire_row_bytes, Direction, FourCc, FrameRate, FrameRecord, Pipeline, PipelineConfig,
    TickOutcome, WireBuffer,
};

/// Opaque handle to a pipeline (C-compatible)
pub struct WLPipeline {
    _private: [u8; 0],
}

struct Handle {
    pipeline: Pipeline,
    wire: Mutex<WireBuffer>,
}

/// C-compatible pipeline configuration. Zero fields take the defaults.
#[repr(C)]
pub struct CPipelineConfig {
    pub in_flight_capacity: u32,
    pub row_alignment: u32,
    pub worker_threads: u32,
    pub pin_worker_threads: u32,
    pub tick_rate_num: u32,
    pub tick_rate_den: u32,
    pub output_channel_depth: u32,
    pub max_slot_bytes: u64,
}

impl CPipelineConfig {
    fn to_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        if self.in_flight_capacity > 0 {
            config.in_flight_capacity = self.in_flight_capacity as usize;
        }
        if self.row_alignment > 0 {
            config.row_alignment = self.row_alignment as usize;
        }
        config.worker_threads = self.worker_threads as usize;
        config.pin_worker_threads = self.pin_worker_threads != 0;
        if self.tick_rate_num > 0 && self.tick_rate_den > 0 {
            config.tick_rate = FrameRate::new(self.tick_rate_num, self.tick_rate_den);
        }
        if self.output_channel_depth > 0 {
            config.output_channel_depth = self.output_channel_depth as usize;
        }
        if self.max_slot_bytes > 0 {
            config.max_slot_bytes = Some(self.max_slot_bytes as usize);
        }
        config
    }
}

/// C-compatible frame record. `data` is only read during the call.
#[repr(C)]
pub struct CFrameRecord {
    pub width: u32,
    pub height: u32,
    /// Little-endian FourCC
    pub format: u32,
    pub line_stride: u32,
    pub chroma_plane_offset: u32,
    pub has_alpha: u32,
    pub frame_rate_num: u32,
    pub frame_rate_den: u32,
    pub aspect_ratio: f32,
    pub timestamp: i64,
    pub data: *const u8,
    pub data_len: size_t,
}

impl CFrameRecord {
    /// # Safety
    /// `data` must point to `data_len` readable bytes for `'a`.
    unsafe fn as_record<'a>(&'a self) -> Option<FrameRecord<'a>> {
        if self.data.is_null() {
            return None;
        }
        let data = slice::from_raw_parts(self.data, self.data_len);
        let mut record = FrameRecord::new(
            self.width,
            self.height,
            FourCc(self.format),
            self.line_stride,
            data,
        )
        .with_chroma_plane_offset(self.chroma_plane_offset)
        .with_alpha(self.has_alpha != 0)
        .with_aspect_ratio(self.aspect_ratio)
        .with_timestamp(self.timestamp);
        if self.frame_rate_num > 0 && self.frame_rate_den > 0 {
            record = record.with_frame_rate(FrameRate::new(self.frame_rate_num, self.frame_rate_den));
        }
        Some(record)
    }
}

/// Result of `wirelink_pipeline_tick`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WLTickOutcome {
    InvalidHandle = -1,
    Idle = 0,
    Represented = 1,
    Skipped = 2,
    AllocationFailed = 3,
    Rejected = 4,
    DispatchFailed = 5,
    Submitted = 6,
}

impl From<TickOutcome> for WLTickOutcome {
    fn from(outcome: TickOutcome) -> Self {
        match outcome {
            TickOutcome::Idle => WLTickOutcome::Idle,
            TickOutcome::Represented { .. } => WLTickOutcome::Represented,
            TickOutcome::Skipped(_) => WLTickOutcome::Skipped,
            TickOutcome::AllocationFailed => WLTickOutcome::AllocationFailed,
            TickOutcome::Rejected => WLTickOutcome::Rejected,
            TickOutcome::DispatchFailed => WLTickOutcome::DispatchFailed,
            TickOutcome::Submitted { .. } => WLTickOutcome::Submitted,
        }
    }
}

unsafe fn handle<'a>(ptr: *const WLPipeline) -> Option<&'a Handle> {
    (ptr as *const Handle).as_ref()
}

// ============================================================================
// PIPELINE API
// ============================================================================

/// Create a pipeline. A null config uses the defaults.
///
/// Returns null if the pipeline could not be constructed.
///
/// # Safety
/// `config` must be null or point to a valid `CPipelineConfig`.
#[no_mangle]
pub unsafe extern "C" fn wirelink_pipeline_create(
    config: *const CPipelineConfig,
) -> *mut WLPipeline {
    let config = config
        .as_ref()
        .map(CPipelineConfig::to_config)
        .unwrap_or_default();

    match Pipeline::new(config) {
        Ok(pipeline) => {
            let handle = Box::new(Handle {
                pipeline,
                wire: Mutex::new(WireBuffer::new()),
            });
            Box::into_raw(handle) as *mut WLPipeline
        }
        Err(e) => {
            log::error!("Failed to create pipeline: {}", e);
            ptr::null_mut()
        }
    }
}

/// Drain in-flight work and destroy the pipeline
///
/// # Safety
/// Caller must ensure ptr is valid and not already freed.
#[no_mangle]
pub unsafe extern "C" fn wirelink_pipeline_destroy(ptr: *mut WLPipeline) {
    if !ptr.is_null() {
        let handle = Box::from_raw(ptr as *mut Handle);
        handle.pipeline.shutdown();
    }
}

/// Start the background ticker at the configured rate
///
/// # Safety
/// Caller must ensure ptr is valid.
#[no_mangle]
pub unsafe extern "C" fn wirelink_pipeline_start(ptr: *mut WLPipeline) -> c_int {
    let Some(handle) = handle(ptr) else {
        return 0;
    };
    match handle.pipeline.start() {
        Ok(()) => 1,
        Err(e) => {
            log::error!("Failed to start ticker: {}", e);
            0
        }
    }
}

/// Publish a frame. The bytes are copied before this returns.
///
/// # Safety
/// Caller must ensure ptr and frame are valid.
#[no_mangle]
pub unsafe extern "C" fn wirelink_pipeline_publish(
    ptr: *mut WLPipeline,
    frame: *const CFrameRecord,
) -> c_int {
    let (Some(handle), Some(frame)) = (handle(ptr), frame.as_ref()) else {
        return 0;
    };
    let Some(record) = frame.as_record() else {
        return 0;
    };

    handle.pipeline.publish(&record);
    1
}

/// Run one consumer tick
///
/// # Safety
/// Caller must ensure ptr is valid.
#[no_mangle]
pub unsafe extern "C" fn wirelink_pipeline_tick(ptr: *mut WLPipeline) -> WLTickOutcome {
    match handle(ptr) {
        Some(handle) => handle.pipeline.tick().into(),
        None => WLTickOutcome::InvalidHandle,
    }
}

/// Wait for in-flight work and clear the last output
///
/// # Safety
/// Caller must ensure ptr is valid.
#[no_mangle]
pub unsafe extern "C" fn wirelink_pipeline_drain_and_reset(ptr: *mut WLPipeline) {
    if let Some(handle) = handle(ptr) {
        handle.pipeline.drain_and_reset();
    }
}

/// Copy the last presented frame as RGBA8 into `dst`
///
/// Returns 1 on success, 0 if nothing has been presented, the frame's slot
/// has since been decoded into again, or `dst` is too small. Dimensions are
/// written to `width_out`/`height_out` when non-null.
///
/// # Safety
/// Caller must ensure ptr is valid and `dst` holds `dst_len` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn wirelink_pipeline_copy_latest(
    ptr: *const WLPipeline,
    dst: *mut u8,
    dst_len: size_t,
    dst_stride: u32,
    width_out: *mut u32,
    height_out: *mut u32,
) -> c_int {
    let Some(handle) = handle(ptr) else {
        return 0;
    };
    let Some(latest) = handle.pipeline.latest_output() else {
        return 0;
    };

    let (width, height) = latest.dimensions();
    if !width_out.is_null() {
        *width_out = width;
    }
    if !height_out.is_null() {
        *height_out = height;
    }
    if dst.is_null() {
        return 0;
    }

    let dst = slice::from_raw_parts_mut(dst, dst_len);
    match latest.copy_to(dst, dst_stride as usize) {
        Ok(()) => 1,
        Err(err) => {
            log::debug!("copy_latest: {}", err);
            0
        }
    }
}

/// Encode a capture frame into packed 4:2:2 at `dst_stride`
///
/// # Safety
/// Caller must ensure all pointers are valid and `dst` holds `dst_len`
/// writable bytes.
#[no_mangle]
pub unsafe extern "C" fn wirelink_pipeline_convert_encode(
    ptr: *mut WLPipeline,
    frame: *const CFrameRecord,
    dst: *mut u8,
    dst_len: size_t,
    dst_stride: u32,
) -> c_int {
    let (Some(handle), Some(frame)) = (handle(ptr), frame.as_ref()) else {
        return 0;
    };
    let Some(record) = frame.as_record() else {
        return 0;
    };
    if dst.is_null() {
        return 0;
    }

    let mut wire = handle.wire.lock();
    if let Err(e) = handle.pipeline.converter().convert_encode(&record, &mut wire) {
        log::warn!("Encode failed: {}", e);
        return 0;
    }

    let (width, height) = wire.dimensions();
    let row = wire_row_bytes(width);
    let stride = dst_stride as usize;
    if stride < row || dst_len < stride * (height as usize - 1) + row {
        return 0;
    }

    let dst = slice::from_raw_parts_mut(dst, dst_len);
    let src = wire.as_bytes();
    for y in 0..height as usize {
        let from = y * wire.bytes_per_row();
        dst[y * stride..y * stride + row].copy_from_slice(&src[from..from + row]);
    }
    1
}

// ============================================================================
// STATISTICS
// ============================================================================

/// Get consumer tick count
///
/// # Safety
/// Caller must ensure ptr is valid.
#[no_mangle]
pub unsafe extern "C" fn wirelink_pipeline_get_ticks(ptr: *const WLPipeline) -> u64 {
    handle(ptr).map_or(0, |h| h.pipeline.stats().ticks)
}

/// Get completed decode count
///
/// # Safety
/// Caller must ensure ptr is valid.
#[no_mangle]
pub unsafe extern "C" fn wirelink_pipeline_get_completed_frames(ptr: *const WLPipeline) -> u64 {
    handle(ptr).map_or(0, |h| h.pipeline.stats().completed)
}

/// Get frames skipped for an unsupported format
///
/// # Safety
/// Caller must ensure ptr is valid.
#[no_mangle]
pub unsafe extern "C" fn wirelink_pipeline_get_skipped_frames(ptr: *const WLPipeline) -> u64 {
    handle(ptr).map_or(0, |h| h.pipeline.stats().skipped_unsupported)
}

/// Get frames dropped because buffers could not be allocated
///
/// # Safety
/// Caller must ensure ptr is valid.
#[no_mangle]
pub unsafe extern "C" fn wirelink_pipeline_get_allocation_failures(ptr: *const WLPipeline) -> u64 {
    handle(ptr).map_or(0, |h| h.pipeline.stats().allocation_failures)
}

/// Get frames overwritten in the mailbox before the consumer saw them
///
/// # Safety
/// Caller must ensure ptr is valid.
#[no_mangle]
pub unsafe extern "C" fn wirelink_pipeline_get_dropped_frames(ptr: *const WLPipeline) -> u64 {
    handle(ptr).map_or(0, |h| h.pipeline.stats().mailbox.dropped)
}

// ============================================================================
// UTILITY FUNCTIONS
// ============================================================================

/// Get library version string
#[no_mangle]
pub extern "C" fn wirelink_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const c_char
}

/// Check whether a FourCC tag has a kernel. `direction` is 0 for decode
/// (wire → display) and 1 for encode (capture → wire).
#[no_mangle]
pub extern "C" fn wirelink_classify(tag: u32, direction: u32) -> c_int {
    let direction = match direction {
        0 => Direction::Decode,
        1 => Direction::Encode,
        _ => return 0,
    };
    classify(FourCc(tag), direction).is_supported() as c_int
}
