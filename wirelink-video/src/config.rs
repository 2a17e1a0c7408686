//! Pipeline configuration

use crate::error::PipelineError;
use crate::types::FrameRate;

/// Threads per threadgroup along each axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadgroupSize {
    pub width: u32,
    pub height: u32,
}

impl Default for ThreadgroupSize {
    fn default() -> Self {
        Self {
            width: 16,
            height: 16,
        }
    }
}

/// Configuration shared by the converter, buffer pool and pipeline
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Frames allowed mid-flight at once; also the buffer ring size
    pub in_flight_capacity: usize,
    /// Row alignment for slot buffers, must be a power of two
    pub row_alignment: usize,
    pub threadgroup_size: ThreadgroupSize,
    /// Upper bound for a single slot allocation, `None` for unbounded
    pub max_slot_bytes: Option<usize>,
    /// Compute worker threads, 0 lets rayon decide
    pub worker_threads: usize,
    pub pin_worker_threads: bool,
    /// Consumer tick rate used by the ticker thread
    pub tick_rate: FrameRate,
    /// Depth of each connected output channel
    pub output_channel_depth: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            in_flight_capacity: 3,
            row_alignment: 64,
            threadgroup_size: ThreadgroupSize::default(),
            max_slot_bytes: None,
            worker_threads: 0,
            pin_worker_threads: false,
            tick_rate: FrameRate::new(60, 1),
            output_channel_depth: 2,
        }
    }
}

impl PipelineConfig {
    pub fn with_in_flight_capacity(mut self, capacity: usize) -> Self {
        self.in_flight_capacity = capacity;
        self
    }

    pub fn with_row_alignment(mut self, alignment: usize) -> Self {
        self.row_alignment = alignment;
        self
    }

    pub fn with_max_slot_bytes(mut self, limit: usize) -> Self {
        self.max_slot_bytes = Some(limit);
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_tick_rate(mut self, tick_rate: FrameRate) -> Self {
        self.tick_rate = tick_rate;
        self
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.in_flight_capacity == 0 {
            return Err(PipelineError::Construction(
                "in-flight capacity must be at least 1".into(),
            ));
        }
        if !self.row_alignment.is_power_of_two() {
            return Err(PipelineError::Construction(format!(
                "row alignment {} is not a power of two",
                self.row_alignment
            )));
        }
        if self.threadgroup_size.width == 0 || self.threadgroup_size.height == 0 {
            return Err(PipelineError::Construction(
                "threadgroup size must be non-zero".into(),
            ));
        }
        if self.output_channel_depth == 0 {
            return Err(PipelineError::Construction(
                "output channel depth must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
