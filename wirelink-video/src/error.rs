//! Error types for the conversion core

use crate::types::FourCc;
use thiserror::Error;

/// Errors surfaced to callers of the converter and pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The compute backend or pipeline could not be brought up at all
    #[error("pipeline construction failed: {0}")]
    Construction(String),

    /// A buffer could not be allocated at the requested geometry. The frame
    /// should be skipped; the next one retries.
    #[error("failed to allocate {bytes} bytes for a {width}x{height} frame")]
    Allocation { width: u32, height: u32, bytes: usize },

    #[error("invalid frame: {0}")]
    InvalidFrame(#[from] FrameError),

    #[error("slot index {index} out of range for a ring of {capacity}")]
    InvalidSlot { index: usize, capacity: usize },

    /// No encode kernel exists for this source format
    #[error("no encode kernel for source format {0}")]
    UnsupportedSource(FourCc),

    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
}

/// A frame record whose layout does not cover the rows the kernels read
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("empty geometry {width}x{height}")]
    EmptyGeometry { width: u32, height: u32 },

    #[error("line stride {stride} is smaller than the {required} bytes a row needs")]
    StrideTooSmall { stride: usize, required: usize },

    #[error("plane {plane} needs {required} bytes but the buffer holds {len}")]
    BufferTooShort {
        plane: usize,
        len: usize,
        required: usize,
    },

    #[error("chroma plane offset {offset} overlaps the luma plane ending at {luma_end}")]
    ChromaOverlapsLuma { offset: usize, luma_end: usize },
}

/// Kernel dispatch rejected before any invocation ran
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("{buffer} buffer holds {len} bytes, dispatch needs {required}")]
    BufferTooSmall {
        buffer: &'static str,
        len: usize,
        required: usize,
    },

    #[error("command buffer aborted: {0}")]
    Aborted(String),
}

/// Reading a decoded frame back from its surface failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SurfaceError {
    /// The slot has since been decoded into again
    #[error("surface holds frame {current:?}, not frame {expected}")]
    Stale { expected: u64, current: Option<u64> },

    #[error("destination holds {len} bytes at stride {stride}, frame needs {required}")]
    DestinationTooSmall {
        len: usize,
        stride: usize,
        required: usize,
    },
}

/// Slot or wire buffer allocation refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    #[error("{requested} bytes exceeds the configured limit of {limit}")]
    LimitExceeded { requested: usize, limit: usize },

    #[error("allocator refused {requested} bytes")]
    OutOfMemory { requested: usize },
}

impl AllocationError {
    pub fn requested(&self) -> usize {
        match self {
            AllocationError::LimitExceeded { requested, .. } => *requested,
            AllocationError::OutOfMemory { requested } => *requested,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
