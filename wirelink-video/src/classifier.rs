//! Pixel format classification
//!
//! Maps a wire tag to the kernel that handles it. Every table here is an
//! exhaustive match over [`PixelFormat`], so a new format does not compile
//! until each direction decides what to do with it.

use crate::types::{FourCc, PixelFormat};

/// Byte order of a packed 8-bit RGB format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelOrder {
    Bgra,
    Rgba,
}

impl ChannelOrder {
    /// Byte index of R, G, B, A within a pixel
    pub fn indices(self) -> [usize; 4] {
        match self {
            ChannelOrder::Bgra => [2, 1, 0, 3],
            ChannelOrder::Rgba => [0, 1, 2, 3],
        }
    }
}

/// Wire → display kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeKernel {
    Uyvy,
    Nv12,
    P216,
    PackedRgb { order: ChannelOrder },
}

impl DecodeKernel {
    /// Format the kernel reads
    pub fn accepts(self, format: PixelFormat) -> bool {
        decode_kernel_for(format) == Some(self)
    }
}

/// Capture/display → wire kernels, all producing packed 4:2:2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncodeKernel {
    /// Camera-native bi-planar 4:2:0
    Nv12,
    PackedRgb { order: ChannelOrder },
    /// Linear Display-P3 float, remapped and gamma-encoded first
    WideGamutFloat,
}

impl EncodeKernel {
    pub fn accepts(self, format: PixelFormat) -> bool {
        encode_kernel_for(format) == Some(self)
    }
}

/// Either end of a kernel lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    Decode(DecodeKernel),
    Encode(EncodeKernel),
}

impl Kernel {
    /// Pixels a single invocation covers horizontally
    pub fn pixels_per_invocation(self) -> u32 {
        match self {
            Kernel::Decode(_) => 1,
            // One macro-pixel per invocation
            Kernel::Encode(_) => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Decode,
    Encode,
}

/// Outcome of classifying a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelSelection {
    Decode(DecodeKernel),
    Encode(EncodeKernel),
    Unsupported(FourCc),
}

impl KernelSelection {
    pub fn is_supported(&self) -> bool {
        !matches!(self, KernelSelection::Unsupported(_))
    }
}

pub fn decode_kernel_for(format: PixelFormat) -> Option<DecodeKernel> {
    match format {
        PixelFormat::Uyvy => Some(DecodeKernel::Uyvy),
        PixelFormat::Nv12 => Some(DecodeKernel::Nv12),
        PixelFormat::P216 => Some(DecodeKernel::P216),
        PixelFormat::Bgra | PixelFormat::Bgrx => Some(DecodeKernel::PackedRgb {
            order: ChannelOrder::Bgra,
        }),
        PixelFormat::Rgba | PixelFormat::Rgbx => Some(DecodeKernel::PackedRgb {
            order: ChannelOrder::Rgba,
        }),
        PixelFormat::RgbaF32 => None,
    }
}

pub fn encode_kernel_for(format: PixelFormat) -> Option<EncodeKernel> {
    match format {
        PixelFormat::Nv12 => Some(EncodeKernel::Nv12),
        PixelFormat::Bgra | PixelFormat::Bgrx => Some(EncodeKernel::PackedRgb {
            order: ChannelOrder::Bgra,
        }),
        PixelFormat::Rgba | PixelFormat::Rgbx => Some(EncodeKernel::PackedRgb {
            order: ChannelOrder::Rgba,
        }),
        PixelFormat::RgbaF32 => Some(EncodeKernel::WideGamutFloat),
        PixelFormat::Uyvy | PixelFormat::P216 => None,
    }
}

/// Pick the kernel for `tag` in `direction`.
///
/// Never panics: tags that are unknown, or known but without a kernel in
/// that direction, come back as [`KernelSelection::Unsupported`] so the
/// caller can skip the frame.
pub fn classify(tag: FourCc, direction: Direction) -> KernelSelection {
    let Some(format) = PixelFormat::from_fourcc(tag) else {
        return KernelSelection::Unsupported(tag);
    };

    let selection = match direction {
        Direction::Decode => decode_kernel_for(format).map(KernelSelection::Decode),
        Direction::Encode => encode_kernel_for(format).map(KernelSelection::Encode),
    };

    selection.unwrap_or(KernelSelection::Unsupported(tag))
}
