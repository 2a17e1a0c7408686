//! Frame records, pixel format tags and kernel parameter types

use crate::error::FrameError;
use bytemuck::{Pod, Zeroable};
use bytes::Bytes;
use std::fmt;
use std::time::Duration;

/// Little-endian FourCC pixel format tag as carried on the wire
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub u32);

impl FourCc {
    pub const UYVY: FourCc = FourCc::from_bytes(*b"UYVY");
    pub const NV12: FourCc = FourCc::from_bytes(*b"NV12");
    pub const P216: FourCc = FourCc::from_bytes(*b"P216");
    pub const BGRA: FourCc = FourCc::from_bytes(*b"BGRA");
    pub const BGRX: FourCc = FourCc::from_bytes(*b"BGRX");
    pub const RGBA: FourCc = FourCc::from_bytes(*b"RGBA");
    pub const RGBX: FourCc = FourCc::from_bytes(*b"RGBX");
    /// 128-bit linear float RGBA, wide gamut
    pub const RGBA_F32: FourCc = FourCc::from_bytes(*b"RGfA");

    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(bytes))
    }

    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.to_bytes();
        if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            for b in bytes {
                write!(f, "{}", b as char)?;
            }
            Ok(())
        } else {
            write!(f, "0x{:08X}", self.0)
        }
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({})", self)
    }
}

/// Pixel formats understood by the conversion kernels
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Uyvy = 1,    // Packed YUV 4:2:2 8-bit, [Cb Y0 Cr Y1]
    Nv12 = 2,    // Bi-planar YUV 4:2:0 8-bit
    P216 = 3,    // Bi-planar YUV 4:2:2 16-bit
    Bgra = 4,    // Packed BGR with alpha
    Bgrx = 5,    // Packed BGR, 4th byte is padding
    Rgba = 6,    // Packed RGB with alpha
    Rgbx = 7,    // Packed RGB, 4th byte is padding
    RgbaF32 = 8, // Packed linear float RGBA, Display-P3 primaries
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 8] = [
        PixelFormat::Uyvy,
        PixelFormat::Nv12,
        PixelFormat::P216,
        PixelFormat::Bgra,
        PixelFormat::Bgrx,
        PixelFormat::Rgba,
        PixelFormat::Rgbx,
        PixelFormat::RgbaF32,
    ];

    /// Map a wire tag to a known format
    pub fn from_fourcc(tag: FourCc) -> Option<Self> {
        match tag {
            FourCc::UYVY => Some(PixelFormat::Uyvy),
            FourCc::NV12 => Some(PixelFormat::Nv12),
            FourCc::P216 => Some(PixelFormat::P216),
            FourCc::BGRA => Some(PixelFormat::Bgra),
            FourCc::BGRX => Some(PixelFormat::Bgrx),
            FourCc::RGBA => Some(PixelFormat::Rgba),
            FourCc::RGBX => Some(PixelFormat::Rgbx),
            FourCc::RGBA_F32 => Some(PixelFormat::RgbaF32),
            _ => None,
        }
    }

    pub fn fourcc(self) -> FourCc {
        match self {
            PixelFormat::Uyvy => FourCc::UYVY,
            PixelFormat::Nv12 => FourCc::NV12,
            PixelFormat::P216 => FourCc::P216,
            PixelFormat::Bgra => FourCc::BGRA,
            PixelFormat::Bgrx => FourCc::BGRX,
            PixelFormat::Rgba => FourCc::RGBA,
            PixelFormat::Rgbx => FourCc::RGBX,
            PixelFormat::RgbaF32 => FourCc::RGBA_F32,
        }
    }

    /// Returns number of planes for this format
    pub fn plane_count(self) -> usize {
        match self {
            PixelFormat::Nv12 | PixelFormat::P216 => 2,
            _ => 1,
        }
    }

    pub fn is_planar(self) -> bool {
        self.plane_count() > 1
    }

    /// Whether the 4th channel can carry real transparency
    pub fn supports_alpha(self) -> bool {
        matches!(
            self,
            PixelFormat::Bgra | PixelFormat::Rgba | PixelFormat::RgbaF32
        )
    }

    /// Minimum bytes each plane occupies for the given geometry
    pub fn plane_layout(self, width: u32, height: u32) -> PlaneLayout {
        let w = width as usize;
        let h = height as usize;
        let half_w = w.div_ceil(2);

        match self {
            PixelFormat::Uyvy => PlaneLayout::single(half_w * 4, h),
            PixelFormat::Nv12 => PlaneLayout {
                row_bytes: w,
                rows: h,
                chroma_row_bytes: half_w * 2,
                chroma_rows: h.div_ceil(2),
            },
            PixelFormat::P216 => PlaneLayout {
                row_bytes: w * 2,
                rows: h,
                chroma_row_bytes: half_w * 4,
                chroma_rows: h,
            },
            PixelFormat::Bgra | PixelFormat::Bgrx | PixelFormat::Rgba | PixelFormat::Rgbx => {
                PlaneLayout::single(w * 4, h)
            }
            PixelFormat::RgbaF32 => PlaneLayout::single(w * 16, h),
        }
    }
}

/// Byte layout of a frame's planes, excluding stride padding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub row_bytes: usize,
    pub rows: usize,
    /// Zero for single-plane formats
    pub chroma_row_bytes: usize,
    pub chroma_rows: usize,
}

impl PlaneLayout {
    fn single(row_bytes: usize, rows: usize) -> Self {
        Self {
            row_bytes,
            rows,
            chroma_row_bytes: 0,
            chroma_rows: 0,
        }
    }

    pub fn has_chroma_plane(&self) -> bool {
        self.chroma_rows > 0
    }
}

/// Rational frame rate
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    pub fn as_f64(self) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        self.num as f64 / self.den as f64
    }

    /// Duration of one frame, `None` for a zero rate
    pub fn interval(self) -> Option<Duration> {
        if self.num == 0 || self.den == 0 {
            return None;
        }
        Some(Duration::from_nanos(
            (self.den as u64 * 1_000_000_000) / self.num as u64,
        ))
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::new(60, 1)
    }
}

/// One video frame as handed over by a producer.
///
/// The bytes are borrowed from the producer and are only valid for the
/// duration of the call that receives the record. Anything that needs the
/// frame later must go through [`FrameRecord::to_owned_frame`].
#[derive(Debug, Clone, Copy)]
pub struct FrameRecord<'a> {
    pub width: u32,
    pub height: u32,
    pub format: FourCc,
    /// Bytes per row of the primary plane
    pub line_stride: u32,
    /// Byte offset of the second plane, 0 for single-plane formats or
    /// "directly after the primary plane"
    pub chroma_plane_offset: u32,
    pub has_alpha: bool,
    pub frame_rate: FrameRate,
    /// Display aspect, 0 means derive from width/height
    pub aspect_ratio: f32,
    /// Producer timestamp in 100ns units, opaque to the core
    pub timestamp: i64,
    pub data: &'a [u8],
}

impl<'a> FrameRecord<'a> {
    pub fn new(width: u32, height: u32, format: FourCc, line_stride: u32, data: &'a [u8]) -> Self {
        Self {
            width,
            height,
            format,
            line_stride,
            chroma_plane_offset: 0,
            has_alpha: false,
            frame_rate: FrameRate::default(),
            aspect_ratio: 0.0,
            timestamp: 0,
            data,
        }
    }

    pub fn with_chroma_plane_offset(mut self, offset: u32) -> Self {
        self.chroma_plane_offset = offset;
        self
    }

    pub fn with_alpha(mut self, has_alpha: bool) -> Self {
        self.has_alpha = has_alpha;
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: FrameRate) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: f32) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn pixel_format(&self) -> Option<PixelFormat> {
        PixelFormat::from_fourcc(self.format)
    }

    pub fn display_aspect(&self) -> f32 {
        if self.aspect_ratio > 0.0 {
            self.aspect_ratio
        } else if self.height == 0 {
            0.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    /// Alpha is only meaningful when the format can carry it
    pub fn effective_alpha(&self) -> bool {
        self.has_alpha && self.pixel_format().is_some_and(PixelFormat::supports_alpha)
    }

    /// Resolved offset of the second plane
    pub fn chroma_offset(&self) -> usize {
        if self.chroma_plane_offset == 0 {
            self.line_stride as usize * self.height as usize
        } else {
            self.chroma_plane_offset as usize
        }
    }

    /// Check that every row the kernels will touch lies inside `data`
    pub fn validate(&self, format: PixelFormat) -> Result<(), FrameError> {
        if self.width == 0 || self.height == 0 {
            return Err(FrameError::EmptyGeometry {
                width: self.width,
                height: self.height,
            });
        }

        let layout = format.plane_layout(self.width, self.height);
        let stride = self.line_stride as usize;

        if stride < layout.row_bytes || stride < layout.chroma_row_bytes {
            return Err(FrameError::StrideTooSmall {
                stride,
                required: layout.row_bytes.max(layout.chroma_row_bytes),
            });
        }

        let luma_end = stride * (layout.rows - 1) + layout.row_bytes;
        if self.data.len() < luma_end {
            return Err(FrameError::BufferTooShort {
                plane: 0,
                len: self.data.len(),
                required: luma_end,
            });
        }

        if layout.has_chroma_plane() {
            let offset = self.chroma_offset();
            if offset < luma_end {
                return Err(FrameError::ChromaOverlapsLuma { offset, luma_end });
            }
            let chroma_end = offset + stride * (layout.chroma_rows - 1) + layout.chroma_row_bytes;
            if self.data.len() < chroma_end {
                return Err(FrameError::BufferTooShort {
                    plane: 1,
                    len: self.data.len(),
                    required: chroma_end,
                });
            }
        }

        Ok(())
    }

    /// Copy the producer's bytes so the frame can outlive this call
    pub fn to_owned_frame(&self) -> OwnedFrame {
        OwnedFrame {
            width: self.width,
            height: self.height,
            format: self.format,
            line_stride: self.line_stride,
            chroma_plane_offset: self.chroma_plane_offset,
            has_alpha: self.has_alpha,
            frame_rate: self.frame_rate,
            aspect_ratio: self.aspect_ratio,
            timestamp: self.timestamp,
            data: Bytes::copy_from_slice(self.data),
        }
    }
}

/// A frame whose bytes belong to the core
#[derive(Debug, Clone)]
pub struct OwnedFrame {
    width: u32,
    height: u32,
    format: FourCc,
    line_stride: u32,
    chroma_plane_offset: u32,
    has_alpha: bool,
    frame_rate: FrameRate,
    aspect_ratio: f32,
    timestamp: i64,
    data: Bytes,
}

impl OwnedFrame {
    pub fn record(&self) -> FrameRecord<'_> {
        FrameRecord {
            width: self.width,
            height: self.height,
            format: self.format,
            line_stride: self.line_stride,
            chroma_plane_offset: self.chroma_plane_offset,
            has_alpha: self.has_alpha,
            frame_rate: self.frame_rate,
            aspect_ratio: self.aspect_ratio,
            timestamp: self.timestamp,
            data: &self.data,
        }
    }

    pub fn format(&self) -> FourCc {
        self.format
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// Per-dispatch kernel parameters.
///
/// `bytes_per_row` and `chroma_plane_offset` describe the wire-side buffer:
/// the one a decode kernel reads or an encode kernel writes (for encode the
/// chroma offset refers to the source planes). Padded to 32 bytes so a GPU
/// backend can bind it as a uniform buffer unchanged.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ConversionParams {
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
    pub chroma_plane_offset: u32,
    pub has_alpha: u32,
    pub _pad: [u32; 3],
}

impl ConversionParams {
    pub fn new(
        width: u32,
        height: u32,
        bytes_per_row: u32,
        chroma_plane_offset: u32,
        has_alpha: bool,
    ) -> Self {
        Self {
            width,
            height,
            bytes_per_row,
            chroma_plane_offset,
            has_alpha: has_alpha as u32,
            _pad: [0; 3],
        }
    }

    pub fn has_alpha(&self) -> bool {
        self.has_alpha != 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// Width/height a buffer slot is sized for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotGeometry {
    pub width: u32,
    pub height: u32,
}

impl SlotGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Row stride for 4-byte pixels rounded up to `alignment`
    pub fn bytes_per_row(&self, alignment: usize) -> usize {
        align_up(self.width as usize * 4, alignment)
    }
}

/// Packed 4:2:2 output of the encode direction
#[derive(Debug, Clone, Default)]
pub struct WireBuffer {
    width: u32,
    height: u32,
    bytes_per_row: usize,
    data: Vec<u8>,
}

impl WireBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn bytes_per_row(&self) -> usize {
        self.bytes_per_row
    }

    pub fn format(&self) -> FourCc {
        FourCc::UYVY
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Macro-pixel `[Cb, Y0, Cr, Y1]` containing pixel `x` of row `y`
    pub fn macro_pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = y as usize * self.bytes_per_row + (x as usize / 2) * 4;
        let mut out = [0u8; 4];
        out.copy_from_slice(self.data.get(offset..offset + 4)?);
        Some(out)
    }

    pub(crate) fn matches(&self, width: u32, height: u32, bytes_per_row: usize) -> bool {
        self.width == width
            && self.height == height
            && self.bytes_per_row == bytes_per_row
            && self.data.len() == bytes_per_row * height as usize
    }

    pub(crate) fn replace(&mut self, width: u32, height: u32, bytes_per_row: usize, data: Vec<u8>) {
        self.width = width;
        self.height = height;
        self.bytes_per_row = bytes_per_row;
        self.data = data;
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

pub fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_round_trip_and_display() {
        assert_eq!(FourCc::UYVY.to_bytes(), *b"UYVY");
        assert_eq!(FourCc::UYVY.to_string(), "UYVY");
        assert_eq!(FourCc(0x0000_0001).to_string(), "0x00000001");
    }

    #[test]
    fn test_pixel_format_tags() {
        for format in PixelFormat::ALL {
            assert_eq!(PixelFormat::from_fourcc(format.fourcc()), Some(format));
        }
        assert_eq!(PixelFormat::from_fourcc(FourCc::from_bytes(*b"I420")), None);
    }

    #[test]
    fn test_plane_counts() {
        assert_eq!(PixelFormat::Nv12.plane_count(), 2);
        assert_eq!(PixelFormat::P216.plane_count(), 2);
        assert_eq!(PixelFormat::Uyvy.plane_count(), 1);
        assert!(!PixelFormat::Bgra.is_planar());
    }

    #[test]
    fn test_odd_width_layout() {
        let layout = PixelFormat::Uyvy.plane_layout(5, 3);
        assert_eq!(layout.row_bytes, 12);

        let layout = PixelFormat::Nv12.plane_layout(5, 3);
        assert_eq!(layout.row_bytes, 5);
        assert_eq!(layout.chroma_row_bytes, 6);
        assert_eq!(layout.chroma_rows, 2);
    }

    #[test]
    fn test_validate_rejects_short_buffers() {
        let data = vec![0u8; 16 * 4 - 1];
        let frame = FrameRecord::new(16, 4, FourCc::UYVY, 32, &data);
        assert!(matches!(
            frame.validate(PixelFormat::Uyvy),
            Err(FrameError::BufferTooShort { plane: 0, .. })
        ));

        let frame = FrameRecord::new(16, 4, FourCc::UYVY, 8, &data);
        assert!(matches!(
            frame.validate(PixelFormat::Uyvy),
            Err(FrameError::StrideTooSmall { .. })
        ));
    }

    #[test]
    fn test_validate_nv12_default_chroma_offset() {
        let data = vec![0u8; 8 * 4 + 8 * 2];
        let frame = FrameRecord::new(8, 4, FourCc::NV12, 8, &data);
        assert_eq!(frame.chroma_offset(), 32);
        assert!(frame.validate(PixelFormat::Nv12).is_ok());

        let frame = frame.with_chroma_plane_offset(8);
        assert!(matches!(
            frame.validate(PixelFormat::Nv12),
            Err(FrameError::ChromaOverlapsLuma { .. })
        ));
    }

    #[test]
    fn test_alpha_only_for_alpha_formats() {
        let data = [0u8; 16];
        let frame = FrameRecord::new(2, 2, FourCc::BGRX, 8, &data).with_alpha(true);
        assert!(!frame.effective_alpha());

        let frame = FrameRecord::new(2, 2, FourCc::BGRA, 8, &data).with_alpha(true);
        assert!(frame.effective_alpha());
    }

    #[test]
    fn test_display_aspect() {
        let data = [0u8; 0];
        let frame = FrameRecord::new(1920, 1080, FourCc::UYVY, 3840, &data);
        assert!((frame.display_aspect() - 16.0 / 9.0).abs() < 1e-6);
        assert_eq!(frame.with_aspect_ratio(4.0 / 3.0).display_aspect(), 4.0 / 3.0);
    }

    #[test]
    fn test_owned_frame_copies_bytes() {
        let mut data = vec![7u8; 8];
        let owned = FrameRecord::new(2, 1, FourCc::BGRA, 8, &data)
            .with_timestamp(42)
            .to_owned_frame();
        data.fill(0);

        let record = owned.record();
        assert_eq!(record.data, &[7u8; 8]);
        assert_eq!(record.timestamp, 42);
    }

    #[test]
    fn test_conversion_params_layout() {
        let params = ConversionParams::new(1920, 1080, 7680, 0, true);
        assert_eq!(params.as_bytes().len(), 32);
        assert!(params.has_alpha());
    }

    #[test]
    fn test_frame_rate_interval() {
        assert_eq!(
            FrameRate::new(60, 1).interval(),
            Some(Duration::from_nanos(16_666_666))
        );
        assert_eq!(FrameRate::new(0, 1).interval(), None);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(1, 64), 64);
        assert_eq!(align_up(64, 64), 64);
        assert_eq!(SlotGeometry::new(1281, 720).bytes_per_row(64), 5184);
    }
}
