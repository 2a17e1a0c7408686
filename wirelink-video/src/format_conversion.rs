//! Colour conversion kernels
//!
//! Kernels are written as single invocations of a compute grid: decode runs
//! once per output pixel, encode once per 2-pixel macro-pixel. Every
//! invocation checks its own coordinate against the frame and does nothing
//! outside it, so a backend may launch a padded grid.

use crate::classifier::{DecodeKernel, EncodeKernel};
use crate::color::{
    average_chroma, quantize, rgb8_to_unorm, rgb_to_ycbcr601, unorm_to_u8, wide_gamut_to_display,
    ycbcr601_to_rgb8, ycbcr709_16_to_rgb,
};
use crate::error::DispatchError;
use crate::types::{ConversionParams, PixelFormat};
use glam::Vec3;

/// RGBA8 destination of a decode dispatch
pub struct SurfaceMut<'a> {
    pub pixels: &'a mut [u8],
    pub bytes_per_row: usize,
}

/// Source planes of an encode dispatch
#[derive(Clone, Copy)]
pub struct SourcePlanes<'a> {
    pub data: &'a [u8],
    pub bytes_per_row: usize,
}

/// Layout the decode kernel expects in the wire buffer
pub fn decode_input_format(kernel: DecodeKernel) -> PixelFormat {
    match kernel {
        DecodeKernel::Uyvy => PixelFormat::Uyvy,
        DecodeKernel::Nv12 => PixelFormat::Nv12,
        DecodeKernel::P216 => PixelFormat::P216,
        DecodeKernel::PackedRgb { .. } => PixelFormat::Bgra,
    }
}

/// Layout the encode kernel expects in its source
pub fn encode_input_format(kernel: EncodeKernel) -> PixelFormat {
    match kernel {
        EncodeKernel::Nv12 => PixelFormat::Nv12,
        EncodeKernel::PackedRgb { .. } => PixelFormat::Bgra,
        EncodeKernel::WideGamutFloat => PixelFormat::RgbaF32,
    }
}

/// Bytes of packed 4:2:2 a row of `width` pixels occupies
pub fn wire_row_bytes(width: u32) -> usize {
    (width as usize).div_ceil(2) * 4
}

fn check(buffer: &'static str, len: usize, required: usize) -> Result<(), DispatchError> {
    if len < required {
        return Err(DispatchError::BufferTooSmall {
            buffer,
            len,
            required,
        });
    }
    Ok(())
}

fn check_planes(
    format: PixelFormat,
    params: &ConversionParams,
    stride: usize,
    len: usize,
) -> Result<(), DispatchError> {
    let layout = format.plane_layout(params.width, params.height);
    check("row stride", stride, layout.row_bytes.max(layout.chroma_row_bytes))?;
    check("luma plane", len, stride * (layout.rows - 1) + layout.row_bytes)?;

    if layout.has_chroma_plane() {
        let offset = params.chroma_plane_offset as usize;
        check(
            "chroma plane",
            len,
            offset + stride * (layout.chroma_rows - 1) + layout.chroma_row_bytes,
        )?;
    }
    Ok(())
}

/// Reject decode dispatches whose buffers do not cover the frame
pub fn validate_decode(
    kernel: DecodeKernel,
    params: &ConversionParams,
    wire_len: usize,
    surface: &SurfaceMut<'_>,
) -> Result<(), DispatchError> {
    if params.width == 0 || params.height == 0 {
        return Ok(());
    }
    check_planes(
        decode_input_format(kernel),
        params,
        params.bytes_per_row as usize,
        wire_len,
    )?;

    let row = params.width as usize * 4;
    check("surface stride", surface.bytes_per_row, row)?;
    check(
        "surface",
        surface.pixels.len(),
        surface.bytes_per_row * (params.height as usize - 1) + row,
    )
}

/// Reject encode dispatches whose buffers do not cover the frame
pub fn validate_encode(
    kernel: EncodeKernel,
    params: &ConversionParams,
    source: &SourcePlanes<'_>,
    wire_len: usize,
) -> Result<(), DispatchError> {
    if params.width == 0 || params.height == 0 {
        return Ok(());
    }
    check_planes(
        encode_input_format(kernel),
        params,
        source.bytes_per_row,
        source.data.len(),
    )?;

    let row = wire_row_bytes(params.width);
    check("wire stride", params.bytes_per_row as usize, row)?;
    check(
        "wire",
        wire_len,
        params.bytes_per_row as usize * (params.height as usize - 1) + row,
    )
}

#[inline]
fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

#[inline]
fn read_f32(data: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// One decode invocation: writes RGBA8 for pixel `(x, y)` into `out_row`
#[inline]
pub fn decode_invocation(
    kernel: DecodeKernel,
    params: &ConversionParams,
    wire: &[u8],
    x: u32,
    y: u32,
    out_row: &mut [u8],
) {
    if x >= params.width || y >= params.height {
        return;
    }

    let rgba = decode_pixel(kernel, params, wire, x as usize, y as usize);
    let offset = x as usize * 4;
    out_row[offset..offset + 4].copy_from_slice(&rgba);
}

fn decode_pixel(
    kernel: DecodeKernel,
    params: &ConversionParams,
    wire: &[u8],
    x: usize,
    y: usize,
) -> [u8; 4] {
    let stride = params.bytes_per_row as usize;
    let row = y * stride;

    match kernel {
        DecodeKernel::Uyvy => {
            // [Cb Y0 Cr Y1], both pixels share the chroma pair
            let m = row + (x / 2) * 4;
            let luma = if x % 2 == 0 { wire[m + 1] } else { wire[m + 3] };
            let [r, g, b] = ycbcr601_to_rgb8(luma, wire[m], wire[m + 2]);
            [r, g, b, 255]
        }

        DecodeKernel::Nv12 => {
            let luma = wire[row + x];
            let c = params.chroma_plane_offset as usize + (y / 2) * stride + (x / 2) * 2;
            let [r, g, b] = ycbcr601_to_rgb8(luma, wire[c], wire[c + 1]);
            [r, g, b, 255]
        }

        DecodeKernel::P216 => {
            let luma = read_u16(wire, row + x * 2);
            let c = params.chroma_plane_offset as usize + y * stride + (x / 2) * 4;
            let rgb = ycbcr709_16_to_rgb(luma, read_u16(wire, c), read_u16(wire, c + 2));
            [unorm_to_u8(rgb.x), unorm_to_u8(rgb.y), unorm_to_u8(rgb.z), 255]
        }

        DecodeKernel::PackedRgb { order } => {
            let p = row + x * 4;
            let [ri, gi, bi, ai] = order.indices();
            let alpha = if params.has_alpha() { wire[p + ai] } else { 255 };
            [wire[p + ri], wire[p + gi], wire[p + bi], alpha]
        }
    }
}

/// One encode invocation: writes macro-pixel `mx` of row `y` into `wire_row`
#[inline]
pub fn encode_invocation(
    kernel: EncodeKernel,
    params: &ConversionParams,
    source: &SourcePlanes<'_>,
    mx: u32,
    y: u32,
    wire_row: &mut [u8],
) {
    let x0 = mx as usize * 2;
    if x0 >= params.width as usize || y >= params.height {
        return;
    }
    // Odd width: the last macro-pixel repeats its first sample
    let x1 = if x0 + 1 < params.width as usize {
        x0 + 1
    } else {
        x0
    };

    let packed = encode_macro_pixel(kernel, params, source, x0, x1, y as usize);
    let offset = mx as usize * 4;
    wire_row[offset..offset + 4].copy_from_slice(&packed);
}

fn encode_macro_pixel(
    kernel: EncodeKernel,
    params: &ConversionParams,
    source: &SourcePlanes<'_>,
    x0: usize,
    x1: usize,
    y: usize,
) -> [u8; 4] {
    let data = source.data;
    let row = y * source.bytes_per_row;

    match kernel {
        EncodeKernel::Nv12 => {
            // Same matrix and range on both sides, so this is a repack
            let c = params.chroma_plane_offset as usize
                + (y / 2) * source.bytes_per_row
                + (x0 / 2) * 2;
            [data[c], data[row + x0], data[c + 1], data[row + x1]]
        }

        EncodeKernel::PackedRgb { order } => {
            let [ri, gi, bi, _] = order.indices();
            let sample = |x: usize| {
                let p = row + x * 4;
                rgb8_to_unorm(data[p + ri], data[p + gi], data[p + bi])
            };
            pack_macro_pixel(sample(x0), sample(x1))
        }

        EncodeKernel::WideGamutFloat => {
            let sample = |x: usize| {
                let p = row + x * 16;
                wide_gamut_to_display(Vec3::new(
                    read_f32(data, p),
                    read_f32(data, p + 4),
                    read_f32(data, p + 8),
                ))
            };
            pack_macro_pixel(sample(x0), sample(x1))
        }
    }
}

/// Two RGB samples → `[Cb, Y0, Cr, Y1]` with averaged chroma
#[inline]
pub fn pack_macro_pixel(first: Vec3, second: Vec3) -> [u8; 4] {
    let a = rgb_to_ycbcr601(first);
    let b = rgb_to_ycbcr601(second);
    let (cb, cr) = average_chroma(a, b);
    [quantize(cb), quantize(a.y), quantize(cr), quantize(b.y)]
}
