//! Colour-space math shared by the conversion kernels
//!
//! 8-bit paths use the legacy broadcast (BT.601) video-range matrix; the
//! 16-bit planar path uses BT.709 coefficients on normalized floats.

use glam::{Mat3, Vec3};

pub const LUMA_MIN: f32 = 16.0;
pub const LUMA_MAX: f32 = 235.0;
pub const CHROMA_MIN: f32 = 16.0;
pub const CHROMA_MAX: f32 = 240.0;

/// RGB in [0,1] → video-range Y'CbCr (rows are Y, Cb, Cr)
const BT601_FORWARD: Mat3 = Mat3::from_cols(
    Vec3::new(65.481, -37.797, 112.0),
    Vec3::new(128.553, -74.203, -93.786),
    Vec3::new(24.966, 112.0, -18.214),
);
const BT601_OFFSET: Vec3 = Vec3::new(16.0, 128.0, 128.0);

/// Linear Display-P3 → linear BT.709/sRGB primaries
const P3_TO_BT709: Mat3 = Mat3::from_cols(
    Vec3::new(1.224_940_1, -0.042_056_9, -0.019_637_6),
    Vec3::new(-0.224_940_4, 1.042_057_1, -0.078_636_1),
    Vec3::new(0.0, 0.0, 1.098_273_5),
);

const P216_LUMA_OFFSET: f32 = 4096.0;
const P216_LUMA_SCALE: f32 = 56064.0;
const P216_CHROMA_OFFSET: f32 = 32768.0;
const P216_CHROMA_SCALE: f32 = 32768.0;

/// Video-range Y'CbCr sample before quantization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YCbCr {
    pub y: f32,
    pub cb: f32,
    pub cr: f32,
}

#[inline]
fn clip_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Video-range BT.601 → RGB using the classic 8.8 fixed-point constants
#[inline]
pub fn ycbcr601_to_rgb8(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = cb as i32 - 128;
    let e = cr as i32 - 128;

    [
        clip_u8((298 * c + 409 * e + 128) >> 8),
        clip_u8((298 * c - 100 * d - 208 * e + 128) >> 8),
        clip_u8((298 * c + 516 * d + 128) >> 8),
    ]
}

/// 16-bit BT.709 samples → RGB in [0,1]
#[inline]
pub fn ycbcr709_16_to_rgb(y: u16, cb: u16, cr: u16) -> Vec3 {
    let y = (y as f32 - P216_LUMA_OFFSET) / P216_LUMA_SCALE;
    let cb = (cb as f32 - P216_CHROMA_OFFSET) / P216_CHROMA_SCALE;
    let cr = (cr as f32 - P216_CHROMA_OFFSET) / P216_CHROMA_SCALE;

    Vec3::new(
        y + 1.5748 * cr,
        y - 0.1873 * cb - 0.4681 * cr,
        y + 1.8556 * cb,
    )
    .clamp(Vec3::ZERO, Vec3::ONE)
}

#[inline]
pub fn unorm_to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[inline]
pub fn rgb8_to_unorm(r: u8, g: u8, b: u8) -> Vec3 {
    Vec3::new(r as f32, g as f32, b as f32) / 255.0
}

/// RGB in [0,1] → clamped video-range BT.601
#[inline]
pub fn rgb_to_ycbcr601(rgb: Vec3) -> YCbCr {
    let v = BT601_FORWARD * rgb + BT601_OFFSET;
    YCbCr {
        y: v.x.clamp(LUMA_MIN, LUMA_MAX),
        cb: v.y.clamp(CHROMA_MIN, CHROMA_MAX),
        cr: v.z.clamp(CHROMA_MIN, CHROMA_MAX),
    }
}

/// Shared chroma of a macro-pixel: the mean of both samples' Cb and Cr.
///
/// Not chroma-siting correct; downstream consumers expect exactly this.
#[inline]
pub fn average_chroma(first: YCbCr, second: YCbCr) -> (f32, f32) {
    ((first.cb + second.cb) * 0.5, (first.cr + second.cr) * 0.5)
}

#[inline]
pub fn quantize(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Piecewise sRGB transfer, linear → perceptual
#[inline]
pub fn linear_to_srgb(x: f32) -> f32 {
    if x <= 0.003_130_8 {
        12.92 * x
    } else {
        1.055 * x.powf(1.0 / 2.4) - 0.055
    }
}

/// Linear wide-gamut float → gamma-encoded BT.709 RGB in [0,1]
#[inline]
pub fn wide_gamut_to_display(linear_p3: Vec3) -> Vec3 {
    let linear = (P3_TO_BT709 * linear_p3).clamp(Vec3::ZERO, Vec3::ONE);
    Vec3::new(
        linear_to_srgb(linear.x),
        linear_to_srgb(linear.y),
        linear_to_srgb(linear.z),
    )
}
