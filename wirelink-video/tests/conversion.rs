//! End-to-end conversion properties

use std::time::Duration;
use wirelink_video::{
    ChannelOrder, ComputeBackend, Converter, CpuBackend, DecodeKernel, DecodeOutcome, FourCc,
    FrameRecord, LatestFrameMailbox, Pipeline, PipelineConfig, PixelFormat, PresentedFrame,
    SurfaceMut, TickOutcome, WireBuffer, ConversionParams,
};

fn config() -> PipelineConfig {
    PipelineConfig::default().with_worker_threads(2)
}

fn decode(converter: &Converter, frame: &FrameRecord<'_>) -> PresentedFrame {
    match converter.convert_decode(frame).unwrap() {
        DecodeOutcome::Surface(out) => out,
        DecodeOutcome::Skipped(skipped) => panic!("{} skipped", skipped.tag),
    }
}

/// Solid-colour source frame in `format` with a padded stride
fn solid_frame(format: PixelFormat, width: u32, height: u32) -> (Vec<u8>, u32) {
    let layout = format.plane_layout(width, height);
    let stride = layout.row_bytes.max(layout.chroma_row_bytes) + 12;
    let chroma_base = stride * layout.rows;
    let mut data = vec![0u8; chroma_base + stride * layout.chroma_rows];

    for y in 0..layout.rows {
        let row = &mut data[y * stride..y * stride + layout.row_bytes];
        match format {
            PixelFormat::Uyvy => {
                for m in row.chunks_mut(4) {
                    m.copy_from_slice(&[100, 150, 160, 150]);
                }
            }
            PixelFormat::Nv12 => row.fill(150),
            PixelFormat::P216 => {
                for px in row.chunks_mut(2) {
                    px.copy_from_slice(&38400u16.to_le_bytes());
                }
            }
            PixelFormat::Bgra | PixelFormat::Bgrx => {
                for px in row.chunks_mut(4) {
                    px.copy_from_slice(&[40, 90, 180, 255]);
                }
            }
            PixelFormat::Rgba | PixelFormat::Rgbx => {
                for px in row.chunks_mut(4) {
                    px.copy_from_slice(&[180, 90, 40, 255]);
                }
            }
            PixelFormat::RgbaF32 => unreachable!("not a decode format"),
        }
    }

    for y in 0..layout.chroma_rows {
        let start = chroma_base + y * stride;
        let row = &mut data[start..start + layout.chroma_row_bytes];
        match format {
            PixelFormat::Nv12 => {
                for pair in row.chunks_mut(2) {
                    pair.copy_from_slice(&[100, 160]);
                }
            }
            PixelFormat::P216 => {
                for pair in row.chunks_mut(4) {
                    pair[..2].copy_from_slice(&30000u16.to_le_bytes());
                    pair[2..].copy_from_slice(&35000u16.to_le_bytes());
                }
            }
            _ => unreachable!("single-plane format"),
        }
    }

    (data, stride as u32)
}

#[test]
fn round_trip_stays_close_for_every_decode_format() {
    let decode_formats = PixelFormat::ALL
        .into_iter()
        .filter(|f| *f != PixelFormat::RgbaF32);

    for format in decode_formats {
        for (width, height) in [(8u32, 4u32), (7, 5), (1, 1)] {
            let converter = Converter::new(config()).unwrap();
            let (data, stride) = solid_frame(format, width, height);
            let source = FrameRecord::new(width, height, format.fourcc(), stride, &data);

            let first = decode(&converter, &source);

            let mut rgba = vec![0u8; (width * height * 4) as usize];
            first.copy_to(&mut rgba, width as usize * 4).unwrap();
            let display = FrameRecord::new(width, height, FourCc::RGBA, width * 4, &rgba);

            let mut wire = WireBuffer::new();
            converter.convert_encode(&display, &mut wire).unwrap();

            let back = FrameRecord::new(
                width,
                height,
                FourCc::UYVY,
                wire.bytes_per_row() as u32,
                wire.as_bytes(),
            );
            let second = decode(&converter, &back);

            for y in 0..height {
                for x in 0..width {
                    let a = first.pixel(x, y).unwrap();
                    let b = second.pixel(x, y).unwrap();
                    for c in 0..3 {
                        assert!(
                            (a[c] as i32 - b[c] as i32).abs() <= 3,
                            "{:?} {}x{} at ({}, {}): {:?} vs {:?}",
                            format,
                            width,
                            height,
                            x,
                            y,
                            a,
                            b
                        );
                    }
                }
            }
        }
    }
}

#[test]
fn nv12_white_720p_decodes_to_white() {
    let converter = Converter::new(config()).unwrap();
    let (width, height) = (1280u32, 720u32);
    let luma = (width * height) as usize;
    let mut data = vec![235u8; luma + luma / 2];
    data[luma..].fill(128);

    let frame = FrameRecord::new(width, height, FourCc::NV12, width, &data);
    let out = decode(&converter, &frame);

    let stride = out.bytes_per_row();
    let pixels = out.pixels().unwrap();
    for y in 0..height as usize {
        let row = &pixels[y * stride..y * stride + width as usize * 4];
        assert!(row.chunks(4).all(|px| px == [255, 255, 255, 255]), "row {}", y);
    }
}

#[test]
fn red_pair_encodes_to_expected_macro_pixel() {
    let converter = Converter::new(config()).unwrap();
    let data = [0u8, 0, 255, 255, 0, 0, 255, 255];
    let frame = FrameRecord::new(2, 1, FourCc::BGRA, 8, &data);
    let mut wire = WireBuffer::new();

    converter.convert_encode(&frame, &mut wire).unwrap();
    let [cb, y0, cr, y1] = wire.macro_pixel(0, 0).unwrap();
    assert_eq!((y0, y1), (81, 81));
    assert_eq!(cb, 90);
    assert_eq!(cr, 240);
}

#[test]
fn wide_gamut_source_encodes() {
    let converter = Converter::new(config()).unwrap();
    let mut data = Vec::new();
    for value in [1.0f32, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0] {
        data.extend_from_slice(&value.to_le_bytes());
    }
    let frame = FrameRecord::new(2, 1, FourCc::RGBA_F32, 32, &data);
    let mut wire = WireBuffer::new();

    converter.convert_encode(&frame, &mut wire).unwrap();
    let [cb, y0, cr, y1] = wire.macro_pixel(0, 0).unwrap();
    assert_eq!((y0, y1), (235, 16));
    assert_eq!((cb, cr), (128, 128));
}

#[test]
fn unknown_tag_changes_nothing() {
    let converter = Converter::new(config()).unwrap();
    let data = vec![0u8; 256];
    let tag = FourCc::from_bytes(*b"AV01");
    let frame = FrameRecord::new(8, 8, tag, 32, &data);

    let before = converter.in_flight().stats();
    assert!(matches!(
        converter.convert_decode(&frame).unwrap(),
        DecodeOutcome::Skipped(s) if s.tag == tag
    ));
    let after = converter.in_flight().stats();

    assert_eq!(before.available, after.available);
    assert_eq!(before.acquired, after.acquired);
    assert_eq!(converter.pool().stats().allocated, 0);
    assert_eq!(converter.pool().stats().reallocations, 0);
}

#[test]
fn kernels_stay_inside_the_frame_for_odd_widths() {
    const CANARY: u8 = 0x5A;
    let backend = CpuBackend::new(&config()).unwrap();
    let kernels = [
        DecodeKernel::Uyvy,
        DecodeKernel::Nv12,
        DecodeKernel::P216,
        DecodeKernel::PackedRgb {
            order: ChannelOrder::Bgra,
        },
    ];

    for kernel in kernels {
        let format = match kernel {
            DecodeKernel::Uyvy => PixelFormat::Uyvy,
            DecodeKernel::Nv12 => PixelFormat::Nv12,
            DecodeKernel::P216 => PixelFormat::P216,
            DecodeKernel::PackedRgb { .. } => PixelFormat::Bgra,
        };

        for width in 1..=9u32 {
            let height = 3u32;
            let layout = format.plane_layout(width, height);
            let stride = layout.row_bytes.max(layout.chroma_row_bytes);
            let chroma = if layout.has_chroma_plane() {
                stride * layout.rows
            } else {
                0
            };
            // Exactly the bytes the layout needs, nothing after
            let wire_len = if layout.has_chroma_plane() {
                chroma + stride * (layout.chroma_rows - 1) + layout.chroma_row_bytes
            } else {
                stride * (layout.rows - 1) + layout.row_bytes
            };
            let wire = vec![128u8; wire_len];

            let row = width as usize * 4;
            let surface_stride = row + 8;
            let mut pixels = vec![CANARY; surface_stride * height as usize + 8];

            let params = ConversionParams::new(width, height, stride as u32, chroma as u32, false);
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
                let start = y * surface_stride;
                assert!(
                    pixels[start + row..start + surface_stride]
                        .iter()
                        .all(|&b| b == CANARY),
                    "{:?} width {} row {}",
                    kernel,
                    width,
                    y
                );
            }
            let tail = surface_stride * height as usize;
            assert!(pixels[tail..].iter().all(|&b| b == CANARY));
        }
    }
}

#[test]
fn mailbox_yields_frame_then_empty() {
    let mailbox = LatestFrameMailbox::new();
    mailbox.publish(1u32);
    mailbox.publish(2u32);
    assert_eq!(mailbox.take_and_clear(), Some(2));
    assert_eq!(mailbox.take_and_clear(), None);
}

#[test]
fn pipeline_drain_restores_capacity() {
    let pipeline = Pipeline::new(config()).unwrap();
    let rx = pipeline.connect_output();
    let data = vec![128u8; 32 * 32 * 2];

    for i in 0..6 {
        let frame = FrameRecord::new(32, 32, FourCc::UYVY, 64, &data).with_timestamp(i);
        pipeline.publish(&frame);
        assert!(matches!(pipeline.tick(), TickOutcome::Submitted { .. }));
    }

    pipeline.drain_and_reset();
    let stats = pipeline.stats();
    assert_eq!(stats.in_flight.available, stats.in_flight.capacity);
    assert_eq!(stats.in_flight.over_releases, 0);
    assert!(pipeline.latest_output().is_none());
    assert!(stats.pool.allocated <= stats.pool.capacity);

    assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
}
