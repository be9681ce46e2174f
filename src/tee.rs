//! Fan-out from the display flow to the inference flow.
//!
//! The display flow carries whatever format the sink wants; the inference
//! flow needs packed RGB at the model input size. `FrameTee` produces the
//! second from the first.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::frame::{Frame, VideoFormat, VideoInfo};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTee {
    width: u32,
    height: u32,
}

impl FrameTee {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!(
                "inference size must be non-zero, got {}x{}",
                width,
                height
            ));
        }
        Ok(Self { width, height })
    }

    /// Layout of the frames `branch` produces.
    pub fn output_info(&self) -> Result<VideoInfo> {
        VideoInfo::new(VideoFormat::Rgb, self.width, self.height)
    }

    /// Inference-flow copy of a display frame. Metas are not copied.
    pub fn branch(&self, frame: &Frame) -> Result<Frame> {
        let rgb = to_rgb_image(frame)?;
        let rgb = if rgb.dimensions() == (self.width, self.height) {
            rgb
        } else {
            imageops::resize(&rgb, self.width, self.height, FilterType::Triangle)
        };
        Frame::new(rgb.into_raw(), self.output_info()?, frame.sequence())
    }
}

fn expand(value: u16, bits: u32) -> u8 {
    let v = value as u32;
    ((v << (8 - bits)) | (v >> (2 * bits - 8))) as u8
}

/// BT.601 limited range.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> Rgb<u8> {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let r = ((298 * c + 409 * e + 128) >> 8).clamp(0, 255) as u8;
    let g = ((298 * c - 100 * d - 208 * e + 128) >> 8).clamp(0, 255) as u8;
    let b = ((298 * c + 516 * d + 128) >> 8).clamp(0, 255) as u8;
    Rgb([r, g, b])
}

/// Convert any supported frame layout to an RGB image.
pub fn to_rgb_image(frame: &Frame) -> Result<RgbImage> {
    let info = frame.info();
    let data = frame.data();
    if data.len() < info.size() {
        return Err(anyhow!(
            "frame {} holds {} bytes, {} needs {}",
            frame.sequence(),
            data.len(),
            info,
            info.size()
        ));
    }
    let (width, height) = (info.width, info.height);

    if info.format == VideoFormat::I420 {
        let (w, h) = (width as usize, height as usize);
        let chroma_w = w.div_ceil(2);
        let u_plane = &data[w * h..];
        let v_plane = &u_plane[chroma_w * h.div_ceil(2)..];
        return Ok(RgbImage::from_fn(width, height, |x, y| {
            let (x, y) = (x as usize, y as usize);
            let chroma = (y / 2) * chroma_w + x / 2;
            yuv_to_rgb(data[y * w + x], u_plane[chroma], v_plane[chroma])
        }));
    }

    let bpp = info.format.bytes_per_pixel();
    let stride = info.stride;
    let format = info.format;
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let offset = y as usize * stride + x as usize * bpp;
        let px = &data[offset..offset + bpp];
        match format {
            VideoFormat::Rgb => Rgb([px[0], px[1], px[2]]),
            VideoFormat::Bgr | VideoFormat::Bgrx | VideoFormat::Bgra => Rgb([px[2], px[1], px[0]]),
            VideoFormat::Xrgb | VideoFormat::Argb => Rgb([px[1], px[2], px[3]]),
            VideoFormat::Rgb16 => {
                let value = u16::from_le_bytes([px[0], px[1]]);
                Rgb([
                    expand(value >> 11, 5),
                    expand((value >> 5) & 0x3f, 6),
                    expand(value & 0x1f, 5),
                ])
            }
            // I420 returned above; only its luma plane would be read here.
            VideoFormat::Gray8 | VideoFormat::I420 => Rgb([px[0]; 3]),
        }
    }))
}
