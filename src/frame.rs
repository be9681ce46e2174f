//! Video frames and the metadata attached to them.
//!
//! - `VideoFormat` / `VideoInfo`: negotiated pixel layout of a flow.
//! - `Frame`: owned pixel buffer plus per-frame metas.
//! - `TextMeta`: serialized result attached when the output mode is JSON.
//!
//! A frame carries at most one result meta. Attaching a second one replaces
//! (and drops) the first.

use std::fmt;

use anyhow::{anyhow, Result};

use crate::envelope::Envelope;
use crate::geometry::Rect;

/// Name under which a typed result travels with a frame.
pub const RESULT_META_NAME: &str = "InferResultMeta";

/// Name under which a serialized result travels with a frame.
pub const TEXT_META_NAME: &str = "InferStrMeta";

// ----------------------------------------------------------------------------
// VideoFormat / VideoInfo
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VideoFormat {
    Rgb,
    Bgr,
    Bgrx,
    Bgra,
    Xrgb,
    Argb,
    /// 16-bit 5-6-5, little endian.
    Rgb16,
    Gray8,
    /// Planar 4:2:0, Y then U then V.
    I420,
}

impl VideoFormat {
    pub const ALL: [VideoFormat; 9] = [
        VideoFormat::Rgb,
        VideoFormat::Bgr,
        VideoFormat::Bgrx,
        VideoFormat::Bgra,
        VideoFormat::Xrgb,
        VideoFormat::Argb,
        VideoFormat::Rgb16,
        VideoFormat::Gray8,
        VideoFormat::I420,
    ];

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|format| format.name().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| anyhow!("unknown video format '{}'", name))
    }

    pub fn name(self) -> &'static str {
        match self {
            VideoFormat::Rgb => "RGB",
            VideoFormat::Bgr => "BGR",
            VideoFormat::Bgrx => "BGRx",
            VideoFormat::Bgra => "BGRA",
            VideoFormat::Xrgb => "xRGB",
            VideoFormat::Argb => "ARGB",
            VideoFormat::Rgb16 => "RGB16",
            VideoFormat::Gray8 => "GRAY8",
            VideoFormat::I420 => "I420",
        }
    }

    /// Bytes per pixel of the first plane.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            VideoFormat::Rgb | VideoFormat::Bgr => 3,
            VideoFormat::Bgrx | VideoFormat::Bgra | VideoFormat::Xrgb | VideoFormat::Argb => 4,
            VideoFormat::Rgb16 => 2,
            VideoFormat::Gray8 | VideoFormat::I420 => 1,
        }
    }

    pub fn is_planar(self) -> bool {
        matches!(self, VideoFormat::I420)
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Negotiated layout of a video flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoInfo {
    pub format: VideoFormat,
    pub width: u32,
    pub height: u32,
    /// Bytes per row of the first plane. At least `row_bytes()`.
    pub stride: usize,
}

impl VideoInfo {
    /// Tightly packed layout.
    pub fn new(format: VideoFormat, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("video size must be non-zero, got {}x{}", width, height));
        }
        Ok(Self {
            format,
            width,
            height,
            stride: width as usize * format.bytes_per_pixel(),
        })
    }

    /// Layout with padded rows.
    pub fn with_stride(mut self, stride: usize) -> Result<Self> {
        if self.format.is_planar() {
            return Err(anyhow!("custom stride is not supported for {}", self.format));
        }
        if stride < self.row_bytes() {
            return Err(anyhow!(
                "stride {} is shorter than a {} row of {} bytes",
                stride,
                self.format,
                self.row_bytes()
            ));
        }
        self.stride = stride;
        Ok(self)
    }

    /// Visible bytes in one row of the first plane.
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    pub fn is_packed(&self) -> bool {
        self.stride == self.row_bytes()
    }

    /// Total buffer size in bytes.
    pub fn size(&self) -> usize {
        match self.format {
            VideoFormat::I420 => {
                let luma = self.width as usize * self.height as usize;
                let chroma_w = (self.width as usize).div_ceil(2);
                let chroma_h = (self.height as usize).div_ceil(2);
                luma + 2 * chroma_w * chroma_h
            }
            _ => self.stride * self.height as usize,
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::full(self.width, self.height)
    }
}

impl fmt::Display for VideoInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}x{}", self.format, self.width, self.height)
    }
}

// ----------------------------------------------------------------------------
// Metas
// ----------------------------------------------------------------------------

/// Serialized result attached to a frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextMeta {
    pub name: &'static str,
    pub result: String,
}

impl TextMeta {
    pub fn new(result: String) -> Self {
        Self {
            name: TEXT_META_NAME,
            result,
        }
    }
}

#[derive(Debug, Default)]
struct FrameMetas {
    result: Option<Envelope>,
    text: Option<TextMeta>,
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One video frame. Owns its pixels and metas; moving it moves both.
#[derive(Debug)]
pub struct Frame {
    data: Vec<u8>,
    info: VideoInfo,
    sequence: u64,
    metas: FrameMetas,
}

impl Frame {
    pub fn new(data: Vec<u8>, info: VideoInfo, sequence: u64) -> Result<Self> {
        if data.len() < info.size() {
            return Err(anyhow!(
                "frame {} holds {} bytes, {} needs {}",
                sequence,
                data.len(),
                info,
                info.size()
            ));
        }
        Ok(Self {
            data,
            info,
            sequence,
            metas: FrameMetas::default(),
        })
    }

    /// Solid frame of one byte value, mostly for sources and tests.
    pub fn filled(info: VideoInfo, sequence: u64, value: u8) -> Self {
        Self {
            data: vec![value; info.size()],
            info,
            sequence,
            metas: FrameMetas::default(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn info(&self) -> &VideoInfo {
        &self.info
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Attach a typed result. Returns the one it replaced, if any.
    pub fn attach_result(&mut self, envelope: Envelope) -> Option<Envelope> {
        self.metas.result.replace(envelope)
    }

    pub fn result_meta(&self) -> Option<&Envelope> {
        self.metas.result.as_ref()
    }

    pub fn take_result(&mut self) -> Option<Envelope> {
        self.metas.result.take()
    }

    pub fn attach_text(&mut self, meta: TextMeta) -> Option<TextMeta> {
        self.metas.text.replace(meta)
    }

    pub fn text_meta(&self) -> Option<&TextMeta> {
        self.metas.text.as_ref()
    }
}
