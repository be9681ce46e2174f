use crate::error::FlowError;
use crate::frame::{VideoFormat, VideoInfo};
use crate::geometry::FrameRect;

use super::font;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const RED: Color = Color::rgb(255, 0, 0);
    pub const YELLOW: Color = Color::rgb(255, 255, 0);
    pub const GREEN: Color = Color::rgb(0, 255, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Drawing target. Coordinates are frame pixels; anything outside the
/// surface is clipped.
pub trait Surface {
    fn size(&self) -> (u32, u32);

    fn stroke_line(&mut self, from: (f64, f64), to: (f64, f64), width: f64, color: Color);

    fn stroke_rect(&mut self, rect: FrameRect, width: f64, color: Color) {
        let (x0, y0) = (rect.x, rect.y);
        let (x1, y1) = (rect.x + rect.width, rect.y + rect.height);
        self.stroke_line((x0, y0), (x1, y0), width, color);
        self.stroke_line((x1, y0), (x1, y1), width, color);
        self.stroke_line((x1, y1), (x0, y1), width, color);
        self.stroke_line((x0, y1), (x0, y0), width, color);
    }

    fn fill_dot(&mut self, center: (f64, f64), radius: f64, color: Color);

    /// `anchor` is the left end of the text baseline.
    fn draw_text(&mut self, anchor: (f64, f64), size: f64, text: &str, color: Color);
}

/// Pixel layouts the overlay can draw on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceFormat {
    /// 32 bits with alpha (ARGB, BGRA).
    Argb32,
    /// 32 bits, padding byte left alone (xRGB, BGRx).
    Rgb24,
    /// 16-bit 5-6-5 (RGB16).
    Rgb565,
}

impl SurfaceFormat {
    pub fn for_video(format: VideoFormat) -> Result<Self, FlowError> {
        match format {
            VideoFormat::Argb | VideoFormat::Bgra => Ok(SurfaceFormat::Argb32),
            VideoFormat::Xrgb | VideoFormat::Bgrx => Ok(SurfaceFormat::Rgb24),
            VideoFormat::Rgb16 => Ok(SurfaceFormat::Rgb565),
            other => Err(FlowError::UnsupportedFormat(other)),
        }
    }
}

// ----------------------------------------------------------------------------
// FrameSurface
// ----------------------------------------------------------------------------

/// Rasterizes directly into a mapped frame plane.
pub struct FrameSurface<'a> {
    data: &'a mut [u8],
    info: VideoInfo,
    surface_format: SurfaceFormat,
}

impl<'a> FrameSurface<'a> {
    pub fn new(data: &'a mut [u8], info: VideoInfo) -> Result<Self, FlowError> {
        let surface_format = SurfaceFormat::for_video(info.format)?;
        if data.len() < info.size() {
            return Err(FlowError::InvalidFrame(format!(
                "{} bytes mapped, {} needs {}",
                data.len(),
                info,
                info.size()
            )));
        }
        Ok(Self {
            data,
            info,
            surface_format,
        })
    }

    pub fn surface_format(&self) -> SurfaceFormat {
        self.surface_format
    }

    fn put(&mut self, x: i64, y: i64, color: Color) {
        if x < 0 || y < 0 || x >= self.info.width as i64 || y >= self.info.height as i64 {
            return;
        }
        let bpp = self.info.format.bytes_per_pixel();
        let offset = y as usize * self.info.stride + x as usize * bpp;
        let px = &mut self.data[offset..offset + bpp];
        match self.info.format {
            VideoFormat::Bgra => px.copy_from_slice(&[color.b, color.g, color.r, 255]),
            VideoFormat::Bgrx => px[..3].copy_from_slice(&[color.b, color.g, color.r]),
            VideoFormat::Argb => px.copy_from_slice(&[255, color.r, color.g, color.b]),
            VideoFormat::Xrgb => px[1..].copy_from_slice(&[color.r, color.g, color.b]),
            VideoFormat::Rgb16 => {
                let value = ((color.r as u16 >> 3) << 11)
                    | ((color.g as u16 >> 2) << 5)
                    | (color.b as u16 >> 3);
                px.copy_from_slice(&value.to_le_bytes());
            }
            // Rejected in `new`.
            _ => {}
        }
    }

    /// Fill every pixel whose centre satisfies `inside`, within a bounding box.
    fn fill_where(
        &mut self,
        (min_x, min_y): (f64, f64),
        (max_x, max_y): (f64, f64),
        color: Color,
        inside: impl Fn(f64, f64) -> bool,
    ) {
        if ![min_x, min_y, max_x, max_y].iter().all(|v| v.is_finite()) {
            return;
        }
        let x0 = min_x.floor().max(0.0) as i64;
        let y0 = min_y.floor().max(0.0) as i64;
        let x1 = max_x.ceil().min(self.info.width as f64) as i64;
        let y1 = max_y.ceil().min(self.info.height as f64) as i64;
        for py in y0..y1 {
            for px in x0..x1 {
                if inside(px as f64 + 0.5, py as f64 + 0.5) {
                    self.put(px, py, color);
                }
            }
        }
    }
}

fn distance_to_segment(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len2 = dx * dx + dy * dy;
    let t = if len2 == 0.0 {
        0.0
    } else {
        (((p.0 - a.0) * dx + (p.1 - a.1) * dy) / len2).clamp(0.0, 1.0)
    };
    let (cx, cy) = (a.0 + t * dx, a.1 + t * dy);
    ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt()
}

impl Surface for FrameSurface<'_> {
    fn size(&self) -> (u32, u32) {
        (self.info.width, self.info.height)
    }

    fn stroke_line(&mut self, from: (f64, f64), to: (f64, f64), width: f64, color: Color) {
        let half = (width / 2.0).max(0.5);
        self.fill_where(
            (from.0.min(to.0) - half, from.1.min(to.1) - half),
            (from.0.max(to.0) + half, from.1.max(to.1) + half),
            color,
            |x, y| distance_to_segment((x, y), from, to) <= half,
        );
    }

    fn fill_dot(&mut self, center: (f64, f64), radius: f64, color: Color) {
        let radius = radius.max(0.5);
        self.fill_where(
            (center.0 - radius, center.1 - radius),
            (center.0 + radius, center.1 + radius),
            color,
            |x, y| (x - center.0).powi(2) + (y - center.1).powi(2) <= radius * radius,
        );
    }

    fn draw_text(&mut self, anchor: (f64, f64), size: f64, text: &str, color: Color) {
        if !anchor.0.is_finite() || !anchor.1.is_finite() {
            return;
        }
        let scale = font::scale_for(size) as i64;
        let left = anchor.0.round();
        let baseline = anchor.1.round();
        let extent = font::text_width(text, size) as f64;
        let glyph_height = (font::GLYPH_HEIGHT as i64 * scale) as f64;
        if left >= self.info.width as f64
            || left + extent <= 0.0
            || baseline <= 0.0
            || baseline - glyph_height >= self.info.height as f64
        {
            return;
        }

        // Past the check both ends lie within one text extent of the surface.
        let left = left as i64;
        let top = baseline as i64 - font::GLYPH_HEIGHT as i64 * scale;
        for (i, ch) in text.chars().enumerate() {
            let Some(rows) = font::glyph(ch) else {
                continue;
            };
            let origin_x = left + i as i64 * font::ADVANCE as i64 * scale;
            if origin_x >= self.info.width as i64 {
                break;
            }
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..font::GLYPH_WIDTH {
                    if (bits >> (font::GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                        continue;
                    }
                    let x = origin_x + col as i64 * scale;
                    let y = top + row as i64 * scale;
                    for dy in 0..scale {
                        for dx in 0..scale {
                            self.put(x + dx, y + dy, color);
                        }
                    }
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// RecordingSurface
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub enum DrawOp {
    Line {
        from: (f64, f64),
        to: (f64, f64),
        width: f64,
        color: Color,
    },
    Rect {
        rect: FrameRect,
        width: f64,
        color: Color,
    },
    Dot {
        center: (f64, f64),
        radius: f64,
        color: Color,
    },
    Text {
        anchor: (f64, f64),
        size: f64,
        text: String,
        color: Color,
    },
}

/// Records draw calls instead of rasterizing them.
#[derive(Clone, Debug, Default)]
pub struct RecordingSurface {
    width: u32,
    height: u32,
    ops: Vec<DrawOp>,
}

impl RecordingSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ops: Vec::new(),
        }
    }

    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    pub fn lines(&self) -> impl Iterator<Item = &DrawOp> {
        self.ops.iter().filter(|op| matches!(op, DrawOp::Line { .. }))
    }

    pub fn dots(&self) -> impl Iterator<Item = &DrawOp> {
        self.ops.iter().filter(|op| matches!(op, DrawOp::Dot { .. }))
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().filter_map(|op| match op {
            DrawOp::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }
}

impl Surface for RecordingSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn stroke_line(&mut self, from: (f64, f64), to: (f64, f64), width: f64, color: Color) {
        self.ops.push(DrawOp::Line {
            from,
            to,
            width,
            color,
        });
    }

    fn stroke_rect(&mut self, rect: FrameRect, width: f64, color: Color) {
        self.ops.push(DrawOp::Rect { rect, width, color });
    }

    fn fill_dot(&mut self, center: (f64, f64), radius: f64, color: Color) {
        self.ops.push(DrawOp::Dot {
            center,
            radius,
            color,
        });
    }

    fn draw_text(&mut self, anchor: (f64, f64), size: f64, text: &str, color: Color) {
        self.ops.push(DrawOp::Text {
            anchor,
            size,
            text: text.to_string(),
            color,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel<'a>(data: &'a [u8], info: &VideoInfo, x: usize, y: usize) -> &'a [u8] {
        let bpp = info.format.bytes_per_pixel();
        let offset = y * info.stride + x * bpp;
        &data[offset..offset + bpp]
    }

    #[test]
    fn format_mapping_fails_closed() {
        assert_eq!(
            SurfaceFormat::for_video(VideoFormat::Bgra).unwrap(),
            SurfaceFormat::Argb32
        );
        assert_eq!(
            SurfaceFormat::for_video(VideoFormat::Xrgb).unwrap(),
            SurfaceFormat::Rgb24
        );
        assert_eq!(
            SurfaceFormat::for_video(VideoFormat::Rgb16).unwrap(),
            SurfaceFormat::Rgb565
        );
        for format in [VideoFormat::Rgb, VideoFormat::I420, VideoFormat::Gray8] {
            assert!(matches!(
                SurfaceFormat::for_video(format),
                Err(FlowError::UnsupportedFormat(f)) if f == format
            ));
        }
    }

    #[test]
    fn byte_order_follows_format() {
        for (format, expected) in [
            (VideoFormat::Bgra, vec![0, 0, 255, 255]),
            (VideoFormat::Bgrx, vec![0, 0, 255, 7]),
            (VideoFormat::Argb, vec![255, 255, 0, 0]),
            (VideoFormat::Xrgb, vec![7, 255, 0, 0]),
            (VideoFormat::Rgb16, vec![0x00, 0xf8]),
        ] {
            let info = VideoInfo::new(format, 4, 4).unwrap();
            let mut data = vec![7u8; info.size()];
            FrameSurface::new(&mut data, info)
                .unwrap()
                .fill_dot((1.5, 1.5), 0.5, Color::RED);
            assert_eq!(pixel(&data, &info, 1, 1), &expected[..], "{format}");
            assert_eq!(pixel(&data, &info, 3, 3), &vec![7u8; expected.len()][..]);
        }
    }

    #[test]
    fn stride_padding_is_untouched() {
        let info = VideoInfo::new(VideoFormat::Bgrx, 4, 4)
            .unwrap()
            .with_stride(20)
            .unwrap();
        let mut data = vec![0u8; info.size()];
        FrameSurface::new(&mut data, info)
            .unwrap()
            .stroke_line((0.0, 2.0), (100.0, 2.0), 1.5, Color::WHITE);
        for row in data.chunks(20) {
            assert!(row[16..].iter().all(|&b| b == 0));
        }
        assert_eq!(pixel(&data, &info, 3, 1), &[255, 255, 255, 0]);
        assert_eq!(pixel(&data, &info, 3, 3), &[0, 0, 0, 0]);
    }

    #[test]
    fn drawing_is_clipped() {
        let info = VideoInfo::new(VideoFormat::Bgra, 8, 8).unwrap();
        let mut data = vec![0u8; info.size()];
        let mut surface = FrameSurface::new(&mut data, info).unwrap();
        surface.fill_dot((-50.0, -50.0), 3.0, Color::GREEN);
        surface.stroke_line((f64::NAN, 0.0), (4.0, 4.0), 1.5, Color::GREEN);
        surface.draw_text((20.0, 100.0), 35.0, "WIDE TEXT", Color::WHITE);
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn text_sits_on_baseline() {
        let info = VideoInfo::new(VideoFormat::Bgrx, 16, 16).unwrap();
        let mut data = vec![0u8; info.size()];
        FrameSurface::new(&mut data, info)
            .unwrap()
            .draw_text((2.0, 9.0), 7.0, "I", Color::WHITE);
        // Top bar of 'I' spans columns 1..=3 of the glyph on row 9 - 7.
        assert_eq!(pixel(&data, &info, 3, 2), &[255, 255, 255, 0]);
        assert_eq!(pixel(&data, &info, 4, 8), &[255, 255, 255, 0]);
        assert_eq!(pixel(&data, &info, 4, 9), &[0, 0, 0, 0]);
    }

    #[test]
    fn far_away_text_is_skipped() {
        let info = VideoInfo::new(VideoFormat::Bgrx, 64, 64).unwrap();
        let mut data = vec![0u8; info.size()];
        let mut surface = FrameSurface::new(&mut data, info).unwrap();
        for anchor in [(1.0e10, 10.0), (-1.0e10, 10.0), (10.0, 1.0e10), (10.0, -1.0e10)] {
            surface.draw_text(anchor, 20.0, "person", Color::RED);
        }
        surface.draw_text((10.0, 30.0), 1.0e12, "huge", Color::RED);
        drop(surface);
        assert!(data.chunks(4).any(|px| px[2] == 255));

        let mut data = vec![0u8; info.size()];
        FrameSurface::new(&mut data, info)
            .unwrap()
            .draw_text((1.0e10, 10.0), 20.0, "person", Color::RED);
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn short_buffer_is_rejected() {
        let info = VideoInfo::new(VideoFormat::Bgra, 8, 8).unwrap();
        let mut data = vec![0u8; 10];
        assert!(matches!(
            FrameSurface::new(&mut data, info),
            Err(FlowError::InvalidFrame(_))
        ));
    }
}
