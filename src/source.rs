//! Display-flow frame sources.
//!
//! `stub://` URIs produce a synthetic moving pattern. Anything else is handed
//! to GStreamer (`uridecodebin`) when the `pipeline-gstreamer` feature is on.

use anyhow::Result;
#[cfg(feature = "pipeline-gstreamer")]
use anyhow::{anyhow, Context};
#[cfg(feature = "pipeline-gstreamer")]
use std::time::{Duration, Instant};

use crate::frame::{Frame, VideoFormat, VideoInfo};

pub const DEFAULT_SOURCE_URI: &str = "stub://pattern";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceConfig {
    /// `stub://...` for a synthetic source, otherwise a GStreamer URI.
    pub uri: String,
    pub format: VideoFormat,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    /// Stop after this many frames.
    pub max_frames: Option<u64>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_SOURCE_URI.to_string(),
            format: VideoFormat::Bgrx,
            width: 640,
            height: 480,
            target_fps: 30,
            max_frames: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub uri: String,
}

pub struct FrameSource {
    backend: SourceBackend,
}

enum SourceBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "pipeline-gstreamer")]
    Gstreamer(GstreamerSource),
}

impl FrameSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        if config.uri.starts_with("stub://") {
            Ok(Self {
                backend: SourceBackend::Synthetic(SyntheticSource::new(config)?),
            })
        } else {
            #[cfg(feature = "pipeline-gstreamer")]
            {
                Ok(Self {
                    backend: SourceBackend::Gstreamer(GstreamerSource::new(config)?),
                })
            }
            #[cfg(not(feature = "pipeline-gstreamer"))]
            {
                anyhow::bail!(
                    "source '{}' requires the pipeline-gstreamer feature",
                    config.uri
                )
            }
        }
    }

    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "pipeline-gstreamer")]
            SourceBackend::Gstreamer(source) => source.connect(),
        }
    }

    /// Geometry of the frames this source produces.
    pub fn info(&self) -> VideoInfo {
        match &self.backend {
            SourceBackend::Synthetic(source) => source.info,
            #[cfg(feature = "pipeline-gstreamer")]
            SourceBackend::Gstreamer(source) => source.info,
        }
    }

    /// Next frame, or `None` once the source is exhausted.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "pipeline-gstreamer")]
            SourceBackend::Gstreamer(source) => source.next_frame(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            SourceBackend::Synthetic(_) => true,
            #[cfg(feature = "pipeline-gstreamer")]
            SourceBackend::Gstreamer(source) => source.is_healthy(),
        }
    }

    pub fn stats(&self) -> SourceStats {
        match &self.backend {
            SourceBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "pipeline-gstreamer")]
            SourceBackend::Gstreamer(source) => source.stats(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

struct SyntheticSource {
    config: SourceConfig,
    info: VideoInfo,
    frame_count: u64,
    /// Bumped every 50 frames to shift the scene brightness.
    scene_state: u8,
}

impl SyntheticSource {
    fn new(config: SourceConfig) -> Result<Self> {
        let info = VideoInfo::new(config.format, config.width, config.height)?;
        Ok(Self {
            config,
            info,
            frame_count: 0,
            scene_state: 0,
        })
    }

    fn connect(&mut self) -> Result<()> {
        log::info!(
            "FrameSource: connected to {} (synthetic {})",
            self.config.uri,
            self.info
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self
            .config
            .max_frames
            .is_some_and(|max| self.frame_count >= max)
        {
            return Ok(None);
        }
        if self.frame_count > 0 && self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let data = self.generate_pixels();
        let frame = Frame::new(data, self.info, self.frame_count)?;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let info = &self.info;
        let (w, h) = (info.width as usize, info.height as usize);
        let base = (self.scene_state as usize * 40 + self.frame_count as usize) % 256;
        let (x_span, y_span) = ((w - 1).max(1), (h - 1).max(1));
        let rgb_at = |x: usize, y: usize| {
            [
                ((x * 255 / x_span + base) % 256) as u8,
                (y * 255 / y_span) as u8,
                base as u8,
            ]
        };

        let mut data = vec![0u8; info.size()];
        if info.format == VideoFormat::I420 {
            for y in 0..h {
                for x in 0..w {
                    let [r, g, b] = rgb_at(x, y);
                    data[y * w + x] = luma(r, g, b);
                }
            }
            data[w * h..].fill(128);
            return data;
        }

        let bpp = info.format.bytes_per_pixel();
        for y in 0..h {
            let row = &mut data[y * info.stride..y * info.stride + info.row_bytes()];
            for (x, px) in row.chunks_exact_mut(bpp).enumerate() {
                let [r, g, b] = rgb_at(x, y);
                encode_pixel(info.format, px, r, g, b);
            }
        }
        data
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            uri: self.config.uri.clone(),
        }
    }
}

/// BT.601 limited-range luma.
fn luma(r: u8, g: u8, b: u8) -> u8 {
    let y = (66 * r as i32 + 129 * g as i32 + 25 * b as i32 + 128) >> 8;
    (y + 16).clamp(0, 255) as u8
}

fn encode_pixel(format: VideoFormat, px: &mut [u8], r: u8, g: u8, b: u8) {
    match format {
        VideoFormat::Rgb => px.copy_from_slice(&[r, g, b]),
        VideoFormat::Bgr => px.copy_from_slice(&[b, g, r]),
        VideoFormat::Bgrx | VideoFormat::Bgra => px.copy_from_slice(&[b, g, r, 255]),
        VideoFormat::Xrgb | VideoFormat::Argb => px.copy_from_slice(&[255, r, g, b]),
        VideoFormat::Rgb16 => {
            let value = ((r as u16 >> 3) << 11) | ((g as u16 >> 2) << 5) | (b as u16 >> 3);
            px.copy_from_slice(&value.to_le_bytes());
        }
        VideoFormat::Gray8 | VideoFormat::I420 => px[0] = luma(r, g, b),
    }
}

// ----------------------------------------------------------------------------
// GStreamer source
// ----------------------------------------------------------------------------

#[cfg(feature = "pipeline-gstreamer")]
struct GstreamerSource {
    config: SourceConfig,
    info: VideoInfo,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    last_error: Option<String>,
    eos: bool,
}

#[cfg(feature = "pipeline-gstreamer")]
impl GstreamerSource {
    /// `uridecodebin ! videoconvert ! videoscale ! <caps> ! appsink`, with the
    /// appsink forced to the configured format and size.
    fn new(config: SourceConfig) -> Result<Self> {
        use gstreamer::prelude::*;

        gstreamer::init().context("initialize gstreamer")?;
        let info = VideoInfo::new(config.format, config.width, config.height)?;

        let pipeline_description = format!(
            "uridecodebin uri={} ! videoconvert ! videoscale ! \
             video/x-raw,format={},width={},height={} ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            config.uri,
            config.format.name(),
            config.width,
            config.height
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build source pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("source pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        Ok(Self {
            config,
            info,
            pipeline,
            appsink,
            frame_count: 0,
            last_frame_at: None,
            connected_at: None,
            last_error: None,
            eos: false,
        })
    }

    fn connect(&mut self) -> Result<()> {
        use gstreamer::prelude::*;

        self.pipeline
            .set_state(gstreamer::State::Playing)
            .context("set source pipeline to Playing")?;
        self.connected_at = Some(Instant::now());
        log::info!("FrameSource: connected to {}", self.config.uri);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self
            .config
            .max_frames
            .is_some_and(|max| self.frame_count >= max)
        {
            return Ok(None);
        }
        self.poll_bus();
        if let Some(err) = &self.last_error {
            return Err(anyhow!("{}", err));
        }
        if self.eos || self.appsink.is_eos() {
            return Ok(None);
        }

        let timeout = self.frame_timeout();
        let Some(sample) = self.appsink.try_pull_sample(gstreamer::ClockTime::from_mseconds(
            timeout.as_millis() as u64,
        )) else {
            if self.appsink.is_eos() {
                return Ok(None);
            }
            return Err(anyhow!("source stalled"));
        };

        let frame = sample_to_frame(&sample, self.frame_count)?;
        self.info = *frame.info();
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(Some(frame))
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            uri: self.config.uri.clone(),
        }
    }

    fn frame_timeout(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            500
        } else {
            (1000 / self.config.target_fps).saturating_mul(4)
        };
        Duration::from_millis(base_ms.max(500) as u64)
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }

    fn poll_bus(&mut self) {
        use gstreamer::prelude::*;

        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    self.last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => self.eos = true,
                _ => {}
            }
        }
    }
}

#[cfg(feature = "pipeline-gstreamer")]
impl Drop for GstreamerSource {
    fn drop(&mut self) {
        use gstreamer::prelude::*;

        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("failed to stop source pipeline: {}", err);
        }
    }
}

#[cfg(feature = "pipeline-gstreamer")]
fn sample_to_frame(sample: &gstreamer::Sample, sequence: u64) -> Result<Frame> {
    let buffer = sample.buffer().context("sample missing buffer")?;
    let caps = sample.caps().context("sample missing caps")?;
    let gst_info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse sample caps as video info")?;

    let format = VideoFormat::from_name(gst_info.format().to_str())?;
    let mut info = VideoInfo::new(format, gst_info.width(), gst_info.height())?;
    if !format.is_planar() {
        info = info.with_stride(gst_info.stride()[0] as usize)?;
    }

    let map = buffer.map_readable().context("map sample buffer")?;
    let data = map
        .as_slice()
        .get(..info.size())
        .context("sample buffer is shorter than its caps")?;
    Frame::new(data.to_vec(), info, sequence)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config(format: VideoFormat, max_frames: Option<u64>) -> SourceConfig {
        SourceConfig {
            format,
            width: 64,
            height: 48,
            max_frames,
            ..SourceConfig::default()
        }
    }

    #[test]
    fn synthetic_source_produces_frames() -> Result<()> {
        let mut source = FrameSource::new(stub_config(VideoFormat::Bgrx, None))?;
        source.connect()?;

        let frame = source.next_frame()?.expect("frame");
        assert_eq!(frame.info().width, 64);
        assert_eq!(frame.info().height, 48);
        assert_eq!(frame.data().len(), 64 * 48 * 4);
        assert_eq!(frame.sequence(), 0);
        assert!(source.is_healthy());
        Ok(())
    }

    #[test]
    fn synthetic_frames_change_over_time() -> Result<()> {
        let mut source = FrameSource::new(stub_config(VideoFormat::Rgb, None))?;
        let first = source.next_frame()?.expect("frame");
        let second = source.next_frame()?.expect("frame");
        assert_ne!(first.data(), second.data());
        assert_eq!(second.sequence(), 1);
        Ok(())
    }

    #[test]
    fn synthetic_source_stops_at_max_frames() -> Result<()> {
        let mut source = FrameSource::new(stub_config(VideoFormat::I420, Some(3)))?;
        let mut count = 0;
        while source.next_frame()?.is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
        assert_eq!(source.stats().frames_captured, 3);
        Ok(())
    }

    #[cfg(not(feature = "pipeline-gstreamer"))]
    #[test]
    fn non_stub_uri_needs_gstreamer() {
        let config = SourceConfig {
            uri: "file:///tmp/video.mp4".into(),
            ..SourceConfig::default()
        };
        assert!(FrameSource::new(config).is_err());
    }
}
