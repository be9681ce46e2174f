//! Overlay stage: keep the latest result, draw it on every display frame.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::envelope::Envelope;
use crate::error::FlowError;
use crate::frame::{Frame, VideoInfo};
use crate::labels::LabelInfo;
use crate::mailbox::Mailbox;
use crate::render::{self, FrameSurface, RenderOutcome, SurfaceFormat};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OverlaySettings {
    /// Label file; without it no text is drawn.
    pub labels: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OverlayStats {
    pub frames: u64,
    pub drawn: u64,
    pub empty: u64,
    pub unsupported: u64,
}

/// Receiving end of the inference flow. Cheap to clone and safe to move to
/// the thread that drives inference.
#[derive(Clone, Debug)]
pub struct InferenceSink {
    mailbox: Arc<Mailbox>,
}

impl InferenceSink {
    /// Move the result meta of `frame`, if any, into the mailbox. The frame is
    /// consumed. Returns whether something was published.
    pub fn receive(&self, mut frame: Frame) -> Result<bool, FlowError> {
        match frame.take_result() {
            Some(envelope) => {
                self.mailbox.publish(envelope)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn publish(&self, envelope: Envelope) -> Result<(), FlowError> {
        self.mailbox.publish(envelope)
    }
}

pub struct OverlayStage {
    settings: OverlaySettings,
    labels: Option<LabelInfo>,
    mailbox: Arc<Mailbox>,
    started: bool,
    stats: OverlayStats,
}

impl OverlayStage {
    pub fn new(settings: OverlaySettings) -> Self {
        Self {
            settings,
            labels: None,
            mailbox: Arc::new(Mailbox::new()),
            started: false,
            stats: OverlayStats::default(),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        self.labels = match &self.settings.labels {
            Some(path) => Some(
                LabelInfo::init(path)
                    .with_context(|| format!("overlay cannot load labels {}", path.display()))?,
            ),
            None => None,
        };
        self.mailbox.clear()?;
        self.started = true;
        log::info!(
            "overlay stage started: labels={}",
            self.labels
                .as_ref()
                .map_or_else(|| "none".to_string(), |l| format!("{} entries", l.len()))
        );
        Ok(())
    }

    /// Drop any resident result and the label table.
    pub fn stop(&mut self) -> Result<()> {
        let cleared = self.mailbox.clear()?;
        self.labels = None;
        if self.started {
            log::info!(
                "overlay stage stopped after {} frames ({} drawn, resident result dropped: {})",
                self.stats.frames,
                self.stats.drawn,
                cleared
            );
        }
        self.started = false;
        Ok(())
    }

    /// Accept the display flow geometry. Formats without a drawing surface are
    /// accepted, but frames of that format pass through untouched.
    pub fn set_caps(&mut self, info: VideoInfo) -> Result<()> {
        if let Err(err) = SurfaceFormat::for_video(info.format) {
            log::warn!("overlay disabled on display flow: {}", err);
        }
        self.mailbox.set_display(info)?;
        log::debug!("overlay caps: {} stride {}", info, info.stride);
        Ok(())
    }

    pub fn inference_sink(&self) -> InferenceSink {
        InferenceSink {
            mailbox: self.mailbox.clone(),
        }
    }

    pub fn receive_inference(&self, frame: Frame) -> Result<bool, FlowError> {
        self.inference_sink().receive(frame)
    }

    pub fn publish(&self, envelope: Envelope) -> Result<(), FlowError> {
        self.mailbox.publish(envelope)
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn labels(&self) -> Option<&LabelInfo> {
        self.labels.as_ref()
    }

    pub fn stats(&self) -> OverlayStats {
        self.stats
    }

    pub fn transform(&mut self, frame: &mut Frame) -> Result<RenderOutcome, FlowError> {
        self.transform_in_place(frame.data_mut())
    }

    /// Draw the latest result on a mapped display frame laid out as the
    /// negotiated caps describe.
    pub fn transform_in_place(&mut self, data: &mut [u8]) -> Result<RenderOutcome, FlowError> {
        if !self.started {
            return Err(FlowError::NotStarted);
        }
        self.stats.frames += 1;

        let snapshot = self.mailbox.snapshot()?;
        if snapshot.envelope().is_none() {
            self.stats.empty += 1;
            return Ok(RenderOutcome::Empty);
        }
        let display = snapshot.display().ok_or(FlowError::NotNegotiated)?;
        let mut surface = match FrameSurface::new(data, display) {
            Ok(surface) => surface,
            Err(err) => {
                if matches!(err, FlowError::UnsupportedFormat(_)) {
                    self.stats.unsupported += 1;
                }
                return Err(err);
            }
        };
        let outcome = render::render_snapshot(&snapshot, self.labels.as_ref(), &mut surface);
        self.stats.drawn += 1;
        Ok(outcome)
    }
}

impl Drop for OverlayStage {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::error!("overlay stage teardown failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Classification, ClassifierResult, Detection, DetectorResult};
    use crate::frame::VideoFormat;
    use crate::geometry::BoundingBox;
    use std::io::Write;

    fn detector(x: f32) -> Envelope {
        Envelope::new(
            DetectorResult {
                items: vec![Detection {
                    class_index: 0,
                    confidence: 0.9,
                    bounding_box: BoundingBox::new(x, 2.0, 4.0, 4.0),
                    landmarks: Vec::new(),
                }],
            },
            16,
            16,
            0.5,
        )
    }

    fn started(format: VideoFormat) -> OverlayStage {
        let mut stage = OverlayStage::new(OverlaySettings::default());
        stage.start().unwrap();
        stage
            .set_caps(VideoInfo::new(format, 32, 32).unwrap())
            .unwrap();
        stage
    }

    fn display_frame(format: VideoFormat) -> Frame {
        Frame::filled(VideoInfo::new(format, 32, 32).unwrap(), 0, 0)
    }

    #[test]
    fn empty_mailbox_leaves_frame_untouched() {
        let mut stage = started(VideoFormat::Bgrx);
        let mut frame = display_frame(VideoFormat::Bgrx);
        assert_eq!(stage.transform(&mut frame).unwrap(), RenderOutcome::Empty);
        assert!(frame.data().iter().all(|&b| b == 0));
        assert_eq!(stage.stats().empty, 1);
    }

    #[test]
    fn latest_result_is_drawn_on_every_frame() {
        let mut stage = started(VideoFormat::Bgra);
        stage.publish(detector(2.0)).unwrap();
        stage.publish(detector(8.0)).unwrap();

        for _ in 0..3 {
            let mut frame = display_frame(VideoFormat::Bgra);
            let outcome = stage.transform(&mut frame).unwrap();
            let RenderOutcome::Drawn(stats) = outcome else {
                panic!("expected a drawn frame");
            };
            assert_eq!(stats.boxes, 1);
            // Left edge of the latest box sits at x = 16 after the 2x rescale.
            let at = |x: usize, y: usize| frame.data()[(y * 32 + x) * 4 + 2];
            assert_eq!(at(16, 8), 255);
            assert_eq!(at(4, 8), 0);
        }
        assert_eq!(stage.mailbox().publications(), 2);
        assert_eq!(stage.stats().drawn, 3);
    }

    #[test]
    fn unsupported_format_fails_closed() {
        let mut stage = started(VideoFormat::I420);
        stage.publish(detector(2.0)).unwrap();
        let mut frame = display_frame(VideoFormat::I420);
        let err = stage.transform(&mut frame).unwrap_err();
        assert!(matches!(err, FlowError::UnsupportedFormat(VideoFormat::I420)));
        assert!(!err.is_fatal());
        assert!(frame.data().iter().all(|&b| b == 0));
        assert_eq!(stage.stats().unsupported, 1);
    }

    #[test]
    fn sink_moves_result_meta_into_mailbox() {
        let stage = started(VideoFormat::Bgrx);
        let sink = stage.inference_sink();

        let mut frame = Frame::filled(VideoInfo::new(VideoFormat::Rgb, 4, 4).unwrap(), 0, 0);
        assert!(!sink.receive(frame).unwrap());

        frame = Frame::filled(VideoInfo::new(VideoFormat::Rgb, 4, 4).unwrap(), 1, 0);
        frame.attach_result(detector(1.0));
        assert!(stage.receive_inference(frame).unwrap());
        assert!(!stage.mailbox().is_empty().unwrap());
    }

    #[test]
    fn classifier_label_needs_label_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "background\nperson").unwrap();

        let mut stage = OverlayStage::new(OverlaySettings {
            labels: Some(file.path().to_path_buf()),
        });
        stage.start().unwrap();
        assert_eq!(stage.labels().map(LabelInfo::len), Some(2));
        stage
            .set_caps(VideoInfo::new(VideoFormat::Bgrx, 64, 64).unwrap())
            .unwrap();
        stage
            .publish(Envelope::new(
                ClassifierResult {
                    items: vec![Classification {
                        class_index: 1,
                        confidence: 12.0,
                    }],
                },
                224,
                224,
                11.0,
            ))
            .unwrap();
        let mut frame = Frame::filled(VideoInfo::new(VideoFormat::Bgrx, 64, 64).unwrap(), 0, 0);
        let RenderOutcome::Drawn(stats) = stage.transform(&mut frame).unwrap() else {
            panic!("expected a drawn frame");
        };
        assert_eq!(stats.texts, 1);
        assert!(frame.data().iter().any(|&b| b == 255));
    }

    #[test]
    fn missing_label_file_refuses_start() {
        let mut stage = OverlayStage::new(OverlaySettings {
            labels: Some(PathBuf::from("/nonexistent/labels.txt")),
        });
        assert!(stage.start().is_err());
    }

    #[test]
    fn stop_drops_resident_result() {
        let mut stage = started(VideoFormat::Bgrx);
        stage.publish(detector(2.0)).unwrap();
        stage.publish(detector(3.0)).unwrap();
        stage.stop().unwrap();
        assert!(stage.mailbox().is_empty().unwrap());
        assert_eq!(stage.mailbox().disposals(), 2);
        assert!(matches!(
            stage.transform(&mut display_frame(VideoFormat::Bgrx)),
            Err(FlowError::NotStarted)
        ));
    }
}
