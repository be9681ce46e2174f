//! Inference stage: decimate, infer, publish.
//!
//! Runs on the inference flow. For every frame the decimator decides whether
//! the network runs; when it does, the typed result is wrapped in an
//! [`Envelope`] and either attached to the frame for the overlay stage or
//! serialized into a text meta.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::decimate::FrameDecimator;
use crate::engine::{
    ClassifierPostProcessor, DetectorPostProcessor, InputImage, Layout, Network, RowDetector,
    Shape, TopKClassifier,
};
use crate::envelope::{Envelope, Payload, ResultKind};
use crate::error::FlowError;
use crate::frame::{Frame, VideoFormat, VideoInfo};
use crate::geometry::Rect;
use crate::text;

pub const DEFAULT_CLASSIFIER_TOP_COUNT: usize = 2;
pub const DEFAULT_CLASSIFIER_THRESHOLD: f32 = 11.0;
pub const DEFAULT_DETECTOR_TOP_COUNT: usize = 5;
pub const DEFAULT_DETECTOR_THRESHOLD: f32 = 0.5;

/// Where a result goes once produced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Attach the envelope to the frame for the overlay stage.
    #[default]
    Overlay,
    /// Attach the JSON text form to the frame.
    Json,
}

impl OutputMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputMode::Overlay => "overlay",
            OutputMode::Json => "json",
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overlay" => Ok(OutputMode::Overlay),
            "json" => Ok(OutputMode::Json),
            other => Err(anyhow!(
                "unknown output mode '{}' (expected overlay or json)",
                other
            )),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct InferSettings {
    pub model: Option<PathBuf>,
    pub mode: ResultKind,
    pub output: OutputMode,
    /// Falls back to the per-mode default.
    pub confidence_threshold: Option<f32>,
    /// Falls back to the per-mode default.
    pub num_inference: Option<usize>,
    /// Frames skipped between two inferences.
    pub frame_interval: u32,
}

impl InferSettings {
    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold.unwrap_or(match self.mode {
            ResultKind::Detector => DEFAULT_DETECTOR_THRESHOLD,
            _ => DEFAULT_CLASSIFIER_THRESHOLD,
        })
    }

    pub fn num_inference(&self) -> usize {
        self.num_inference.unwrap_or(match self.mode {
            ResultKind::Detector => DEFAULT_DETECTOR_TOP_COUNT,
            _ => DEFAULT_CLASSIFIER_TOP_COUNT,
        })
    }
}

/// What happened to a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowOutcome {
    /// Decimated; forwarded unannotated.
    Skipped,
    /// Network ran, nothing published (mode `none`).
    Inferred,
    /// Envelope attached as a result meta.
    Published(ResultKind),
    /// Result attached as a text meta.
    Serialized(ResultKind),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InferStats {
    pub frames: u64,
    pub skipped: u64,
    pub inferences: u64,
    pub published: u64,
}

pub struct InferenceStage {
    settings: InferSettings,
    network: Option<Box<dyn Network>>,
    classifier: Option<Box<dyn ClassifierPostProcessor>>,
    detector: Option<Box<dyn DetectorPostProcessor>>,
    decimator: FrameDecimator,
    caps: Option<VideoInfo>,
    started: bool,
    packed: Vec<u8>,
    stats: InferStats,
}

impl InferenceStage {
    pub fn new(settings: InferSettings, network: Box<dyn Network>) -> Self {
        let decimator = FrameDecimator::new(settings.frame_interval);
        Self {
            settings,
            network: Some(network),
            classifier: None,
            detector: None,
            decimator,
            caps: None,
            started: false,
            packed: Vec::new(),
            stats: InferStats::default(),
        }
    }

    /// Replace the default top-k classifier.
    pub fn with_classifier(mut self, classifier: Box<dyn ClassifierPostProcessor>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Replace the default row detector.
    pub fn with_detector(mut self, detector: Box<dyn DetectorPostProcessor>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn settings(&self) -> &InferSettings {
        &self.settings
    }

    pub fn start(&mut self) -> Result<()> {
        let model = self
            .settings
            .model
            .clone()
            .ok_or_else(|| anyhow!("model path is not set"))?;
        let network = self
            .network
            .as_mut()
            .ok_or_else(|| anyhow!("network was released by a previous stop"))?;
        network
            .load_model(&model)
            .with_context(|| format!("failed to load model {}", model.display()))?;

        let threshold = self.settings.confidence_threshold();
        let top_count = self.settings.num_inference();
        match self.settings.mode {
            ResultKind::Classifier if self.classifier.is_none() => {
                self.classifier = Some(Box::new(TopKClassifier::new(top_count)));
            }
            ResultKind::Detector if self.detector.is_none() => {
                self.detector = Some(Box::new(RowDetector::new(threshold, top_count)));
            }
            _ => {}
        }

        self.decimator = FrameDecimator::new(self.settings.frame_interval);
        self.started = true;
        log::info!(
            "inference stage started: network={} model={} mode={} output={} threshold={} top={} interval={}",
            network.name(),
            model.display(),
            self.settings.mode,
            self.settings.output,
            threshold,
            top_count,
            self.settings.frame_interval
        );
        Ok(())
    }

    /// Release the network and post-processors.
    pub fn stop(&mut self) {
        self.network = None;
        self.classifier = None;
        self.detector = None;
        self.packed = Vec::new();
        if self.started {
            log::info!(
                "inference stage stopped after {} frames ({} inferences)",
                self.stats.frames,
                self.stats.inferences
            );
        }
        self.started = false;
    }

    /// Accept the inference flow geometry. Only packed RGB is consumed.
    pub fn set_caps(&mut self, info: VideoInfo) -> Result<()> {
        if info.format != VideoFormat::Rgb {
            return Err(anyhow!(
                "inference flow must be RGB, got {}",
                info.format
            ));
        }
        log::debug!("inference caps: {} stride {}", info, info.stride);
        self.caps = Some(info);
        Ok(())
    }

    pub fn caps(&self) -> Option<&VideoInfo> {
        self.caps.as_ref()
    }

    pub fn set_frame_interval(&mut self, interval: u32) {
        self.settings.frame_interval = interval;
        if self.started {
            self.decimator.reconfigure(interval);
        } else {
            self.decimator = FrameDecimator::new(interval);
        }
    }

    pub fn stats(&self) -> InferStats {
        self.stats
    }

    pub fn process(&mut self, frame: &mut Frame) -> Result<FlowOutcome, FlowError> {
        let outcome = self.process_frame(frame);
        if let Err(err) = &outcome {
            log::error!("inference on frame {} failed: {}", frame.sequence(), err);
        }
        outcome
    }

    fn process_frame(&mut self, frame: &mut Frame) -> Result<FlowOutcome, FlowError> {
        if !self.started {
            return Err(FlowError::NotStarted);
        }
        self.stats.frames += 1;
        if !self.decimator.should_process() {
            self.stats.skipped += 1;
            return Ok(FlowOutcome::Skipped);
        }
        let caps = self.caps.ok_or(FlowError::NotNegotiated)?;
        let network = self.network.as_mut().ok_or(FlowError::NotStarted)?;

        let data = frame.data();
        if data.len() < caps.size() {
            return Err(FlowError::InvalidFrame(format!(
                "frame {} holds {} bytes, {} needs {}",
                frame.sequence(),
                data.len(),
                caps,
                caps.size()
            )));
        }
        let pixels: &[u8] = if caps.is_packed() {
            data
        } else {
            self.packed.clear();
            for row in data.chunks(caps.stride).take(caps.height as usize) {
                self.packed.extend_from_slice(&row[..caps.row_bytes()]);
            }
            &self.packed
        };

        let input = InputImage::new(pixels, Shape::rgb(caps.width, caps.height), Layout::Nhwc)
            .map_err(|err| FlowError::InvalidFrame(err.to_string()))?;
        let assigned = network.assign(&input, 0).map_err(FlowError::Inference)?;
        network.predict().map_err(FlowError::Inference)?;
        self.stats.inferences += 1;
        log::debug!(
            "frame {}: inference on region {:?}",
            frame.sequence(),
            assigned
        );

        let outputs = network.outputs();
        let region = Rect::full(caps.width, caps.height);
        let payload = match self.settings.mode {
            ResultKind::None => return Ok(FlowOutcome::Inferred),
            ResultKind::Classifier => {
                let classifier = self.classifier.as_ref().ok_or(FlowError::NotStarted)?;
                Payload::from(classifier.process(outputs).map_err(FlowError::PostProcess)?)
            }
            ResultKind::Detector => {
                let detector = self.detector.as_ref().ok_or(FlowError::NotStarted)?;
                Payload::from(
                    detector
                        .process(outputs, region)
                        .map_err(FlowError::PostProcess)?,
                )
            }
        };

        let envelope = Envelope::new(
            payload,
            caps.width,
            caps.height,
            self.settings.confidence_threshold(),
        );
        let kind = envelope.kind();
        self.stats.published += 1;
        match self.settings.output {
            OutputMode::Overlay => {
                if frame.attach_result(envelope).is_some() {
                    log::debug!("frame {}: replaced an existing result", frame.sequence());
                }
                Ok(FlowOutcome::Published(kind))
            }
            OutputMode::Json => {
                let meta = text::encode(envelope).map_err(FlowError::PostProcess)?;
                frame.attach_text(meta);
                Ok(FlowOutcome::Serialized(kind))
            }
        }
    }
}

impl Drop for InferenceStage {
    fn drop(&mut self) {
        self.stop();
    }
}
