//! Inference overlay for live video.
//!
//! Two flows leave a tee: the display flow at full rate and the inference
//! flow, decimated, at model resolution. The inference stage runs a network on
//! every N-th frame and publishes a typed result; the overlay stage keeps only
//! the latest result and draws it on every display frame.
//!
//! # Module Structure
//!
//! - `decimate`: frame-interval countdown
//! - `envelope`: tagged classifier/detector result
//! - `engine`: network and post-processing traits plus reference backends
//! - `infer`: inference stage
//! - `mailbox`: single-slot latest-wins handoff
//! - `render`: labels, boxes and pose skeletons onto a drawing surface
//! - `overlay`: overlay stage
//! - `tee`, `source`, `pipeline`: in-process driver for both flows
//! - `text`: JSON form of a result

pub mod config;
pub mod decimate;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod infer;
pub mod labels;
pub mod mailbox;
pub mod overlay;
pub mod pipeline;
pub mod render;
pub mod source;
pub mod tee;
pub mod text;

pub use config::AnnotatorConfig;
pub use decimate::FrameDecimator;
pub use envelope::{
    Classification, ClassifierResult, Detection, DetectionShape, DetectorResult, Envelope,
    Landmark, Payload, ResultKind, POSE_LANDMARKS,
};
pub use error::FlowError;
pub use frame::{Frame, TextMeta, VideoFormat, VideoInfo};
pub use geometry::{BoundingBox, Point, Rect};
pub use infer::{FlowOutcome, InferSettings, InferStats, InferenceStage, OutputMode};
pub use labels::LabelInfo;
pub use mailbox::{Mailbox, Snapshot};
pub use overlay::{InferenceSink, OverlaySettings, OverlayStage, OverlayStats};
pub use pipeline::{AnnotationPipeline, PipelineReport, StepReport};
pub use render::RenderOutcome;
pub use source::{FrameSource, SourceConfig};
pub use tee::FrameTee;
pub use text::TextResult;
