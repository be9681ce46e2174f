//! Result envelope: one inference result plus the geometry needed to draw it.
//!
//! The payload is a sum type, so the result kind is read off the variant and
//! can never disagree with what is stored. Dropping an `Envelope` releases the
//! payload through the variant's own destructor.
//!
//! The kind is not a settable field:
//!
//! ```compile_fail
//! use infer_overlay::{ClassifierResult, Envelope, ResultKind};
//!
//! let mut envelope = Envelope::new(ClassifierResult::default(), 224, 224, 11.0);
//! envelope.kind = ResultKind::Detector;
//! ```
//!
//! and an envelope is moved, never duplicated:
//!
//! ```compile_fail
//! use infer_overlay::{ClassifierResult, Envelope};
//!
//! let envelope = Envelope::new(ClassifierResult::default(), 224, 224, 11.0);
//! let copy = envelope.clone();
//! ```

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::geometry::BoundingBox;

/// Number of landmarks in the supported pose topology.
pub const POSE_LANDMARKS: usize = 17;

/// Post-processing mode, and the kind of result it produces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    #[default]
    None,
    Classifier,
    Detector,
}

impl ResultKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultKind::None => "none",
            ResultKind::Classifier => "classifier",
            ResultKind::Detector => "detector",
        }
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(ResultKind::None),
            "classifier" => Ok(ResultKind::Classifier),
            "detector" => Ok(ResultKind::Detector),
            other => Err(anyhow!(
                "unknown post-processing mode '{}' (expected none, classifier or detector)",
                other
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub class_index: u32,
    pub confidence: f32,
}

/// Classifier output, highest confidence first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifierResult {
    pub items: Vec<Classification>,
}

impl ClassifierResult {
    pub fn top(&self) -> Option<&Classification> {
        self.items.first()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
    pub visibility: f32,
}

/// How a detection is drawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionShape {
    /// Labelled bounding box.
    Box,
    /// Skeleton over [`POSE_LANDMARKS`] landmarks.
    Pose,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_index: u32,
    pub confidence: f32,
    pub bounding_box: BoundingBox,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub landmarks: Vec<Landmark>,
}

impl Detection {
    /// Shape is decided by landmark count: exactly 17 landmarks is a pose,
    /// anything else is a box. A detector emitting some other 17-point
    /// topology would be drawn with the human skeleton.
    pub fn shape(&self) -> DetectionShape {
        if self.landmarks.len() == POSE_LANDMARKS {
            DetectionShape::Pose
        } else {
            DetectionShape::Box
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectorResult {
    pub items: Vec<Detection>,
}

/// The typed result carried by an [`Envelope`].
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Classifier(ClassifierResult),
    Detector(DetectorResult),
}

impl Payload {
    pub fn kind(&self) -> ResultKind {
        match self {
            Payload::Classifier(_) => ResultKind::Classifier,
            Payload::Detector(_) => ResultKind::Detector,
        }
    }
}

impl From<ClassifierResult> for Payload {
    fn from(result: ClassifierResult) -> Self {
        Payload::Classifier(result)
    }
}

impl From<DetectorResult> for Payload {
    fn from(result: DetectorResult) -> Self {
        Payload::Detector(result)
    }
}

/// Owned inference result handed from the inference flow to the overlay flow.
#[derive(Debug)]
pub struct Envelope {
    payload: Payload,
    model_width: u32,
    model_height: u32,
    confidence_threshold: f32,
}

impl Envelope {
    pub fn new(
        payload: impl Into<Payload>,
        model_width: u32,
        model_height: u32,
        confidence_threshold: f32,
    ) -> Self {
        Self {
            payload: payload.into(),
            model_width,
            model_height,
            confidence_threshold,
        }
    }

    pub fn kind(&self) -> ResultKind {
        self.payload.kind()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Inference input size the payload coordinates refer to.
    pub fn model_size(&self) -> (u32, u32) {
        (self.model_width, self.model_height)
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn landmarks(count: usize) -> Vec<Landmark> {
        vec![
            Landmark {
                x: 1.0,
                y: 1.0,
                z: 0.0,
                visibility: 1.0,
            };
            count
        ]
    }

    #[test]
    fn kind_follows_payload_variant() {
        let classifier = Envelope::new(ClassifierResult::default(), 224, 224, 11.0);
        assert_eq!(classifier.kind(), ResultKind::Classifier);
        assert!(matches!(classifier.payload(), Payload::Classifier(_)));

        let detector = Envelope::new(DetectorResult::default(), 640, 480, 0.5);
        assert_eq!(detector.kind(), ResultKind::Detector);
        assert_eq!(detector.model_size(), (640, 480));
        assert_eq!(detector.confidence_threshold(), 0.5);
    }

    #[test]
    fn shape_is_pose_only_for_seventeen_landmarks() {
        let mut detection = Detection::default();
        assert_eq!(detection.shape(), DetectionShape::Box);

        detection.landmarks = landmarks(16);
        assert_eq!(detection.shape(), DetectionShape::Box);

        detection.landmarks = landmarks(POSE_LANDMARKS);
        assert_eq!(detection.shape(), DetectionShape::Pose);

        detection.landmarks = landmarks(18);
        assert_eq!(detection.shape(), DetectionShape::Box);
    }

    #[test]
    fn mode_strings_parse() {
        assert_eq!("classifier".parse::<ResultKind>().unwrap(), ResultKind::Classifier);
        assert_eq!(" Detector ".parse::<ResultKind>().unwrap(), ResultKind::Detector);
        assert_eq!("".parse::<ResultKind>().unwrap(), ResultKind::None);
        assert!("segmenter".parse::<ResultKind>().is_err());
    }

    #[test]
    fn top_is_first_item() {
        let result = ClassifierResult {
            items: vec![
                Classification {
                    class_index: 7,
                    confidence: 14.0,
                },
                Classification {
                    class_index: 2,
                    confidence: 9.0,
                },
            ],
        };
        assert_eq!(result.top().map(|c| c.class_index), Some(7));
        assert!(ClassifierResult::default().top().is_none());
    }
}
