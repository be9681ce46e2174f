//! JSON form of a result, for the `json` output mode.
//!
//! ```json
//! {"postproc_mode":"detector","model_width":640,"model_height":480,
//!  "confidence_threshold":0.5,
//!  "items":[{"class_index":1,"confidence":0.9,
//!            "bounding_box":{"origin":{"x":10.0,"y":20.0},"size":{"x":30.0,"y":40.0}}}]}
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::envelope::{
    Classification, ClassifierResult, Detection, DetectorResult, Envelope, Landmark, Payload,
    ResultKind,
};
use crate::frame::TextMeta;
use crate::geometry::BoundingBox;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextItem {
    pub class_index: u32,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub landmarks: Vec<Landmark>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextResult {
    pub postproc_mode: ResultKind,
    pub model_width: u32,
    pub model_height: u32,
    pub confidence_threshold: f32,
    #[serde(default)]
    pub items: Vec<TextItem>,
}

impl TextResult {
    pub fn from_envelope(envelope: &Envelope) -> Self {
        let items = match envelope.payload() {
            Payload::Classifier(result) => result
                .items
                .iter()
                .map(|item| TextItem {
                    class_index: item.class_index,
                    confidence: item.confidence,
                    bounding_box: None,
                    landmarks: Vec::new(),
                })
                .collect(),
            Payload::Detector(result) => result
                .items
                .iter()
                .map(|item| TextItem {
                    class_index: item.class_index,
                    confidence: item.confidence,
                    bounding_box: Some(item.bounding_box),
                    landmarks: item.landmarks.clone(),
                })
                .collect(),
        };
        let (model_width, model_height) = envelope.model_size();
        Self {
            postproc_mode: envelope.kind(),
            model_width,
            model_height,
            confidence_threshold: envelope.confidence_threshold(),
            items,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize inference result")
    }

    /// Parse the `result` field of a text meta.
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("failed to parse inference result")
    }

    /// Rebuild an envelope. Returns `None` for mode `none`.
    pub fn into_envelope(self) -> Option<Envelope> {
        let payload = match self.postproc_mode {
            ResultKind::None => return None,
            ResultKind::Classifier => Payload::Classifier(ClassifierResult {
                items: self
                    .items
                    .into_iter()
                    .map(|item| Classification {
                        class_index: item.class_index,
                        confidence: item.confidence,
                    })
                    .collect(),
            }),
            ResultKind::Detector => Payload::Detector(DetectorResult {
                items: self
                    .items
                    .into_iter()
                    .map(|item| Detection {
                        class_index: item.class_index,
                        confidence: item.confidence,
                        bounding_box: item.bounding_box.unwrap_or_default(),
                        landmarks: item.landmarks,
                    })
                    .collect(),
            }),
        };
        Some(Envelope::new(
            payload,
            self.model_width,
            self.model_height,
            self.confidence_threshold,
        ))
    }
}

/// Serialize and consume an envelope.
pub fn encode(envelope: Envelope) -> Result<TextMeta> {
    let json = TextResult::from_envelope(&envelope).to_json()?;
    Ok(TextMeta::new(json))
}
