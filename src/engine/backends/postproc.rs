//! Reference post-processors.

use std::cmp::Ordering;

use anyhow::{anyhow, Result};

use crate::engine::{ClassifierPostProcessor, DetectorPostProcessor, Tensor};
use crate::envelope::{
    Classification, ClassifierResult, Detection, DetectorResult, Landmark, POSE_LANDMARKS,
};
use crate::geometry::{BoundingBox, Rect};

/// `[x, y, w, h, score, class]`
pub const ROW_WIDTH: usize = 6;

/// A detection row followed by `17 x [x, y, visibility]`.
pub const ROW_WIDTH_WITH_POSE: usize = ROW_WIDTH + 3 * POSE_LANDMARKS;

fn by_confidence_desc(a: f32, b: f32) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Keeps the `top_count` highest scores of the first output tensor.
#[derive(Clone, Debug)]
pub struct TopKClassifier {
    top_count: usize,
}

impl TopKClassifier {
    pub fn new(top_count: usize) -> Self {
        Self { top_count }
    }
}

impl ClassifierPostProcessor for TopKClassifier {
    fn process(&self, outputs: &[Tensor]) -> Result<ClassifierResult> {
        let scores = outputs
            .first()
            .ok_or_else(|| anyhow!("classifier needs one output tensor, got none"))?
            .data();

        let mut items: Vec<Classification> = scores
            .iter()
            .enumerate()
            .filter(|(_, score)| score.is_finite())
            .map(|(index, &confidence)| Classification {
                class_index: index as u32,
                confidence,
            })
            .collect();
        // Stable sort keeps the lower class index first on ties.
        items.sort_by(|a, b| by_confidence_desc(a.confidence, b.confidence));
        items.truncate(self.top_count);
        Ok(ClassifierResult { items })
    }
}

/// Decodes rows of normalized detections from the first output tensor.
///
/// Coordinates are fractions of the assigned region. Rows of
/// [`ROW_WIDTH_WITH_POSE`] values carry a landmark block; a block whose
/// visibilities are all zero means the row has no pose.
#[derive(Clone, Debug)]
pub struct RowDetector {
    threshold: f32,
    top_count: usize,
}

impl RowDetector {
    pub fn new(threshold: f32, top_count: usize) -> Self {
        Self {
            threshold,
            top_count,
        }
    }

    fn decode(&self, row: &[f32], region: Rect) -> Option<Detection> {
        let confidence = row[4];
        if !confidence.is_finite() || confidence < self.threshold {
            return None;
        }
        let (rx, ry) = (region.x as f32, region.y as f32);
        let (rw, rh) = (region.width as f32, region.height as f32);

        let landmarks = match row.get(ROW_WIDTH..) {
            Some(block) if block.len() == 3 * POSE_LANDMARKS => {
                if block.chunks_exact(3).all(|l| l[2] == 0.0) {
                    Vec::new()
                } else {
                    block
                        .chunks_exact(3)
                        .map(|l| Landmark {
                            x: rx + l[0] * rw,
                            y: ry + l[1] * rh,
                            z: 0.0,
                            visibility: l[2],
                        })
                        .collect()
                }
            }
            _ => Vec::new(),
        };

        Some(Detection {
            class_index: row[5].max(0.0) as u32,
            confidence,
            bounding_box: BoundingBox::new(
                rx + row[0] * rw,
                ry + row[1] * rh,
                row[2] * rw,
                row[3] * rh,
            ),
            landmarks,
        })
    }
}

impl DetectorPostProcessor for RowDetector {
    fn process(&self, outputs: &[Tensor], region: Rect) -> Result<DetectorResult> {
        let tensor = outputs
            .first()
            .ok_or_else(|| anyhow!("detector needs one output tensor, got none"))?;
        let width = tensor.row_width();
        if width != ROW_WIDTH && width != ROW_WIDTH_WITH_POSE {
            return Err(anyhow!(
                "detector rows must hold {} or {} values, got {}",
                ROW_WIDTH,
                ROW_WIDTH_WITH_POSE,
                width
            ));
        }
        if region.is_empty() {
            return Err(anyhow!("detector region {:?} is empty", region));
        }

        let mut items: Vec<Detection> = tensor
            .rows()
            .filter_map(|row| self.decode(row, region))
            .collect();
        items.sort_by(|a, b| by_confidence_desc(a.confidence, b.confidence));
        items.truncate(self.top_count);
        Ok(DetectorResult { items })
    }
}
