use std::path::Path;

use anyhow::{anyhow, Result};

use crate::engine::{InputImage, Layout, Network, Tensor};
use crate::envelope::POSE_LANDMARKS;
use crate::geometry::Rect;

use super::postproc::ROW_WIDTH_WITH_POSE;

const SCHEME: &str = "stub://";
const CLASSES: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StubModel {
    Classifier,
    Detector,
}

/// Deterministic network for tests and demos.
///
/// Loads `stub://classifier` or `stub://detector`. Scores are derived from the
/// mean intensity of the assigned image, so identical frames give identical
/// results.
///
/// - classifier: one `[1, 10]` tensor of raw scores peaking at
///   `mean * 10 / 256`.
/// - detector: one `[2, 57]` tensor of normalized rows, a plain box followed
///   by a pose whose last landmark is hidden.
#[derive(Debug, Default)]
pub struct StubNetwork {
    model: Option<StubModel>,
    assigned: Option<(Rect, f32)>,
    outputs: Vec<Tensor>,
}

impl StubNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn classifier_scores(mean: f32) -> Result<Tensor> {
        let top = ((mean as usize) * CLASSES / 256).min(CLASSES - 1);
        let scores = (0..CLASSES)
            .map(|i| 16.0 - 2.5 * (i as f32 - top as f32).abs())
            .collect();
        Tensor::new(vec![1, CLASSES], scores)
    }

    fn detector_rows(mean: f32) -> Result<Tensor> {
        let mut rows = Vec::with_capacity(2 * ROW_WIDTH_WITH_POSE);

        // Plain box, zeroed landmark block.
        rows.extend_from_slice(&[0.1, 0.1, 0.4, 0.3, 0.6 + mean / 1024.0, 2.0]);
        rows.extend(std::iter::repeat(0.0).take(3 * POSE_LANDMARKS));

        rows.extend_from_slice(&[0.5, 0.2, 0.3, 0.7, 0.9, 0.0]);
        for i in 0..POSE_LANDMARKS {
            let side = if i % 2 == 0 { 0.55 } else { 0.75 };
            let x = if i == 0 { 0.65 } else { side };
            let y = 0.22 + 0.04 * i as f32;
            let visibility = if i == POSE_LANDMARKS - 1 { 0.1 } else { 0.9 };
            rows.extend_from_slice(&[x, y, visibility]);
        }

        Tensor::new(vec![2, ROW_WIDTH_WITH_POSE], rows)
    }
}

impl Network for StubNetwork {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn load_model(&mut self, path: &Path) -> Result<()> {
        let path = path.to_string_lossy();
        let model = match path.strip_prefix(SCHEME) {
            Some("classifier") => StubModel::Classifier,
            Some("detector") => StubModel::Detector,
            _ => {
                return Err(anyhow!(
                    "stub network cannot load '{}' (expected {}classifier or {}detector)",
                    path,
                    SCHEME,
                    SCHEME
                ))
            }
        };
        self.model = Some(model);
        self.assigned = None;
        self.outputs.clear();
        Ok(())
    }

    fn assign(&mut self, input: &InputImage<'_>, index: usize) -> Result<Rect> {
        if self.model.is_none() {
            return Err(anyhow!("no model loaded"));
        }
        if index != 0 {
            return Err(anyhow!("stub network has a single input, got index {}", index));
        }
        let shape = input.shape();
        if input.layout() != Layout::Nhwc || shape.channels != 3 {
            return Err(anyhow!("stub network expects NHWC RGB input, got {}", shape));
        }

        let sum: u64 = input.data().iter().map(|&b| b as u64).sum();
        let mean = sum as f32 / input.data().len() as f32;
        let region = Rect::full(shape.width as u32, shape.height as u32);
        self.assigned = Some((region, mean));
        Ok(region)
    }

    fn predict(&mut self) -> Result<()> {
        let (model, (_, mean)) = match (self.model, self.assigned) {
            (Some(model), Some(assigned)) => (model, assigned),
            (None, _) => return Err(anyhow!("no model loaded")),
            (_, None) => return Err(anyhow!("no input assigned")),
        };
        let output = match model {
            StubModel::Classifier => Self::classifier_scores(mean)?,
            StubModel::Detector => Self::detector_rows(mean)?,
        };
        self.outputs = vec![output];
        Ok(())
    }

    fn outputs(&self) -> &[Tensor] {
        &self.outputs
    }
}
