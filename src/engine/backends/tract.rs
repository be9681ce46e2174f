use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::engine::{InputImage, Layout, Network, Tensor};
use crate::geometry::Rect;

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>>;

/// ONNX network run on the CPU with tract.
///
/// The model takes one `[1, 3, height, width]` f32 input scaled to `0..1`.
/// Frames must already be at the model input size.
pub struct TractNetwork {
    width: u32,
    height: u32,
    plan: Option<Plan>,
    input: Option<tract_onnx::prelude::Tensor>,
    outputs: Vec<Tensor>,
}

impl TractNetwork {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            plan: None,
            input: None,
            outputs: Vec::new(),
        }
    }

    fn build_input(&self, input: &InputImage<'_>) -> Result<tract_onnx::prelude::Tensor> {
        let shape = input.shape();
        if shape.width != self.width as usize || shape.height != self.height as usize {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                shape.width,
                shape.height,
                self.width,
                self.height
            ));
        }
        if shape.channels != 3 || input.layout() != Layout::Nhwc {
            return Err(anyhow!("expected NHWC RGB input, got {}", shape));
        }

        let pixels = input.data();
        let width = shape.width;
        let tensor = tract_ndarray::Array4::from_shape_fn(
            (1, 3, shape.height, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );
        Ok(tensor.into_tensor())
    }
}

impl Network for TractNetwork {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn load_model(&mut self, path: &Path) -> Result<()> {
        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("failed to load ONNX model from {}", path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, self.height as usize, self.width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        self.plan = Some(plan);
        Ok(())
    }

    fn assign(&mut self, input: &InputImage<'_>, index: usize) -> Result<Rect> {
        if index != 0 {
            return Err(anyhow!("model has a single input, got index {}", index));
        }
        self.input = Some(self.build_input(input)?);
        Ok(Rect::full(self.width, self.height))
    }

    fn predict(&mut self) -> Result<()> {
        let plan = self.plan.as_ref().ok_or_else(|| anyhow!("no model loaded"))?;
        let input = self.input.take().ok_or_else(|| anyhow!("no input assigned"))?;
        let outputs = plan
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.outputs = outputs
            .iter()
            .map(|output| {
                let view = output
                    .to_array_view::<f32>()
                    .context("model output tensor was not f32")?;
                Tensor::new(view.shape().to_vec(), view.iter().copied().collect())
            })
            .collect::<Result<_>>()?;
        Ok(())
    }

    fn outputs(&self) -> &[Tensor] {
        &self.outputs
    }
}
