//! Inference engine seams.
//!
//! The stages only talk to the engine through these traits: a [`Network`]
//! that loads a model and produces output tensors, and a post-processor that
//! turns those tensors into a typed result.

mod backends;

use std::fmt;
use std::path::Path;

use anyhow::{anyhow, Result};

use crate::envelope::{ClassifierResult, DetectorResult};
use crate::geometry::Rect;

pub use backends::{RowDetector, StubNetwork, TopKClassifier, ROW_WIDTH, ROW_WIDTH_WITH_POSE};

#[cfg(feature = "backend-tract")]
pub use backends::TractNetwork;

/// Memory layout of an image tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    /// Interleaved channels, `[batch, height, width, channels]`.
    Nhwc,
    /// Planar channels, `[batch, channels, height, width]`.
    Nchw,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shape {
    pub batch: usize,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl Shape {
    /// Single RGB image.
    pub fn rgb(width: u32, height: u32) -> Self {
        Self {
            batch: 1,
            height: height as usize,
            width: width as usize,
            channels: 3,
        }
    }

    pub fn len(&self) -> usize {
        self.batch * self.height * self.width * self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{}x{}",
            self.batch, self.height, self.width, self.channels
        )
    }
}

/// Borrowed image handed to [`Network::assign`].
#[derive(Clone, Copy, Debug)]
pub struct InputImage<'a> {
    data: &'a [u8],
    shape: Shape,
    layout: Layout,
}

impl<'a> InputImage<'a> {
    pub fn new(data: &'a [u8], shape: Shape, layout: Layout) -> Result<Self> {
        if shape.is_empty() {
            return Err(anyhow!("input shape {} is empty", shape));
        }
        if data.len() < shape.len() {
            return Err(anyhow!(
                "input of shape {} needs {} bytes, got {}",
                shape,
                shape.len(),
                data.len()
            ));
        }
        Ok(Self {
            data: &data[..shape.len()],
            shape,
            layout,
        })
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }
}

/// Dense f32 output tensor.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(anyhow!(
                "tensor shape {:?} holds {} values, got {}",
                shape,
                expected,
                data.len()
            ));
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Size of the innermost dimension.
    pub fn row_width(&self) -> usize {
        self.shape.last().copied().unwrap_or(0)
    }

    /// Iterate over innermost rows.
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        let width = self.row_width().max(1);
        self.data.chunks_exact(width)
    }
}

/// A loaded model.
///
/// Calls follow `load_model`, then per frame `assign` and `predict`, after
/// which `outputs` holds the tensors of that prediction.
pub trait Network: Send {
    fn name(&self) -> &'static str;

    fn load_model(&mut self, path: &Path) -> Result<()>;

    /// Bind an input image to input `index`. Returns the region of the image
    /// that the network actually sees, in input pixel coordinates.
    fn assign(&mut self, input: &InputImage<'_>, index: usize) -> Result<Rect>;

    fn predict(&mut self) -> Result<()>;

    fn outputs(&self) -> &[Tensor];
}

pub trait ClassifierPostProcessor: Send {
    fn process(&self, outputs: &[Tensor]) -> Result<ClassifierResult>;
}

pub trait DetectorPostProcessor: Send {
    /// Decode detections, mapping them into `region`.
    fn process(&self, outputs: &[Tensor], region: Rect) -> Result<DetectorResult>;
}
