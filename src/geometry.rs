//! Model-space and frame-space geometry.
//!
//! Inference results are expressed in the coordinate system of the network
//! input (model space). The overlay runs on a different flow whose frames may
//! have another resolution, so every coordinate is rescaled per axis with
//! `value * frame_dim / model_dim` before drawing.

use serde::{Deserialize, Serialize};

/// Integer rectangle, used for the region an input was assigned to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle covering a whole `width x height` image.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

/// Bounding box in model space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub origin: Point,
    pub size: Point,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            origin: Point { x, y },
            size: Point {
                x: width,
                y: height,
            },
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// A rectangle after rescaling into frame space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Per-axis mapping from model space to frame space.
///
/// Stores the raw dimensions instead of precomputed ratios so that
/// `model_dim` maps to exactly `frame_dim`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rescale {
    model: (u32, u32),
    frame: (u32, u32),
}

impl Rescale {
    /// Returns `None` when the model size is degenerate.
    pub fn new(model: (u32, u32), frame: (u32, u32)) -> Option<Self> {
        if model.0 == 0 || model.1 == 0 {
            return None;
        }
        Some(Self { model, frame })
    }

    pub fn x(&self, value: f32) -> f64 {
        value as f64 * self.frame.0 as f64 / self.model.0 as f64
    }

    pub fn y(&self, value: f32) -> f64 {
        value as f64 * self.frame.1 as f64 / self.model.1 as f64
    }

    pub fn point(&self, x: f32, y: f32) -> (f64, f64) {
        (self.x(x), self.y(y))
    }

    pub fn bounding_box(&self, bbox: &BoundingBox) -> FrameRect {
        FrameRect {
            x: self.x(bbox.origin.x),
            y: self.y(bbox.origin.y),
            width: self.x(bbox.size.x),
            height: self.y(bbox.size.y),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_model_box_maps_to_full_frame() {
        for (model, frame) in [
            ((300, 300), (1280, 720)),
            ((224, 224), (1920, 1080)),
            ((640, 384), (641, 383)),
            ((7, 3), (1000, 1000)),
        ] {
            let rescale = Rescale::new(model, frame).unwrap();
            let bbox = BoundingBox::new(0.0, 0.0, model.0 as f32, model.1 as f32);
            let rect = rescale.bounding_box(&bbox);
            assert_eq!(rect.x, 0.0);
            assert_eq!(rect.y, 0.0);
            assert_eq!(rect.width, frame.0 as f64);
            assert_eq!(rect.height, frame.1 as f64);
        }
    }

    #[test]
    fn rescale_is_linear_per_axis() {
        let rescale = Rescale::new((320, 240), (640, 720)).unwrap();
        assert_eq!(rescale.point(160.0, 120.0), (320.0, 360.0));
        assert_eq!(rescale.point(10.0, 10.0), (20.0, 30.0));
    }

    #[test]
    fn degenerate_model_size_is_rejected() {
        assert!(Rescale::new((0, 240), (640, 480)).is_none());
        assert!(Rescale::new((320, 0), (640, 480)).is_none());
    }
}
