//! Overlay rendering.
//!
//! Results are drawn in frame space: every model-space coordinate is scaled by
//! `frame_dim / model_dim` on its own axis, where the frame is whatever surface
//! is being drawn on.

mod font;
mod surface;

use crate::envelope::{ClassifierResult, Detection, DetectionShape, DetectorResult, Envelope, Payload};
use crate::geometry::Rescale;
use crate::labels::LabelInfo;
use crate::mailbox::Snapshot;

pub use surface::{Color, DrawOp, FrameSurface, RecordingSurface, Surface, SurfaceFormat};

/// Landmarks below or at this visibility are not drawn.
pub const VISIBILITY_THRESHOLD: f32 = 0.3;

/// Skeleton over the 17 COCO keypoints.
pub const POSE_EDGES: [(usize, usize); 18] = [
    (0, 1),
    (1, 3),
    (3, 5),
    (5, 7),
    (7, 9),
    (5, 11),
    (11, 13),
    (13, 15),
    (0, 2),
    (2, 4),
    (4, 6),
    (6, 8),
    (8, 10),
    (6, 12),
    (12, 14),
    (14, 16),
    (5, 6),
    (11, 12),
];

pub const CLASSIFIER_TEXT_ANCHOR: (f64, f64) = (10.0, 35.0);
pub const CLASSIFIER_TEXT_SIZE: f64 = 35.0;
pub const DETECTION_TEXT_OFFSET: (f64, f64) = (5.0, 25.0);
pub const DETECTION_TEXT_SIZE: f64 = 20.0;
pub const LINE_WIDTH: f64 = 1.5;
pub const LANDMARK_RADIUS: f64 = 3.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub texts: usize,
    pub boxes: usize,
    pub lines: usize,
    pub dots: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Nothing has been published yet.
    Empty,
    Drawn(RenderStats),
}

/// Render whatever the snapshot holds. The lock stays held for the whole pass.
pub fn render_snapshot(
    snapshot: &Snapshot<'_>,
    labels: Option<&LabelInfo>,
    surface: &mut dyn Surface,
) -> RenderOutcome {
    match snapshot.envelope() {
        Some(envelope) => RenderOutcome::Drawn(render_envelope(envelope, labels, surface)),
        None => RenderOutcome::Empty,
    }
}

pub fn render_envelope(
    envelope: &Envelope,
    labels: Option<&LabelInfo>,
    surface: &mut dyn Surface,
) -> RenderStats {
    match envelope.payload() {
        Payload::Classifier(result) => {
            render_classification(result, envelope.confidence_threshold(), labels, surface)
        }
        Payload::Detector(result) => {
            let Some(rescale) = Rescale::new(envelope.model_size(), surface.size()) else {
                log::warn!(
                    "skipping detections with degenerate model size {:?}",
                    envelope.model_size()
                );
                return RenderStats::default();
            };
            render_detections(result, &rescale, labels, surface)
        }
    }
}

fn render_classification(
    result: &ClassifierResult,
    threshold: f32,
    labels: Option<&LabelInfo>,
    surface: &mut dyn Surface,
) -> RenderStats {
    let mut stats = RenderStats::default();
    let (Some(top), Some(labels)) = (result.top(), labels) else {
        return stats;
    };
    if top.confidence > threshold {
        surface.draw_text(
            CLASSIFIER_TEXT_ANCHOR,
            CLASSIFIER_TEXT_SIZE,
            labels.label(top.class_index),
            Color::WHITE,
        );
        stats.texts += 1;
    }
    stats
}

fn render_detections(
    result: &DetectorResult,
    rescale: &Rescale,
    labels: Option<&LabelInfo>,
    surface: &mut dyn Surface,
) -> RenderStats {
    let mut stats = RenderStats::default();
    for detection in &result.items {
        match detection.shape() {
            DetectionShape::Pose => render_pose(detection, rescale, surface, &mut stats),
            DetectionShape::Box => render_box(detection, rescale, labels, surface, &mut stats),
        }
    }
    stats
}

fn render_box(
    detection: &Detection,
    rescale: &Rescale,
    labels: Option<&LabelInfo>,
    surface: &mut dyn Surface,
    stats: &mut RenderStats,
) {
    let rect = rescale.bounding_box(&detection.bounding_box);
    surface.stroke_rect(rect, LINE_WIDTH, Color::RED);
    stats.boxes += 1;

    if let Some(labels) = labels {
        surface.draw_text(
            (rect.x + DETECTION_TEXT_OFFSET.0, rect.y + DETECTION_TEXT_OFFSET.1),
            DETECTION_TEXT_SIZE,
            labels.label(detection.class_index),
            Color::RED,
        );
        stats.texts += 1;
    }
}

fn render_pose(
    detection: &Detection,
    rescale: &Rescale,
    surface: &mut dyn Surface,
    stats: &mut RenderStats,
) {
    let landmarks = &detection.landmarks;
    let visible = |i: usize| landmarks[i].visibility > VISIBILITY_THRESHOLD;
    let at = |i: usize| rescale.point(landmarks[i].x, landmarks[i].y);

    for &(start, end) in POSE_EDGES.iter() {
        if visible(start) && visible(end) {
            surface.stroke_line(at(start), at(end), LINE_WIDTH, Color::YELLOW);
            stats.lines += 1;
        }
    }
    for i in (0..landmarks.len()).filter(|&i| visible(i)) {
        surface.fill_dot(at(i), LANDMARK_RADIUS, Color::GREEN);
        stats.dots += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Classification, Landmark, POSE_LANDMARKS};
    use crate::geometry::{BoundingBox, FrameRect};

    fn labels() -> LabelInfo {
        LabelInfo::from_labels(["background", "person", "cat"])
    }

    fn classifier(confidence: f32) -> Envelope {
        Envelope::new(
            ClassifierResult {
                items: vec![Classification {
                    class_index: 2,
                    confidence,
                }],
            },
            224,
            224,
            11.0,
        )
    }

    fn pose(visibility: impl Fn(usize) -> f32) -> Detection {
        Detection {
            class_index: 1,
            confidence: 0.9,
            bounding_box: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            landmarks: (0..POSE_LANDMARKS)
                .map(|i| Landmark {
                    x: i as f32,
                    y: i as f32,
                    z: 0.0,
                    visibility: visibility(i),
                })
                .collect(),
        }
    }

    #[test]
    fn edges_cover_every_landmark() {
        let mut seen = [false; POSE_LANDMARKS];
        for (a, b) in POSE_EDGES {
            assert!(a < POSE_LANDMARKS && b < POSE_LANDMARKS);
            seen[a] = true;
            seen[b] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn classifier_text_is_strictly_above_threshold() {
        let mut below = RecordingSurface::new(640, 480);
        render_envelope(&classifier(10.9), Some(&labels()), &mut below);
        assert_eq!(below.ops().len(), 0);

        let mut at = RecordingSurface::new(640, 480);
        render_envelope(&classifier(11.0), Some(&labels()), &mut at);
        assert_eq!(at.ops().len(), 0);

        let mut above = RecordingSurface::new(640, 480);
        let stats = render_envelope(&classifier(11.1), Some(&labels()), &mut above);
        assert_eq!(stats.texts, 1);
        assert_eq!(
            above.ops(),
            &[DrawOp::Text {
                anchor: (10.0, 35.0),
                size: 35.0,
                text: "cat".into(),
                color: Color::WHITE,
            }]
        );
    }

    #[test]
    fn classifier_without_labels_draws_nothing() {
        let mut surface = RecordingSurface::new(640, 480);
        render_envelope(&classifier(20.0), None, &mut surface);
        assert!(surface.ops().is_empty());
    }

    #[test]
    fn box_is_rescaled_to_frame() {
        let envelope = Envelope::new(
            DetectorResult {
                items: vec![Detection {
                    class_index: 1,
                    confidence: 0.8,
                    bounding_box: BoundingBox::new(0.0, 0.0, 320.0, 240.0),
                    landmarks: Vec::new(),
                }],
            },
            320,
            240,
            0.5,
        );
        let mut surface = RecordingSurface::new(1280, 720);
        let stats = render_envelope(&envelope, Some(&labels()), &mut surface);
        assert_eq!(stats.boxes, 1);
        assert_eq!(
            surface.ops()[0],
            DrawOp::Rect {
                rect: FrameRect {
                    x: 0.0,
                    y: 0.0,
                    width: 1280.0,
                    height: 720.0
                },
                width: 1.5,
                color: Color::RED,
            }
        );
        assert!(matches!(
            &surface.ops()[1],
            DrawOp::Text { anchor, text, .. } if *anchor == (5.0, 25.0) && text == "person"
        ));
    }

    #[test]
    fn box_label_needs_labels() {
        let envelope = Envelope::new(
            DetectorResult {
                items: vec![Detection::default()],
            },
            100,
            100,
            0.5,
        );
        let mut surface = RecordingSurface::new(100, 100);
        let stats = render_envelope(&envelope, None, &mut surface);
        assert_eq!(stats.boxes, 1);
        assert_eq!(stats.texts, 0);
    }

    #[test]
    fn pose_edges_need_both_endpoints_visible() {
        // Left side (odd indices) hidden.
        let detection = pose(|i| if i % 2 == 1 { 0.3 } else { 0.31 });
        let envelope = Envelope::new(
            DetectorResult {
                items: vec![detection],
            },
            100,
            100,
            0.5,
        );
        let mut surface = RecordingSurface::new(200, 200);
        let stats = render_envelope(&envelope, Some(&labels()), &mut surface);

        let expected_edges = POSE_EDGES
            .iter()
            .filter(|(a, b)| a % 2 == 0 && b % 2 == 0)
            .count();
        assert_eq!(expected_edges, 8);
        assert_eq!(stats.lines, expected_edges);
        assert_eq!(stats.dots, 9);
        assert_eq!(stats.boxes, 0);
        assert_eq!(surface.texts().count(), 0);

        for op in surface.dots() {
            let DrawOp::Dot { center, radius, color } = op else {
                unreachable!();
            };
            assert_eq!(center.0, center.1);
            assert_eq!(center.0 % 4.0, 0.0, "even landmarks scaled by 2");
            assert_eq!(*radius, 3.0);
            assert_eq!(*color, Color::GREEN);
        }
        assert!(surface.lines().all(|op| matches!(
            op,
            DrawOp::Line { color, width, .. } if *color == Color::YELLOW && *width == 1.5
        )));
    }

    #[test]
    fn degenerate_model_size_draws_nothing() {
        let envelope = Envelope::new(
            DetectorResult {
                items: vec![Detection::default()],
            },
            0,
            100,
            0.5,
        );
        let mut surface = RecordingSurface::new(100, 100);
        assert_eq!(
            render_envelope(&envelope, None, &mut surface),
            RenderStats::default()
        );
        assert!(surface.ops().is_empty());
    }

    #[test]
    fn rasterizes_into_frame() {
        use crate::frame::{VideoFormat, VideoInfo};

        let info = VideoInfo::new(VideoFormat::Bgrx, 64, 64).unwrap();
        let mut data = vec![0u8; info.size()];
        let envelope = Envelope::new(
            DetectorResult {
                items: vec![Detection {
                    bounding_box: BoundingBox::new(8.0, 8.0, 16.0, 16.0),
                    ..Detection::default()
                }],
            },
            32,
            32,
            0.5,
        );
        let mut surface = FrameSurface::new(&mut data, info).unwrap();
        render_envelope(&envelope, None, &mut surface);

        let at = |x: usize, y: usize| &data[y * info.stride + x * 4..y * info.stride + x * 4 + 3];
        assert_eq!(at(16, 32), &[0, 0, 255]);
        assert_eq!(at(32, 32), &[0, 0, 0]);
    }

    #[test]
    fn off_frame_boxes_are_clipped_with_labels() {
        use crate::frame::{VideoFormat, VideoInfo};

        let info = VideoInfo::new(VideoFormat::Bgrx, 64, 64).unwrap();
        let mut data = vec![0u8; info.size()];
        let envelope = Envelope::new(
            DetectorResult {
                items: [(1.0e10, 10.0), (-1.0e10, 10.0), (10.0, 1.0e10), (10.0, -1.0e10)]
                    .into_iter()
                    .map(|(x, y)| Detection {
                        class_index: 1,
                        confidence: 0.9,
                        bounding_box: BoundingBox::new(x, y, 4.0, 4.0),
                        landmarks: Vec::new(),
                    })
                    .collect(),
            },
            64,
            64,
            0.5,
        );
        let mut surface = FrameSurface::new(&mut data, info).unwrap();
        let stats = render_envelope(&envelope, Some(&labels()), &mut surface);
        assert_eq!(stats.boxes, 4);
        assert_eq!(stats.texts, 4);
        assert!(data.iter().all(|&b| b == 0));
    }
}
