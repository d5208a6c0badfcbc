//! Association of annotated people with person-detector output.

use crate::geometry::{match_boxes, BoundingBox};
use crate::sample::{RawDepthSample, SampleError};
use image::RgbImage;

/// IoU a detection needs to replace an annotated box.
pub const DEFAULT_IOU_FLOOR: f64 = 0.5;

/// A person detector: returns candidate person boxes for a frame.
pub trait PersonDetector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<BoundingBox>, SampleError>;
}

/// Replaces annotated boxes with their matched detections.
///
/// Boxes are paired by maximum total IoU; samples whose best partner stays
/// below `iou_floor`, or that have no partner at all, are dropped. The
/// surviving samples keep their original order.
pub fn match_detections(
    samples: Vec<RawDepthSample>,
    detections: &[BoundingBox],
    iou_floor: f64,
) -> Vec<RawDepthSample> {
    let known: Vec<BoundingBox> = samples.iter().map(|s| s.bbox).collect();
    let mut pairs = match_boxes(&known, detections, iou_floor).into_iter().peekable();

    let mut matched = Vec::with_capacity(samples.len());
    for (index, mut sample) in samples.into_iter().enumerate() {
        if let Some(&(_, det)) = pairs.peek().filter(|(i, _)| *i == index) {
            pairs.next();
            sample.bbox = detections[det];
            matched.push(sample);
        }
    }
    matched
}
