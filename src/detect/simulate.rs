use image::RgbImage;

use super::render::annotate;
use super::result::{BoundingBox, Detection, DetectionBatch};
use crate::overlay::TextRenderer;

pub const SIMULATED_CLASS: &str = "test_defect";
const SIMULATED_CONFIDENCE: f32 = 0.9;
const SIMULATED_COLOR: [u8; 3] = [0, 255, 0];

/// Placeholder detection used when no model is loaded and simulation is enabled:
/// one box covering the central half of the frame.
pub fn simulated_detection(image: &RgbImage, text: &TextRenderer) -> (RgbImage, DetectionBatch) {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let detection = Detection {
        bbox: BoundingBox::new(
            (w / 4.0).floor(),
            (h / 4.0).floor(),
            (3.0 * w / 4.0).floor(),
            (3.0 * h / 4.0).floor(),
        ),
        class_id: 0,
        class_name: SIMULATED_CLASS.to_string(),
        confidence: SIMULATED_CONFIDENCE,
        color: SIMULATED_COLOR,
    };
    let detections = vec![detection];
    let annotated = annotate(image, &detections, text);
    (annotated, DetectionBatch::from_detections(detections))
}
