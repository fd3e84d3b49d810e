use serde::{Deserialize, Serialize};

use super::result::Detection;

/// Which boxes may suppress each other.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionMode {
    /// Any overlapping box suppresses, regardless of class.
    #[default]
    ClassAgnostic,
    /// Only boxes of the same class suppress each other.
    PerClass,
}

/// Greedy non-maximum suppression.
///
/// Candidates are stably sorted by confidence, highest first; each kept box
/// discards every later box whose IoU with it exceeds `iou_threshold`. The
/// result is in keep order, so repeated calls give identical output.
pub fn suppress(
    mut detections: Vec<Detection>,
    iou_threshold: f32,
    mode: SuppressionMode,
) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut suppressed = vec![false; detections.len()];
    let mut keep = Vec::with_capacity(detections.len());
    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        for j in (i + 1)..detections.len() {
            if suppressed[j] {
                continue;
            }
            if mode == SuppressionMode::PerClass
                && detections[i].class_id != detections[j].class_id
            {
                continue;
            }
            if detections[i].bbox.iou(&detections[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
        keep.push(i);
    }

    let mut slots: Vec<Option<Detection>> = detections.into_iter().map(Some).collect();
    keep.into_iter()
        .filter_map(|index| slots[index].take())
        .collect()
}
