use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// Confidence above which a detection marks the batch as critical.
pub const CRITICAL_CONFIDENCE: f32 = 0.8;

/// Corner-form box in original-image pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        w * h
    }

    /// Intersection over union; 0 when both boxes are degenerate.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let intersection = self.intersection_area(other);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    /// Clamp into `[0, width] x [0, height]`.
    pub fn clamped(&self, width: f32, height: f32) -> Self {
        Self {
            x1: self.x1.clamp(0.0, width),
            y1: self.y1.clamp(0.0, height),
            x2: self.x2.clamp(0.0, width),
            y2: self.y2.clamp(0.0, height),
        }
    }
}

impl Serialize for BoundingBox {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        [self.x1, self.y1, self.x2, self.y2].serialize(serializer)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_id: usize,
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f32,
    pub color: [u8; 3],
}

/// Detections from one frame in keep order, with per-class counts.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DetectionBatch {
    pub detections: Vec<Detection>,
    pub counts_by_class: BTreeMap<String, usize>,
    pub has_critical_defect: bool,
}

impl DetectionBatch {
    pub fn from_detections(detections: Vec<Detection>) -> Self {
        let mut counts_by_class = BTreeMap::new();
        for detection in &detections {
            *counts_by_class
                .entry(detection.class_name.clone())
                .or_insert(0) += 1;
        }
        let has_critical_defect = detections
            .iter()
            .any(|detection| detection.confidence > CRITICAL_CONFIDENCE);
        Self {
            detections,
            counts_by_class,
            has_critical_defect,
        }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn analysis(&self) -> DetectionAnalysis {
        DetectionAnalysis {
            total_defects: self.detections.len(),
            defects_by_type: self.counts_by_class.clone(),
            has_critical_defects: self.has_critical_defect,
        }
    }
}

/// Summary attached to capture responses.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DetectionAnalysis {
    pub total_defects: usize,
    pub defects_by_type: BTreeMap<String, usize>,
    pub has_critical_defects: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(class_name: &str, confidence: f32) -> Detection {
        Detection {
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            class_id: 0,
            class_name: class_name.to_string(),
            confidence,
            color: [255, 0, 0],
        }
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&BoundingBox::new(20.0, 20.0, 30.0, 30.0)), 0.0);
        let point = BoundingBox::new(1.0, 1.0, 1.0, 1.0);
        assert_eq!(point.iou(&point), 0.0);
    }

    #[test]
    fn batch_counts_and_critical_flag() {
        let batch = DetectionBatch::from_detections(vec![
            detection("crack", 0.6),
            detection("crack", 0.7),
            detection("scratch", 0.81),
        ]);
        let analysis = batch.analysis();
        assert_eq!(analysis.total_defects, 3);
        assert_eq!(analysis.defects_by_type.get("crack"), Some(&2));
        assert!(analysis.has_critical_defects);

        let calm = DetectionBatch::from_detections(vec![detection("crack", 0.8)]);
        assert!(!calm.has_critical_defect);
    }

    #[test]
    fn bbox_serializes_as_corner_array() {
        let json = serde_json::to_value(detection("crack", 0.5)).expect("serialize");
        assert_eq!(json["bbox"], serde_json::json!([0.0, 0.0, 10.0, 10.0]));
        assert_eq!(json["class"], "crack");
    }
}
