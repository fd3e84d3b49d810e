//! Raw model output to detections.
//!
//! The model emits `[1, C, N]`: N candidates, each a column of
//! `(cx, cy, w, h, score_0 .. score_{C-5})` in model-input pixels. Decoding picks
//! the arg-max class, applies the confidence threshold and class-table bounds,
//! converts to corner form, rescales to the original image and clamps.

use ndarray::{ArrayD, Axis};

use super::classes::ClassTable;
use super::result::{BoundingBox, Detection};
use super::DetectionError;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DecodeParams {
    pub confidence_threshold: f32,
    /// Model input width and height.
    pub input_size: (u32, u32),
    /// Original image width and height.
    pub image_size: (u32, u32),
}

pub fn decode_predictions(
    output: &ArrayD<f32>,
    classes: &ClassTable,
    params: DecodeParams,
) -> Result<Vec<Detection>, DetectionError> {
    let shape = output.shape();
    if shape.len() != 3 {
        return Err(DetectionError::Decode(format!(
            "expected a rank-3 [1, C, N] output, got shape {:?}",
            shape
        )));
    }
    if shape[0] != 1 {
        return Err(DetectionError::Decode(format!(
            "expected batch size 1, got {}",
            shape[0]
        )));
    }
    if shape[1] <= 4 {
        return Err(DetectionError::Decode(format!(
            "expected at least one class score row, got {} rows",
            shape[1]
        )));
    }

    let (input_w, input_h) = params.input_size;
    let (image_w, image_h) = params.image_size;
    if input_w == 0 || input_h == 0 {
        return Err(DetectionError::InvalidInput("model input size is zero".into()));
    }
    let scale_x = image_w as f32 / input_w as f32;
    let scale_y = image_h as f32 / input_h as f32;
    let (max_x, max_y) = (image_w as f32, image_h as f32);

    // [C, N] -> iterate candidates as columns.
    let batch = output.index_axis(Axis(0), 0);
    let mut detections = Vec::new();
    for candidate in batch.axis_iter(Axis(1)) {
        let values = candidate.as_slice();
        let column: Vec<f32>;
        let values = match values {
            Some(values) => values,
            None => {
                column = candidate.iter().copied().collect();
                &column
            }
        };

        let Some((class_id, score)) = best_class(&values[4..]) else {
            continue;
        };
        if score < params.confidence_threshold {
            continue;
        }
        let Some(class) = classes.get(class_id) else {
            continue;
        };

        let (cx, cy, w, h) = (values[0], values[1], values[2], values[3]);
        if ![cx, cy, w, h].iter().all(|v| v.is_finite()) {
            continue;
        }
        // Sign of the extent is meaningless; keep corners ordered.
        let (half_w, half_h) = (w.abs() / 2.0, h.abs() / 2.0);
        let bbox = BoundingBox::new(
            (cx - half_w) * scale_x,
            (cy - half_h) * scale_y,
            (cx + half_w) * scale_x,
            (cy + half_h) * scale_y,
        )
        .clamped(max_x, max_y);

        detections.push(Detection {
            bbox,
            class_id,
            class_name: class.label.clone(),
            confidence: score.clamp(0.0, 1.0),
            color: class.color.0,
        });
    }

    Ok(detections)
}

/// Arg-max over class scores, skipping NaN. Ties keep the lowest id.
fn best_class(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, score)| !score.is_nan())
        .fold(None, |best, (id, score)| match best {
            Some((_, best_score)) if best_score >= score => best,
            _ => Some((id, score)),
        })
}
