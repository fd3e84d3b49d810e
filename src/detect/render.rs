use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use super::result::Detection;
use crate::overlay::TextRenderer;

const BOX_THICKNESS: i32 = 2;
const LABEL_TEXT_SIZE: f32 = 18.0;
const SIZE_TEXT_SIZE: f32 = 14.0;
const LABEL_TEXT: Rgb<u8> = Rgb([255, 255, 255]);

/// Copy `image` and draw each detection's box, label and size annotation.
pub fn annotate(image: &RgbImage, detections: &[Detection], text: &TextRenderer) -> RgbImage {
    let mut canvas = image.clone();
    for detection in detections {
        draw_detection(&mut canvas, detection, text);
    }
    canvas
}

pub(crate) fn draw_detection(canvas: &mut RgbImage, detection: &Detection, text: &TextRenderer) {
    let color = Rgb(detection.color);
    let bbox = detection.bbox;
    let x1 = bbox.x1.round() as i32;
    let y1 = bbox.y1.round() as i32;
    let x2 = bbox.x2.round() as i32;
    let y2 = bbox.y2.round() as i32;

    for offset in 0..BOX_THICKNESS {
        let width = x2 - x1 - 2 * offset;
        let height = y2 - y1 - 2 * offset;
        if width <= 0 || height <= 0 {
            break;
        }
        let rect = Rect::at(x1 + offset, y1 + offset).of_size(width as u32, height as u32);
        draw_hollow_rect_mut(canvas, rect, color);
    }

    let label = format!("{}: {:.2}", detection.class_name, detection.confidence);
    let (_, label_height) = text.measure(&label, LABEL_TEXT_SIZE);
    let label_y = (y1 - label_height as i32 - 6).max(0);
    text.draw_on_background(canvas, &label, x1, label_y, LABEL_TEXT_SIZE, LABEL_TEXT, color);

    let size = format!(
        "Size: {}x{}",
        bbox.width().round() as i32,
        bbox.height().round() as i32
    );
    text.draw(canvas, &size, x1, y2 + 4, SIZE_TEXT_SIZE, color);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    #[test]
    fn box_outline_uses_class_color_and_source_is_untouched() {
        let image = RgbImage::new(40, 40);
        let detection = Detection {
            bbox: BoundingBox::new(5.0, 5.0, 30.0, 25.0),
            class_id: 0,
            class_name: "crack".into(),
            confidence: 0.9,
            color: [0, 255, 0],
        };
        let annotated = annotate(&image, &[detection], &TextRenderer::disabled());

        assert_eq!(annotated.get_pixel(5, 5).0, [0, 255, 0]);
        assert_eq!(annotated.get_pixel(6, 6).0, [0, 255, 0]);
        assert_eq!(annotated.get_pixel(15, 15).0, [0, 0, 0]);
        assert_eq!(image.get_pixel(5, 5).0, [0, 0, 0]);
    }

    #[test]
    fn degenerate_box_does_not_panic() {
        let image = RgbImage::new(10, 10);
        let detection = Detection {
            bbox: BoundingBox::new(10.0, 10.0, 10.0, 10.0),
            class_id: 0,
            class_name: "crack".into(),
            confidence: 0.5,
            color: [255, 0, 0],
        };
        let annotated = annotate(&image, &[detection], &TextRenderer::disabled());
        assert_eq!(annotated, image);
    }
}
