//! Text overlays for live frames and annotated captures.
//!
//! Fonts are loaded from disk at startup. When no usable font exists the renderer
//! is disabled and every draw call becomes a no-op, so a headless host without
//! fonts still streams frames (just without captions).

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
];

#[derive(Clone, Default)]
pub struct TextRenderer {
    font: Option<Arc<FontVec>>,
}

impl std::fmt::Debug for TextRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextRenderer")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl TextRenderer {
    /// Load `preferred` if given, otherwise the first system font that parses.
    pub fn load(preferred: Option<&Path>) -> Self {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(path) = preferred {
            candidates.push(path.to_path_buf());
        }
        candidates.extend(SYSTEM_FONT_CANDIDATES.iter().map(PathBuf::from));

        for path in candidates {
            let Ok(bytes) = std::fs::read(&path) else {
                continue;
            };
            match Self::from_bytes(bytes) {
                Some(renderer) => {
                    log::debug!("overlay font loaded from {}", path.display());
                    return renderer;
                }
                None => log::warn!("overlay font {} could not be parsed", path.display()),
            }
        }

        log::warn!("no overlay font available; frames will be streamed without captions");
        Self::disabled()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Option<Self> {
        FontVec::try_from_vec(bytes).ok().map(|font| Self {
            font: Some(Arc::new(font)),
        })
    }

    pub fn disabled() -> Self {
        Self { font: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.font.is_some()
    }

    /// Pixel extent of `text` at `size`, `(0, 0)` when disabled.
    pub fn measure(&self, text: &str, size: f32) -> (u32, u32) {
        match &self.font {
            Some(font) => text_size(PxScale::from(size), font.as_ref(), text),
            None => (0, 0),
        }
    }

    pub fn draw(&self, image: &mut RgbImage, text: &str, x: i32, y: i32, size: f32, color: Rgb<u8>) {
        if let Some(font) = &self.font {
            draw_text_mut(image, color, x, y, PxScale::from(size), font.as_ref(), text);
        }
    }

    /// Draw `text` with its top-left at `(x, y)` on a filled background box.
    pub fn draw_on_background(
        &self,
        image: &mut RgbImage,
        text: &str,
        x: i32,
        y: i32,
        size: f32,
        color: Rgb<u8>,
        background: Rgb<u8>,
    ) {
        let (width, height) = self.measure(text, size);
        if width == 0 || height == 0 {
            return;
        }
        draw_filled_rect_mut(image, Rect::at(x, y).of_size(width + 4, height + 4), background);
        self.draw(image, text, x + 2, y + 2, size, color);
    }
}
