use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

/// Encode an RGB image as JPEG. Quality is clamped to `1..=100`.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

pub fn to_base64(bytes: &[u8]) -> String {
    B64.encode(bytes)
}

/// JPEG-encode then base64 the result, the form frames take on the wire.
pub fn jpeg_base64(image: &RgbImage, quality: u8) -> Result<String> {
    encode_jpeg(image, quality).map(|bytes| to_base64(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpeg_output_has_soi_marker_and_decodes() -> Result<()> {
        let image = RgbImage::from_pixel(16, 8, image::Rgb([200, 10, 10]));
        let bytes = encode_jpeg(&image, 75)?;
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&bytes)?.to_rgb8();
        assert_eq!(decoded.dimensions(), (16, 8));
        Ok(())
    }

    #[test]
    fn base64_uses_standard_alphabet() {
        assert_eq!(to_base64(&[0xFB, 0xFF]), "+/8=");
    }
}
