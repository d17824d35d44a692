//! Image encoding: rendered pages → PNG bytes, page bytes → base64 `ImageData`.
//!
//! PNG is used for rendered pages because it is lossless; JPEG artefacts on
//! small print (checkbox captions, table headers) confuse vision models.
//! Uploaded images keep their original encoding.

use crate::schema::PageImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded {}x{} page → {} PNG bytes", img.width(), img.height(), buf.len());
    Ok(buf)
}

/// Wrap a page's bytes as a base64 image part for the model request.
///
/// `detail: "high"` asks GPT-4-class models for the full tile budget so
/// fine print and small checkbox labels stay legible.
pub fn to_image_data(page: &PageImage) -> ImageData {
    let b64 = STANDARD.encode(&page.data);
    debug!("Page {}: {} bytes base64 ({})", page.page, b64.len(), page.mime_type);
    ImageData::new(b64, page.mime_type.clone()).with_detail("high")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let png = encode_png(&img).expect("encode should succeed");
        assert_eq!(&png[1..4], b"PNG");
    }

    #[test]
    fn image_data_round_trips_bytes() {
        let page = PageImage::new(2, vec![1u8, 2, 3, 4], "image/jpeg");
        let data = to_image_data(&page);
        assert_eq!(data.mime_type, "image/jpeg");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(decoded, vec![1u8, 2, 3, 4]);
    }
}
