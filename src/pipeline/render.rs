//! Image source: turn an uploaded document into ordered [`PageImage`]s.
//!
//! PDFs are rasterised with pdfium; single images pass through untouched.
//! pdfium is not async-safe, so PDF work runs in `spawn_blocking`. Pages
//! render at the configured DPI, and `max_rendered_pixels` caps both edges
//! regardless of physical page size.

use crate::config::ExtractionConfig;
use crate::error::FormExtractError;
use crate::pipeline::encode::encode_png;
use crate::pipeline::input::InputFile;
use crate::schema::PageImage;
use image::ImageFormat;
use pdfium_render::prelude::*;
use tracing::{debug, info};

/// What kind of document an upload holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image(ImageFormat),
}

/// Identify a document from its leading bytes.
pub fn sniff_document(file: &InputFile) -> Result<DocumentKind, FormExtractError> {
    let bytes = &file.bytes;
    if bytes.starts_with(b"%PDF") {
        return Ok(DocumentKind::Pdf);
    }
    if bytes.starts_with(b"PK\x03\x04") {
        return Err(FormExtractError::UnsupportedFileType {
            name: file.name.clone(),
            detail: "Office documents (DOCX) must be converted to PDF first".into(),
        });
    }
    match image::guess_format(bytes) {
        Ok(fmt @ (ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Gif | ImageFormat::WebP)) => {
            Ok(DocumentKind::Image(fmt))
        }
        Ok(other) => Err(FormExtractError::UnsupportedFileType {
            name: file.name.clone(),
            detail: format!("{other:?} images are not accepted; use PNG, JPEG, GIF, or WebP"),
        }),
        Err(_) => Err(FormExtractError::UnsupportedFileType {
            name: file.name.clone(),
            detail: "expected a PDF or an image".into(),
        }),
    }
}

/// Produce page images for a document, 1-based and ascending.
pub async fn load_page_images(
    file: &InputFile,
    config: &ExtractionConfig,
) -> Result<Vec<PageImage>, FormExtractError> {
    match sniff_document(file)? {
        DocumentKind::Image(fmt) => {
            debug!("'{}' is a single {:?} image", file.name, fmt);
            Ok(vec![PageImage::new(1, file.bytes.clone(), fmt.to_mime_type())])
        }
        DocumentKind::Pdf => render_pdf(file, config).await,
    }
}

/// Rasterise the selected pages of a PDF into PNG page images.
pub async fn render_pdf(
    file: &InputFile,
    config: &ExtractionConfig,
) -> Result<Vec<PageImage>, FormExtractError> {
    let file = file.clone();
    let dpi = config.dpi;
    let max_pixels = config.max_rendered_pixels;
    let password = config.password.clone();
    let selection = config.pages.clone();

    tokio::task::spawn_blocking(move || {
        render_pdf_blocking(&file, dpi, max_pixels, password.as_deref(), &selection)
    })
    .await
    .map_err(|e| FormExtractError::Internal(format!("Render task panicked: {}", e)))?
}

/// Blocking implementation of page rendering.
fn render_pdf_blocking(
    file: &InputFile,
    dpi: u32,
    max_pixels: u32,
    password: Option<&str>,
    selection: &crate::config::PageSelection,
) -> Result<Vec<PageImage>, FormExtractError> {
    let pdfium = pdfium_auto::bind_pdfium_silent()
        .map_err(|e| FormExtractError::PdfiumBindingFailed(e.to_string()))?;

    let document = pdfium
        .load_pdf_from_byte_slice(&file.bytes, password)
        .map_err(|e| {
            let err_str = format!("{:?}", e);
            if err_str.to_lowercase().contains("password") {
                if password.is_some() {
                    FormExtractError::WrongPassword {
                        name: file.name.clone(),
                    }
                } else {
                    FormExtractError::PasswordRequired {
                        name: file.name.clone(),
                    }
                }
            } else {
                FormExtractError::CorruptPdf {
                    name: file.name.clone(),
                    detail: err_str,
                }
            }
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF '{}' loaded: {} pages", file.name, total_pages);

    let indices = selection.to_indices(total_pages);
    if indices.is_empty() {
        return Err(FormExtractError::PageOutOfRange { total: total_pages });
    }

    let mut results = Vec::with_capacity(indices.len());
    for idx in indices {
        let page_num = idx + 1;
        let page = pages
            .get(idx as u16)
            .map_err(|e| FormExtractError::RasterisationFailed {
                page: page_num,
                detail: format!("{:?}", e),
            })?;

        let render_config = PdfRenderConfig::new()
            .set_target_width(target_width(page.width().value, dpi, max_pixels))
            .set_maximum_height(max_pixels as i32);
        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            FormExtractError::RasterisationFailed {
                page: page_num,
                detail: format!("{:?}", e),
            }
        })?;

        let image = bitmap.as_image();
        let png = encode_png(&image).map_err(|e| FormExtractError::RasterisationFailed {
            page: page_num,
            detail: format!("PNG encoding failed: {}", e),
        })?;
        debug!(
            "Rendered page {} → {}x{} px, {} bytes",
            page_num,
            image.width(),
            image.height(),
            png.len()
        );

        results.push(PageImage::new(page_num, png, "image/png"));
    }

    Ok(results)
}

/// Pixel width for a page `width_pt` points wide at `dpi`, capped at `max_pixels`.
fn target_width(width_pt: f32, dpi: u32, max_pixels: u32) -> i32 {
    let px = (width_pt * dpi as f32 / 72.0).round() as u32;
    px.clamp(1, max_pixels) as i32
}
