//! PDF parsing, text extraction, and page rastering.
//!
//! Parsing and text-layer extraction are in-process (lopdf and
//! pdf-extract); rastering shells out to `pdftoppm` the same way OCR
//! shells out to `tesseract`.

use std::path::{Path, PathBuf};
use std::process::Command;

use lopdf::dictionary;
use thiserror::Error;

/// Minimum characters per page for a text layer to count as usable.
/// Below this density the document goes through OCR.
pub const MIN_CHARS_PER_PAGE: usize = 50;

/// Errors that can occur while working with a PDF.
#[derive(Debug, Error)]
pub enum PdfError {
    #[error("Not a PDF: {0}")]
    NotPdf(String),

    #[error("External tool not found: {0}")]
    ToolNotFound(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Structural information read from the document catalog.
#[derive(Debug, Clone)]
pub struct PdfInfo {
    pub page_count: u32,
    /// Flattened Info-dictionary string (title, author, subject, ...)
    /// used by the Level-1 content hash.
    pub metadata: String,
}

/// Parse page count and the Info dictionary.
pub fn read_info(bytes: &[u8]) -> Result<PdfInfo, PdfError> {
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| PdfError::NotPdf(e.to_string()))?;

    let page_count = doc.get_pages().len() as u32;
    if page_count == 0 {
        return Err(PdfError::NotPdf("document has no pages".into()));
    }

    let mut metadata = String::new();
    if let Ok(info_ref) = doc.trailer.get(b"Info") {
        if let Ok(info) = info_ref
            .as_reference()
            .and_then(|id| doc.get_object(id))
            .and_then(|obj| obj.as_dict())
        {
            for key in [b"Title".as_slice(), b"Author", b"Subject", b"Creator", b"Producer"] {
                if let Ok(value) = info.get(key) {
                    if let Some(text) = decode_pdf_string(value) {
                        metadata.push_str(&String::from_utf8_lossy(key));
                        metadata.push_str(": ");
                        metadata.push_str(&text);
                        metadata.push('\n');
                    }
                }
            }
        }
    }

    Ok(PdfInfo { page_count, metadata })
}

fn decode_pdf_string(object: &lopdf::Object) -> Option<String> {
    match object {
        lopdf::Object::String(bytes, _) => {
            // UTF-16BE with BOM, otherwise treat as Latin-1-ish.
            if bytes.starts_with(&[0xFE, 0xFF]) {
                let utf16: Vec<u16> = bytes[2..]
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
                Some(String::from_utf16_lossy(&utf16))
            } else {
                Some(bytes.iter().map(|&b| b as char).collect())
            }
        }
        _ => None,
    }
}

/// Extract the text layer, one string per page.
///
/// An encrypted or malformed document surfaces as `ExtractionFailed`;
/// a valid scan with no text layer returns empty page strings.
pub fn extract_page_texts(bytes: &[u8]) -> Result<Vec<String>, PdfError> {
    pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| PdfError::ExtractionFailed(e.to_string()))
}

/// Whether extracted pages carry enough text to skip OCR.
///
/// Uses average character density so a single dense abstract page does
/// not mask an otherwise scanned document.
pub fn has_usable_text_layer(pages: &[String]) -> bool {
    if pages.is_empty() {
        return false;
    }
    let total: usize = pages.iter().map(|p| p.trim().len()).sum();
    total / pages.len() >= MIN_CHARS_PER_PAGE
}

/// Convert one PDF page to a PNG via `pdftoppm`.
///
/// Returns the generated image path inside `output_dir`.
pub fn render_page_png(
    pdf_path: &Path,
    page: u32,
    output_dir: &Path,
    dpi: u32,
) -> Result<PathBuf, PdfError> {
    let page_str = page.to_string();
    let output_prefix = output_dir.join("page");

    let status = Command::new("pdftoppm")
        .args(["-png", "-r", &dpi.to_string(), "-f", &page_str, "-l", &page_str])
        .arg(pdf_path)
        .arg(&output_prefix)
        .status();

    match status {
        Ok(s) if s.success() => find_page_image(output_dir, page).ok_or_else(|| {
            PdfError::ExtractionFailed(format!("No image generated for page {}", page))
        }),
        Ok(_) => Err(PdfError::ExtractionFailed(
            "pdftoppm failed to convert PDF page".to_string(),
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(PdfError::ToolNotFound(
            "pdftoppm not found (install poppler-utils)".to_string(),
        )),
        Err(e) => Err(PdfError::Io(e)),
    }
}

/// Locate the image pdftoppm generated for a page. The zero-padding of
/// the page suffix varies with the document's page count.
fn find_page_image(output_dir: &Path, page: u32) -> Option<PathBuf> {
    let candidates = [
        format!("page-{}.png", page),
        format!("page-{:02}.png", page),
        format!("page-{:03}.png", page),
        format!("page-{:04}.png", page),
    ];
    candidates
        .iter()
        .map(|name| output_dir.join(name))
        .find(|p| p.exists())
}

/// Check whether a named binary is on PATH.
pub fn check_binary(name: &str) -> bool {
    which::which(name).is_ok()
}

/// Build a minimal one-page PDF with a text layer, for tests.
#[doc(hidden)]
pub fn minimal_pdf() -> Vec<u8> {
    minimal_pdf_with_text("Hello World")
}

/// Build a minimal one-page PDF with the given text, for tests.
#[doc(hidden)]
pub fn minimal_pdf_with_text(text: &str) -> Vec<u8> {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let content = lopdf::content::Content {
        operations: vec![
            lopdf::content::Operation::new("BT", vec![]),
            lopdf::content::Operation::new("Tf", vec!["F1".into(), 24.into()]),
            lopdf::content::Operation::new("Td", vec![100.into(), 600.into()]),
            lopdf::content::Operation::new(
                "Tj",
                vec![lopdf::Object::string_literal(text)],
            ),
            lopdf::content::Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(lopdf::Object::Stream(lopdf::Stream::new(
        dictionary! {},
        content.encode().unwrap(),
    )));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    });
    doc.objects.insert(
        pages_id,
        lopdf::Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let info_id = doc.add_object(dictionary! {
        "Title" => lopdf::Object::string_literal("Test Paper"),
        "Author" => lopdf::Object::string_literal("A. Author"),
    });
    doc.trailer.set("Info", info_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_info_page_count_and_metadata() {
        let info = read_info(&minimal_pdf()).unwrap();
        assert_eq!(info.page_count, 1);
        assert!(info.metadata.contains("Title: Test Paper"));
        assert!(info.metadata.contains("Author: A. Author"));
    }

    #[test]
    fn test_read_info_rejects_garbage() {
        assert!(read_info(b"not a pdf at all").is_err());
    }

    #[test]
    fn test_extract_page_texts() {
        let pages = extract_page_texts(&minimal_pdf()).unwrap();
        assert_eq!(pages.len(), 1);
        assert!(pages[0].contains("Hello World"));
    }

    #[test]
    fn test_usable_text_layer_density() {
        assert!(!has_usable_text_layer(&[]));
        assert!(!has_usable_text_layer(&["short".to_string()]));
        let dense = "x".repeat(MIN_CHARS_PER_PAGE);
        assert!(has_usable_text_layer(&[dense.clone()]));
        // One dense page cannot carry three empty ones.
        assert!(!has_usable_text_layer(&[
            dense,
            String::new(),
            String::new(),
            String::new()
        ]));
    }

    #[test]
    fn test_find_page_image_padding() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("page-03.png"), b"png").unwrap();
        assert_eq!(
            find_page_image(dir.path(), 3),
            Some(dir.path().join("page-03.png"))
        );
        assert_eq!(find_page_image(dir.path(), 4), None);
    }
}
