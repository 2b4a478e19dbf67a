//! Tesseract OCR over rastered PDF pages.
//!
//! Used when a document has no usable text layer. Language is
//! auto-detected from a fixed set of ten scripts via tesseract's OSD
//! mode; when a script maps to several plausible languages the caller
//! breaks the tie with the quality scorer's first-page assessment.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;
use thiserror::Error;

use crate::pdf::{self, PdfError};

/// The ten supported OCR languages (tesseract traineddata codes).
pub const SUPPORTED_LANGUAGES: [&str; 10] = [
    "eng", "deu", "fra", "spa", "ita", "por", "rus", "jpn", "kor", "chi_sim",
];

/// Raster resolution for OCR input.
const OCR_DPI: u32 = 300;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("PDF error: {0}")]
    Pdf(#[from] PdfError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of running OCR over a whole document.
#[derive(Debug)]
pub struct OcrOutcome {
    /// Recognized text, one entry per page.
    pub pages: Vec<String>,
    /// Language the document was recognized with.
    pub language: String,
    /// Searchable PDF with the regenerated text layer, if produced.
    pub regenerated_pdf: Option<PathBuf>,
}

/// Language candidates for a detected script. More than one entry means
/// the script alone cannot decide (Latin covers six of our languages).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageGuess {
    pub candidates: Vec<&'static str>,
}

impl LanguageGuess {
    fn single(lang: &'static str) -> Self {
        Self { candidates: vec![lang] }
    }

    pub fn is_ambiguous(&self) -> bool {
        self.candidates.len() > 1
    }
}

/// Map a tesseract OSD script name onto our language set.
pub fn script_to_languages(script: &str) -> LanguageGuess {
    match script {
        "Cyrillic" => LanguageGuess::single("rus"),
        "Japanese" | "Katakana" | "Hiragana" => LanguageGuess::single("jpn"),
        "Hangul" => LanguageGuess::single("kor"),
        "Han" => LanguageGuess::single("chi_sim"),
        // Latin script spans six supported languages; english first as
        // the dominant language of the corpus.
        _ => LanguageGuess {
            candidates: vec!["eng", "deu", "fra", "spa", "ita", "por"],
        },
    }
}

/// Parse the `Script: Latin` line out of tesseract OSD output.
pub fn parse_osd_script(osd_output: &str) -> Option<String> {
    osd_output
        .lines()
        .find_map(|line| line.strip_prefix("Script:"))
        .map(|s| s.trim().to_string())
}

/// Tesseract-backed OCR engine. The binary is located on PATH; models
/// for the supported languages are expected to be installed.
pub struct OcrEngine;

impl Default for OcrEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrEngine {
    pub fn new() -> Self {
        Self
    }

    /// Whether the engine can run at all.
    pub fn is_available(&self) -> bool {
        pdf::check_binary("tesseract") && pdf::check_binary("pdftoppm")
    }

    /// Detect the dominant script of the first page and map it onto the
    /// supported language set.
    pub fn detect_language(&self, pdf_path: &Path) -> Result<LanguageGuess, OcrError> {
        let workdir = TempDir::new()?;
        let image = pdf::render_page_png(pdf_path, 1, workdir.path(), OCR_DPI)?;

        let output = Command::new("tesseract")
            .arg(&image)
            .arg("stdout")
            .args(["--psm", "0"])
            .output();

        match output {
            Ok(output) if output.status.success() => {
                let text = String::from_utf8_lossy(&output.stdout).to_string()
                    + &String::from_utf8_lossy(&output.stderr);
                let script = parse_osd_script(&text).unwrap_or_else(|| "Latin".to_string());
                Ok(script_to_languages(&script))
            }
            // OSD failing (e.g. missing osd.traineddata) falls back to
            // the Latin candidate set rather than aborting the stage.
            Ok(_) => Ok(script_to_languages("Latin")),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                OcrError::BackendNotAvailable(
                    "tesseract not found (install tesseract-ocr)".to_string(),
                ),
            ),
            Err(e) => Err(OcrError::Io(e)),
        }
    }

    /// Run tesseract on a single page image.
    fn run_tesseract(&self, image_path: &Path, language: &str) -> Result<String, OcrError> {
        let output = Command::new("tesseract")
            .arg(image_path)
            .arg("stdout")
            .args(["-l", language])
            .output();

        match output {
            Ok(output) => {
                if output.status.success() {
                    Ok(String::from_utf8_lossy(&output.stdout).to_string())
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    Err(OcrError::OcrFailed(format!("tesseract failed: {}", stderr)))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                OcrError::BackendNotAvailable(
                    "tesseract not found (install tesseract-ocr)".to_string(),
                ),
            ),
            Err(e) => Err(OcrError::Io(e)),
        }
    }

    /// OCR a quick sample of one page, used for language tie-breaking.
    pub fn ocr_first_page(&self, pdf_path: &Path, language: &str) -> Result<String, OcrError> {
        let workdir = TempDir::new()?;
        let image = pdf::render_page_png(pdf_path, 1, workdir.path(), OCR_DPI)?;
        self.run_tesseract(&image, language)
    }

    /// OCR every page and regenerate a searchable PDF.
    ///
    /// Pages are rastered via pdftoppm, recognized one by one for the
    /// text, then fed to tesseract's pdf renderer in a single batch to
    /// produce the replacement text layer.
    pub fn ocr_document(
        &self,
        pdf_path: &Path,
        page_count: u32,
        language: &str,
    ) -> Result<OcrOutcome, OcrError> {
        if page_count == 0 {
            return Err(OcrError::OcrFailed("document has no pages".into()));
        }

        let workdir = TempDir::new()?;
        let mut pages = Vec::with_capacity(page_count as usize);
        let mut images = Vec::with_capacity(page_count as usize);

        for page in 1..=page_count {
            let image = pdf::render_page_png(pdf_path, page, workdir.path(), OCR_DPI)?;
            let text = self.run_tesseract(&image, language)?;
            pages.push(text);
            images.push(image);
        }

        let regenerated = self.render_searchable_pdf(&images, workdir.path(), language)?;

        // Move the regenerated file out before the tempdir is dropped.
        let outcome_pdf = match regenerated {
            Some(tmp_pdf) => {
                let persisted = tempfile::Builder::new()
                    .prefix("ocr-")
                    .suffix(".pdf")
                    .tempfile()?
                    .into_temp_path();
                std::fs::copy(&tmp_pdf, &persisted)?;
                Some(persisted.keep().map_err(|e| OcrError::Io(e.into()))?)
            }
            None => None,
        };

        Ok(OcrOutcome {
            pages,
            language: language.to_string(),
            regenerated_pdf: outcome_pdf,
        })
    }

    /// Produce one searchable PDF from the page images.
    fn render_searchable_pdf(
        &self,
        images: &[PathBuf],
        workdir: &Path,
        language: &str,
    ) -> Result<Option<PathBuf>, OcrError> {
        if images.is_empty() {
            return Ok(None);
        }

        // tesseract accepts a list file of input images and renders a
        // single combined PDF.
        let list_path = workdir.join("pages.txt");
        let list: String = images
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(&list_path, list)?;

        let out_base = workdir.join("searchable");
        let status = Command::new("tesseract")
            .arg(&list_path)
            .arg(&out_base)
            .args(["-l", language, "pdf"])
            .status();

        match status {
            Ok(s) if s.success() => {
                let out_pdf = out_base.with_extension("pdf");
                if out_pdf.exists() {
                    Ok(Some(out_pdf))
                } else {
                    Ok(None)
                }
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                OcrError::BackendNotAvailable(
                    "tesseract not found (install tesseract-ocr)".to_string(),
                ),
            ),
            Err(e) => Err(OcrError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_mapping_unambiguous() {
        assert_eq!(script_to_languages("Cyrillic").candidates, vec!["rus"]);
        assert_eq!(script_to_languages("Hangul").candidates, vec!["kor"]);
        assert_eq!(script_to_languages("Han").candidates, vec!["chi_sim"]);
        assert_eq!(script_to_languages("Japanese").candidates, vec!["jpn"]);
        assert!(!script_to_languages("Cyrillic").is_ambiguous());
    }

    #[test]
    fn test_latin_script_is_ambiguous() {
        let guess = script_to_languages("Latin");
        assert!(guess.is_ambiguous());
        assert_eq!(guess.candidates[0], "eng");
        assert_eq!(guess.candidates.len(), 6);
    }

    #[test]
    fn test_all_candidates_are_supported() {
        for script in ["Latin", "Cyrillic", "Han", "Hangul", "Japanese", "Unknown"] {
            for lang in script_to_languages(script).candidates {
                assert!(SUPPORTED_LANGUAGES.contains(&lang), "{} unsupported", lang);
            }
        }
    }

    #[test]
    fn test_parse_osd_script() {
        let osd = "Page number: 0\nOrientation in degrees: 0\nScript: Cyrillic\nScript confidence: 1.83\n";
        assert_eq!(parse_osd_script(osd), Some("Cyrillic".to_string()));
        assert_eq!(parse_osd_script("no script line here"), None);
    }
}
