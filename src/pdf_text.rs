//! PDF text triage.
//!
//! Classifies a document as text-bearing, scanned, or broken before any
//! model call. Scanned PDFs yield no text here (no OCR engine is wired
//! in); the pipeline turns that into a manual-input record rather than an
//! error.

use lopdf::Document;
use std::path::Path;
use tracing::{info, warn};

/// Result of attempting to extract text from a PDF.
#[derive(Debug)]
pub enum PdfContent {
    /// The PDF contains extractable text.
    Text(String),
    /// The PDF appears to be scanned / image-only.
    ScannedImage,
    /// Something went wrong during extraction.
    Error(String),
}

/// Minimum number of non-whitespace characters we expect from a "real"
/// text PDF. Below this threshold we treat it as scanned.
const MIN_TEXT_CHARS: usize = 30;

/// Classify raw PDF bytes and extract their text when present.
pub fn classify_pdf(pdf_bytes: &[u8]) -> PdfContent {
    let doc = match Document::load_mem(pdf_bytes) {
        Ok(d) => d,
        Err(e) => return PdfContent::Error(format!("failed to parse PDF: {e}")),
    };

    if looks_like_scanned(&doc) {
        info!("PDF structural check: likely scanned / image-only");
        return PdfContent::ScannedImage;
    }

    match pdf_extract::extract_text_from_mem(pdf_bytes) {
        Ok(text) => {
            let meaningful = text.chars().filter(|c| !c.is_whitespace()).count();
            if meaningful < MIN_TEXT_CHARS {
                info!(chars = meaningful, "extracted text too short, treating as scanned");
                PdfContent::ScannedImage
            } else {
                info!(chars = meaningful, "text extracted successfully");
                PdfContent::Text(text)
            }
        }
        Err(e) => {
            warn!(error = %e, "pdf-extract failed, may be scanned or corrupted");
            PdfContent::ScannedImage
        }
    }
}

/// Does a page's `Resources` dictionary contain a non-empty entry under
/// `key` (e.g. `Font`, `XObject`)?
fn page_has_resource(doc: &Document, page_dict: &lopdf::Dictionary, key: &[u8]) -> bool {
    page_dict
        .get(b"Resources")
        .ok()
        .and_then(|r| doc.dereference(r).ok())
        .and_then(|(_, resolved)| resolved.as_dict().ok())
        .and_then(|res| res.get(key).ok())
        .and_then(|entry| doc.dereference(entry).ok())
        .and_then(|(_, resolved)| resolved.as_dict().ok())
        .is_some_and(|dict| !dict.is_empty())
}

/// Heuristic: a page with XObject images but no Font resources is almost
/// certainly a scan. When at least 80% of pages look like that, the whole
/// document is treated as scanned.
fn looks_like_scanned(doc: &Document) -> bool {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return false; // can't tell, let text extraction try
    }

    let mut image_only_pages = 0;
    for object_id in pages.values() {
        let Ok(page_obj) = doc.get_object(*object_id) else {
            continue;
        };
        let Ok(page_dict) = page_obj.as_dict() else {
            continue;
        };

        let has_fonts = page_has_resource(doc, page_dict, b"Font");
        let has_images = page_has_resource(doc, page_dict, b"XObject");
        if has_images && !has_fonts {
            image_only_pages += 1;
        }
    }

    let ratio = image_only_pages as f64 / pages.len() as f64;
    info!(
        total_pages = pages.len(),
        image_only = image_only_pages,
        ratio = format!("{ratio:.2}"),
        "scanned-page analysis"
    );
    ratio >= 0.8
}

/// Read a document and return `(text, ocr_text)`.
///
/// `ocr_text` is an audit slot: it stays empty until an OCR engine is
/// wired in, so scanned documents come back as `("", "")` and flow into
/// the manual-input path. Parse failures are recovered the same way; only
/// reading the file itself can fail.
pub fn extract_document_text(path: &Path) -> crate::Result<(String, String)> {
    let bytes = std::fs::read(path)?;
    match classify_pdf(&bytes) {
        PdfContent::Text(text) => Ok((text, String::new())),
        PdfContent::ScannedImage => {
            info!(path = %path.display(), "scanned document, no text available");
            Ok((String::new(), String::new()))
        }
        PdfContent::Error(e) => {
            warn!(path = %path.display(), error = %e, "unreadable PDF, routing to manual input");
            Ok((String::new(), String::new()))
        }
    }
}
