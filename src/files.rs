//! Managed file areas: uploads, previews, and the organized archive.
//!
//! None of this is transactional with the database. Archival and cleanup
//! are best-effort; an orphaned temp file is acceptable, a lost database
//! row is not.

use crate::reconcile::CanonicalInvoiceRecord;
use chrono::{Datelike, Local, NaiveDate};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Sanitize an upload filename while preserving spaces and parentheses.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned = Regex::new(r"[^\w\s().€-]")
        .unwrap()
        .replace_all(name, "_")
        .into_owned();
    let collapsed = Regex::new(r"\s+")
        .unwrap()
        .replace_all(&cleaned, " ")
        .trim()
        .to_string();
    if collapsed.is_empty() {
        "invoice.pdf".to_string()
    } else {
        collapsed
    }
}

/// Copy an incoming document into the upload area under its sanitized
/// name. Copy, not move; the caller's source file is left alone.
pub fn save_upload(upload_dir: &Path, source: &Path, filename: &str) -> std::io::Result<PathBuf> {
    fs::create_dir_all(upload_dir)?;
    let target = upload_dir.join(filename);
    if source != target {
        fs::copy(source, &target)?;
    }
    info!(path = %target.display(), "saved upload");
    Ok(target)
}

/// Create the preview copy the validation UI renders. Falls back to the
/// original path when the copy fails; a missing preview must not block
/// intake.
pub fn create_preview(preview_dir: &Path, file_path: &Path) -> PathBuf {
    let filename = file_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "invoice.pdf".to_string());
    let preview_path = preview_dir.join(format!("preview_{filename}"));

    let copied = fs::create_dir_all(preview_dir).and_then(|_| fs::copy(file_path, &preview_path));
    match copied {
        Ok(_) => preview_path,
        Err(e) => {
            warn!(error = %e, "could not create preview, using original file path");
            file_path.to_path_buf()
        }
    }
}

/// Clean a name for use as an archive folder component.
fn clean_component(name: &str) -> String {
    let cleaned = Regex::new(r"[^\w\s-]")
        .unwrap()
        .replace_all(name, "")
        .trim()
        .to_string();
    if cleaned.is_empty() {
        "Unknown".to_string()
    } else {
        cleaned
    }
}

/// Year and month for the archive path, from the invoice date when it
/// parses, from today otherwise.
fn archive_year_month(invoice_date: &str) -> (String, String) {
    let date = crate::normalize::normalize_date(invoice_date)
        .and_then(|iso| NaiveDate::parse_from_str(&iso, "%Y-%m-%d").ok());
    match date {
        Some(d) => (d.year().to_string(), format!("{:02}", d.month())),
        None => {
            let now = Local::now();
            (now.year().to_string(), format!("{:02}", now.month()))
        }
    }
}

/// File an invoice into the organized archive:
/// `by_company/<company>/by_date/<year>/<month>/<supplier>/<invoice_number>.pdf`.
///
/// Returns the archived path, or `None` on any failure; archival never
/// fails a finalize.
pub fn organize_file(
    archive_dir: &Path,
    fields: &CanonicalInvoiceRecord,
    source: &Path,
) -> Option<PathBuf> {
    let company = clean_component(&fields.company_name);
    let supplier = clean_component(&fields.supplier_name);
    let (year, month) = archive_year_month(&fields.invoice_date);

    let target_dir = archive_dir
        .join("by_company")
        .join(company)
        .join("by_date")
        .join(year)
        .join(month)
        .join(supplier);

    let number = fields.invoice_number.trim();
    let filename = if number.is_empty() {
        let base = source
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "invoice".to_string());
        format!("{}_{base}.pdf", Local::now().format("%Y%m%d_%H%M%S"))
    } else {
        let clean_number = Regex::new(r"[^\w-]").unwrap().replace_all(number, "_");
        format!("{clean_number}.pdf")
    };

    if let Err(e) = fs::create_dir_all(&target_dir) {
        warn!(error = %e, dir = %target_dir.display(), "could not create archive directory");
        return None;
    }

    let target = unique_target(&target_dir, &filename);
    match fs::copy(source, &target) {
        Ok(_) => {
            info!(path = %target.display(), "organized file into archive");
            Some(target)
        }
        Err(e) => {
            warn!(error = %e, "could not copy file into archive");
            None
        }
    }
}

/// First free name in `dir`, appending `_1`, `_2`, ... when taken.
fn unique_target(dir: &Path, filename: &str) -> PathBuf {
    let mut target = dir.join(filename);
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "invoice".to_string());
    let mut counter = 1;
    while target.exists() {
        target = dir.join(format!("{stem}_{counter}.pdf"));
        counter += 1;
    }
    target
}

/// Remove the upload and preview copies once a file has been archived.
/// Best-effort; failures are logged and ignored.
pub fn cleanup_processed_files(original: &Path, archived: &Path, preview: &Path) {
    if original == archived {
        return;
    }
    for path in [original, preview] {
        if path == archived || !path.exists() {
            continue;
        }
        match fs::remove_file(path) {
            Ok(()) => info!(path = %path.display(), "removed processed file"),
            Err(e) => warn!(path = %path.display(), error = %e, "could not remove processed file"),
        }
    }
}
