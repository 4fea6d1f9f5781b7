//! Document intake pipeline.
//!
//! raw document → text triage → extraction adapter → field reconciler →
//! duplicate pre-check → pending record. Extraction failures flow through
//! as manual-input records; only storage failures abort.

use crate::config::StorageSection;
use crate::error::Result;
use crate::extract::Extractor;
use crate::files;
use crate::normalize::is_sentinel;
use crate::pdf_text;
use crate::reconcile::reconcile;
use crate::store::{PendingInvoice, Store};
use chrono::Local;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

/// Raw and OCR text kept on the pending row are capped at this many
/// characters; the full text never needs to round-trip through the UI.
const AUDIT_TEXT_CHARS: usize = 10_000;

/// Per-document outcome of the intake pipeline.
#[derive(Debug)]
pub enum DocumentStatus {
    /// Pending record created, waiting for human validation.
    Processed { pending_id: i64 },
    /// Pre-check found the invoice number in the finalized store; no
    /// pending record was written.
    Duplicate { invoice_number: String },
    /// The document does not look like an invoice; a pending record was
    /// still created so a human can decide what to do with it.
    Skipped { pending_id: i64 },
}

/// Where a document came from, carried into `source_info` for audit.
#[derive(Debug, Clone, Copy, Default)]
pub struct Provenance<'a> {
    pub batch_id: Option<&'a str>,
    pub source: &'a str,
    /// Extra context merged into the provenance JSON (sender address,
    /// model used, ...).
    pub extra: Option<&'a Value>,
}

/// Aggregated result of a batch upload.
#[derive(Debug)]
pub struct BatchSummary {
    pub batch_id: String,
    pub processed: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub errors: usize,
    pub results: Vec<(String, Result<DocumentStatus>)>,
}

/// The intake pipeline with its injected collaborators.
pub struct Intake<'a> {
    pub store: &'a Store,
    pub extractor: &'a Extractor,
    pub dirs: &'a StorageSection,
}

impl Intake<'_> {
    /// Ingest a single uploaded document end to end.
    pub async fn process_document(
        &self,
        source_path: &Path,
        prov: Provenance<'_>,
    ) -> Result<DocumentStatus> {
        let (file_path, preview_path) = self.stage_file(source_path)?;
        let (text, ocr_text) = pdf_text::extract_document_text(&file_path)?;
        self.process_text(&file_path, &preview_path, &text, &ocr_text, prov)
            .await
    }

    /// Run the pipeline over already-extracted document text.
    ///
    /// Split out from [`Self::process_document`] so the extraction,
    /// reconciliation and persistence path can run without a parseable
    /// PDF on disk.
    pub async fn process_text(
        &self,
        file_path: &Path,
        preview_path: &Path,
        text: &str,
        ocr_text: &str,
        prov: Provenance<'_>,
    ) -> Result<DocumentStatus> {
        let filename = file_name_of(file_path);
        let span = info_span!("intake", file = %filename);

        async {
            let outcome = self.extractor.extract(text, ocr_text).await;
            let record = reconcile(&outcome.fields);

            // Cheap early exit before a pending row is materialized.
            // Sentinel numbers can't be checked; those documents proceed
            // to review.
            if !is_sentinel(&record.invoice_number)
                && self.store.is_duplicate(&record.invoice_number)?
            {
                warn!(invoice_number = %record.invoice_number, "duplicate detected at intake");
                return Ok(DocumentStatus::Duplicate {
                    invoice_number: record.invoice_number,
                });
            }

            let skipped = outcome.skipped;
            let draft = PendingInvoice {
                batch_id: prov.batch_id.map(str::to_string),
                file_path: file_path.to_string_lossy().into_owned(),
                original_path: file_path.to_string_lossy().into_owned(),
                preview_path: preview_path.to_string_lossy().into_owned(),
                needs_manual_input: !outcome.success,
                validation_status: "pending".to_string(),
                source: prov.source.to_string(),
                source_info: build_source_info(&prov, &filename),
                raw_text: truncate_chars(text, AUDIT_TEXT_CHARS),
                ocr_text: truncate_chars(ocr_text, AUDIT_TEXT_CHARS),
                extracted_data: outcome.to_json().to_string(),
                fields: record,
                ..PendingInvoice::default()
            };

            let pending_id = self.store.save_pending(&draft)?;
            info!(
                pending_id,
                success = outcome.success,
                skipped,
                "document processed into pending record"
            );

            if skipped {
                Ok(DocumentStatus::Skipped { pending_id })
            } else {
                Ok(DocumentStatus::Processed { pending_id })
            }
        }
        .instrument(span)
        .await
    }

    /// Ingest a group of documents under one fresh batch id, tracking
    /// each file through the batch queue. A single document's failure is
    /// recorded and the rest of the batch continues.
    pub async fn process_batch(
        &self,
        paths: &[PathBuf],
        source: &str,
        extra: Option<&Value>,
    ) -> BatchSummary {
        let batch_id = Uuid::new_v4().to_string();
        info!(batch_id = %batch_id, files = paths.len(), "starting batch");

        let mut summary = BatchSummary {
            batch_id: batch_id.clone(),
            processed: 0,
            skipped: 0,
            duplicates: 0,
            errors: 0,
            results: Vec::new(),
        };

        for (position, source_path) in paths.iter().enumerate() {
            let display_name = file_name_of(source_path);
            let prov = Provenance {
                batch_id: Some(&batch_id),
                source,
                extra,
            };
            let result = self.ingest_batch_file(source_path, position as i64, prov).await;

            match &result {
                Ok(DocumentStatus::Processed { .. }) => summary.processed += 1,
                Ok(DocumentStatus::Skipped { .. }) => summary.skipped += 1,
                Ok(DocumentStatus::Duplicate { .. }) => summary.duplicates += 1,
                Err(e) => {
                    warn!(file = %display_name, error = %e, "batch file failed");
                    summary.errors += 1;
                }
            }
            summary.results.push((display_name, result));
        }

        info!(
            batch_id = %batch_id,
            processed = summary.processed,
            skipped = summary.skipped,
            duplicates = summary.duplicates,
            errors = summary.errors,
            "batch complete"
        );
        summary
    }

    async fn ingest_batch_file(
        &self,
        source_path: &Path,
        position: i64,
        prov: Provenance<'_>,
    ) -> Result<DocumentStatus> {
        let (file_path, preview_path) = self.stage_file(source_path)?;
        let batch_id = prov.batch_id.unwrap_or_default();

        let queue_id = self.store.enqueue_batch_file(
            batch_id,
            &file_path.to_string_lossy(),
            &preview_path.to_string_lossy(),
            &file_name_of(&file_path),
            position,
        )?;

        let (text, ocr_text) = pdf_text::extract_document_text(&file_path)?;
        let status = self
            .process_text(&file_path, &preview_path, &text, &ocr_text, prov)
            .await?;

        if let DocumentStatus::Processed { pending_id } | DocumentStatus::Skipped { pending_id } =
            &status
        {
            self.store.attach_pending_to_queue(queue_id, *pending_id)?;
        }
        Ok(status)
    }

    /// Copy an incoming document into the managed areas and return
    /// `(saved path, preview path)`.
    fn stage_file(&self, source: &Path) -> Result<(PathBuf, PathBuf)> {
        let filename = files::sanitize_filename(&file_name_of(source));
        let file_path = files::save_upload(Path::new(&self.dirs.upload_dir), source, &filename)?;
        let preview_path = files::create_preview(Path::new(&self.dirs.preview_dir), &file_path);
        Ok((file_path, preview_path))
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "invoice.pdf".to_string())
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Provenance blob stored alongside every pending record.
fn build_source_info(prov: &Provenance<'_>, filename: &str) -> String {
    let mut info = json!({
        "source": prov.source,
        "batch_id": prov.batch_id,
        "processed_at": Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
        "filename": filename,
    });
    if let (Some(obj), Some(Value::Object(extra))) = (info.as_object_mut(), prov.extra) {
        for (key, value) in extra {
            obj.insert(key.clone(), value.clone());
        }
    }
    info.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_info_carries_provenance_and_extras() {
        let extra = json!({"from_addr": "billing@acme.example"});
        let prov = Provenance {
            batch_id: Some("batch-9"),
            source: "email_import",
            extra: Some(&extra),
        };
        let info = build_source_info(&prov, "a.pdf");
        let parsed: Value = serde_json::from_str(&info).unwrap();
        assert_eq!(parsed["source"], "email_import");
        assert_eq!(parsed["batch_id"], "batch-9");
        assert_eq!(parsed["filename"], "a.pdf");
        assert_eq!(parsed["from_addr"], "billing@acme.example");
        assert!(parsed["processed_at"].as_str().is_some());
    }

    #[test]
    fn truncation_is_char_safe() {
        let s = "ä".repeat(20);
        assert_eq!(truncate_chars(&s, 5).chars().count(), 5);
        assert_eq!(truncate_chars("short", 100), "short");
    }
}
