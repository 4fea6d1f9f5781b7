//! Validation and finalization.
//!
//! Pending records move `pending → human_validated → finalized`. The
//! finalize transition re-checks duplicates inside the storage
//! transaction, and concurrent finalize calls for the same invoice number
//! are serialized through a keyed lock so the check-then-insert cannot
//! race. File archival happens after commit and is strictly best-effort.

use crate::error::{PipelineError, Result};
use crate::files;
use crate::normalize::is_sentinel;
use crate::reconcile::CanonicalInvoiceRecord;
use crate::store::{PendingInvoice, Store};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Human edits from the validation form. `None` leaves the stored value
/// alone; an empty string is treated the same way when merging.
#[derive(Debug, Clone, Default)]
pub struct FinalizeEdits {
    pub supplier_name: Option<String>,
    pub company_name: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>,
    pub amount: Option<String>,
    pub vat_amount: Option<String>,
    pub description: Option<String>,
}

impl FinalizeEdits {
    /// Effective field values: the edit where one was provided, the stored
    /// pending value otherwise.
    pub fn merge(&self, pending: &PendingInvoice) -> CanonicalInvoiceRecord {
        fn pick(edit: &Option<String>, stored: &str) -> String {
            match edit.as_deref() {
                Some(value) if !value.is_empty() => value.to_string(),
                _ => stored.to_string(),
            }
        }
        CanonicalInvoiceRecord {
            supplier_name: pick(&self.supplier_name, &pending.fields.supplier_name),
            company_name: pick(&self.company_name, &pending.fields.company_name),
            invoice_number: pick(&self.invoice_number, &pending.fields.invoice_number),
            invoice_date: pick(&self.invoice_date, &pending.fields.invoice_date),
            amount: pick(&self.amount, &pending.fields.amount),
            vat_amount: pick(&self.vat_amount, &pending.fields.vat_amount),
            description: pick(&self.description, &pending.fields.description),
        }
    }
}

/// Per-invoice-number locks. Two finalize calls carrying the same number
/// take the same slot, so the second one sees the first one's insert when
/// it re-checks inside its transaction.
#[derive(Default)]
pub struct NumberLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl NumberLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, invoice_number: &str) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().expect("invoice lock registry poisoned");
        Arc::clone(
            slots
                .entry(invoice_number.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

/// Promote a human-approved pending record into the invoice store.
///
/// Returns the new invoice id, `NotFound` for an unknown pending id, or
/// `Duplicate` when the (re-checked) invoice number already exists; in
/// that case the pending row keeps its human edits but is not finalized.
pub fn finalize(
    store: &mut Store,
    locks: &NumberLocks,
    pending_id: i64,
    edits: &FinalizeEdits,
    archive_dir: Option<&Path>,
) -> Result<i64> {
    if !store.apply_validation(pending_id, edits)? {
        return Err(PipelineError::NotFound(format!("pending invoice {pending_id}")));
    }
    let pending = store
        .get_pending(pending_id)?
        .ok_or_else(|| PipelineError::NotFound(format!("pending invoice {pending_id}")))?;
    let fields = edits.merge(&pending);

    let source_note = match pending.batch_id {
        Some(ref batch_id) => format!("From batch {batch_id}, validated by human"),
        None => "Validated by human".to_string(),
    };

    let invoice_number = fields.invoice_number.trim().to_string();
    let slot = (!is_sentinel(&invoice_number)).then(|| locks.slot(&invoice_number));
    let _guard = slot
        .as_ref()
        .map(|s| s.lock().expect("invoice number lock poisoned"));

    let invoice_id = store.finalize_pending(&pending, &fields, &source_note)?;

    if let Some(archive_dir) = archive_dir {
        archive_invoice(store, invoice_id, &pending, &fields, archive_dir);
    }

    Ok(invoice_id)
}

/// Move the finalized file into the organized archive and point the
/// invoice row at it. Every failure here is logged and swallowed; the
/// finalize transaction has already committed.
fn archive_invoice(
    store: &Store,
    invoice_id: i64,
    pending: &PendingInvoice,
    fields: &CanonicalInvoiceRecord,
    archive_dir: &Path,
) {
    let Some(archived) = files::organize_file(archive_dir, fields, Path::new(&pending.file_path))
    else {
        return;
    };

    if let Err(e) = store.update_invoice_file_path(invoice_id, &archived.to_string_lossy()) {
        warn!(invoice_id, error = %e, "could not record archived file path");
        return;
    }
    files::cleanup_processed_files(
        Path::new(&pending.file_path),
        &archived,
        Path::new(&pending.preview_path),
    );
}

/// Outcome of finalizing one batch.
#[derive(Debug, Default)]
pub struct BatchFinalizeSummary {
    pub success_count: usize,
    pub error_count: usize,
    pub errors: Vec<BatchItemError>,
}

#[derive(Debug)]
pub struct BatchItemError {
    pub pending_id: i64,
    pub error: String,
    pub is_duplicate: bool,
}

/// Finalize a set of validated batch items. One item failing (including
/// on a duplicate) never aborts the rest.
pub fn finalize_batch(
    store: &mut Store,
    locks: &NumberLocks,
    items: &[(i64, FinalizeEdits)],
    archive_dir: Option<&Path>,
) -> BatchFinalizeSummary {
    let mut summary = BatchFinalizeSummary::default();

    for (pending_id, edits) in items {
        match finalize(store, locks, *pending_id, edits, archive_dir) {
            Ok(invoice_id) => {
                info!(pending_id, invoice_id, "batch item finalized");
                summary.success_count += 1;
            }
            Err(e) => {
                warn!(pending_id, error = %e, "batch item failed to finalize");
                summary.error_count += 1;
                summary.errors.push(BatchItemError {
                    pending_id: *pending_id,
                    error: e.to_string(),
                    is_duplicate: e.is_duplicate(),
                });
            }
        }
    }

    info!(
        success = summary.success_count,
        errors = summary.error_count,
        "batch finalize complete"
    );
    summary
}
