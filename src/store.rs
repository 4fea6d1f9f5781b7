//! SQLite persistence.
//!
//! Pending invoices, the finalized invoice store, the supplier/company
//! dimension tables and the batch queue all live here. The finalize
//! transition runs in one transaction with the duplicate re-check inside
//! it, which closes the race between the intake pre-check and the insert.

use crate::error::{PipelineError, Result};
use crate::finalize::FinalizeEdits;
use crate::normalize::{is_sentinel, normalize_amount, normalize_date};
use crate::reconcile::CanonicalInvoiceRecord;
use chrono::Local;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use tracing::info;

/// Local timestamp in ISO-8601, the format used for every *_at column.
pub fn now_iso() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// An extracted-but-not-yet-approved invoice. Owns the lifecycle of its
/// upload/preview files until finalized or abandoned.
#[derive(Debug, Clone, Default)]
pub struct PendingInvoice {
    pub id: Option<i64>,
    pub batch_id: Option<String>,
    pub file_path: String,
    pub original_path: String,
    pub preview_path: String,
    pub fields: CanonicalInvoiceRecord,
    pub needs_manual_input: bool,
    pub validation_status: String,
    pub is_validated: bool,
    pub is_finalized: bool,
    pub source: String,
    /// Freeform provenance JSON (batch id, original filename, model used, ...).
    pub source_info: String,
    pub raw_text: String,
    pub ocr_text: String,
    /// Full raw-extraction JSON for forensic replay.
    pub extracted_data: String,
    pub created_at: String,
    pub updated_at: String,
    pub validated_at: Option<String>,
    pub finalized_at: Option<String>,
}

/// A human-approved invoice in the permanent store.
#[derive(Debug, Clone)]
pub struct FinalizedInvoice {
    pub id: i64,
    pub file_path: String,
    pub original_path: String,
    pub invoice_number: String,
    pub invoice_date: String,
    pub normalized_date: Option<String>,
    pub amount: f64,
    pub amount_original: String,
    pub vat_amount: f64,
    pub vat_amount_original: String,
    pub description: String,
    pub supplier_id: Option<i64>,
    pub company_id: Option<i64>,
    pub processed_at: String,
    pub source_info: String,
}

/// One file's slot in a batch upload.
#[derive(Debug, Clone)]
pub struct BatchQueueEntry {
    pub id: i64,
    pub batch_id: String,
    pub file_path: String,
    pub preview_path: String,
    pub filename: String,
    pub status: String,
    pub pending_id: Option<i64>,
    pub position: i64,
}

/// Result of an explicit duplicate lookup, shaped for the web layer.
#[derive(Debug, Clone)]
pub struct DuplicateCheck {
    pub is_duplicate: bool,
    pub invoice_number: String,
}

#[derive(Debug, Clone, Copy)]
pub struct StoreCounts {
    pub pending_total: usize,
    pub pending_finalized: usize,
    pub invoices_total: usize,
}

pub struct Store {
    conn: Connection,
}

const PENDING_COLUMNS: &str = "id, batch_id, file_path, original_path, preview_path, \
     invoice_number, invoice_date, amount, vat_amount, description, supplier_name, company_name, \
     needs_manual_input, validation_status, is_validated, is_finalized, \
     source, source_info, raw_text, ocr_text, extracted_data, \
     created_at, updated_at, validated_at, finalized_at";

impl Store {
    /// Open (or create) the database and make sure the schema exists.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS suppliers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT UNIQUE,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS companies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT UNIQUE,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS invoices (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_path TEXT,
                original_path TEXT,
                invoice_number TEXT,
                invoice_date TEXT,
                normalized_date TEXT,
                amount REAL,
                amount_original TEXT,
                vat_amount REAL,
                vat_amount_original TEXT,
                description TEXT,
                supplier_id INTEGER,
                company_id INTEGER,
                processed_at TEXT,
                source_info TEXT,
                FOREIGN KEY (supplier_id) REFERENCES suppliers(id),
                FOREIGN KEY (company_id) REFERENCES companies(id)
            );

            CREATE TABLE IF NOT EXISTS pending_invoices (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                batch_id TEXT,
                file_path TEXT,
                original_path TEXT,
                preview_path TEXT,
                invoice_number TEXT,
                invoice_date TEXT,
                amount TEXT,
                vat_amount TEXT,
                description TEXT,
                supplier_name TEXT,
                company_name TEXT,
                needs_manual_input INTEGER NOT NULL DEFAULT 0,
                validation_status TEXT NOT NULL DEFAULT 'pending',
                is_validated INTEGER NOT NULL DEFAULT 0,
                is_finalized INTEGER NOT NULL DEFAULT 0,
                source TEXT,
                source_info TEXT,
                raw_text TEXT,
                ocr_text TEXT,
                extracted_data TEXT,
                created_at TEXT,
                updated_at TEXT,
                validated_at TEXT,
                finalized_at TEXT
            );

            CREATE TABLE IF NOT EXISTS batch_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                batch_id TEXT NOT NULL,
                file_path TEXT NOT NULL,
                preview_path TEXT,
                filename TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                pending_id INTEGER,
                position INTEGER,
                processed_at TEXT,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_invoices_number ON invoices(invoice_number);
            CREATE INDEX IF NOT EXISTS idx_pending_batch ON pending_invoices(batch_id);
            CREATE INDEX IF NOT EXISTS idx_pending_status ON pending_invoices(validation_status);
            CREATE INDEX IF NOT EXISTS idx_queue_batch ON batch_queue(batch_id);",
        )?;

        info!("database initialized successfully");
        Ok(Self { conn })
    }

    // -----------------------------------------------------------------------
    // Pending invoices
    // -----------------------------------------------------------------------

    /// Insert a pending record. This is the one place the intake pipeline
    /// is allowed to fail loudly; losing an uploaded document silently is
    /// unacceptable.
    pub fn save_pending(&self, draft: &PendingInvoice) -> Result<i64> {
        let now = now_iso();
        self.conn.execute(
            "INSERT INTO pending_invoices (
                batch_id, file_path, original_path, preview_path,
                invoice_number, invoice_date, amount, vat_amount,
                description, supplier_name, company_name,
                needs_manual_input, validation_status, is_validated, is_finalized,
                source, source_info, raw_text, ocr_text, extracted_data,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                      ?12, ?13, 0, 0, ?14, ?15, ?16, ?17, ?18, ?19, ?19)",
            params![
                draft.batch_id,
                draft.file_path,
                draft.original_path,
                draft.preview_path,
                draft.fields.invoice_number,
                draft.fields.invoice_date,
                draft.fields.amount,
                draft.fields.vat_amount,
                draft.fields.description,
                draft.fields.supplier_name,
                draft.fields.company_name,
                draft.needs_manual_input,
                draft.validation_status,
                draft.source,
                draft.source_info,
                draft.raw_text,
                draft.ocr_text,
                draft.extracted_data,
                now,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(
            pending_id = id,
            invoice_number = %draft.fields.invoice_number,
            source = %draft.source,
            "pending invoice stored"
        );
        Ok(id)
    }

    pub fn get_pending(&self, pending_id: i64) -> Result<Option<PendingInvoice>> {
        let sql = format!("SELECT {PENDING_COLUMNS} FROM pending_invoices WHERE id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![pending_id], Self::row_to_pending)
            .optional()?;
        Ok(row)
    }

    pub fn get_pending_for_batch(&self, batch_id: &str) -> Result<Vec<PendingInvoice>> {
        let sql =
            format!("SELECT {PENDING_COLUMNS} FROM pending_invoices WHERE batch_id = ?1 ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![batch_id], Self::row_to_pending)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn row_to_pending(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingInvoice> {
        Ok(PendingInvoice {
            id: Some(row.get(0)?),
            batch_id: row.get(1)?,
            file_path: row.get(2)?,
            original_path: row.get(3)?,
            preview_path: row.get(4)?,
            fields: CanonicalInvoiceRecord {
                invoice_number: row.get(5)?,
                invoice_date: row.get(6)?,
                amount: row.get(7)?,
                vat_amount: row.get(8)?,
                description: row.get(9)?,
                supplier_name: row.get(10)?,
                company_name: row.get(11)?,
            },
            needs_manual_input: row.get(12)?,
            validation_status: row.get(13)?,
            is_validated: row.get(14)?,
            is_finalized: row.get(15)?,
            source: row.get(16)?,
            source_info: row.get(17)?,
            raw_text: row.get(18)?,
            ocr_text: row.get(19)?,
            extracted_data: row.get(20)?,
            created_at: row.get(21)?,
            updated_at: row.get(22)?,
            validated_at: row.get(23)?,
            finalized_at: row.get(24)?,
        })
    }

    /// Write human edits onto a pending row and mark it human-validated.
    /// Only fields the human actually provided are touched.
    pub fn apply_validation(&self, pending_id: i64, edits: &FinalizeEdits) -> Result<bool> {
        let now = now_iso();
        let assignments: Vec<(&str, &String)> = [
            ("supplier_name", &edits.supplier_name),
            ("company_name", &edits.company_name),
            ("invoice_number", &edits.invoice_number),
            ("invoice_date", &edits.invoice_date),
            ("amount", &edits.amount),
            ("vat_amount", &edits.vat_amount),
            ("description", &edits.description),
        ]
        .into_iter()
        .filter_map(|(col, value)| value.as_ref().map(|v| (col, v)))
        .collect();

        let mut sql = String::from(
            "UPDATE pending_invoices \
             SET is_validated = 1, validation_status = 'human_validated', \
                 validated_at = ?1, updated_at = ?1",
        );
        for (i, (col, _)) in assignments.iter().enumerate() {
            sql.push_str(&format!(", {col} = ?{}", i + 2));
        }
        sql.push_str(&format!(" WHERE id = ?{}", assignments.len() + 2));

        let mut bind: Vec<&dyn rusqlite::ToSql> = vec![&now];
        for (_, value) in &assignments {
            bind.push(*value);
        }
        bind.push(&pending_id);

        let changed = self.conn.execute(&sql, bind.as_slice())?;
        Ok(changed > 0)
    }

    // -----------------------------------------------------------------------
    // Duplicate detection
    // -----------------------------------------------------------------------

    /// Loose three-way match: a number is a duplicate when a finalized
    /// invoice number equals it, starts with it, or ends with it. Catches
    /// extraction variants like leading zeros or suffix checksums, at the
    /// cost of false positives on very short numbers.
    pub fn is_duplicate(&self, invoice_number: &str) -> Result<bool> {
        if is_sentinel(invoice_number) {
            return Ok(false);
        }
        Ok(invoice_number_exists(&self.conn, invoice_number.trim())?)
    }

    pub fn check_duplicate(&self, invoice_number: &str) -> Result<DuplicateCheck> {
        Ok(DuplicateCheck {
            is_duplicate: self.is_duplicate(invoice_number)?,
            invoice_number: invoice_number.to_string(),
        })
    }

    // -----------------------------------------------------------------------
    // Finalization
    // -----------------------------------------------------------------------

    /// Promote a pending invoice into the permanent store.
    ///
    /// Runs in one transaction: duplicate re-check, supplier/company
    /// get-or-create, normalized insert, pending row marked finalized,
    /// batch queue advanced. A duplicate aborts the whole transaction and
    /// leaves the pending row untouched.
    pub fn finalize_pending(
        &mut self,
        pending: &PendingInvoice,
        fields: &CanonicalInvoiceRecord,
        source_note: &str,
    ) -> Result<i64> {
        let pending_id = pending.id.expect("pending invoice must have an id from DB");
        let tx = self.conn.transaction()?;

        let invoice_number = fields.invoice_number.trim();
        if !is_sentinel(invoice_number) && invoice_number_exists(&tx, invoice_number)? {
            return Err(PipelineError::Duplicate {
                invoice_number: invoice_number.to_string(),
            });
        }

        let supplier_id = get_or_create_supplier(&tx, &fields.supplier_name)?;
        let company_id = get_or_create_company(&tx, &fields.company_name)?;

        let amount = normalize_amount(&fields.amount);
        let vat_amount = normalize_amount(&fields.vat_amount);
        let normalized_date = normalize_date(&fields.invoice_date);
        let now = now_iso();

        tx.execute(
            "INSERT INTO invoices (
                file_path, original_path, invoice_number, invoice_date, normalized_date,
                amount, amount_original, vat_amount, vat_amount_original,
                description, supplier_id, company_id, processed_at, source_info
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                pending.file_path,
                pending.original_path,
                fields.invoice_number,
                fields.invoice_date,
                normalized_date,
                amount,
                fields.amount,
                vat_amount,
                fields.vat_amount,
                fields.description,
                supplier_id,
                company_id,
                now,
                source_note,
            ],
        )?;
        let invoice_id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE pending_invoices SET is_finalized = 1, finalized_at = ?1, updated_at = ?1 \
             WHERE id = ?2",
            params![now, pending_id],
        )?;

        if let Some(ref batch_id) = pending.batch_id {
            tx.execute(
                "UPDATE batch_queue SET status = 'processed', processed_at = ?1 \
                 WHERE batch_id = ?2 AND pending_id = ?3",
                params![now, batch_id, pending_id],
            )?;
        }

        tx.commit()?;
        info!(
            invoice_id,
            pending_id,
            invoice_number = %fields.invoice_number,
            amount,
            "invoice finalized"
        );
        Ok(invoice_id)
    }

    pub fn get_invoice(&self, invoice_id: i64) -> Result<Option<FinalizedInvoice>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, file_path, original_path, invoice_number, invoice_date, \
                        normalized_date, amount, amount_original, vat_amount, \
                        vat_amount_original, description, supplier_id, company_id, \
                        processed_at, source_info \
                 FROM invoices WHERE id = ?1",
                params![invoice_id],
                |row| {
                    Ok(FinalizedInvoice {
                        id: row.get(0)?,
                        file_path: row.get(1)?,
                        original_path: row.get(2)?,
                        invoice_number: row.get(3)?,
                        invoice_date: row.get(4)?,
                        normalized_date: row.get(5)?,
                        amount: row.get(6)?,
                        amount_original: row.get(7)?,
                        vat_amount: row.get(8)?,
                        vat_amount_original: row.get(9)?,
                        description: row.get(10)?,
                        supplier_id: row.get(11)?,
                        company_id: row.get(12)?,
                        processed_at: row.get(13)?,
                        source_info: row.get(14)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Point a finalized invoice at its archived file location. Called
    /// after best-effort archival, outside the finalize transaction.
    pub fn update_invoice_file_path(&self, invoice_id: i64, file_path: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE invoices SET file_path = ?1 WHERE id = ?2",
            params![file_path, invoice_id],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Dimension tables
    // -----------------------------------------------------------------------

    /// Supplier id by exact name, inserting on first sight. A missing or
    /// not-found supplier yields no row (NULL foreign key).
    pub fn get_or_create_supplier(&self, name: &str) -> Result<Option<i64>> {
        Ok(get_or_create_supplier(&self.conn, name)?)
    }

    /// Company id by exact name; missing or not-found names collapse to
    /// the "Unknown" company.
    pub fn get_or_create_company(&self, name: &str) -> Result<i64> {
        Ok(get_or_create_company(&self.conn, name)?)
    }

    // -----------------------------------------------------------------------
    // Batch queue
    // -----------------------------------------------------------------------

    pub fn enqueue_batch_file(
        &self,
        batch_id: &str,
        file_path: &str,
        preview_path: &str,
        filename: &str,
        position: i64,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO batch_queue (batch_id, file_path, preview_path, filename, status, position) \
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5)",
            params![batch_id, file_path, preview_path, filename, position],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Link a queue slot to its pending record once extraction is done.
    pub fn attach_pending_to_queue(&self, queue_id: i64, pending_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE batch_queue SET pending_id = ?1, status = 'pending_validation' WHERE id = ?2",
            params![pending_id, queue_id],
        )?;
        Ok(())
    }

    pub fn queue_entries(&self, batch_id: &str) -> Result<Vec<BatchQueueEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, batch_id, file_path, preview_path, filename, status, pending_id, position \
             FROM batch_queue WHERE batch_id = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![batch_id], |row| {
            Ok(BatchQueueEntry {
                id: row.get(0)?,
                batch_id: row.get(1)?,
                file_path: row.get(2)?,
                preview_path: row.get(3)?,
                filename: row.get(4)?,
                status: row.get(5)?,
                pending_id: row.get(6)?,
                position: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // -----------------------------------------------------------------------
    // Statistics
    // -----------------------------------------------------------------------

    pub fn counts(&self) -> Result<StoreCounts> {
        let pending_total: usize =
            self.conn
                .query_row("SELECT COUNT(*) FROM pending_invoices", [], |row| row.get(0))?;
        let pending_finalized: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM pending_invoices WHERE is_finalized = 1",
            [],
            |row| row.get(0),
        )?;
        let invoices_total: usize =
            self.conn
                .query_row("SELECT COUNT(*) FROM invoices", [], |row| row.get(0))?;
        Ok(StoreCounts {
            pending_total,
            pending_finalized,
            invoices_total,
        })
    }
}

fn invoice_number_exists(conn: &Connection, invoice_number: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM invoices \
         WHERE invoice_number = ?1 OR invoice_number LIKE ?2 OR invoice_number LIKE ?3",
        params![
            invoice_number,
            format!("{invoice_number}%"),
            format!("%{invoice_number}")
        ],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn lookup_or_insert(conn: &Connection, table: Dimension, name: &str) -> rusqlite::Result<i64> {
    let (select, insert) = match table {
        Dimension::Supplier => (
            "SELECT id FROM suppliers WHERE name = ?1",
            "INSERT INTO suppliers (name) VALUES (?1)",
        ),
        Dimension::Company => (
            "SELECT id FROM companies WHERE name = ?1",
            "INSERT INTO companies (name) VALUES (?1)",
        ),
    };
    if let Some(id) = conn
        .query_row(select, params![name], |row| row.get(0))
        .optional()?
    {
        return Ok(id);
    }
    conn.execute(insert, params![name])?;
    let id = conn.last_insert_rowid();
    info!(name = %name, id, table = ?table, "created dimension record");
    Ok(id)
}

#[derive(Debug, Clone, Copy)]
enum Dimension {
    Supplier,
    Company,
}

fn get_or_create_supplier(conn: &Connection, name: &str) -> rusqlite::Result<Option<i64>> {
    let name = name.trim();
    if name.is_empty() || name == "Nicht gefunden" {
        return Ok(None);
    }
    lookup_or_insert(conn, Dimension::Supplier, name).map(Some)
}

fn get_or_create_company(conn: &Connection, name: &str) -> rusqlite::Result<i64> {
    let name = name.trim();
    let name = if name.is_empty() || name == "Nicht gefunden" {
        "Unknown"
    } else {
        name
    };
    lookup_or_insert(conn, Dimension::Company, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_store() -> Store {
        Store::new(":memory:").unwrap()
    }

    fn pending_with_number(number: &str) -> PendingInvoice {
        PendingInvoice {
            fields: CanonicalInvoiceRecord {
                invoice_number: number.to_string(),
                supplier_name: "Acme GmbH".to_string(),
                company_name: "Kunde AG".to_string(),
                amount: "100,00 EUR".to_string(),
                vat_amount: "19,00 EUR".to_string(),
                invoice_date: "31.12.2023".to_string(),
                description: "Beratung".to_string(),
            },
            validation_status: "pending".to_string(),
            source: "upload".to_string(),
            ..PendingInvoice::default()
        }
    }

    #[test]
    fn pending_roundtrip() {
        let store = memory_store();
        let id = store.save_pending(&pending_with_number("RE-1")).unwrap();
        let loaded = store.get_pending(id).unwrap().unwrap();
        assert_eq!(loaded.fields.invoice_number, "RE-1");
        assert_eq!(loaded.fields.amount, "100,00 EUR");
        assert_eq!(loaded.validation_status, "pending");
        assert!(!loaded.is_finalized);
        assert!(loaded.validated_at.is_none());
    }

    #[test]
    fn missing_pending_is_none() {
        let store = memory_store();
        assert!(store.get_pending(42).unwrap().is_none());
    }

    #[test]
    fn finalize_normalizes_amounts_and_date() {
        let mut store = memory_store();
        let pending_id = store.save_pending(&pending_with_number("RE-100")).unwrap();
        let pending = store.get_pending(pending_id).unwrap().unwrap();
        let fields = pending.fields.clone();

        let invoice_id = store
            .finalize_pending(&pending, &fields, "Validated by human")
            .unwrap();
        let invoice = store.get_invoice(invoice_id).unwrap().unwrap();

        assert_eq!(invoice.amount, 100.00);
        assert_eq!(invoice.amount_original, "100,00 EUR");
        assert_eq!(invoice.vat_amount, 19.00);
        assert_eq!(invoice.normalized_date.as_deref(), Some("2023-12-31"));

        let reloaded = store.get_pending(pending_id).unwrap().unwrap();
        assert!(reloaded.is_finalized);
        assert!(reloaded.finalized_at.is_some());
    }

    #[test]
    fn duplicate_three_way_match() {
        let mut store = memory_store();
        let pending_id = store.save_pending(&pending_with_number("RE-2023-001")).unwrap();
        let pending = store.get_pending(pending_id).unwrap().unwrap();
        let fields = pending.fields.clone();
        store.finalize_pending(&pending, &fields, "test").unwrap();

        assert!(store.is_duplicate("RE-2023-001").unwrap()); // exact
        assert!(store.is_duplicate("RE-2023").unwrap()); // stored starts with query
        assert!(store.is_duplicate("001").unwrap()); // stored ends with query
        assert!(!store.is_duplicate("RE-2023-0010").unwrap()); // longer, no match
        assert!(!store.is_duplicate("").unwrap());
        assert!(!store.is_duplicate("Nicht gefunden").unwrap());

        let check = store.check_duplicate("RE-2023-001").unwrap();
        assert!(check.is_duplicate);
        assert_eq!(check.invoice_number, "RE-2023-001");
    }

    #[test]
    fn finalize_rejects_duplicate_and_rolls_back() {
        let mut store = memory_store();
        let first_id = store.save_pending(&pending_with_number("INV-1")).unwrap();
        let first = store.get_pending(first_id).unwrap().unwrap();
        let first_fields = first.fields.clone();
        store.finalize_pending(&first, &first_fields, "test").unwrap();

        let second_id = store.save_pending(&pending_with_number("INV-1")).unwrap();
        let second = store.get_pending(second_id).unwrap().unwrap();
        let second_fields = second.fields.clone();
        let err = store
            .finalize_pending(&second, &second_fields, "test")
            .unwrap_err();
        assert!(matches!(err, PipelineError::Duplicate { ref invoice_number } if invoice_number == "INV-1"));

        // No second row, and the losing pending record is not finalized.
        assert_eq!(store.counts().unwrap().invoices_total, 1);
        assert!(!store.get_pending(second_id).unwrap().unwrap().is_finalized);
    }

    #[test]
    fn sentinel_invoice_numbers_skip_duplicate_check() {
        let mut store = memory_store();
        for _ in 0..2 {
            let id = store.save_pending(&pending_with_number("Nicht gefunden")).unwrap();
            let pending = store.get_pending(id).unwrap().unwrap();
            let fields = pending.fields.clone();
            store.finalize_pending(&pending, &fields, "test").unwrap();
        }
        assert_eq!(store.counts().unwrap().invoices_total, 2);
    }

    #[test]
    fn dimension_get_or_create_deduplicates() {
        let store = memory_store();
        let a = store.get_or_create_supplier("Acme GmbH").unwrap().unwrap();
        let b = store.get_or_create_supplier("Acme GmbH").unwrap().unwrap();
        assert_eq!(a, b);

        assert!(store.get_or_create_supplier("").unwrap().is_none());
        assert!(store.get_or_create_supplier("Nicht gefunden").unwrap().is_none());

        let unknown_a = store.get_or_create_company("").unwrap();
        let unknown_b = store.get_or_create_company("Nicht gefunden").unwrap();
        assert_eq!(unknown_a, unknown_b);
    }

    #[test]
    fn batch_queue_lifecycle() {
        let mut store = memory_store();
        let queue_id = store
            .enqueue_batch_file("batch-1", "/tmp/a.pdf", "/tmp/preview_a.pdf", "a.pdf", 0)
            .unwrap();

        let mut draft = pending_with_number("B-1");
        draft.batch_id = Some("batch-1".to_string());
        let pending_id = store.save_pending(&draft).unwrap();
        store.attach_pending_to_queue(queue_id, pending_id).unwrap();

        let entries = store.queue_entries("batch-1").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, "pending_validation");
        assert_eq!(entries[0].pending_id, Some(pending_id));

        let pending = store.get_pending(pending_id).unwrap().unwrap();
        let fields = pending.fields.clone();
        store.finalize_pending(&pending, &fields, "test").unwrap();
        let entries = store.queue_entries("batch-1").unwrap();
        assert_eq!(entries[0].status, "processed");
    }
}
