//! Invoice intake: PDF ingestion, LLM field extraction, human validation
//! and a deduplicated invoice store.
//!
//! The heart of the crate is the reconciliation pipeline in [`reconcile`]:
//! whatever mix of German, English, synonym or nested keys the extractor
//! produces, exactly one canonical record comes out and is what the rest
//! of the system (validation UI, pending store, duplicate detection,
//! finalized store) operates on.

pub mod config;
pub mod email_intake;
pub mod error;
pub mod extract;
pub mod files;
pub mod finalize;
pub mod intake;
pub mod normalize;
pub mod pdf_text;
pub mod reconcile;
pub mod store;

pub use config::Config;
pub use error::{PipelineError, Result};
pub use extract::{ExtractionOutcome, Extractor, HttpModelClient, ModelClient};
pub use finalize::{FinalizeEdits, NumberLocks, finalize, finalize_batch};
pub use intake::{DocumentStatus, Intake, Provenance};
pub use normalize::{normalize_amount, normalize_date};
pub use reconcile::{CanonicalInvoiceRecord, RawExtraction, reconcile};
pub use store::Store;
