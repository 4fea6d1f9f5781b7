//! Error taxonomy for the intake pipeline.
//!
//! Only conditions a caller can act on live here. Extraction failures and
//! unparseable amounts/dates are recovered locally with placeholder values
//! and never surface as errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// A finalized invoice with a matching invoice number already exists.
    #[error("invoice number {invoice_number} already exists in database")]
    Duplicate { invoice_number: String },

    /// A pending or finalized record the caller referenced does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Storage-layer failure. Propagates loudly; losing an uploaded
    /// document silently is unacceptable.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// True when the error is the duplicate-invoice condition, which the
    /// caller presents as a resend/override decision rather than a failure.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, PipelineError::Duplicate { .. })
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
