//! Email-sourced intake.
//!
//! Protocol plumbing (IMAP sessions, mailbox listing) lives outside this
//! crate; what arrives here are attachment files already fetched to disk
//! plus the message headers. This module pins down the provenance shape
//! and the deterministic message uid, then hands the files to the normal
//! pipeline with `source = "email_import"`.

use crate::error::Result;
use crate::intake::{BatchSummary, Intake};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::info;

/// Headers of the message the attachments came from.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    /// Account the message was fetched for.
    pub account: String,
    /// Provider-side message id.
    pub message_id: String,
    pub date: Option<String>,
    pub from_addr: Option<String>,
    pub subject: Option<String>,
}

impl EmailMessage {
    /// Deterministic uid for this message, stable across re-fetches of
    /// the same mailbox.
    pub fn uid(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.message_id.as_bytes());
        hasher.update(self.date.as_deref().unwrap_or("unknown").as_bytes());
        hasher.update(self.account.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Run one message's PDF attachments through the intake pipeline as a
/// batch, with the message headers recorded in each record's provenance.
pub async fn import_attachments(
    intake: &Intake<'_>,
    message: &EmailMessage,
    attachment_paths: &[PathBuf],
) -> Result<BatchSummary> {
    let uid = message.uid();
    info!(
        uid = %uid,
        from = message.from_addr.as_deref().unwrap_or(""),
        attachments = attachment_paths.len(),
        "importing email attachments"
    );

    let extra = json!({
        "message_uid": uid,
        "message_id": message.message_id,
        "from_addr": message.from_addr,
        "subject": message.subject,
        "date": message.date,
    });

    let summary = intake
        .process_batch(attachment_paths, "email_import", Some(&extra))
        .await;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, date: &str, account: &str) -> EmailMessage {
        EmailMessage {
            account: account.to_string(),
            message_id: id.to_string(),
            date: Some(date.to_string()),
            from_addr: None,
            subject: None,
        }
    }

    #[test]
    fn uid_is_deterministic() {
        let a = message("msg123", "2025-01-01", "user@example.com").uid();
        let b = message("msg123", "2025-01-01", "user@example.com").uid();
        let c = message("msg456", "2025-01-01", "user@example.com").uid();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn missing_date_hashes_as_unknown() {
        let mut msg = message("msg123", "ignored", "user@example.com");
        msg.date = None;
        let without = msg.uid();
        msg.date = Some("unknown".to_string());
        assert_eq!(without, msg.uid());
    }
}
