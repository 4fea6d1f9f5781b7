use invoice_intake::{Config, Extractor, HttpModelClient, Intake, Store};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter("info")
        .init();

    let mut args = std::env::args().skip(1);
    let input_dir = args
        .next()
        .ok_or("usage: invoice_intake <pdf-dir> [config.toml]")?;
    let config_path = args
        .next()
        .unwrap_or_else(|| "invoice_intake.toml".to_string());

    let cfg = Config::load_or_default(&config_path)?;
    let store = Store::new(&cfg.storage.db_path)?;

    info!(
        url = %cfg.llm.base_url,
        model = %cfg.llm.model,
        timeout_secs = cfg.llm.timeout_secs,
        "using extraction backend"
    );
    let client = Arc::new(HttpModelClient::new(&cfg.llm));
    let extractor = Extractor::new(client, Duration::from_secs(cfg.llm.timeout_secs));

    let mut pdfs: Vec<PathBuf> = std::fs::read_dir(&input_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .collect();
    pdfs.sort();
    info!(dir = %input_dir, files = pdfs.len(), "found PDF documents");

    let intake = Intake {
        store: &store,
        extractor: &extractor,
        dirs: &cfg.storage,
    };
    let summary = intake.process_batch(&pdfs, "batch_upload", None).await;

    info!(
        batch_id = %summary.batch_id,
        processed = summary.processed,
        skipped = summary.skipped,
        duplicates = summary.duplicates,
        errors = summary.errors,
        "intake complete, records are pending human validation"
    );

    let counts = store.counts()?;
    info!(
        pending_total = counts.pending_total,
        pending_finalized = counts.pending_finalized,
        invoices_total = counts.invoices_total,
        "database statistics"
    );

    Ok(())
}
