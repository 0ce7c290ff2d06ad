use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use struk_chat::{Dispatcher, Services};
use struk_core::{Config, OcrEngine};
use struk_ocr::OcrBackend;
use struk_storage::{ExpenseLedger, SqliteStore, WebhookLedger};
use tracing_subscriber::EnvFilter;

mod console;

fn config_path(data_dir: &std::path::Path) -> PathBuf {
    match std::env::var_os("STRUK_CONFIG") {
        Some(path) => PathBuf::from(path),
        None => data_dir.join("struk.toml"),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_recognizer(config: &Config) -> Result<Box<dyn OcrBackend>> {
    match config.ocr.engine {
        OcrEngine::Transcript => Ok(Box::new(struk_ocr::TranscriptRecognizer)),
        #[cfg(feature = "tesseract")]
        OcrEngine::Tesseract => Ok(Box::new(
            struk_ocr::recognizer::tesseract_backend::TesseractRecognizer::new(
                config.ocr.data_path.clone(),
                &config.ocr.lang,
            ),
        )),
        #[cfg(not(feature = "tesseract"))]
        OcrEngine::Tesseract => Err(struk_ocr::OcrError::NotAvailable.into()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let project_dirs = directories::ProjectDirs::from("id", "struk", "Struk")
        .context("Failed to determine app data directory")?;
    let data_dir = project_dirs.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

    let config_path = config_path(&data_dir);
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;
    init_logging(&config.log.level);
    tracing::info!(config = %config_path.display(), "Starting struk");

    let db_path = config.storage.db_path.clone().unwrap_or_else(|| data_dir.join("struk.db"));
    let store = Arc::new(
        SqliteStore::open(&db_path)
            .await
            .with_context(|| format!("Failed to open database {}", db_path.display()))?,
    );

    let attachments_dir = config
        .storage
        .attachments_dir
        .clone()
        .unwrap_or_else(|| data_dir.join("attachments"));
    std::fs::create_dir_all(&attachments_dir).context("Failed to create attachments directory")?;

    let ledger: Arc<dyn ExpenseLedger> = match &config.ledger.webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "Confirmed expenses go to webhook");
            Arc::new(WebhookLedger::new(url.clone()))
        }
        None => store.clone(),
    };

    let recognizer = build_recognizer(&config)?;
    let services = Services::load(
        &config,
        recognizer,
        Some(attachments_dir),
        ledger,
        store.clone(),
        store.clone(),
    )
    .await
    .context("Failed to load merchant memory and seen receipts")?;
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(services)));

    // ── Periodic duplicate-hash pruning ─────────────────────────────────────
    let prune_services = Arc::clone(dispatcher.services());
    let prune_every = Duration::from_secs(config.dedup.prune_interval_secs.max(60));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(prune_every);
        loop {
            interval.tick().await;
            if let Err(e) = prune_services.dedup.prune().await {
                tracing::warn!(error = %e, "Receipt fingerprint prune failed");
            }
        }
    });

    let result = console::run(dispatcher, store.clone()).await;
    store.close().await;
    tracing::info!("Console closed; shutting down");
    result
}
