use chrono::NaiveDateTime;
use std::path::PathBuf;
use thiserror::Error;

use crate::extract::Extractor;
use crate::hash;
use crate::recognizer::{OcrBackend, OcrError};
use crate::types::{ExtractedReceipt, RawScanResult};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("OCR recognition failed: {0}")]
    Ocr(#[from] OcrError),
}

/// The result of a single receipt scan.
#[derive(Debug)]
pub struct ScanOutcome {
    /// SHA-256 hex digest of the original image bytes.
    pub image_hash: String,
    /// Where the original image was stored, when an attachments directory is configured.
    pub attachment_path: Option<PathBuf>,
    /// What the OCR backend returned.
    pub scan: RawScanResult,
    /// Structured fields extracted from the OCR text.
    pub extracted: ExtractedReceipt,
}

/// Orchestrates: hash → content-store → OCR → extract.
pub struct ReceiptPipeline<R: OcrBackend> {
    recognizer: R,
    extractor: Extractor,
    attachments_dir: Option<PathBuf>,
}

impl<R: OcrBackend> ReceiptPipeline<R> {
    pub fn new(recognizer: R, extractor: Extractor) -> Self {
        Self { recognizer, extractor, attachments_dir: None }
    }

    /// Keep a copy of every processed image under `dir`, content-addressed.
    pub fn with_attachments(mut self, dir: PathBuf) -> Self {
        self.attachments_dir = Some(dir);
        self
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    /// Process raw image bytes as received from the chat transport.
    pub async fn process_bytes(
        &self,
        data: &[u8],
        ext: &str,
        now: NaiveDateTime,
    ) -> Result<ScanOutcome, PipelineError> {
        // 1. Hash for content addressing.
        let image_hash = hash::to_hex(&hash::sha256_bytes(data));

        // 2. Persist to content-addressed store.
        let attachment_path = match &self.attachments_dir {
            Some(dir) => {
                let dest = hash::attachment_path(dir, &image_hash, ext);
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&dest, data).await?;
                Some(dest)
            }
            None => None,
        };

        // 3. Run OCR.
        let scan = self.recognizer.recognize(data)?;

        // 4. Extract structured fields.
        let extracted = self.extractor.extract(&scan, now);

        Ok(ScanOutcome { image_hash, attachment_path, scan, extracted })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
