use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use struk_core::config::BotConfig;
use struk_core::{Config, DraftExpense, ExpenseRecord, Source};
use struk_ocr::extract::MERCHANT_PLACEHOLDER;
use struk_ocr::{Extractor, OcrBackend, ReceiptPipeline, ScanOutcome};
use struk_storage::{ExpenseLedger, LedgerEntry, ProfileStore, SeenReceiptStore};
use tracing::{debug, info, warn};

use crate::dedup::{receipt_hash, DuplicateDetector};
use crate::directive::{apply_message, Outcome};
use crate::manual::{is_manual_entry, parse_manual};
use crate::memory::MerchantMemory;
use crate::preview;
use crate::EngineError;

/// Where a sender's conversation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Armed,
    AwaitingConfirmation,
    AwaitingManualInput,
}

#[derive(Debug, Clone)]
struct Pending {
    record: ExpenseRecord,
    receipt_hash: Option<String>,
}

#[derive(Debug, Clone)]
enum State {
    Idle,
    Armed,
    AwaitingConfirmation(Pending),
    AwaitingManualInput,
}

/// An inbound chat message.
#[derive(Debug, Clone)]
pub enum Inbound {
    Text(String),
    Image { bytes: Vec<u8>, ext: String },
}

/// Everything a session needs besides its own state. Shared by all senders.
pub struct Services<R: OcrBackend> {
    pub pipeline: ReceiptPipeline<R>,
    pub memory: MerchantMemory,
    pub dedup: DuplicateDetector,
    pub ledger: Arc<dyn ExpenseLedger>,
    pub settings: BotConfig,
}

impl<R: OcrBackend> Services<R> {
    /// Build the shared services, loading merchant profiles and seen
    /// receipts from their stores.
    pub async fn load(
        config: &Config,
        recognizer: R,
        attachments_dir: Option<PathBuf>,
        ledger: Arc<dyn ExpenseLedger>,
        profiles: Arc<dyn ProfileStore>,
        seen: Arc<dyn SeenReceiptStore>,
    ) -> Result<Self, EngineError> {
        let mut pipeline = ReceiptPipeline::new(recognizer, Extractor::from_config(config));
        if let Some(dir) = attachments_dir {
            pipeline = pipeline.with_attachments(dir);
        }
        Ok(Self {
            pipeline,
            memory: MerchantMemory::load(profiles, &config.memory).await?,
            dedup: DuplicateDetector::load(seen, &config.dedup).await?,
            ledger,
            settings: config.bot.clone(),
        })
    }

    fn is_placeholder(&self, merchant: &str) -> bool {
        merchant == MERCHANT_PLACEHOLDER || merchant == self.settings.manual_placeholder
    }
}

/// One sender's confirmation dialogue.
pub struct ConfirmationSession {
    sender: String,
    state: State,
}

impl ConfirmationSession {
    pub fn new(sender: impl Into<String>) -> Self {
        Self { sender: sender.into(), state: State::Idle }
    }

    pub fn state(&self) -> SessionState {
        match self.state {
            State::Idle => SessionState::Idle,
            State::Armed => SessionState::Armed,
            State::AwaitingConfirmation(_) => SessionState::AwaitingConfirmation,
            State::AwaitingManualInput => SessionState::AwaitingManualInput,
        }
    }

    /// The record awaiting confirmation, if any.
    pub fn pending(&self) -> Option<&ExpenseRecord> {
        match &self.state {
            State::AwaitingConfirmation(p) => Some(&p.record),
            _ => None,
        }
    }

    /// Handle one inbound message. `None` means no reply is sent.
    pub async fn handle<R: OcrBackend>(&mut self, services: &Services<R>, inbound: Inbound) -> Option<String> {
        self.handle_at(services, inbound, Local::now().naive_local()).await
    }

    pub async fn handle_at<R: OcrBackend>(
        &mut self,
        services: &Services<R>,
        inbound: Inbound,
        now: NaiveDateTime,
    ) -> Option<String> {
        let before = self.state();
        let reply = match inbound {
            Inbound::Image { bytes, ext } => {
                if matches!(self.state, State::Armed) {
                    Some(self.on_image(services, &bytes, &ext, now).await)
                } else {
                    debug!(sender = %self.sender, state = ?before, "Ignoring image outside armed state");
                    None
                }
            }
            Inbound::Text(text) => self.on_text(services, &text, now).await,
        };
        let after = self.state();
        if before != after {
            info!(sender = %self.sender, from = ?before, to = ?after, "Session state changed");
        }
        reply
    }

    async fn on_text<R: OcrBackend>(
        &mut self,
        services: &Services<R>,
        text: &str,
        now: NaiveDateTime,
    ) -> Option<String> {
        let is_arm = text.trim().eq_ignore_ascii_case(services.settings.arm_command.trim());
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => {
                if is_arm {
                    self.state = State::Armed;
                    Some(preview::armed_prompt())
                } else {
                    None
                }
            }
            State::Armed => {
                self.state = State::Armed;
                if is_arm {
                    Some(preview::armed_prompt())
                } else if is_manual_entry(text) {
                    Some(match self.build_manual(services, text, now).await {
                        Some(reply) => reply,
                        None => preview::manual_rejected(),
                    })
                } else {
                    Some(preview::armed_hint())
                }
            }
            State::AwaitingManualInput => {
                if text.trim().eq_ignore_ascii_case("n") {
                    return Some(preview::cancelled());
                }
                match self.build_manual(services, text, now).await {
                    Some(reply) => Some(reply),
                    None => Some(preview::manual_abandoned(&services.settings.arm_command)),
                }
            }
            State::AwaitingConfirmation(mut pending) => {
                let categories = services.pipeline.extractor().categories();
                match apply_message(&mut pending.record, text, categories) {
                    Outcome::Cancel => {
                        info!(sender = %self.sender, "Pending expense cancelled");
                        Some(preview::cancelled())
                    }
                    Outcome::Confirm => Some(self.confirm(services, pending).await),
                    Outcome::Edited { applied } => {
                        debug!(sender = %self.sender, applied, "Applied edit directives");
                        let anomaly = services
                            .memory
                            .anomaly_check(&pending.record.merchant, pending.record.total)
                            .await;
                        let reply = preview::render_preview(&pending.record, anomaly);
                        self.state = State::AwaitingConfirmation(pending);
                        Some(reply)
                    }
                }
            }
        }
    }

    async fn on_image<R: OcrBackend>(
        &mut self,
        services: &Services<R>,
        bytes: &[u8],
        ext: &str,
        now: NaiveDateTime,
    ) -> String {
        let outcome = match services.pipeline.process_bytes(bytes, ext, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(sender = %self.sender, error = %e, "Receipt scan failed");
                self.state = State::AwaitingManualInput;
                return preview::manual_instructions();
            }
        };
        let ScanOutcome { scan, extracted, image_hash, .. } = outcome;
        debug!(sender = %self.sender, image_hash = %image_hash, "Receipt scanned");

        if let Some(confidence) = scan.overall_confidence {
            if confidence < services.settings.min_ocr_confidence {
                info!(sender = %self.sender, confidence, "OCR confidence below minimum");
                self.state = State::AwaitingManualInput;
                return preview::manual_instructions();
            }
        }
        let Some(total) = extracted.total_amount() else {
            info!(sender = %self.sender, "No total found on receipt");
            self.state = State::AwaitingManualInput;
            return preview::manual_instructions();
        };

        let hash = receipt_hash(&scan.text);
        if services.dedup.is_duplicate(&hash).await {
            info!(sender = %self.sender, receipt_hash = %hash, "Duplicate receipt rejected");
            self.state = State::Armed;
            return preview::duplicate();
        }

        let merchant = extracted.merchant.value;
        let category = match services.memory.recall_category(&merchant).await {
            Some(learned) => learned,
            None => extracted.category.value,
        };
        let confidence = scan.overall_confidence.unwrap_or(extracted.confidence * 100.0);
        let draft = DraftExpense {
            merchant,
            total: Some(total),
            date: extracted.date.value,
            time: extracted.time.value,
            category,
            payment_method: extracted.payment_method.value,
            ocr_confidence: confidence.round().clamp(0.0, 100.0) as u8,
            source: Source::Ocr,
        };
        let record = match ExpenseRecord::validate(draft) {
            Ok(record) => record,
            Err(e) => {
                info!(sender = %self.sender, error = %e, "Extracted total rejected");
                self.state = State::AwaitingManualInput;
                return preview::manual_instructions();
            }
        };

        let anomaly = services.memory.anomaly_check(&record.merchant, record.total).await;
        let reply = preview::render_preview(&record, anomaly);
        self.state = State::AwaitingConfirmation(Pending { record, receipt_hash: Some(hash) });
        reply
    }

    /// Parse a manual entry. On success the session awaits confirmation and
    /// the preview is returned; on failure the state is left for the caller.
    async fn build_manual<R: OcrBackend>(
        &mut self,
        services: &Services<R>,
        text: &str,
        now: NaiveDateTime,
    ) -> Option<String> {
        let entry = parse_manual(
            text,
            now,
            &services.settings.manual_placeholder,
            services.pipeline.extractor().categories(),
        );
        let mut record = match ExpenseRecord::validate(entry.draft) {
            Ok(record) => record,
            Err(e) => {
                info!(sender = %self.sender, error = %e, "Manual entry rejected");
                return None;
            }
        };
        if !entry.category_given {
            if let Some(learned) = services.memory.recall_category(&record.merchant).await {
                record.category = learned;
            }
        }

        let anomaly = services.memory.anomaly_check(&record.merchant, record.total).await;
        let reply = preview::render_preview(&record, anomaly);
        self.state = State::AwaitingConfirmation(Pending { record, receipt_hash: None });
        Some(reply)
    }

    async fn confirm<R: OcrBackend>(&mut self, services: &Services<R>, pending: Pending) -> String {
        let entry = LedgerEntry::new(self.sender.clone(), pending.record.clone(), pending.receipt_hash.clone());
        if let Err(e) = services.ledger.append(&entry).await {
            warn!(sender = %self.sender, error = %e, "Failed to persist expense; keeping it pending");
            self.state = State::AwaitingConfirmation(pending);
            return preview::persistence_failed();
        }
        info!(
            sender = %self.sender,
            id = %entry.id,
            total = entry.record.total.amount(),
            "Expense saved"
        );

        let record = &pending.record;
        if !services.is_placeholder(&record.merchant) {
            if let Err(e) = services.memory.learn(&record.merchant, &record.category).await {
                warn!(sender = %self.sender, error = %e, "Failed to store learned category");
            }
            if let Err(e) = services.memory.remember_total(&record.merchant, record.total).await {
                warn!(sender = %self.sender, error = %e, "Failed to store merchant total");
            }
        }
        preview::saved()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use struk_core::Rupiah;
    use struk_ocr::{MockRecognizer, RawScanResult, TranscriptRecognizer};
    use struk_storage::InMemoryStore;

    const RECEIPT: &str = "TOKO MAJU\nTOTAL 15.000\nDISKON 2.000\n01-02-2024 14:30";

    async fn services_with<R: OcrBackend>(recognizer: R) -> (Arc<InMemoryStore>, Services<R>) {
        let store = Arc::new(InMemoryStore::new());
        let services = Services::load(
            &Config::default(),
            recognizer,
            None,
            store.clone(),
            store.clone(),
            store.clone(),
        )
        .await
        .unwrap();
        (store, services)
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    fn text(s: &str) -> Inbound {
        Inbound::Text(s.to_string())
    }

    fn image(s: &str) -> Inbound {
        Inbound::Image { bytes: s.as_bytes().to_vec(), ext: "txt".into() }
    }

    #[tokio::test]
    async fn idle_ignores_everything_but_the_arm_command() {
        let (_store, services) = services_with(TranscriptRecognizer).await;
        let mut s = ConfirmationSession::new("a");
        assert_eq!(s.handle_at(&services, text("halo"), now()).await, None);
        assert_eq!(s.handle_at(&services, image(RECEIPT), now()).await, None);
        assert_eq!(s.state(), SessionState::Idle);
        assert!(s.handle_at(&services, text("PingPong"), now()).await.is_some());
        assert_eq!(s.state(), SessionState::Armed);
    }

    #[tokio::test]
    async fn scan_edit_confirm() {
        let (store, services) = services_with(TranscriptRecognizer).await;
        let mut s = ConfirmationSession::new("a");
        s.handle_at(&services, text("pingpong"), now()).await;

        let reply = s.handle_at(&services, image(RECEIPT), now()).await.unwrap();
        assert!(reply.contains("Rp 15.000"));
        assert_eq!(s.state(), SessionState::AwaitingConfirmation);
        let pending = s.pending().unwrap();
        assert_eq!(pending.merchant, "TOKO MAJU");
        assert_eq!(pending.date_label(), "01/02/2024");
        assert_eq!(pending.time_label(), "14:30");

        let reply = s.handle_at(&services, text("total 13.000"), now()).await.unwrap();
        assert!(reply.contains("Rp 13.000"));

        assert_eq!(s.handle_at(&services, text("y"), now()).await.unwrap(), preview::saved());
        assert_eq!(s.state(), SessionState::Idle);
        let entries = store.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].record.total, Rupiah::new(13_000));
        assert_eq!(entries[0].sender, "a");
        assert!(entries[0].receipt_hash.is_some());

        let profile = services.memory.profile("Toko Maju").await.unwrap();
        assert_eq!(profile.recent_totals.len(), 1);
        assert_eq!(profile.learned_category.as_deref(), Some("Other"));
    }

    #[tokio::test]
    async fn cancel_discards() {
        let (store, services) = services_with(TranscriptRecognizer).await;
        let mut s = ConfirmationSession::new("a");
        s.handle_at(&services, text("pingpong"), now()).await;
        s.handle_at(&services, image(RECEIPT), now()).await;
        assert_eq!(s.handle_at(&services, text("N"), now()).await.unwrap(), preview::cancelled());
        assert_eq!(s.state(), SessionState::Idle);
        assert!(store.entries().await.is_empty());
    }

    #[tokio::test]
    async fn images_ignored_while_awaiting_confirmation() {
        let (_store, services) = services_with(TranscriptRecognizer).await;
        let mut s = ConfirmationSession::new("a");
        s.handle_at(&services, text("pingpong"), now()).await;
        s.handle_at(&services, image(RECEIPT), now()).await;
        assert_eq!(s.handle_at(&services, image("TOTAL 99.000"), now()).await, None);
        assert_eq!(s.pending().unwrap().total, Rupiah::new(15_000));
    }

    #[tokio::test]
    async fn duplicate_receipt_keeps_session_armed() {
        let (store, services) = services_with(TranscriptRecognizer).await;
        let mut s = ConfirmationSession::new("a");
        s.handle_at(&services, text("pingpong"), now()).await;
        s.handle_at(&services, image(RECEIPT), now()).await;
        s.handle_at(&services, text("Y"), now()).await;

        s.handle_at(&services, text("pingpong"), now()).await;
        let reply = s.handle_at(&services, image(RECEIPT), now()).await.unwrap();
        assert_eq!(reply, preview::duplicate());
        assert_eq!(s.state(), SessionState::Armed);
        assert_eq!(store.entries().await.len(), 1);
    }

    #[tokio::test]
    async fn missing_total_goes_to_manual_input() {
        let (_store, services) = services_with(TranscriptRecognizer).await;
        let mut s = ConfirmationSession::new("a");
        s.handle_at(&services, text("pingpong"), now()).await;
        let reply = s.handle_at(&services, image("TOKO TANPA ANGKA"), now()).await.unwrap();
        assert_eq!(reply, preview::manual_instructions());
        assert_eq!(s.state(), SessionState::AwaitingManualInput);

        let reply = s
            .handle_at(&services, text("total 12.000\nmerchant Toko Tanpa Angka"), now())
            .await
            .unwrap();
        assert!(reply.contains("Rp 12.000"));
        let pending = s.pending().unwrap();
        assert_eq!(pending.source, Source::Manual);
        assert_eq!(pending.date, now().date());
    }

    #[tokio::test]
    async fn low_confidence_goes_to_manual_input() {
        let scan = RawScanResult::from_text(RECEIPT).with_confidence(12.0);
        let (_store, services) = services_with(MockRecognizer::with_scan(scan)).await;
        let mut s = ConfirmationSession::new("a");
        s.handle_at(&services, text("pingpong"), now()).await;
        s.handle_at(&services, image("ignored"), now()).await;
        assert_eq!(s.state(), SessionState::AwaitingManualInput);
    }

    #[tokio::test]
    async fn recognizer_error_goes_to_manual_input() {
        let (_store, services) = services_with(TranscriptRecognizer).await;
        let mut s = ConfirmationSession::new("a");
        s.handle_at(&services, text("pingpong"), now()).await;
        let bad = Inbound::Image { bytes: vec![0xff, 0xd8, 0xff], ext: "jpg".into() };
        assert_eq!(s.handle_at(&services, bad, now()).await.unwrap(), preview::manual_instructions());
        assert_eq!(s.state(), SessionState::AwaitingManualInput);
    }

    #[tokio::test]
    async fn unusable_manual_input_returns_to_idle() {
        let (_store, services) = services_with(TranscriptRecognizer).await;
        let mut s = ConfirmationSession::new("a");
        s.handle_at(&services, text("pingpong"), now()).await;
        s.handle_at(&services, image("NO TOTAL HERE"), now()).await;
        let reply = s.handle_at(&services, text("merchant Siapa"), now()).await.unwrap();
        assert!(reply.contains("pingpong"));
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn n_abandons_manual_input() {
        let (_store, services) = services_with(TranscriptRecognizer).await;
        let mut s = ConfirmationSession::new("a");
        s.handle_at(&services, text("pingpong"), now()).await;
        s.handle_at(&services, image("NO TOTAL HERE"), now()).await;
        assert_eq!(s.handle_at(&services, text("n"), now()).await.unwrap(), preview::cancelled());
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn armed_manual_entry_and_rejection() {
        let (_store, services) = services_with(TranscriptRecognizer).await;
        let mut s = ConfirmationSession::new("a");
        s.handle_at(&services, text("pingpong"), now()).await;

        assert_eq!(s.handle_at(&services, text("manual 0"), now()).await.unwrap(), preview::manual_rejected());
        assert_eq!(s.state(), SessionState::Armed);
        assert_eq!(s.handle_at(&services, text("apa ini"), now()).await.unwrap(), preview::armed_hint());

        let reply = s.handle_at(&services, text("manual 25000 Warung Bu Ani"), now()).await.unwrap();
        assert!(reply.starts_with("📌"));
        assert_eq!(s.pending().unwrap().merchant, "Warung Bu Ani");
        assert_eq!(s.pending().unwrap().category, "Manual");
    }

    #[tokio::test]
    async fn persistence_failure_keeps_record_pending() {
        let (store, services) = services_with(TranscriptRecognizer).await;
        let mut s = ConfirmationSession::new("a");
        s.handle_at(&services, text("pingpong"), now()).await;
        s.handle_at(&services, image(RECEIPT), now()).await;

        store.set_fail_appends(true);
        assert_eq!(s.handle_at(&services, text("Y"), now()).await.unwrap(), preview::persistence_failed());
        assert_eq!(s.state(), SessionState::AwaitingConfirmation);
        assert!(services.memory.profile("TOKO MAJU").await.is_none());

        store.set_fail_appends(false);
        assert_eq!(s.handle_at(&services, text("Y"), now()).await.unwrap(), preview::saved());
        assert_eq!(store.entries().await.len(), 1);
    }

    #[tokio::test]
    async fn learned_category_overrides_detection() {
        let (_store, services) = services_with(TranscriptRecognizer).await;
        services.memory.learn("Toko Maju", "Shopping").await.unwrap();

        let mut s = ConfirmationSession::new("a");
        s.handle_at(&services, text("pingpong"), now()).await;
        s.handle_at(&services, image(RECEIPT), now()).await;
        assert_eq!(s.pending().unwrap().category, "Shopping");
    }

    #[tokio::test]
    async fn anomaly_is_flagged_in_preview() {
        let (_store, services) = services_with(TranscriptRecognizer).await;
        for amount in [20_000, 22_000, 21_000] {
            services.memory.remember_total("Kopi Kenangan", Rupiah::new(amount)).await.unwrap();
        }
        let mut s = ConfirmationSession::new("a");
        s.handle_at(&services, text("pingpong"), now()).await;
        let reply = s
            .handle_at(&services, image("KOPI KENANGAN\nTOTAL 90.000\nQRIS"), now())
            .await
            .unwrap();
        assert!(reply.contains("⚠️ Total ini"));
        assert_eq!(s.state(), SessionState::AwaitingConfirmation);
    }
}
