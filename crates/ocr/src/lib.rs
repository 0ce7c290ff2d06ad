pub mod extract;
pub mod hash;
pub mod pipeline;
pub mod recognizer;
pub mod rules;
pub mod types;

pub use extract::{extract_date_time, extract_merchant, extract_total, Extractor};
pub use hash::{receipt_fingerprint, sha256_bytes, to_hex};
pub use pipeline::{PipelineError, ReceiptPipeline, ScanOutcome};
pub use recognizer::{MockRecognizer, OcrBackend, OcrError, TranscriptRecognizer};
pub use rules::KeywordTable;
pub use types::{ExtractedField, ExtractedReceipt, OcrToken, RawScanResult};
