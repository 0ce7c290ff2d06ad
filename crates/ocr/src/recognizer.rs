use thiserror::Error;

use crate::types::RawScanResult;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Image decode error: {0}")]
    ImageDecode(String),
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("Tesseract not available; build with the `tesseract` feature")]
    NotAvailable,
}

/// Abstraction over an OCR backend.
/// Implementations accept raw image bytes and return the recognized text,
/// plus whatever confidence information the engine exposes.
pub trait OcrBackend: Send + Sync {
    fn recognize(&self, image_bytes: &[u8]) -> Result<RawScanResult, OcrError>;
}

impl<T: OcrBackend + ?Sized> OcrBackend for Box<T> {
    fn recognize(&self, image_bytes: &[u8]) -> Result<RawScanResult, OcrError> {
        (**self).recognize(image_bytes)
    }
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// Returns a pre-set scan, for unit testing the extraction pipeline
/// without requiring Tesseract to be installed.
pub struct MockRecognizer {
    pub scan: RawScanResult,
}

impl MockRecognizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { scan: RawScanResult::from_text(text) }
    }

    pub fn with_scan(scan: RawScanResult) -> Self {
        Self { scan }
    }
}

impl OcrBackend for MockRecognizer {
    fn recognize(&self, _image_bytes: &[u8]) -> Result<RawScanResult, OcrError> {
        Ok(self.scan.clone())
    }
}

// ── Transcript backend ────────────────────────────────────────────────────────

/// Treats the "image" as an already-recognized transcript: either a JSON
/// [`RawScanResult`] or plain UTF-8 text. Lets saved OCR output be replayed
/// through the engine when tuning heuristics.
pub struct TranscriptRecognizer;

impl OcrBackend for TranscriptRecognizer {
    fn recognize(&self, image_bytes: &[u8]) -> Result<RawScanResult, OcrError> {
        let text = std::str::from_utf8(image_bytes)
            .map_err(|e| OcrError::ImageDecode(format!("transcript is not UTF-8: {e}")))?;
        if text.trim_start().starts_with('{') {
            serde_json::from_str(text)
                .map_err(|e| OcrError::ImageDecode(format!("invalid scan JSON: {e}")))
        } else {
            Ok(RawScanResult::from_text(text))
        }
    }
}

// ── Tesseract backend (optional, gated behind `tesseract` feature) ─────────────

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use super::{OcrBackend, OcrError};
    use crate::types::RawScanResult;
    use leptess::LepTess;

    pub struct TesseractRecognizer {
        data_path: Option<String>,
        lang: String,
    }

    impl TesseractRecognizer {
        pub fn new(data_path: Option<String>, lang: &str) -> Self {
            Self { data_path, lang: lang.to_string() }
        }
    }

    impl OcrBackend for TesseractRecognizer {
        fn recognize(&self, image_bytes: &[u8]) -> Result<RawScanResult, OcrError> {
            let mut lt = LepTess::new(self.data_path.as_deref(), &self.lang)
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            lt.set_image_from_mem(image_bytes)
                .map_err(|e| OcrError::ImageDecode(e.to_string()))?;
            let text = lt.get_utf8_text().map_err(|e| OcrError::Engine(e.to_string()))?;
            let confidence = lt.mean_text_conf();
            Ok(RawScanResult::from_text(text).with_confidence(confidence as f32))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_returns_preset_text() {
        let r = MockRecognizer::new("ALFAMART\nTOTAL 5.500\nQRIS");
        assert_eq!(r.recognize(b"fake image data").unwrap().text, "ALFAMART\nTOTAL 5.500\nQRIS");
    }

    #[test]
    fn mock_keeps_confidence() {
        let r = MockRecognizer::with_scan(RawScanResult::from_text("x").with_confidence(12.0));
        assert_eq!(r.recognize(b"").unwrap().overall_confidence, Some(12.0));
    }

    #[test]
    fn boxed_backend_delegates() {
        let r: Box<dyn OcrBackend> = Box::new(MockRecognizer::new("hello"));
        assert_eq!(r.recognize(b"anything").unwrap().text, "hello");
    }

    #[test]
    fn transcript_plain_text() {
        let scan = TranscriptRecognizer.recognize(b"TOKO MAJU\nTOTAL 15.000").unwrap();
        assert_eq!(scan.text, "TOKO MAJU\nTOTAL 15.000");
        assert!(scan.overall_confidence.is_none());
    }

    #[test]
    fn transcript_json_scan() {
        let json = br#"{"text":"TOTAL 9.000","tokens":[{"text":"9.000","confidence":88.5}],"overall_confidence":71}"#;
        let scan = TranscriptRecognizer.recognize(json).unwrap();
        assert_eq!(scan.tokens.len(), 1);
        assert_eq!(scan.overall_confidence, Some(71.0));
    }

    #[test]
    fn transcript_rejects_binary() {
        assert!(matches!(
            TranscriptRecognizer.recognize(&[0xff, 0xd8, 0xff]),
            Err(OcrError::ImageDecode(_))
        ));
    }
}
