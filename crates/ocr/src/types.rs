use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use struk_core::Rupiah;

/// A single extracted value with an associated confidence score (0.0–1.0).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedField<T> {
    pub value: T,
    /// Confidence in this extraction (0.0 = guessed, 1.0 = certain).
    pub confidence: f32,
}

impl<T> ExtractedField<T> {
    pub fn new(value: T, confidence: f32) -> Self {
        Self { value, confidence: confidence.clamp(0.0, 1.0) }
    }
}

/// One recognized word together with the engine's confidence (0–100).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OcrToken {
    pub text: String,
    pub confidence: f32,
}

impl OcrToken {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self { text: text.into(), confidence }
    }
}

/// What an OCR backend hands back for one image.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawScanResult {
    pub text: String,
    #[serde(default)]
    pub tokens: Vec<OcrToken>,
    /// Mean confidence over the whole page (0–100), when the engine reports one.
    #[serde(default)]
    pub overall_confidence: Option<f32>,
}

impl RawScanResult {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self { text: text.into(), tokens: vec![], overall_confidence: None }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.overall_confidence = Some(confidence);
        self
    }

    pub fn with_tokens(mut self, tokens: Vec<OcrToken>) -> Self {
        self.tokens = tokens;
        self
    }
}

/// The fully extracted, confidence-annotated representation of a receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedReceipt {
    pub merchant: ExtractedField<String>,
    pub date: ExtractedField<NaiveDate>,
    pub time: ExtractedField<NaiveTime>,
    /// Grand total. `None` means no usable numeral was printed anywhere.
    pub total: Option<ExtractedField<Rupiah>>,
    pub category: ExtractedField<String>,
    pub payment_method: ExtractedField<String>,
    /// Aggregate confidence across all extracted fields (0.0–1.0).
    pub confidence: f32,
}

impl ExtractedReceipt {
    pub fn total_amount(&self) -> Option<Rupiah> {
        self.total.as_ref().map(|f| f.value)
    }
}
