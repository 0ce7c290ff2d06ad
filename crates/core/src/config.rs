use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which line of the receipt header is taken as the merchant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MerchantHeuristic {
    /// Longest line that survives the digit/boilerplate filter.
    #[default]
    LongestLine,
    /// First line that survives the same filter.
    FirstLine,
}

/// An ordered keyword rule: any keyword found in the text selects `label`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub label: String,
    pub keywords: Vec<String>,
}

impl KeywordRule {
    pub fn new(label: &str, keywords: &[&str]) -> Self {
        KeywordRule {
            label: label.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bot: BotConfig,
    pub extract: ExtractConfig,
    pub ocr: OcrConfig,
    pub memory: MemoryConfig,
    pub dedup: DedupConfig,
    pub storage: StorageConfig,
    pub ledger: LedgerConfig,
    pub log: LogConfig,
    /// Overrides the built-in category table when non-empty.
    pub categories: Vec<KeywordRule>,
    /// Overrides the built-in payment-method table when non-empty.
    pub payments: Vec<KeywordRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub arm_command: String,
    /// Scans whose overall OCR confidence (0–100) falls below this go to manual input.
    pub min_ocr_confidence: f32,
    pub manual_placeholder: String,
    /// An Idle session whose mailbox stays quiet this long is dropped.
    pub idle_session_secs: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            arm_command: "pingpong".to_string(),
            min_ocr_confidence: 40.0,
            manual_placeholder: "Manual".to_string(),
            idle_session_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub merchant_heuristic: MerchantHeuristic,
}

/// Which OCR engine turns inbound images into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrEngine {
    /// Inbound payloads are already-recognized text or scan JSON.
    #[default]
    Transcript,
    /// libtesseract, available when built with the `tesseract` feature.
    Tesseract,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub engine: OcrEngine,
    /// Tesseract language pack, e.g. `ind+eng`.
    pub lang: String,
    pub data_path: Option<String>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self { engine: OcrEngine::Transcript, lang: "ind+eng".to_string(), data_path: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub window: usize,
    pub anomaly_factor: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { window: 5, anomaly_factor: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub retention_days: i64,
    pub max_entries: usize,
    pub prune_interval_secs: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            retention_days: 90,
            max_entries: 10_000,
            prune_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Defaults to `<data_dir>/struk.db`.
    pub db_path: Option<PathBuf>,
    /// Defaults to `<data_dir>/attachments`.
    pub attachments_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// When set, confirmed expenses are POSTed here instead of the local database.
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
            Err(source) => Err(ConfigError::Io { path: path.to_path_buf(), source }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot.arm_command.trim().is_empty() {
            return Err(ConfigError::Invalid("bot.arm_command must not be empty".into()));
        }
        if self.bot.idle_session_secs == 0 {
            return Err(ConfigError::Invalid("bot.idle_session_secs must be at least 1".into()));
        }
        if self.memory.window == 0 {
            return Err(ConfigError::Invalid("memory.window must be at least 1".into()));
        }
        if self.memory.anomaly_factor == 0 {
            return Err(ConfigError::Invalid("memory.anomaly_factor must be at least 1".into()));
        }
        if self.dedup.max_entries == 0 {
            return Err(ConfigError::Invalid("dedup.max_entries must be at least 1".into()));
        }
        if self.dedup.retention_days <= 0 {
            return Err(ConfigError::Invalid("dedup.retention_days must be positive".into()));
        }
        for rule in self.categories.iter().chain(&self.payments) {
            if rule.label.trim().is_empty() || rule.keywords.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "keyword rule '{}' needs a label and at least one keyword",
                    rule.label
                )));
            }
        }
        Ok(())
    }
}
