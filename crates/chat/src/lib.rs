pub mod actor;
pub mod dedup;
pub mod directive;
pub mod manual;
pub mod memory;
pub mod preview;
pub mod session;
mod util;

use struk_storage::StoreError;
use thiserror::Error;

pub use actor::Dispatcher;
pub use dedup::{receipt_hash, DuplicateDetector};
pub use directive::{apply_message, parse_line, Directive, Outcome};
pub use manual::{is_manual_entry, parse_manual, ManualEntry};
pub use memory::{normalize_key, MerchantMemory};
pub use session::{ConfirmationSession, Inbound, Services, SessionState};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("mailbox for sender {0} is closed")]
    MailboxClosed(String),
}
