use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Compute SHA-256 of an in-memory byte slice.
pub fn sha256_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Encode a raw 32-byte hash as a lowercase hex string (64 chars).
pub fn to_hex(hash: &[u8; 32]) -> String {
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

/// Content fingerprint of receipt text. Whitespace is removed first so the
/// same receipt re-scanned with different line breaks or spacing collides.
pub fn receipt_fingerprint(text: &str) -> String {
    let canonical: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    to_hex(&sha256_bytes(canonical.as_bytes()))
}

/// Derive the content-addressed storage path for a given hash.
/// Layout: `<base>/<first_2_hex_chars>/<full_hex>.<ext>`
pub fn attachment_path(attachments_dir: &Path, hash_hex: &str, ext: &str) -> PathBuf {
    let prefix = hash_hex.get(..2).unwrap_or(hash_hex);
    attachments_dir
        .join(prefix)
        .join(format!("{hash_hex}.{ext}"))
}
