use sha2::{Digest, Sha256};

/// Lowercases and collapses runs of whitespace.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// SHA256 hex digest of the normalized text. Identifies duplicate insights
/// across runs; it is an exact-match key, not a similarity measure.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(text).as_bytes());
    format!("{:x}", hasher.finalize())
}
