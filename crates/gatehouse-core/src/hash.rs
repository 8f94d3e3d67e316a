use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of bytes, returning lowercase hex string.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Stable task id derived from a content hash: `task_<first 16 hex chars>`.
pub fn task_id_for(content_hash: &str) -> String {
    let prefix: String = content_hash.chars().take(16).collect();
    format!("task_{prefix}")
}
