use crate::result::Result;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs;

/** Content hashing used for artifact digests, tree hashes and cache keys
 *
 * # Format
 * - Lowercase hex SHA-256, prefixed with `sha256:` when rendered for humans
 *
 * # Notes
 * - Hashing is deterministic; nothing here is salted
 */
pub fn hash_bytes(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Hashes a sequence of fields, length-prefixing each so `("ab", "c")` and `("a", "bc")` differ.
pub fn hash_fields<I, T>(fields: I) -> String
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for field in fields {
        let field = field.as_ref();
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field);
    }
    hex::encode(hasher.finalize())
}

pub async fn hash_file(file_path: &Path) -> Result<String> {
    let content = fs::read(file_path).await?;
    Ok(hash_bytes(&content))
}
