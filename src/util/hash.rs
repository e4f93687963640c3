//! Content hashing for extraction provenance

/// Hex MD5 digest of the given content.
///
/// Used to tie an `insight-extracted` signal back to the exact note content
/// it was derived from. Not a security boundary.
pub fn content_hash(content: &str) -> String {
    format!("{:x}", md5::compute(content.as_bytes()))
}
