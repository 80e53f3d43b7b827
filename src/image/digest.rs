//! Digest formatting helpers
//!
//! Layers are content-addressed blobs identified by a `sha256:<hex>` digest.
//! The migrator never recomputes digests; blobs are copied verbatim under
//! their existing content address.

/// Validate SHA256 hex string (64 characters, all hex)
pub fn is_valid_sha256_hex(digest: &str) -> bool {
    digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit())
}

/// Validate full Docker digest format (sha256:xxxxx)
pub fn is_valid_docker_digest(digest: &str) -> bool {
    if let Some(hex_part) = digest.strip_prefix("sha256:") {
        is_valid_sha256_hex(hex_part)
    } else {
        false
    }
}

/// Shorten a digest to the docker-style 12-hex-character form for display.
pub fn short_digest(digest: &str) -> &str {
    digest.get(..19).unwrap_or(digest)
}
