/// Compute the BLAKE3 hash of a byte slice, returning the hex-encoded digest.
#[must_use]
pub fn blake3_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Derive a weak HTTP entity tag from content bytes.
///
/// Weak because the tag only certifies byte equality of the served body,
/// nothing stronger. The digest is truncated: 16 hex chars of BLAKE3 is
/// plenty for cache validation.
#[must_use]
pub fn weak_etag(data: &[u8]) -> String {
    let digest = blake3_bytes(data);
    format!("W/\"{}-{}\"", data.len(), &digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake3_bytes() {
        let hash = blake3_bytes(b"hello world");
        // Known BLAKE3 hash of "hello world"
        assert_eq!(
            hash,
            "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
        );
    }

    #[test]
    fn test_weak_etag_shape() {
        let etag = weak_etag(b"export default 1;");
        assert!(etag.starts_with("W/\""));
        assert!(etag.ends_with('"'));
    }

    #[test]
    fn test_weak_etag_stable() {
        assert_eq!(weak_etag(b"abc"), weak_etag(b"abc"));
    }

    #[test]
    fn test_weak_etag_differs_on_content() {
        assert_ne!(weak_etag(b"abc"), weak_etag(b"abd"));
    }
}
