use sha2::{Digest, Sha256};
use std::fmt;

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

/// Content version of a stored document: the SHA-256 hex digest of its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version(String);

impl Version {
    pub fn of(data: &[u8]) -> Self {
        Version(to_hex(&sha256_bytes(data)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to tell versions apart in logs.
        write!(f, "{}", &self.0[..12])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_bytes_known_vector() {
        // SHA-256 of empty bytes is a known constant.
        assert_eq!(
            to_hex(&sha256_bytes(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn version_tracks_content() {
        assert_eq!(Version::of(b"hello"), Version::of(b"hello"));
        assert_ne!(Version::of(b"hello"), Version::of(b"world"));
        assert_eq!(Version::of(b"x").as_str().len(), 64);
        assert_eq!(Version::of(b"x").to_string().len(), 12);
    }
}
