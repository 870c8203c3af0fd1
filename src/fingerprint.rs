use sha2::{Digest, Sha256};

/// Fingerprints file content as lowercase hex SHA-256.
///
/// Two fingerprints are equal exactly when the contents are, for any
/// practical purpose, so this is what the baseline stores.
pub fn hash_content(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            hash_content(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_any_change_changes_hash() {
        let a = hash_content("export default function A() {}");
        let b = hash_content("export default function A() {} ");
        assert_ne!(a, b);
        assert_eq!(a, hash_content("export default function A() {}"));
        assert_eq!(a.len(), 64);
    }
}
