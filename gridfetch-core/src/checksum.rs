use md5::Md5;
use sha2::{Digest, Sha256};

use crate::transfer::ChecksumAlgorithm;

/// Running hash over a byte stream, fed one chunk at a time as bytes arrive
/// off the wire. Mirrors the source implementation's `hashlib.new(...)`
/// accumulator.
pub enum RunningHash {
    Sha256(Sha256),
    Md5(Md5),
}

impl RunningHash {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Sha256 => RunningHash::Sha256(Sha256::new()),
            ChecksumAlgorithm::Md5 => RunningHash::Md5(Md5::new()),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        match self {
            RunningHash::Sha256(h) => h.update(chunk),
            RunningHash::Md5(h) => h.update(chunk),
        }
    }

    /// Lowercase hex digest, compared byte-for-byte against the expected
    /// checksum string (§4.3 step 6: case-sensitive hex equality).
    pub fn hexdigest(self) -> String {
        match self {
            RunningHash::Sha256(h) => hex::encode(h.finalize()),
            RunningHash::Md5(h) => hex::encode(h.finalize()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_empty_input_matches_known_digest() {
        let hash = RunningHash::new(ChecksumAlgorithm::Sha256);
        assert_eq!(
            hash.hexdigest(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn md5_mismatch_is_detected_case_sensitively() {
        let mut hash = RunningHash::new(ChecksumAlgorithm::Md5);
        hash.update(b"hello");
        assert_ne!(hash.hexdigest(), "00000000000000000000000000000000");
    }
}
