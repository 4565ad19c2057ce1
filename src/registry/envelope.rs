//! Artifact file envelope
//!
//! Layout: 4-byte magic, little-endian `u16` format version, little-endian
//! 32-byte SHA-256 digest of the payload, then the bincode payload.

use crate::error::{FarecastError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

pub const MAGIC: &[u8; 4] = b"FCST";
pub const FORMAT_VERSION: u16 = 2;
const DIGEST_LEN: usize = 32;
const HEADER_LEN: usize = 4 + 2 + DIGEST_LEN;

/// SHA-256 digest of an artifact payload
pub fn payload_digest(payload: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hasher.finalize().into()
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let payload = bincode::serialize(value)
        .map_err(|e| FarecastError::SerializationError(format!("Failed to serialize: {}", e)))?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&payload_digest(&payload));
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode an envelope; `key` only labels the error
pub fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T> {
    let corrupt = |reason: String| FarecastError::CorruptArtifact {
        key: key.to_string(),
        reason,
    };
    if bytes.len() < HEADER_LEN {
        return Err(corrupt(format!("{} bytes is shorter than the header", bytes.len())));
    }
    let (header, payload) = bytes.split_at(HEADER_LEN);
    if &header[..4] != MAGIC {
        return Err(corrupt("bad magic".to_string()));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != FORMAT_VERSION {
        return Err(corrupt(format!("unsupported format version {}", version)));
    }
    if header[6..HEADER_LEN] != payload_digest(payload)[..] {
        return Err(corrupt("checksum mismatch".to_string()));
    }
    bincode::deserialize(payload).map_err(|e| corrupt(format!("Failed to deserialize: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let bytes = encode(&vec![1.5f64, -2.0]).unwrap();
        let back: Vec<f64> = decode("k", &bytes).unwrap();
        assert_eq!(back, vec![1.5, -2.0]);
    }

    #[test]
    fn test_detects_tampering() {
        let mut bytes = encode(&vec![1.5f64, -2.0]).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(matches!(
            decode::<Vec<f64>>("predictor:0", &bytes),
            Err(FarecastError::CorruptArtifact { ref reason, .. }) if reason == "checksum mismatch"
        ));

        assert!(decode::<Vec<f64>>("k", b"FCST").is_err());
        let mut wrong_magic = encode(&1u8).unwrap();
        wrong_magic[0] = b'X';
        assert!(decode::<u8>("k", &wrong_magic).is_err());
    }

    #[test]
    fn test_header_holds_sha256_digest() {
        let bytes = encode(&vec![3.0f64]).unwrap();
        assert_eq!(&bytes[4..6], &FORMAT_VERSION.to_le_bytes());
        let payload = &bytes[HEADER_LEN..];
        let expected = Sha256::digest(payload);
        assert_eq!(&bytes[6..HEADER_LEN], expected.as_slice());

        // known vector
        let hex: String = payload_digest(b"abc").iter().map(|b| format!("{:02x}", b)).collect();
        assert_eq!(hex, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
    }

    #[test]
    fn test_rejects_previous_format_version() {
        let mut bytes = encode(&1u8).unwrap();
        bytes[4..6].copy_from_slice(&1u16.to_le_bytes());
        assert!(matches!(
            decode::<u8>("k", &bytes),
            Err(FarecastError::CorruptArtifact { ref reason, .. }) if reason.contains("version 1")
        ));
    }
}
