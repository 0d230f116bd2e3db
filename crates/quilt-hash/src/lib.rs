//! Content digests for the quilt filesystem.
//!
//! Every object stored by a content-addressed quilt backend is keyed by the
//! string this crate produces: the BLAKE3 hash of the object's bytes, wrapped
//! in a self-describing multihash prefix (hash code + digest length) and
//! encoded with the base58 Bitcoin alphabet.
//!
//! The encoding is deterministic and unsalted. The same input yields the same
//! string on every platform, which is what makes digests usable as store keys
//! and as the leaves of directory manifests.

/// Multicodec code for BLAKE3 with a 256-bit digest.
pub const MULTIHASH_BLAKE3: u8 = 0x1e;

/// Length in bytes of the raw digest.
pub const DIGEST_LENGTH: usize = 32;

/// Hash a byte buffer into a store key.
///
/// The result is `base58(0x1e ++ 0x20 ++ blake3(data))`.
pub fn hash_bytes(data: &[u8]) -> String {
    let digest = blake3::hash(data);
    let mut multihash = Vec::with_capacity(2 + DIGEST_LENGTH);
    multihash.push(MULTIHASH_BLAKE3);
    multihash.push(DIGEST_LENGTH as u8);
    multihash.extend_from_slice(digest.as_bytes());
    bs58::encode(multihash).into_string()
}

/// Decode a digest string back to its raw 32 bytes.
///
/// Verifies the multihash prefix. Used by backends to validate store keys
/// before touching disk or the network.
pub fn decode_digest(s: &str) -> Result<[u8; DIGEST_LENGTH], HashError> {
    let bytes = bs58::decode(s)
        .into_vec()
        .map_err(|e| HashError::Encoding(e.to_string()))?;
    if bytes.len() != 2 + DIGEST_LENGTH {
        return Err(HashError::Length {
            expected: 2 + DIGEST_LENGTH,
            actual: bytes.len(),
        });
    }
    if bytes[0] != MULTIHASH_BLAKE3 || bytes[1] != DIGEST_LENGTH as u8 {
        return Err(HashError::Prefix {
            code: bytes[0],
            length: bytes[1],
        });
    }
    let mut digest = [0u8; DIGEST_LENGTH];
    digest.copy_from_slice(&bytes[2..]);
    Ok(digest)
}

/// Returns `true` if `s` parses as a well-formed digest string.
pub fn is_digest(s: &str) -> bool {
    decode_digest(s).is_ok()
}

/// Errors from digest decoding.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HashError {
    #[error("base58 decoding failed: {0}")]
    Encoding(String),

    #[error("multihash length mismatch: expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("unexpected multihash prefix: code {code:#x}, length {length}")]
    Prefix { code: u8, length: u8 },
}
