//! Cryptographic value types shared by both halves of the hybrid scheme.
//!
//! # Memory Security
//!
//! Symmetric key material lives in `Zeroizing` buffers and is wiped on drop.
//! `Debug` implementations print fingerprints and sizes, never key bytes.

use std::sync::atomic::{AtomicU64, Ordering};

use aes_gcm::aead::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;
/// AES-GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;
/// AES-256 key length in bytes.
pub const SYMMETRIC_KEY_LEN: usize = 32;

/// Fixed trailer appended to homomorphic ciphertext payloads on the wire:
/// scale bits (u32) + level (u32) + magnitude bound (u128) + params id (8 bytes).
const HE_TRAILER_LEN: usize = 4 + 4 + 16 + 8;

/// Error type for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Authentication tag mismatch for field '{field}'")]
    AuthenticationFailure { field: String },

    #[error("Noise budget exhausted: operation needs {required} level(s), {remaining} remaining")]
    NoiseBudgetExhausted { required: u32, remaining: u32 },

    #[error("Secret key not available in this context")]
    KeyUnavailable,

    #[error("Empty input sequence")]
    EmptyInput,

    #[error("Invalid context parameters: {0}")]
    InvalidParameters(String),

    #[error("Ciphertexts were produced under different parameters or scales")]
    ParameterMismatch,

    #[error("Fixed-point headroom exhausted: {operation} needs {required_bits} bits, 127 available")]
    HeadroomExhausted {
        operation: &'static str,
        required_bits: u32,
    },

    #[error("Encoding failed: {0}")]
    Encoding(String),

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Homomorphic computation failed: {0}")]
    Computation(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Nonce sequence exhausted for this key")]
    NonceExhausted,
}

/// AES-256-GCM output for a single identifier field.
///
/// Wire layout: `nonce (12) ‖ ciphertext ‖ tag (16)`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AeadBlob {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

impl AeadBlob {
    /// Serialized length in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        NONCE_LEN + self.ciphertext.len() + TAG_LEN
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size_bytes());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }

    /// # Errors
    /// Returns `CryptoError::Serialization` if the input is shorter than a
    /// nonce plus a tag.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Serialization(format!(
                "AEAD blob too short: {} bytes",
                bytes.len()
            )));
        }
        let (nonce_bytes, rest) = bytes.split_at(NONCE_LEN);
        let (ciphertext, tag_bytes) = rest.split_at(rest.len() - TAG_LEN);

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(tag_bytes);

        Ok(Self {
            nonce,
            ciphertext: ciphertext.to_vec(),
            tag,
        })
    }
}

impl std::fmt::Debug for AeadBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AeadBlob")
            .field("size_bytes", &self.size_bytes())
            .finish()
    }
}

/// Homomorphic ciphertext of a single clinical value.
///
/// The payload is opaque backend bytes. Scale, level, a bound on the encoded
/// magnitude and the parameter id travel alongside so any party can check
/// compatibility, remaining depth and arithmetic headroom without key
/// material.
///
/// The metadata is bookkeeping written by whoever ran the last operation and
/// is not authenticated. Ciphertexts read back with [`HeCiphertext::from_bytes`]
/// must come from storage the caller trusts: rewriting the level or the bound
/// lets a later computation run past its budget and decrypt to garbage.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeCiphertext {
    payload: Vec<u8>,
    scale_bits: u32,
    level: u32,
    magnitude_bound: u128,
    params_id: [u8; 8],
}

impl HeCiphertext {
    #[must_use]
    pub fn new(
        payload: Vec<u8>,
        scale_bits: u32,
        level: u32,
        magnitude_bound: u128,
        params_id: [u8; 8],
    ) -> Self {
        Self {
            payload,
            scale_bits,
            level,
            magnitude_bound,
            params_id,
        }
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub fn scale_bits(&self) -> u32 {
        self.scale_bits
    }

    /// Multiplicative levels already consumed.
    #[must_use]
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Upper bound on the absolute encoded value at `scale_bits`. Derived
    /// from public parameters and the operations applied, never from the
    /// plaintext.
    #[must_use]
    pub fn magnitude_bound(&self) -> u128 {
        self.magnitude_bound
    }

    #[must_use]
    pub fn params_id(&self) -> [u8; 8] {
        self.params_id
    }

    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.payload.len() + HE_TRAILER_LEN
    }

    /// Whether two ciphertexts can be combined.
    #[must_use]
    pub fn compatible_with(&self, other: &Self) -> bool {
        self.params_id == other.params_id && self.scale_bits == other.scale_bits
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size_bytes());
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&self.scale_bits.to_le_bytes());
        out.extend_from_slice(&self.level.to_le_bytes());
        out.extend_from_slice(&self.magnitude_bound.to_le_bytes());
        out.extend_from_slice(&self.params_id);
        out
    }

    /// Parse the wire layout. The trailer is taken as written; see the type
    /// docs.
    ///
    /// # Errors
    /// Returns `CryptoError::Serialization` if the trailer is missing, the
    /// payload is empty or the magnitude bound lies outside the signed
    /// 128-bit range.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() <= HE_TRAILER_LEN {
            return Err(CryptoError::Serialization(format!(
                "HE ciphertext too short: {} bytes",
                bytes.len()
            )));
        }
        let (payload, trailer) = bytes.split_at(bytes.len() - HE_TRAILER_LEN);

        let mut word = [0u8; 4];
        word.copy_from_slice(&trailer[0..4]);
        let scale_bits = u32::from_le_bytes(word);
        word.copy_from_slice(&trailer[4..8]);
        let level = u32::from_le_bytes(word);
        let mut wide = [0u8; 16];
        wide.copy_from_slice(&trailer[8..24]);
        let magnitude_bound = u128::from_le_bytes(wide);
        let mut params_id = [0u8; 8];
        params_id.copy_from_slice(&trailer[24..32]);

        if magnitude_bound > i128::MAX as u128 {
            return Err(CryptoError::Serialization(format!(
                "HE ciphertext magnitude bound {magnitude_bound} exceeds the signed 128-bit range"
            )));
        }

        Ok(Self {
            payload: payload.to_vec(),
            scale_bits,
            level,
            magnitude_bound,
            params_id,
        })
    }
}

impl std::fmt::Debug for HeCiphertext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeCiphertext")
            .field("size_bytes", &self.size_bytes())
            .field("scale_bits", &self.scale_bits)
            .field("level", &self.level)
            .field("magnitude_bound", &self.magnitude_bound)
            .field("params_id", &to_hex(&self.params_id))
            .finish()
    }
}

/// Monotonic 96-bit nonce sequence.
///
/// Starts at a random point and increments once per draw, so nonces from one
/// sequence never repeat and two independently started sequences overlap
/// with negligible probability.
struct NonceSequence {
    start: u128,
    counter: AtomicU64,
}

impl NonceSequence {
    const MASK: u128 = (1u128 << 96) - 1;

    fn random() -> Self {
        let mut seed = [0u8; 16];
        OsRng.fill_bytes(&mut seed[4..]);
        Self {
            start: u128::from_be_bytes(seed) & Self::MASK,
            counter: AtomicU64::new(0),
        }
    }

    fn next(&self) -> Result<[u8; NONCE_LEN], CryptoError> {
        let n = self
            .counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| c.checked_add(1))
            .map_err(|_| CryptoError::NonceExhausted)?;
        let value = self.start.wrapping_add(u128::from(n)) & Self::MASK;
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&value.to_be_bytes()[4..]);
        Ok(nonce)
    }

    fn issued(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

/// AES-256 key for identifier fields.
///
/// Not `Clone`: each key value owns the only nonce sequence drawing from it.
pub struct SymmetricKey {
    material: Zeroizing<[u8; SYMMETRIC_KEY_LEN]>,
    fingerprint: String,
    nonces: NonceSequence,
}

impl SymmetricKey {
    /// Draw a fresh key from the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut material = Zeroizing::new([0u8; SYMMETRIC_KEY_LEN]);
        OsRng.fill_bytes(material.as_mut());
        Self::from_material(material)
    }

    /// Restore a key from raw bytes. The restored key gets its own nonce
    /// sequence.
    ///
    /// # Errors
    /// Returns `CryptoError::Serialization` if `bytes` is not 32 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != SYMMETRIC_KEY_LEN {
            return Err(CryptoError::Serialization(format!(
                "symmetric key must be {SYMMETRIC_KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut material = Zeroizing::new([0u8; SYMMETRIC_KEY_LEN]);
        material.copy_from_slice(bytes);
        Ok(Self::from_material(material))
    }

    fn from_material(material: Zeroizing<[u8; SYMMETRIC_KEY_LEN]>) -> Self {
        let fingerprint = compute_fingerprint(material.as_ref());
        Self {
            material,
            fingerprint,
            nonces: NonceSequence::random(),
        }
    }

    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.material.as_ref()
    }

    /// Next nonce for this key.
    ///
    /// # Errors
    /// Returns `CryptoError::NonceExhausted` after 2^64 − 1 draws.
    pub fn next_nonce(&self) -> Result<[u8; NONCE_LEN], CryptoError> {
        self.nonces.next()
    }

    /// Number of nonces drawn so far.
    #[must_use]
    pub fn nonces_issued(&self) -> u64 {
        self.nonces.issued()
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("fingerprint", &self.fingerprint)
            .field("nonces_issued", &self.nonces_issued())
            .finish()
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Fingerprint for key identification: hex of the first 8 bytes of SHA-256.
///
/// Hashing keeps the fingerprint from revealing any key bytes.
pub(crate) fn compute_fingerprint(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};

    let digest = Sha256::digest(bytes);
    to_hex(&digest[..8])
}
