//! Password-based sealing of client-held secrets.
//!
//! The secret-bearing serialization of an encryption context (and any
//! exported symmetric key) only ever leaves memory inside this envelope:
//! a key derived with Argon2id seals the bytes with AES-256-GCM, and the
//! purpose label is bound as associated data so an envelope sealed for one
//! use cannot be opened as another.
//!
//! Envelope layout:
//! `magic (6) ‖ salt_len (u32 LE) ‖ salt (b64) ‖ nonce (12) ‖ ciphertext+tag`

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use argon2::{password_hash::SaltString, Algorithm, Argon2, Params, PasswordHasher, Version};
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

const MAGIC: &[u8; 6] = b"VSSEAL";

/// Argon2id memory cost in KiB (46 MiB), single pass, single lane.
const ARGON2_MEMORY_KIB: u32 = 47104;

#[derive(Debug, Error)]
pub enum KdfError {
    #[error("Key derivation failed: {0}")]
    Derivation(String),

    #[error("Sealing failed: {0}")]
    Encryption(String),

    #[error("Unsealing failed: wrong password, wrong purpose or tampered envelope")]
    Decryption,

    #[error("Invalid sealed envelope format")]
    InvalidFormat,
}

/// A sealed secret with everything needed to open it except the password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSecret {
    pub salt: String,
    pub nonce: [u8; 12],
    pub ciphertext: Vec<u8>,
}

impl SealedSecret {
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let salt = self.salt.as_bytes();
        let mut out =
            Vec::with_capacity(MAGIC.len() + 4 + salt.len() + 12 + self.ciphertext.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&(salt.len() as u32).to_le_bytes());
        out.extend_from_slice(salt);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// # Errors
    /// Returns `KdfError::InvalidFormat` on a truncated or foreign envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KdfError> {
        let rest = bytes.strip_prefix(MAGIC).ok_or(KdfError::InvalidFormat)?;
        if rest.len() < 4 {
            return Err(KdfError::InvalidFormat);
        }
        let (len_bytes, rest) = rest.split_at(4);
        let mut word = [0u8; 4];
        word.copy_from_slice(len_bytes);
        let salt_len = u32::from_le_bytes(word) as usize;

        if rest.len() < salt_len + 12 {
            return Err(KdfError::InvalidFormat);
        }
        let (salt_bytes, rest) = rest.split_at(salt_len);
        let salt = std::str::from_utf8(salt_bytes)
            .map_err(|_| KdfError::InvalidFormat)?
            .to_string();
        let (nonce_bytes, ciphertext) = rest.split_at(12);
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(nonce_bytes);

        Ok(Self {
            salt,
            nonce,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

fn derive_key(password: &str, salt: &SaltString) -> Result<Zeroizing<[u8; 32]>, KdfError> {
    let params = Params::new(ARGON2_MEMORY_KIB, 1, 1, Some(32))
        .map_err(|e| KdfError::Derivation(format!("Invalid Argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let hash = argon2
        .hash_password(password.as_bytes(), salt)
        .map_err(|e| KdfError::Derivation(e.to_string()))?;
    let output = hash
        .hash
        .ok_or_else(|| KdfError::Derivation("Hash output missing".to_string()))?;

    let bytes = output.as_bytes();
    if bytes.len() < 32 {
        return Err(KdfError::Derivation("Hash too short".to_string()));
    }
    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&bytes[..32]);
    Ok(key)
}

/// Seal `secret` under `password` for the given purpose label.
///
/// # Errors
/// Returns an error if key derivation or encryption fails.
pub fn seal(secret: &[u8], password: &str, purpose: &str) -> Result<SealedSecret, KdfError> {
    let salt = SaltString::generate(&mut OsRng);
    let mut nonce = [0u8; 12];
    OsRng.fill_bytes(&mut nonce);

    let key = derive_key(password, &salt)?;
    let cipher =
        Aes256Gcm::new_from_slice(key.as_ref()).map_err(|e| KdfError::Encryption(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: secret,
                aad: purpose.as_bytes(),
            },
        )
        .map_err(|e| KdfError::Encryption(e.to_string()))?;

    Ok(SealedSecret {
        salt: salt.to_string(),
        nonce,
        ciphertext,
    })
}

/// Open a sealed secret.
///
/// # Errors
/// Returns `KdfError::Decryption` if the password or purpose is wrong or the
/// envelope was modified.
pub fn open(
    sealed: &SealedSecret,
    password: &str,
    purpose: &str,
) -> Result<Zeroizing<Vec<u8>>, KdfError> {
    let salt = SaltString::from_b64(&sealed.salt).map_err(|_| KdfError::InvalidFormat)?;
    let key = derive_key(password, &salt)?;
    let cipher =
        Aes256Gcm::new_from_slice(key.as_ref()).map_err(|e| KdfError::Derivation(e.to_string()))?;

    cipher
        .decrypt(
            Nonce::from_slice(&sealed.nonce),
            Payload {
                msg: sealed.ciphertext.as_ref(),
                aad: purpose.as_bytes(),
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| KdfError::Decryption)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PURPOSE: &str = "vitalseal/test";

    #[test]
    fn test_seal_open_roundtrip() {
        let secret = b"client context bytes";
        let sealed = seal(secret, "correct-horse-battery-staple", PURPOSE).expect("seal");
        let opened = open(&sealed, "correct-horse-battery-staple", PURPOSE).expect("open");
        assert_eq!(opened.as_slice(), secret);
    }

    #[test]
    fn test_wrong_password_fails() {
        let sealed = seal(b"secret", "right", PURPOSE).expect("seal");
        assert!(matches!(
            open(&sealed, "wrong", PURPOSE),
            Err(KdfError::Decryption)
        ));
    }

    #[test]
    fn test_wrong_purpose_fails() {
        let sealed = seal(b"secret", "pw", PURPOSE).expect("seal");
        assert!(matches!(
            open(&sealed, "pw", "vitalseal/other"),
            Err(KdfError::Decryption)
        ));
    }

    #[test]
    fn test_envelope_bytes_roundtrip() {
        let sealed = seal(b"key", "pw", PURPOSE).expect("seal");
        let restored = SealedSecret::from_bytes(&sealed.to_bytes()).expect("parse");
        assert_eq!(restored, sealed);
        let opened = open(&restored, "pw", PURPOSE).expect("open");
        assert_eq!(opened.as_slice(), b"key");
    }

    #[test]
    fn test_foreign_bytes_rejected() {
        assert!(matches!(
            SealedSecret::from_bytes(b"not an envelope"),
            Err(KdfError::InvalidFormat)
        ));
        let mut truncated = seal(b"key", "pw", PURPOSE).expect("seal").to_bytes();
        truncated.truncate(12);
        assert!(SealedSecret::from_bytes(&truncated).is_err());
    }
}
