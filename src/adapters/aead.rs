//! AES-256-GCM adapter for identifier fields.
//!
//! Each value is JSON-encoded (so text and numbers round-trip exactly),
//! encrypted under a nonce drawn from the key's own sequence, and bound to
//! its field name as associated data: a blob moved to another field fails
//! authentication.

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use zeroize::Zeroizing;

use crate::domain::{AeadBlob, CryptoError, FieldValue, SymmetricKey, TAG_LEN};

/// Field-level AEAD cipher bound to one symmetric key.
pub struct IdentifierCipher<'k> {
    key: &'k SymmetricKey,
    cipher: Aes256Gcm,
}

impl<'k> IdentifierCipher<'k> {
    /// # Errors
    /// Returns `CryptoError::Encryption` if the key cannot initialise AES-256.
    pub fn new(key: &'k SymmetricKey) -> Result<Self, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::Encryption(format!("Invalid AES-256 key: {e}")))?;
        Ok(Self { key, cipher })
    }

    /// Encrypt one identifier value.
    ///
    /// # Errors
    /// Returns `CryptoError::NonceExhausted` if the key's nonce sequence is
    /// spent, `CryptoError::Encryption` otherwise.
    pub fn seal(&self, field: &str, value: &FieldValue) -> Result<AeadBlob, CryptoError> {
        let mut buffer = Zeroizing::new(serde_json::to_vec(value).map_err(|e| {
            CryptoError::Encryption(format!("Failed to encode field '{field}': {e}"))
        })?);
        let nonce = self.key.next_nonce()?;

        let tag = self
            .cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), field.as_bytes(), &mut buffer)
            .map_err(|_| CryptoError::Encryption(format!("AES-GCM failed for field '{field}'")))?;

        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(tag.as_slice());

        Ok(AeadBlob {
            nonce,
            ciphertext: buffer.to_vec(),
            tag: tag_bytes,
        })
    }

    /// Verify and decrypt one identifier value. The tag is checked before any
    /// plaintext is produced.
    ///
    /// # Errors
    /// Returns `CryptoError::AuthenticationFailure` on tag mismatch (wrong
    /// key, wrong field, or any modified byte).
    pub fn open(&self, field: &str, blob: &AeadBlob) -> Result<FieldValue, CryptoError> {
        let mut buffer = Zeroizing::new(blob.ciphertext.clone());
        self.cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&blob.nonce),
                field.as_bytes(),
                &mut buffer,
                Tag::from_slice(&blob.tag),
            )
            .map_err(|_| CryptoError::AuthenticationFailure {
                field: field.to_string(),
            })?;

        serde_json::from_slice(&buffer).map_err(|e| {
            CryptoError::Decryption(format!("Field '{field}' is not a valid value: {e}"))
        })
    }
}
