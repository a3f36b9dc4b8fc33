//! Homomorphic backend port: the capability set the statistics engine and
//! orchestrator rely on.
//!
//! This trait abstracts the FHE library from the application logic. Key
//! material is split into a public half (encryption and evaluation keys,
//! safe to hand to a compute server) and a secret half (decryption only).

use zeroize::Zeroizing;

use crate::domain::{ContextParams, CryptoError, HeCiphertext};

/// Approximate homomorphic encryption over scalar values.
///
/// Every ciphertext carries its level; multiplications consume one level and
/// must be refused with `CryptoError::NoiseBudgetExhausted` once
/// `remaining_depth` reaches zero. Additions consume nothing. Backends with
/// bounded plaintext arithmetic also refuse, with
/// `CryptoError::HeadroomExhausted`, any operation whose result could wrap.
pub trait HomomorphicBackend: Send + Sync {
    /// Encryption key plus evaluation keys.
    type PublicKeys: Send + Sync;
    /// Decryption key.
    type SecretKey: Send + Sync;
    /// Encoded (not encrypted) value.
    type Plaintext: Clone + Send + Sync + std::fmt::Debug;

    /// Short scheme identifier recorded in serialized contexts.
    fn scheme_name(&self) -> &'static str;

    /// Whether operations may run concurrently on rayon workers.
    ///
    /// Backends that install evaluation keys in thread-local state for the
    /// span of an operation return `false`. Callers then evaluate on the
    /// calling thread and leave parallelism to the backend itself.
    fn parallel_evaluation(&self) -> bool {
        true
    }

    /// Generate fresh key material for validated parameters.
    ///
    /// # Errors
    /// Returns `CryptoError::InvalidParameters` if the backend cannot honour
    /// the parameters, `CryptoError::KeyGeneration` on failure.
    fn generate_keys(
        &self,
        params: &ContextParams,
    ) -> Result<(Self::PublicKeys, Self::SecretKey), CryptoError>;

    /// Encode a scalar at the context scale.
    ///
    /// # Errors
    /// Returns `CryptoError::Encoding` for non-finite or out-of-range values.
    fn encode(&self, params: &ContextParams, value: f64) -> Result<Self::Plaintext, CryptoError>;

    /// Decode a plaintext back to a scalar.
    ///
    /// # Errors
    /// Returns `CryptoError::Encoding` if the plaintext was produced under a
    /// different scale.
    fn decode(
        &self,
        params: &ContextParams,
        plaintext: &Self::Plaintext,
    ) -> Result<f64, CryptoError>;

    /// Encrypt under the public key.
    ///
    /// # Errors
    /// Returns `CryptoError::Encryption` if encryption fails.
    fn encrypt(
        &self,
        params: &ContextParams,
        keys: &Self::PublicKeys,
        plaintext: &Self::Plaintext,
    ) -> Result<HeCiphertext, CryptoError>;

    /// Decrypt with the secret key.
    ///
    /// # Errors
    /// Returns `CryptoError::ParameterMismatch` for foreign ciphertexts,
    /// `CryptoError::Decryption` on failure.
    fn decrypt(
        &self,
        params: &ContextParams,
        secret: &Self::SecretKey,
        ciphertext: &HeCiphertext,
    ) -> Result<Self::Plaintext, CryptoError>;

    /// Homomorphic addition. Result level is the larger input level.
    ///
    /// # Errors
    /// Returns `CryptoError::ParameterMismatch` for incompatible operands,
    /// `CryptoError::HeadroomExhausted` if the sum could wrap.
    fn add(
        &self,
        params: &ContextParams,
        keys: &Self::PublicKeys,
        a: &HeCiphertext,
        b: &HeCiphertext,
    ) -> Result<HeCiphertext, CryptoError>;

    /// Multiply by a cleartext scalar, consuming one level.
    ///
    /// # Errors
    /// Returns `CryptoError::NoiseBudgetExhausted` if no level remains,
    /// `CryptoError::HeadroomExhausted` if the product could wrap.
    fn multiply_plain(
        &self,
        params: &ContextParams,
        keys: &Self::PublicKeys,
        ciphertext: &HeCiphertext,
        scalar: f64,
    ) -> Result<HeCiphertext, CryptoError>;

    /// Multiply two ciphertexts, consuming one level.
    ///
    /// # Errors
    /// Returns `CryptoError::NoiseBudgetExhausted` if either operand has no
    /// level left, `CryptoError::ParameterMismatch` for incompatible operands,
    /// `CryptoError::HeadroomExhausted` if the product could wrap.
    fn multiply(
        &self,
        params: &ContextParams,
        keys: &Self::PublicKeys,
        a: &HeCiphertext,
        b: &HeCiphertext,
    ) -> Result<HeCiphertext, CryptoError>;

    /// Serialize the public half. Never touches secret material.
    ///
    /// # Errors
    /// Returns `CryptoError::Serialization` on failure.
    fn serialize_public(&self, keys: &Self::PublicKeys) -> Result<Vec<u8>, CryptoError>;

    /// # Errors
    /// Returns `CryptoError::Serialization` on malformed input.
    fn deserialize_public(&self, bytes: &[u8]) -> Result<Self::PublicKeys, CryptoError>;

    /// # Errors
    /// Returns `CryptoError::Serialization` on failure.
    fn serialize_secret(&self, secret: &Self::SecretKey)
        -> Result<Zeroizing<Vec<u8>>, CryptoError>;

    /// # Errors
    /// Returns `CryptoError::Serialization` on malformed input.
    fn deserialize_secret(&self, bytes: &[u8]) -> Result<Self::SecretKey, CryptoError>;

    /// Multiplications still available to `ciphertext`.
    fn remaining_depth(&self, params: &ContextParams, ciphertext: &HeCiphertext) -> u32 {
        params.max_depth.saturating_sub(ciphertext.level())
    }

    /// Check that a ciphertext belongs to these parameters.
    ///
    /// # Errors
    /// Returns `CryptoError::ParameterMismatch` otherwise.
    fn ensure_owned(
        &self,
        params: &ContextParams,
        ciphertext: &HeCiphertext,
    ) -> Result<(), CryptoError> {
        if ciphertext.params_id() != params.params_id()
            || ciphertext.scale_bits() != params.scale_bits()
        {
            return Err(CryptoError::ParameterMismatch);
        }
        Ok(())
    }

    /// Check that a ciphertext can absorb `required` more multiplications.
    ///
    /// # Errors
    /// Returns `CryptoError::NoiseBudgetExhausted` otherwise.
    fn ensure_depth(
        &self,
        params: &ContextParams,
        ciphertext: &HeCiphertext,
        required: u32,
    ) -> Result<(), CryptoError> {
        let remaining = self.remaining_depth(params, ciphertext);
        if remaining < required {
            return Err(CryptoError::NoiseBudgetExhausted {
                required,
                remaining,
            });
        }
        Ok(())
    }
}
