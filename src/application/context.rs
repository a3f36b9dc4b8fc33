//! Encryption context and key management.
//!
//! An [`EncryptionContext`] bundles validated parameters with backend key
//! material. It is built once (by [`KeyManager::create_context`] or
//! [`KeyManager::load_context`]) and has no mutating API afterwards; share
//! it across worker threads with `Arc`.
//!
//! # Key Isolation
//!
//! The secret key is optional. A context that crosses to a compute server is
//! produced by [`KeyManager::export_public`], whose output type can only be
//! built with the secret omitted. Loading it yields a context that can
//! encrypt and compute but fails `decrypt` with `KeyUnavailable`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::domain::{
    compute_fingerprint, keywrap, ContextParams, CryptoError, HeCiphertext, SymmetricKey,
};
use crate::ports::HomomorphicBackend;
use crate::VitalsealError;

const CONTEXT_MAGIC: &[u8; 5] = b"VSCTX";
const CONTEXT_FORMAT_VERSION: u8 = 1;

const CLIENT_CONTEXT_PURPOSE: &str = "vitalseal/client-context/v1";
const SYMMETRIC_KEY_PURPOSE: &str = "vitalseal/symmetric-key/v1";

#[derive(Serialize, Deserialize)]
struct ContextEnvelope {
    scheme: String,
    params: ContextParams,
    public: Vec<u8>,
    secret: Option<Vec<u8>>,
}

impl Drop for ContextEnvelope {
    fn drop(&mut self) {
        if let Some(secret) = self.secret.as_mut() {
            secret.zeroize();
        }
    }
}

/// Parameters plus key material for one deployment.
pub struct EncryptionContext<B: HomomorphicBackend> {
    backend: Arc<B>,
    params: ContextParams,
    public: B::PublicKeys,
    secret: Option<B::SecretKey>,
    public_fingerprint: String,
    secret_fingerprint: Option<String>,
}

impl<B: HomomorphicBackend> std::fmt::Debug for EncryptionContext<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionContext")
            .field("scheme", &self.backend.scheme_name())
            .field("params", &self.params)
            .field("public_fingerprint", &self.public_fingerprint)
            .field("secret_fingerprint", &self.secret_fingerprint)
            .finish()
    }
}

impl<B: HomomorphicBackend> EncryptionContext<B> {
    pub(crate) fn from_parts(
        backend: Arc<B>,
        params: ContextParams,
        public: B::PublicKeys,
        secret: Option<B::SecretKey>,
    ) -> Result<Self, CryptoError> {
        let public_fingerprint = compute_fingerprint(&backend.serialize_public(&public)?);
        let secret_fingerprint = match &secret {
            Some(key) => Some(compute_fingerprint(&backend.serialize_secret(key)?)),
            None => None,
        };
        Ok(Self {
            backend,
            params,
            public,
            secret,
            public_fingerprint,
            secret_fingerprint,
        })
    }

    #[cfg(test)]
    pub(crate) fn key_parts(&self) -> (&ContextParams, &B::PublicKeys, Option<&B::SecretKey>) {
        (&self.params, &self.public, self.secret.as_ref())
    }

    #[must_use]
    pub fn params(&self) -> &ContextParams {
        &self.params
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Whether this context can decrypt.
    #[must_use]
    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    #[must_use]
    pub fn public_fingerprint(&self) -> &str {
        &self.public_fingerprint
    }

    #[must_use]
    pub fn secret_fingerprint(&self) -> Option<&str> {
        self.secret_fingerprint.as_deref()
    }

    /// # Errors
    /// Returns `CryptoError::Encoding` for values the scheme cannot encode.
    pub fn encode(&self, value: f64) -> Result<B::Plaintext, CryptoError> {
        self.backend.encode(&self.params, value)
    }

    /// # Errors
    /// Returns `CryptoError::Encoding` on a scale mismatch.
    pub fn decode(&self, plaintext: &B::Plaintext) -> Result<f64, CryptoError> {
        self.backend.decode(&self.params, plaintext)
    }

    /// # Errors
    /// Returns `CryptoError::Encryption` if encryption fails.
    pub fn encrypt(&self, plaintext: &B::Plaintext) -> Result<HeCiphertext, CryptoError> {
        self.backend.encrypt(&self.params, &self.public, plaintext)
    }

    /// Encode and encrypt a scalar.
    ///
    /// # Errors
    /// Propagates encoding and encryption errors.
    pub fn encrypt_value(&self, value: f64) -> Result<HeCiphertext, CryptoError> {
        let plaintext = self.encode(value)?;
        self.encrypt(&plaintext)
    }

    /// # Errors
    /// Returns `CryptoError::KeyUnavailable` if this context has no secret key.
    pub fn decrypt(&self, ciphertext: &HeCiphertext) -> Result<B::Plaintext, CryptoError> {
        let secret = self.secret.as_ref().ok_or(CryptoError::KeyUnavailable)?;
        self.backend.decrypt(&self.params, secret, ciphertext)
    }

    /// Decrypt and decode to an approximate scalar.
    ///
    /// # Errors
    /// Returns `CryptoError::KeyUnavailable` if this context has no secret key.
    pub fn decrypt_value(&self, ciphertext: &HeCiphertext) -> Result<f64, CryptoError> {
        let plaintext = self.decrypt(ciphertext)?;
        self.decode(&plaintext)
    }

    /// # Errors
    /// Returns `CryptoError::ParameterMismatch` for incompatible operands.
    pub fn add(&self, a: &HeCiphertext, b: &HeCiphertext) -> Result<HeCiphertext, CryptoError> {
        self.backend.add(&self.params, &self.public, a, b)
    }

    /// # Errors
    /// Returns `CryptoError::NoiseBudgetExhausted` if no level remains.
    pub fn multiply_plain(
        &self,
        ciphertext: &HeCiphertext,
        scalar: f64,
    ) -> Result<HeCiphertext, CryptoError> {
        self.backend
            .multiply_plain(&self.params, &self.public, ciphertext, scalar)
    }

    /// # Errors
    /// Returns `CryptoError::NoiseBudgetExhausted` if no level remains.
    pub fn multiply(
        &self,
        a: &HeCiphertext,
        b: &HeCiphertext,
    ) -> Result<HeCiphertext, CryptoError> {
        self.backend.multiply(&self.params, &self.public, a, b)
    }

    #[must_use]
    pub fn remaining_depth(&self, ciphertext: &HeCiphertext) -> u32 {
        self.backend.remaining_depth(&self.params, ciphertext)
    }
}

/// Serialized context with the secret slot structurally empty. The only
/// form in which a context may be sent to a compute server.
#[derive(Clone)]
pub struct PublicContextExport(Vec<u8>);

impl PublicContextExport {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl std::fmt::Debug for PublicContextExport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicContextExport")
            .field("size_bytes", &self.0.len())
            .finish()
    }
}

/// Outcome of checking that an exported context cannot decrypt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyIsolationReport {
    pub public_fingerprint: String,
    /// The export parsed and its secret slot is empty.
    pub secret_slot_absent: bool,
    /// The secret key fingerprint occurs in the export neither as hex text
    /// nor as raw digest bytes.
    pub secret_fingerprint_absent: bool,
    /// The export carries the same public keys as the source context.
    pub public_keys_match: bool,
    /// A sample value encrypted through the export could not be decrypted with it.
    pub decryption_blocked: bool,
    /// The source context decrypts the same sample correctly.
    pub sample_roundtrip_ok: bool,
    pub overall_pass: bool,
}

/// Creates, serializes and restores encryption contexts.
pub struct KeyManager<B: HomomorphicBackend> {
    backend: Arc<B>,
}

impl<B: HomomorphicBackend> Clone for KeyManager<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: HomomorphicBackend> KeyManager<B> {
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    #[must_use]
    pub fn with_shared(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Validate parameters and generate fresh key material.
    ///
    /// # Errors
    /// Returns `CryptoError::InvalidParameters` if validation fails (for
    /// example a chain too short for `max_depth`), or the backend's key
    /// generation error.
    pub fn create_context(&self, params: ContextParams) -> Result<EncryptionContext<B>, CryptoError> {
        params.validate()?;
        let (public, secret) = self.backend.generate_keys(&params)?;
        let context =
            EncryptionContext::from_parts(Arc::clone(&self.backend), params, public, Some(secret))?;

        tracing::info!(
            "Created {} context (degree {}, chain {:?}, depth {}) public={} secret={}",
            self.backend.scheme_name(),
            context.params.poly_degree,
            context.params.modulus_chain_bits,
            context.params.max_depth,
            context.public_fingerprint,
            context.secret_fingerprint.as_deref().unwrap_or("-")
        );
        Ok(context)
    }

    /// Fresh 256-bit AES key from the OS CSPRNG.
    #[must_use]
    pub fn generate_symmetric_key(&self) -> SymmetricKey {
        let key = SymmetricKey::generate();
        tracing::info!("Generated symmetric key {}", key.fingerprint());
        key
    }

    /// Serialize a context, optionally including its secret key.
    ///
    /// # Errors
    /// Returns `CryptoError::KeyUnavailable` when `include_secret` is set on
    /// a context without a secret, or a serialization error.
    pub fn serialize(
        &self,
        context: &EncryptionContext<B>,
        include_secret: bool,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let secret = if include_secret {
            let key = context.secret.as_ref().ok_or(CryptoError::KeyUnavailable)?;
            // Moved into the envelope, which zeroizes it on drop.
            let mut bytes = self.backend.serialize_secret(key)?;
            Some(std::mem::take(&mut *bytes))
        } else {
            None
        };

        let envelope = ContextEnvelope {
            scheme: self.backend.scheme_name().to_string(),
            params: context.params.clone(),
            public: self.backend.serialize_public(&context.public)?,
            secret,
        };
        let body = Zeroizing::new(bincode::serialize(&envelope).map_err(|e| {
            CryptoError::Serialization(format!("Failed to serialize context: {e}"))
        })?);

        let mut out = Zeroizing::new(Vec::with_capacity(CONTEXT_MAGIC.len() + 1 + body.len()));
        out.extend_from_slice(CONTEXT_MAGIC);
        out.push(CONTEXT_FORMAT_VERSION);
        out.extend_from_slice(&body);

        tracing::debug!(
            "Serialized context {} ({} bytes, secret included: {})",
            context.public_fingerprint,
            out.len(),
            include_secret
        );
        Ok(out)
    }

    /// Export for remote computation. The secret key is never included.
    ///
    /// # Errors
    /// Returns a serialization error.
    pub fn export_public(
        &self,
        context: &EncryptionContext<B>,
    ) -> Result<PublicContextExport, CryptoError> {
        let bytes = self.serialize(context, false)?;
        Ok(PublicContextExport(bytes.to_vec()))
    }

    /// Restore a context from `serialize` or `export_public` output.
    ///
    /// # Errors
    /// Returns `CryptoError::Serialization` for foreign or corrupt input and
    /// `CryptoError::InvalidParameters` if the embedded parameters fail
    /// validation.
    pub fn load_context(&self, bytes: &[u8]) -> Result<EncryptionContext<B>, CryptoError> {
        let envelope = Self::parse_envelope(bytes)?;
        if envelope.scheme != self.backend.scheme_name() {
            return Err(CryptoError::Serialization(format!(
                "context was produced by scheme '{}', expected '{}'",
                envelope.scheme,
                self.backend.scheme_name()
            )));
        }
        envelope.params.validate()?;

        let public = self.backend.deserialize_public(&envelope.public)?;
        let secret = match &envelope.secret {
            Some(bytes) => Some(self.backend.deserialize_secret(bytes)?),
            None => None,
        };

        let context = EncryptionContext::from_parts(
            Arc::clone(&self.backend),
            envelope.params.clone(),
            public,
            secret,
        )?;
        tracing::info!(
            "Loaded context {} (secret present: {})",
            context.public_fingerprint,
            context.has_secret()
        );
        Ok(context)
    }

    fn parse_envelope(bytes: &[u8]) -> Result<ContextEnvelope, CryptoError> {
        let rest = bytes
            .strip_prefix(CONTEXT_MAGIC)
            .ok_or_else(|| CryptoError::Serialization("not a serialized context".into()))?;
        let (version, body) = rest
            .split_first()
            .ok_or_else(|| CryptoError::Serialization("truncated context".into()))?;
        if *version != CONTEXT_FORMAT_VERSION {
            return Err(CryptoError::Serialization(format!(
                "unsupported context format version {version}"
            )));
        }
        bincode::deserialize(body)
            .map_err(|e| CryptoError::Serialization(format!("Failed to deserialize context: {e}")))
    }

    /// Check that an exported context carries no secret and cannot decrypt.
    ///
    /// # Errors
    /// Returns an error only if the sample ciphertext cannot be produced at all; failed
    /// checks are reported in the result.
    pub fn verify_key_isolation(
        &self,
        exported: &[u8],
        source: &EncryptionContext<B>,
    ) -> Result<KeyIsolationReport, CryptoError> {
        let secret_slot_absent = Self::parse_envelope(exported)
            .map(|envelope| envelope.secret.is_none())
            .unwrap_or(false);

        let secret_fingerprint_absent = source
            .secret_fingerprint()
            .map_or(true, |fingerprint| fingerprint_absent(exported, fingerprint));

        let loaded = self.load_context(exported)?;
        let public_keys_match = loaded.public_fingerprint == source.public_fingerprint;

        const SAMPLE: f64 = 42.0;
        let sample = loaded.encrypt_value(SAMPLE)?;
        let decryption_blocked = matches!(
            loaded.decrypt_value(&sample),
            Err(CryptoError::KeyUnavailable)
        );
        let sample_roundtrip_ok = source
            .decrypt_value(&sample)
            .map(|v| (v - SAMPLE).abs() < 1e-6)
            .unwrap_or(false);

        let overall_pass = secret_slot_absent
            && secret_fingerprint_absent
            && public_keys_match
            && decryption_blocked
            && sample_roundtrip_ok;
        if overall_pass {
            tracing::info!("Key isolation verified for {}", loaded.public_fingerprint);
        } else {
            tracing::warn!(
                "Key isolation check FAILED for {}: slot_absent={} fingerprint_absent={} keys_match={} blocked={} roundtrip={}",
                loaded.public_fingerprint,
                secret_slot_absent,
                secret_fingerprint_absent,
                public_keys_match,
                decryption_blocked,
                sample_roundtrip_ok
            );
        }

        Ok(KeyIsolationReport {
            public_fingerprint: loaded.public_fingerprint.clone(),
            secret_slot_absent,
            secret_fingerprint_absent,
            public_keys_match,
            decryption_blocked,
            sample_roundtrip_ok,
            overall_pass,
        })
    }

    /// Serialize a context with its secret and seal it under a password.
    ///
    /// # Errors
    /// Returns `KeyUnavailable` for public-only contexts, or a sealing error.
    pub fn seal_client_context(
        &self,
        context: &EncryptionContext<B>,
        password: &str,
    ) -> crate::Result<Vec<u8>> {
        let full = self.serialize(context, true)?;
        let sealed = keywrap::seal(&full, password, CLIENT_CONTEXT_PURPOSE)?;
        Ok(sealed.to_bytes())
    }

    /// # Errors
    /// Returns `VitalsealError::Kdf` on a wrong password or tampered envelope.
    pub fn open_client_context(
        &self,
        sealed: &[u8],
        password: &str,
    ) -> crate::Result<EncryptionContext<B>> {
        let envelope = keywrap::SealedSecret::from_bytes(sealed)?;
        let full = keywrap::open(&envelope, password, CLIENT_CONTEXT_PURPOSE)?;
        Ok(self.load_context(&full)?)
    }

    /// Seal a symmetric key under a password.
    ///
    /// # Errors
    /// Returns a sealing error.
    pub fn seal_symmetric_key(&self, key: &SymmetricKey, password: &str) -> crate::Result<Vec<u8>> {
        let sealed = keywrap::seal(key.as_bytes(), password, SYMMETRIC_KEY_PURPOSE)?;
        Ok(sealed.to_bytes())
    }

    /// Restore a sealed symmetric key. The restored key starts a fresh nonce
    /// sequence.
    ///
    /// # Errors
    /// Returns `VitalsealError::Kdf` on a wrong password or tampered envelope.
    pub fn open_symmetric_key(&self, sealed: &[u8], password: &str) -> crate::Result<SymmetricKey> {
        let envelope = keywrap::SealedSecret::from_bytes(sealed)?;
        let raw = keywrap::open(&envelope, password, SYMMETRIC_KEY_PURPOSE)?;
        SymmetricKey::from_bytes(&raw).map_err(VitalsealError::from)
    }
}

/// True unless `haystack` contains `fingerprint` as text or as the bytes it
/// spells in hex.
fn fingerprint_absent(haystack: &[u8], fingerprint: &str) -> bool {
    let contains = |needle: &[u8]| {
        !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
    };
    let raw: Option<Vec<u8>> = (0..fingerprint.len())
        .step_by(2)
        .map(|i| {
            fingerprint
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
        })
        .collect();
    !contains(fingerprint.as_bytes()) && !raw.is_some_and(|bytes| contains(&bytes))
}
