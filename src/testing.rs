//! Test helpers: a clear-text backend for fast state-machine tests and a
//! lazily generated tfhe context shared by the slow tests.

use std::sync::{Arc, OnceLock};

use zeroize::Zeroizing;

use crate::adapters::tfhe::fixed_point::{self, FixedPoint};
use crate::adapters::tfhe::{TfheBackend, TfhePublicKeys, TfheSecretKey};
use crate::application::{EncryptionContext, KeyManager};
use crate::domain::{ContextParams, CryptoError, HeCiphertext};
use crate::ports::HomomorphicBackend;

/// Backend that keeps the fixed-point value in the clear.
///
/// Encoding, truncating rescale, headroom bounds and level bookkeeping are
/// the tfhe backend's, so results match it bit for bit without the cost of
/// FHE.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainBackend;

#[derive(Debug)]
pub struct PlainPublicKeys {
    id: [u8; 16],
}

#[derive(Debug)]
pub struct PlainSecretKey {
    id: [u8; 16],
}

impl PlainBackend {
    fn store(params: &ContextParams, raw: i128, level: u32, bound: u128) -> HeCiphertext {
        HeCiphertext::new(
            raw.to_le_bytes().to_vec(),
            params.scale_bits(),
            level,
            bound,
            params.params_id(),
        )
    }

    fn load(ciphertext: &HeCiphertext) -> Result<i128, CryptoError> {
        let bytes: [u8; 16] = ciphertext
            .payload()
            .try_into()
            .map_err(|_| CryptoError::Serialization("plain payload is not 16 bytes".into()))?;
        Ok(i128::from_le_bytes(bytes))
    }

    fn key_id(bytes: &[u8]) -> Result<[u8; 16], CryptoError> {
        bytes
            .try_into()
            .map_err(|_| CryptoError::Serialization("plain key is not 16 bytes".into()))
    }
}

impl HomomorphicBackend for PlainBackend {
    type PublicKeys = PlainPublicKeys;
    type SecretKey = PlainSecretKey;
    type Plaintext = FixedPoint;

    fn scheme_name(&self) -> &'static str {
        "plain-test"
    }

    fn generate_keys(
        &self,
        _params: &ContextParams,
    ) -> Result<(PlainPublicKeys, PlainSecretKey), CryptoError> {
        let public: [u8; 16] = rand::random();
        let secret: [u8; 16] = rand::random();
        Ok((PlainPublicKeys { id: public }, PlainSecretKey { id: secret }))
    }

    fn encode(&self, params: &ContextParams, value: f64) -> Result<FixedPoint, CryptoError> {
        FixedPoint::encode(value, params.scale_bits())
    }

    fn decode(&self, params: &ContextParams, plaintext: &FixedPoint) -> Result<f64, CryptoError> {
        plaintext.decode(params.scale_bits())
    }

    fn encrypt(
        &self,
        params: &ContextParams,
        _keys: &PlainPublicKeys,
        plaintext: &FixedPoint,
    ) -> Result<HeCiphertext, CryptoError> {
        if plaintext.scale_bits() != params.scale_bits() {
            return Err(CryptoError::ParameterMismatch);
        }
        Ok(Self::store(params, plaintext.raw(), 0, fixed_point::fresh_bound()))
    }

    fn decrypt(
        &self,
        params: &ContextParams,
        _secret: &PlainSecretKey,
        ciphertext: &HeCiphertext,
    ) -> Result<FixedPoint, CryptoError> {
        self.ensure_owned(params, ciphertext)?;
        Ok(FixedPoint::from_raw(Self::load(ciphertext)?, ciphertext.scale_bits()))
    }

    fn add(
        &self,
        params: &ContextParams,
        _keys: &PlainPublicKeys,
        a: &HeCiphertext,
        b: &HeCiphertext,
    ) -> Result<HeCiphertext, CryptoError> {
        self.ensure_owned(params, a)?;
        self.ensure_owned(params, b)?;
        let bound = fixed_point::sum_bound(a.magnitude_bound(), b.magnitude_bound())?;
        let sum = Self::load(a)?
            .checked_add(Self::load(b)?)
            .ok_or(CryptoError::HeadroomExhausted {
                operation: "add",
                required_bits: 128,
            })?;
        Ok(Self::store(params, sum, a.level().max(b.level()), bound))
    }

    fn multiply_plain(
        &self,
        params: &ContextParams,
        _keys: &PlainPublicKeys,
        ciphertext: &HeCiphertext,
        scalar: f64,
    ) -> Result<HeCiphertext, CryptoError> {
        self.ensure_owned(params, ciphertext)?;
        self.ensure_depth(params, ciphertext, 1)?;
        let scale_bits = params.scale_bits();
        let factor = fixed_point::scaled_factor(scalar, scale_bits)?;
        let bound = fixed_point::product_bound(
            "multiply_plain",
            ciphertext.magnitude_bound(),
            factor.unsigned_abs(),
            scale_bits,
        )?;
        let raw = fixed_point::rescaled_product(Self::load(ciphertext)?, factor, scale_bits)?;
        Ok(Self::store(params, raw, ciphertext.level() + 1, bound))
    }

    fn multiply(
        &self,
        params: &ContextParams,
        _keys: &PlainPublicKeys,
        a: &HeCiphertext,
        b: &HeCiphertext,
    ) -> Result<HeCiphertext, CryptoError> {
        self.ensure_owned(params, a)?;
        self.ensure_owned(params, b)?;
        self.ensure_depth(params, a, 1)?;
        self.ensure_depth(params, b, 1)?;
        let scale_bits = params.scale_bits();
        let bound = fixed_point::product_bound(
            "multiply",
            a.magnitude_bound(),
            b.magnitude_bound(),
            scale_bits,
        )?;
        let raw = fixed_point::rescaled_product(Self::load(a)?, Self::load(b)?, scale_bits)?;
        Ok(Self::store(params, raw, a.level().max(b.level()) + 1, bound))
    }

    fn serialize_public(&self, keys: &PlainPublicKeys) -> Result<Vec<u8>, CryptoError> {
        Ok(keys.id.to_vec())
    }

    fn deserialize_public(&self, bytes: &[u8]) -> Result<PlainPublicKeys, CryptoError> {
        Ok(PlainPublicKeys {
            id: Self::key_id(bytes)?,
        })
    }

    fn serialize_secret(&self, secret: &PlainSecretKey) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        Ok(Zeroizing::new(secret.id.to_vec()))
    }

    fn deserialize_secret(&self, bytes: &[u8]) -> Result<PlainSecretKey, CryptoError> {
        Ok(PlainSecretKey {
            id: Self::key_id(bytes)?,
        })
    }
}

pub fn plain_key_manager() -> KeyManager<PlainBackend> {
    KeyManager::new(PlainBackend)
}

/// Fresh clear-text context with the given depth budget.
pub fn plain_context(max_depth: u32) -> EncryptionContext<PlainBackend> {
    let params = if max_depth > 2 {
        ContextParams {
            max_depth,
            ..ContextParams::extended()
        }
    } else {
        ContextParams {
            max_depth,
            ..ContextParams::standard()
        }
    };
    plain_key_manager()
        .create_context(params)
        .expect("plain context")
}

/// Public-only copy of a plaintext-backed context.
pub fn plain_public(context: &EncryptionContext<PlainBackend>) -> EncryptionContext<PlainBackend> {
    let manager = plain_key_manager();
    let exported = manager.export_public(context).expect("export");
    manager.load_context(exported.as_bytes()).expect("load")
}

pub fn tfhe_key_manager() -> KeyManager<TfheBackend> {
    KeyManager::new(TfheBackend::new())
}

static TFHE_CONTEXT: OnceLock<Arc<EncryptionContext<TfheBackend>>> = OnceLock::new();

/// Standard-preset tfhe context, generated once per test binary.
pub fn shared_tfhe_context() -> Arc<EncryptionContext<TfheBackend>> {
    Arc::clone(TFHE_CONTEXT.get_or_init(|| {
        Arc::new(
            tfhe_key_manager()
                .create_context(ContextParams::standard())
                .expect("tfhe context"),
        )
    }))
}

/// Raw key material of the shared tfhe context.
pub fn shared_tfhe_keys() -> (
    &'static ContextParams,
    &'static TfhePublicKeys,
    &'static TfheSecretKey,
) {
    shared_tfhe_context();
    let context = TFHE_CONTEXT.get().expect("initialised above");
    let (params, public, secret) = context.key_parts();
    (params, public, secret.expect("shared context holds its secret"))
}
