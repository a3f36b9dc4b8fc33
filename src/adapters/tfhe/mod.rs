//! TFHE adapter: `HomomorphicBackend` implemented with tfhe-rs.
//!
//! Clinical values are carried as signed 128-bit fixed-point integers
//! (`FheInt128`) at scale `2^scale_bits`, giving an approximate scheme with
//! the same operational contract as CKKS:
//!
//! - `add` is exact integer addition at a shared scale
//! - `multiply` / `multiply_plain` multiply and then rescale by `2^scale_bits`
//!   (scalar division), consuming one level
//! - levels are tracked in the ciphertext and capped by `max_depth`
//! - a public magnitude bound is tracked next to the level (see
//!   [`fixed_point`]); an operation whose intermediate product could wrap
//!   `i128` is refused with `HeadroomExhausted` instead of decrypting to
//!   garbage
//!
//! tfhe-rs chooses its own lattice parameters (128-bit security,
//! `PARAM_MESSAGE_2_CARRY_2_KS_PBS_TUNIFORM_2M128`). Public-key encryption
//! uses the dedicated compact public key parameters together with the
//! casting key that switches expanded ciphertexts to the compute parameters.
//! The ring degree and modulus chain in `ContextParams` describe the
//! security envelope and the depth budget; the backend enforces the latter.
//!
//! # Thread Safety
//!
//! **IMPORTANT**: `tfhe::set_server_key()` writes to a *thread-local* (TLS) global.
//!
//! Every operation that needs evaluation keys installs them for its own
//! duration through an RAII guard and clears them on exit. tfhe-rs keeps the
//! thread-local borrowed while it fans work out on the rayon pool, so a rayon
//! worker must never pick up a second tfhe operation in the middle of one.
//! The backend therefore reports `parallel_evaluation() == false` and callers
//! run its operations one at a time on the calling thread; tfhe-rs
//! parallelises inside each operation.
//!
//! # Key Material
//!
//! - `ClientKey`: secret, decryption only, never part of a public export
//! - `CompactPublicKey`: encryption by anyone holding the public export
//! - `ServerKey`: evaluation keys for homomorphic arithmetic (cannot decrypt)

pub mod fixed_point;

use serde::{Deserialize, Serialize};
use tfhe::prelude::*;
use tfhe::shortint::parameters::{
    PARAM_KEYSWITCH_PKE_TO_SMALL_MESSAGE_2_CARRY_2_KS_PBS_TUNIFORM_2M128,
    PARAM_MESSAGE_2_CARRY_2_KS_PBS_TUNIFORM_2M128, PARAM_PKE_MESSAGE_2_CARRY_2_KS_PBS_TUNIFORM_2M128,
};
use tfhe::{
    generate_keys, set_server_key, unset_server_key, ClientKey as TfheClientKey,
    CompactCiphertextList, CompactPublicKey, ConfigBuilder, FheInt128,
    ServerKey as TfheServerKey,
};
use zeroize::Zeroizing;

use crate::domain::{ContextParams, CryptoError, HeCiphertext};
use crate::ports::HomomorphicBackend;

pub use fixed_point::{FixedPoint, MAX_SCALE_BITS};

/// Public half: compact encryption key plus evaluation keys.
pub struct TfhePublicKeys {
    encryption: CompactPublicKey,
    evaluation: TfheServerKey,
}

impl std::fmt::Debug for TfhePublicKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TfhePublicKeys").finish_non_exhaustive()
    }
}

/// Secret half.
pub struct TfheSecretKey {
    client: TfheClientKey,
}

impl std::fmt::Debug for TfheSecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TfheSecretKey([REDACTED])")
    }
}

#[derive(Serialize)]
struct PublicBundleRef<'a> {
    encryption: &'a CompactPublicKey,
    evaluation: &'a TfheServerKey,
}

#[derive(Deserialize)]
struct PublicBundle {
    encryption: CompactPublicKey,
    evaluation: TfheServerKey,
}

/// Installs evaluation keys on the current thread and clears them on drop.
struct ServerKeyScope;

impl ServerKeyScope {
    fn enter(key: &TfheServerKey) -> Self {
        set_server_key(key.clone());
        Self
    }
}

impl Drop for ServerKeyScope {
    fn drop(&mut self) {
        unset_server_key();
    }
}

/// tfhe-rs backed homomorphic backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct TfheBackend;

impl TfheBackend {
    /// Create a new TFHE backend.
    #[must_use]
    pub fn new() -> Self {
        tracing::info!("Initializing TfheBackend (tfhe-rs, FheInt128 fixed-point)");
        Self
    }

    fn load(ciphertext: &HeCiphertext) -> Result<FheInt128, CryptoError> {
        bincode::deserialize(ciphertext.payload()).map_err(|e| {
            CryptoError::Serialization(format!("Failed to deserialize ciphertext: {e}"))
        })
    }

    fn store(
        params: &ContextParams,
        value: &FheInt128,
        level: u32,
        magnitude_bound: u128,
    ) -> Result<HeCiphertext, CryptoError> {
        let payload = bincode::serialize(value).map_err(|e| {
            CryptoError::Serialization(format!("Failed to serialize ciphertext: {e}"))
        })?;
        Ok(HeCiphertext::new(
            payload,
            params.scale_bits(),
            level,
            magnitude_bound,
            params.params_id(),
        ))
    }
}

impl HomomorphicBackend for TfheBackend {
    type PublicKeys = TfhePublicKeys;
    type SecretKey = TfheSecretKey;
    type Plaintext = FixedPoint;

    fn scheme_name(&self) -> &'static str {
        "tfhe-fixed128"
    }

    fn parallel_evaluation(&self) -> bool {
        false
    }

    fn generate_keys(
        &self,
        params: &ContextParams,
    ) -> Result<(Self::PublicKeys, Self::SecretKey), CryptoError> {
        let scale_bits = params.scale_bits();
        if scale_bits > MAX_SCALE_BITS {
            return Err(CryptoError::InvalidParameters(format!(
                "scale 2^{scale_bits} exceeds the 2^{MAX_SCALE_BITS} fixed-point limit"
            )));
        }

        tracing::info!(
            "Generating tfhe-rs keys (scale 2^{}, max depth {})...",
            scale_bits,
            params.max_depth
        );

        let config = ConfigBuilder::with_custom_parameters(PARAM_MESSAGE_2_CARRY_2_KS_PBS_TUNIFORM_2M128)
            .use_dedicated_compact_public_key_parameters((
                PARAM_PKE_MESSAGE_2_CARRY_2_KS_PBS_TUNIFORM_2M128,
                PARAM_KEYSWITCH_PKE_TO_SMALL_MESSAGE_2_CARRY_2_KS_PBS_TUNIFORM_2M128,
            ))
            .build();
        let (client, server) = generate_keys(config);
        let encryption = CompactPublicKey::try_new(&client).map_err(|e| {
            CryptoError::KeyGeneration(format!("Failed to derive compact public key: {e}"))
        })?;

        tracing::info!("Generated tfhe-rs client, server and compact public keys");

        Ok((
            TfhePublicKeys {
                encryption,
                evaluation: server,
            },
            TfheSecretKey { client },
        ))
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
        keys: &TfhePublicKeys,
        plaintext: &FixedPoint,
    ) -> Result<HeCiphertext, CryptoError> {
        if plaintext.scale_bits() != params.scale_bits() {
            return Err(CryptoError::ParameterMismatch);
        }

        // Expansion key-switches to the compute parameters, which needs the
        // server key installed.
        let _scope = ServerKeyScope::enter(&keys.evaluation);
        let list = CompactCiphertextList::builder(&keys.encryption)
            .push(plaintext.raw())
            .build();
        let expanded = list
            .expand()
            .map_err(|e| CryptoError::Encryption(format!("Failed to expand ciphertext: {e}")))?;
        let value: FheInt128 = expanded
            .get(0)
            .map_err(|e| CryptoError::Encryption(format!("Failed to unpack ciphertext: {e}")))?
            .ok_or_else(|| CryptoError::Encryption("Compact list is empty".into()))?;

        tracing::trace!("Encrypted one fixed-point value");
        Self::store(params, &value, 0, fixed_point::fresh_bound())
    }

    fn decrypt(
        &self,
        params: &ContextParams,
        secret: &TfheSecretKey,
        ciphertext: &HeCiphertext,
    ) -> Result<FixedPoint, CryptoError> {
        self.ensure_owned(params, ciphertext)?;
        let value = Self::load(ciphertext)?;
        let raw: i128 = value.decrypt(&secret.client);
        Ok(FixedPoint::from_raw(raw, ciphertext.scale_bits()))
    }

    fn add(
        &self,
        params: &ContextParams,
        keys: &TfhePublicKeys,
        a: &HeCiphertext,
        b: &HeCiphertext,
    ) -> Result<HeCiphertext, CryptoError> {
        self.ensure_owned(params, a)?;
        self.ensure_owned(params, b)?;
        let bound = fixed_point::sum_bound(a.magnitude_bound(), b.magnitude_bound())?;
        let (x, y) = (Self::load(a)?, Self::load(b)?);

        let _scope = ServerKeyScope::enter(&keys.evaluation);
        let sum = &x + &y;
        Self::store(params, &sum, a.level().max(b.level()), bound)
    }

    fn multiply_plain(
        &self,
        params: &ContextParams,
        keys: &TfhePublicKeys,
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
        let x = Self::load(ciphertext)?;

        let _scope = ServerKeyScope::enter(&keys.evaluation);
        let scaled = &x * factor;
        let rescaled = &scaled / fixed_point::unit(scale_bits);
        tracing::trace!("multiply_plain consumed one level");
        Self::store(params, &rescaled, ciphertext.level() + 1, bound)
    }

    fn multiply(
        &self,
        params: &ContextParams,
        keys: &TfhePublicKeys,
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
        let (x, y) = (Self::load(a)?, Self::load(b)?);

        let _scope = ServerKeyScope::enter(&keys.evaluation);
        let product = &x * &y;
        let rescaled = &product / fixed_point::unit(scale_bits);
        tracing::trace!("multiply consumed one level");
        Self::store(params, &rescaled, a.level().max(b.level()) + 1, bound)
    }

    fn serialize_public(&self, keys: &TfhePublicKeys) -> Result<Vec<u8>, CryptoError> {
        bincode::serialize(&PublicBundleRef {
            encryption: &keys.encryption,
            evaluation: &keys.evaluation,
        })
        .map_err(|e| CryptoError::Serialization(format!("Failed to serialize public keys: {e}")))
    }

    fn deserialize_public(&self, bytes: &[u8]) -> Result<TfhePublicKeys, CryptoError> {
        let bundle: PublicBundle = bincode::deserialize(bytes).map_err(|e| {
            CryptoError::Serialization(format!("Failed to deserialize public keys: {e}"))
        })?;
        Ok(TfhePublicKeys {
            encryption: bundle.encryption,
            evaluation: bundle.evaluation,
        })
    }

    fn serialize_secret(&self, secret: &TfheSecretKey) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        bincode::serialize(&secret.client)
            .map(Zeroizing::new)
            .map_err(|e| {
                CryptoError::Serialization(format!("Failed to serialize client key: {e}"))
            })
    }

    fn deserialize_secret(&self, bytes: &[u8]) -> Result<TfheSecretKey, CryptoError> {
        let client: TfheClientKey = bincode::deserialize(bytes).map_err(|e| {
            CryptoError::Serialization(format!("Failed to deserialize client key: {e}"))
        })?;
        Ok(TfheSecretKey { client })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::shared_tfhe_keys;

    fn roundtrip(backend: &TfheBackend, ct: &HeCiphertext) -> f64 {
        let (params, _, secret) = shared_tfhe_keys();
        let pt = backend.decrypt(params, secret, ct).expect("decrypt");
        backend.decode(params, &pt).expect("decode")
    }

    fn encrypt(backend: &TfheBackend, value: f64) -> HeCiphertext {
        let (params, public, _) = shared_tfhe_keys();
        let pt = backend.encode(params, value).expect("encode");
        backend.encrypt(params, public, &pt).expect("encrypt")
    }

    #[test]
    fn test_encode_decode() {
        let backend = TfheBackend::new();
        let params = ContextParams::standard();
        let pt = backend.encode(&params, -12.75).expect("encode");
        assert_eq!(pt.raw(), (-12.75 * 2f64.powi(40)) as i128);
        assert_eq!(pt.scale_bits(), 40);
        assert_eq!(backend.decode(&params, &pt).expect("decode"), -12.75);
    }

    #[test]
    fn test_encode_rejects_out_of_range() {
        let backend = TfheBackend::new();
        let params = ContextParams::standard();
        assert!(matches!(
            backend.encode(&params, f64::NAN),
            Err(CryptoError::Encoding(_))
        ));
        assert!(matches!(
            backend.encode(&params, 5.0e6),
            Err(CryptoError::Encoding(_))
        ));
    }

    #[test]
    fn test_scale_above_limit_rejected_before_keygen() {
        let backend = TfheBackend::new();
        let params = ContextParams {
            modulus_chain_bits: vec![60, 50, 60],
            global_scale: 2f64.powi(50),
            max_depth: 1,
            ..ContextParams::standard()
        };
        params.validate().expect("valid in general");
        assert!(matches!(
            backend.generate_keys(&params),
            Err(CryptoError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let backend = TfheBackend::new();
        for value in [98.6, -12.5, 0.0] {
            let ct = encrypt(&backend, value);
            assert_eq!(ct.level(), 0);
            assert!(ct.size_bytes() > 1000, "FHE ciphertext should be large");
            assert!((roundtrip(&backend, &ct) - value).abs() < 1e-9);
        }
    }

    #[test]
    fn test_add_keeps_level() {
        let backend = TfheBackend::new();
        let (params, public, _) = shared_tfhe_keys();
        let a = encrypt(&backend, 1.25);
        let b = encrypt(&backend, 2.5);

        let sum = backend.add(params, public, &a, &b).expect("add");
        assert_eq!(sum.level(), 0);
        assert!((roundtrip(&backend, &sum) - 3.75).abs() < 1e-9);
    }

    #[test]
    fn test_multiplications_consume_levels() {
        let backend = TfheBackend::new();
        let (params, public, _) = shared_tfhe_keys();
        let ten = encrypt(&backend, 10.0);
        let minus_four = encrypt(&backend, -4.0);

        let half = backend
            .multiply_plain(params, public, &ten, 0.5)
            .expect("multiply_plain");
        assert_eq!(half.level(), 1);
        assert!((roundtrip(&backend, &half) - 5.0).abs() < 1e-6);

        let product = backend
            .multiply(params, public, &half, &minus_four)
            .expect("multiply");
        assert_eq!(product.level(), 2);
        assert!((roundtrip(&backend, &product) + 20.0).abs() < 1e-6);

        assert_eq!(backend.remaining_depth(params, &product), 0);
        assert!(matches!(
            backend.multiply_plain(params, public, &product, 2.0),
            Err(CryptoError::NoiseBudgetExhausted {
                required: 1,
                remaining: 0
            })
        ));
    }

    #[test]
    fn test_operations_stay_on_calling_thread() {
        assert!(!TfheBackend::new().parallel_evaluation());
    }

    #[test]
    fn test_fresh_ciphertext_bound_is_value_independent() {
        let backend = TfheBackend::new();
        let small = encrypt(&backend, 0.5);
        let large = encrypt(&backend, -4.0e6);
        assert_eq!(small.magnitude_bound(), fixed_point::fresh_bound());
        assert_eq!(large.magnitude_bound(), small.magnitude_bound());
    }

    #[test]
    fn test_square_of_square_refused_before_wrapping() {
        let backend = TfheBackend::new();
        let (params, public, _) = shared_tfhe_keys();
        let x = encrypt(&backend, 1.0e4);

        let square = backend.multiply(params, public, &x, &x).expect("square");
        assert_eq!(square.level(), 1);
        assert!((roundtrip(&backend, &square) - 1.0e8).abs() < 1e-3);

        // One level remains, but (2^84)^2 does not fit in i128.
        assert_eq!(backend.remaining_depth(params, &square), 1);
        assert!(matches!(
            backend.multiply(params, public, &square, &square),
            Err(CryptoError::HeadroomExhausted {
                operation: "multiply",
                ..
            })
        ));
    }

    #[test]
    fn test_foreign_ciphertext_rejected() {
        let backend = TfheBackend::new();
        let (params, public, _) = shared_tfhe_keys();
        let ct = encrypt(&backend, 1.0);
        let foreign = HeCiphertext::new(
            ct.payload().to_vec(),
            ct.scale_bits(),
            0,
            ct.magnitude_bound(),
            ContextParams::extended().params_id(),
        );
        assert!(matches!(
            backend.add(params, public, &ct, &foreign),
            Err(CryptoError::ParameterMismatch)
        ));
    }

    #[test]
    fn test_public_keys_roundtrip() {
        let backend = TfheBackend::new();
        let (params, public, secret) = shared_tfhe_keys();
        let bytes = backend.serialize_public(public).expect("serialize");
        let restored = backend.deserialize_public(&bytes).expect("deserialize");

        let pt = backend.encode(params, 42.0).expect("encode");
        let ct = backend.encrypt(params, &restored, &pt).expect("encrypt");
        let back = backend.decrypt(params, secret, &ct).expect("decrypt");
        assert_eq!(back, pt);
    }
}
