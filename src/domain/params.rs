//! Approximate-arithmetic context parameters.
//!
//! Parameters are described in CKKS terms (ring degree, modulus chain,
//! encoding scale, multiplicative depth) and validated against the
//! homomorphic encryption standard's 128-bit security bounds before any key
//! material is generated.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::crypto::CryptoError;

const MIN_POLY_DEGREE: usize = 1024;
const MAX_POLY_DEGREE: usize = 32768;
const MIN_PRIME_BITS: u32 = 20;
const MAX_PRIME_BITS: u32 = 60;

/// Maximum total modulus bits for 128-bit classical security, per ring degree.
const SECURITY_BOUNDS_128: [(usize, u32); 6] = [
    (1024, 27),
    (2048, 54),
    (4096, 109),
    (8192, 218),
    (16384, 438),
    (32768, 881),
];

/// Parameters of an encryption context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextParams {
    /// Ring dimension. Power of two.
    pub poly_degree: usize,
    /// Bit sizes of the modulus chain primes, outermost first.
    pub modulus_chain_bits: Vec<u32>,
    /// Fixed-point encoding scale. Power of two.
    pub global_scale: f64,
    /// Number of multiplications a fresh ciphertext can absorb.
    pub max_depth: u32,
}

impl ContextParams {
    /// Default parameters: degree 8192, chain [60, 40, 40, 60], scale 2^40.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            poly_degree: 8192,
            modulus_chain_bits: vec![60, 40, 40, 60],
            global_scale: 2f64.powi(40),
            max_depth: 2,
        }
    }

    /// Deeper chain for variance over long pipelines: degree 16384, depth 4.
    #[must_use]
    pub fn extended() -> Self {
        Self {
            poly_degree: 16384,
            modulus_chain_bits: vec![60, 40, 40, 40, 40, 60],
            global_scale: 2f64.powi(40),
            max_depth: 4,
        }
    }

    /// Look up a preset by name.
    #[must_use]
    pub fn preset(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "standard" => Some(Self::standard()),
            "extended" | "optimized" => Some(Self::extended()),
            _ => None,
        }
    }

    /// Depth supported by the modulus chain: one level per intermediate prime.
    #[must_use]
    pub fn chain_depth(&self) -> u32 {
        self.modulus_chain_bits.len().saturating_sub(2) as u32
    }

    #[must_use]
    pub fn total_modulus_bits(&self) -> u32 {
        self.modulus_chain_bits.iter().sum()
    }

    /// Log2 of the encoding scale. Only meaningful after `validate`.
    #[must_use]
    pub fn scale_bits(&self) -> u32 {
        self.global_scale.log2().round() as u32
    }

    /// Validate the parameter set.
    ///
    /// # Errors
    /// Returns `CryptoError::InvalidParameters` describing the first violated
    /// constraint.
    pub fn validate(&self) -> Result<(), CryptoError> {
        let invalid = |msg: String| Err(CryptoError::InvalidParameters(msg));

        if !self.poly_degree.is_power_of_two()
            || !(MIN_POLY_DEGREE..=MAX_POLY_DEGREE).contains(&self.poly_degree)
        {
            return invalid(format!(
                "poly_degree {} must be a power of two in [{MIN_POLY_DEGREE}, {MAX_POLY_DEGREE}]",
                self.poly_degree
            ));
        }

        if self.modulus_chain_bits.len() < 2 {
            return invalid(format!(
                "modulus chain needs at least 2 primes, got {}",
                self.modulus_chain_bits.len()
            ));
        }

        if let Some(bits) = self
            .modulus_chain_bits
            .iter()
            .find(|b| !(MIN_PRIME_BITS..=MAX_PRIME_BITS).contains(b))
        {
            return invalid(format!(
                "prime size {bits} outside [{MIN_PRIME_BITS}, {MAX_PRIME_BITS}] bits"
            ));
        }

        let bound = SECURITY_BOUNDS_128
            .iter()
            .find(|(degree, _)| *degree == self.poly_degree)
            .map(|(_, bits)| *bits)
            .unwrap_or(0);
        let total = self.total_modulus_bits();
        if total > bound {
            return invalid(format!(
                "total modulus {total} bits exceeds {bound} bits allowed at degree {} for 128-bit security",
                self.poly_degree
            ));
        }

        if self.max_depth > self.chain_depth() {
            return invalid(format!(
                "max_depth {} needs {} primes, chain has {}",
                self.max_depth,
                self.max_depth + 2,
                self.modulus_chain_bits.len()
            ));
        }

        if !self.global_scale.is_finite() || self.global_scale <= 1.0 {
            return invalid(format!("global_scale {} must be > 1", self.global_scale));
        }
        let log = self.global_scale.log2();
        if (log - log.round()).abs() > f64::EPSILON * 64.0 {
            return invalid(format!(
                "global_scale {} must be a power of two",
                self.global_scale
            ));
        }

        let scale_bits = self.scale_bits();
        let first = self.modulus_chain_bits[0];
        if scale_bits >= first {
            return invalid(format!(
                "scale 2^{scale_bits} leaves no room below the first prime ({first} bits)"
            ));
        }
        let last = self.modulus_chain_bits.len() - 1;
        if let Some(bits) = self.modulus_chain_bits[1..last]
            .iter()
            .find(|b| **b < scale_bits)
        {
            return invalid(format!(
                "intermediate prime of {bits} bits cannot rescale a 2^{scale_bits} scale"
            ));
        }

        Ok(())
    }

    /// Short identifier stamped into every ciphertext produced under these
    /// parameters: first 8 bytes of SHA-256 over the canonical encoding.
    #[must_use]
    pub fn params_id(&self) -> [u8; 8] {
        let mut hasher = Sha256::new();
        hasher.update((self.poly_degree as u64).to_le_bytes());
        hasher.update((self.modulus_chain_bits.len() as u64).to_le_bytes());
        for bits in &self.modulus_chain_bits {
            hasher.update(bits.to_le_bytes());
        }
        hasher.update(self.global_scale.to_bits().to_le_bytes());
        hasher.update(self.max_depth.to_le_bytes());
        let digest = hasher.finalize();

        let mut id = [0u8; 8];
        id.copy_from_slice(&digest[..8]);
        id
    }
}

impl Default for ContextParams {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        ContextParams::standard().validate().expect("standard is valid");
        ContextParams::extended().validate().expect("extended is valid");
        assert_eq!(ContextParams::standard().scale_bits(), 40);
        assert_eq!(ContextParams::extended().chain_depth(), 4);
    }

    #[test]
    fn test_depth_inconsistent_with_chain() {
        let params = ContextParams {
            max_depth: 3,
            ..ContextParams::standard()
        };
        assert!(matches!(
            params.validate(),
            Err(CryptoError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_zero_depth_chain_is_valid() {
        let params = ContextParams {
            modulus_chain_bits: vec![60, 60],
            max_depth: 0,
            ..ContextParams::standard()
        };
        params.validate().expect("two-prime chain with depth 0");
    }

    #[test]
    fn test_security_bound_enforced() {
        let params = ContextParams {
            poly_degree: 4096,
            ..ContextParams::standard()
        };
        let err = params.validate().expect_err("200 bits at 4096 is insecure");
        assert!(err.to_string().contains("128-bit"));
    }

    #[test]
    fn test_rejects_bad_degree_and_scale() {
        let bad_degree = ContextParams {
            poly_degree: 5000,
            ..ContextParams::standard()
        };
        assert!(bad_degree.validate().is_err());

        let bad_scale = ContextParams {
            global_scale: 1e12,
            ..ContextParams::standard()
        };
        assert!(bad_scale.validate().is_err());

        let too_wide = ContextParams {
            global_scale: 2f64.powi(45),
            ..ContextParams::standard()
        };
        assert!(too_wide.validate().is_err());
    }

    #[test]
    fn test_params_id_distinguishes_sets() {
        let a = ContextParams::standard();
        let b = ContextParams::extended();
        assert_eq!(a.params_id(), ContextParams::standard().params_id());
        assert_ne!(a.params_id(), b.params_id());
    }

    #[test]
    fn test_preset_lookup() {
        assert_eq!(ContextParams::preset("Standard"), Some(ContextParams::standard()));
        assert_eq!(ContextParams::preset("optimized"), Some(ContextParams::extended()));
        assert_eq!(ContextParams::preset("bogus"), None);
    }
}
