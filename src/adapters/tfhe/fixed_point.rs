//! Signed 128-bit fixed-point encoding and headroom accounting.
//!
//! A value `v` is carried as `raw = round(v · 2^scale_bits)`. Next to every
//! ciphertext travels a public bound on `|raw|`. Each operation derives the
//! bound of its result from the bounds of its operands and is refused with
//! `CryptoError::HeadroomExhausted` if an intermediate value could leave the
//! signed 128-bit range, where the encrypted arithmetic would wrap.
//!
//! Fresh ciphertexts get the bound of the encoding range rather than of the
//! encoded value, so the bound never reveals anything about the plaintext.

use crate::domain::CryptoError;

/// Largest supported encoding scale. Two scaled operands must multiply
/// inside 127 bits before the rescale.
pub const MAX_SCALE_BITS: u32 = 48;

/// Encoded magnitudes stay at or below `2^HEADROOM_BITS`, which keeps the
/// product of two fresh values inside `i128`.
pub const HEADROOM_BITS: u32 = 62;

/// Clear multipliers are limited to 64 bits once scaled.
const MAX_FACTOR_BITS: u32 = 64;

const RAW_LIMIT: u128 = i128::MAX as u128;

/// Fixed-point plaintext: `value ≈ raw / 2^scale_bits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedPoint {
    raw: i128,
    scale_bits: u32,
}

impl FixedPoint {
    /// Encode `value`, rounding to nearest.
    ///
    /// # Errors
    /// Returns `CryptoError::Encoding` for non-finite values and magnitudes
    /// at or above `2^(HEADROOM_BITS - scale_bits)`.
    pub fn encode(value: f64, scale_bits: u32) -> Result<Self, CryptoError> {
        if !value.is_finite() {
            return Err(CryptoError::Encoding(format!("non-finite value {value}")));
        }
        let limit = 2f64.powi(HEADROOM_BITS.saturating_sub(scale_bits) as i32);
        if value.abs() >= limit {
            return Err(CryptoError::Encoding(format!(
                "magnitude {value} exceeds {limit} at scale 2^{scale_bits}"
            )));
        }
        Ok(Self {
            raw: (value * unit(scale_bits) as f64).round() as i128,
            scale_bits,
        })
    }

    /// # Errors
    /// Returns `CryptoError::Encoding` if the plaintext was produced at a
    /// different scale.
    pub fn decode(&self, scale_bits: u32) -> Result<f64, CryptoError> {
        if self.scale_bits != scale_bits {
            return Err(CryptoError::Encoding(format!(
                "plaintext at scale 2^{} decoded under 2^{scale_bits}",
                self.scale_bits
            )));
        }
        Ok(self.raw as f64 / unit(scale_bits) as f64)
    }

    #[must_use]
    pub fn from_raw(raw: i128, scale_bits: u32) -> Self {
        Self { raw, scale_bits }
    }

    #[must_use]
    pub fn raw(&self) -> i128 {
        self.raw
    }

    #[must_use]
    pub fn scale_bits(&self) -> u32 {
        self.scale_bits
    }
}

/// `2^scale_bits`, the rescale divisor.
#[must_use]
pub fn unit(scale_bits: u32) -> i128 {
    1i128 << scale_bits
}

/// Bound on `|raw|` for any freshly encoded value.
#[must_use]
pub fn fresh_bound() -> u128 {
    1u128 << HEADROOM_BITS
}

/// Scale a clear multiplier to fixed point.
///
/// # Errors
/// Returns `CryptoError::Encoding` if the scaled multiplier does not fit in
/// 64 bits.
pub fn scaled_factor(scalar: f64, scale_bits: u32) -> Result<i128, CryptoError> {
    let scaled = (scalar * unit(scale_bits) as f64).round();
    if !scaled.is_finite() || scaled.abs() >= 2f64.powi(MAX_FACTOR_BITS as i32) {
        return Err(CryptoError::Encoding(format!(
            "multiplier {scalar} does not fit in {MAX_FACTOR_BITS} bits at scale 2^{scale_bits}"
        )));
    }
    Ok(scaled as i128)
}

fn bit_length(value: u128) -> u32 {
    u128::BITS - value.leading_zeros()
}

/// Bound of `a + b`.
///
/// # Errors
/// Returns `CryptoError::HeadroomExhausted` if the sum may leave `i128`.
pub fn sum_bound(a: u128, b: u128) -> Result<u128, CryptoError> {
    a.checked_add(b)
        .filter(|&sum| sum <= RAW_LIMIT)
        .ok_or(CryptoError::HeadroomExhausted {
            operation: "add",
            required_bits: bit_length(a.max(b)) + 1,
        })
}

/// Bound of `(a · b) / 2^scale_bits`, checking the pre-rescale product.
///
/// Rescaling truncates toward zero, so the quotient's bound is the product
/// bound shifted right.
///
/// # Errors
/// Returns `CryptoError::HeadroomExhausted` if the product may leave `i128`.
pub fn product_bound(
    operation: &'static str,
    a: u128,
    b: u128,
    scale_bits: u32,
) -> Result<u128, CryptoError> {
    a.checked_mul(b)
        .filter(|&product| product <= RAW_LIMIT)
        .map(|product| product >> scale_bits)
        .ok_or(CryptoError::HeadroomExhausted {
            operation,
            required_bits: bit_length(a) + bit_length(b),
        })
}

/// Clear-side evaluation of `(a · b) / 2^scale_bits` with the same
/// truncation as the encrypted rescale.
///
/// # Errors
/// Returns `CryptoError::HeadroomExhausted` if the product overflows.
pub fn rescaled_product(a: i128, b: i128, scale_bits: u32) -> Result<i128, CryptoError> {
    a.checked_mul(b)
        .map(|product| product / unit(scale_bits))
        .ok_or(CryptoError::HeadroomExhausted {
            operation: "multiply",
            required_bits: bit_length(a.unsigned_abs()) + bit_length(b.unsigned_abs()),
        })
}
