//! Accuracy metrics comparing decrypted results with plaintext references.

use serde::Serialize;

/// Floor for the reference mean in the accuracy denominator.
pub const DEFAULT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccuracyError {
    #[error("Length mismatch: {reference} reference values, {decrypted} decrypted")]
    LengthMismatch { reference: usize, decrypted: usize },

    #[error("No values to compare")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AccuracyReport {
    pub mse: f64,
    pub rmse: f64,
    /// `100 × (1 − rmse / max(|mean(reference)|, ε))`, clamped to `[0, 100]`.
    pub accuracy_percent: f64,
    pub max_abs_error: f64,
}

/// Compares plaintext reference values with decrypted approximations.
#[derive(Debug, Clone, Copy)]
pub struct AccuracyValidator {
    epsilon: f64,
}

impl Default for AccuracyValidator {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl AccuracyValidator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_epsilon(epsilon: f64) -> Self {
        Self { epsilon }
    }

    /// # Errors
    /// Returns `AccuracyError::LengthMismatch` or `AccuracyError::Empty`.
    pub fn evaluate(&self, reference: &[f64], decrypted: &[f64]) -> Result<AccuracyReport, AccuracyError> {
        check_pairs(reference, decrypted)?;

        let n = reference.len() as f64;
        let (squared, max_abs_error) = reference.iter().zip(decrypted).fold(
            (0.0_f64, 0.0_f64),
            |(squared, max_abs), (p, d)| {
                let err = (p - d).abs();
                (squared + err * err, max_abs.max(err))
            },
        );

        let mse = squared / n;
        let rmse = mse.sqrt();
        let reference_mean = reference.iter().sum::<f64>() / n;
        let denominator = reference_mean.abs().max(self.epsilon);
        let accuracy_percent = (100.0 * (1.0 - rmse / denominator)).clamp(0.0, 100.0);

        Ok(AccuracyReport {
            mse,
            rmse,
            accuracy_percent,
            max_abs_error,
        })
    }

    /// Share of pairs (in percent) with `|p − d| ≤ tolerance`.
    ///
    /// # Errors
    /// Returns `AccuracyError::LengthMismatch` or `AccuracyError::Empty`.
    pub fn within_tolerance_percent(
        reference: &[f64],
        decrypted: &[f64],
        tolerance: f64,
    ) -> Result<f64, AccuracyError> {
        check_pairs(reference, decrypted)?;
        let within = reference
            .iter()
            .zip(decrypted)
            .filter(|(p, d)| (*p - *d).abs() <= tolerance)
            .count();
        Ok(within as f64 * 100.0 / reference.len() as f64)
    }

    /// Relative error of one value in percent. A zero reference reports the
    /// absolute error scaled by 100.
    #[must_use]
    pub fn relative_error_percent(reference: f64, decrypted: f64) -> f64 {
        let abs = (reference - decrypted).abs();
        if reference == 0.0 {
            abs * 100.0
        } else {
            abs / reference.abs() * 100.0
        }
    }
}

fn check_pairs(reference: &[f64], decrypted: &[f64]) -> Result<(), AccuracyError> {
    if reference.len() != decrypted.len() {
        return Err(AccuracyError::LengthMismatch {
            reference: reference.len(),
            decrypted: decrypted.len(),
        });
    }
    if reference.is_empty() {
        return Err(AccuracyError::Empty);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let report = AccuracyValidator::new()
            .evaluate(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0])
            .expect("report");
        assert_eq!(report.mse, 0.0);
        assert_eq!(report.max_abs_error, 0.0);
        assert_eq!(report.accuracy_percent, 100.0);
    }

    #[test]
    fn test_known_errors() {
        let report = AccuracyValidator::new()
            .evaluate(&[10.0, 10.0], &[11.0, 9.0])
            .expect("report");
        assert!((report.mse - 1.0).abs() < 1e-12);
        assert!((report.rmse - 1.0).abs() < 1e-12);
        assert!((report.accuracy_percent - 90.0).abs() < 1e-9);
        assert_eq!(report.max_abs_error, 1.0);
    }

    #[test]
    fn test_accuracy_clamped() {
        let report = AccuracyValidator::new()
            .evaluate(&[1.0], &[500.0])
            .expect("report");
        assert_eq!(report.accuracy_percent, 0.0);
    }

    #[test]
    fn test_zero_mean_reference_uses_epsilon() {
        let validator = AccuracyValidator::new();
        let exact = validator.evaluate(&[-1.0, 1.0], &[-1.0, 1.0]).expect("report");
        assert_eq!(exact.accuracy_percent, 100.0);

        let off = validator
            .evaluate(&[-1.0, 1.0], &[-1.0, 1.001])
            .expect("report");
        assert!(off.accuracy_percent.is_finite());
        assert_eq!(off.accuracy_percent, 0.0);
    }

    #[test]
    fn test_shape_errors() {
        let validator = AccuracyValidator::new();
        assert_eq!(
            validator.evaluate(&[1.0], &[1.0, 2.0]),
            Err(AccuracyError::LengthMismatch {
                reference: 1,
                decrypted: 2
            })
        );
        assert_eq!(validator.evaluate(&[], &[]), Err(AccuracyError::Empty));
        assert_eq!(
            AccuracyValidator::within_tolerance_percent(&[], &[], 0.1),
            Err(AccuracyError::Empty)
        );
    }

    #[test]
    fn test_within_tolerance() {
        let pct = AccuracyValidator::within_tolerance_percent(
            &[1.0, 2.0, 3.0, 4.0],
            &[1.0, 2.05, 3.2, 4.0],
            0.1,
        )
        .expect("pct");
        assert!((pct - 75.0).abs() < 1e-12);
    }

    #[test]
    fn test_relative_error() {
        assert!((AccuracyValidator::relative_error_percent(200.0, 201.0) - 0.5).abs() < 1e-12);
        assert!((AccuracyValidator::relative_error_percent(0.0, 0.002) - 0.2).abs() < 1e-12);
        assert_eq!(AccuracyValidator::relative_error_percent(-4.0, -4.0), 0.0);
    }
}
