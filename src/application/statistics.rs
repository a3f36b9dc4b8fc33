//! Homomorphic statistics over clinical ciphertexts.
//!
//! The engine only ever needs public material: it is normally built on a
//! context restored from a public export. Every request that multiplies
//! checks its depth budget up front and is rejected before any ciphertext is
//! produced if the inputs cannot absorb the required levels. A request that
//! passes the depth check can still be refused by the backend when the
//! fixed-point headroom runs out; the budget then ends `Rejected` as well.

use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;

use crate::application::EncryptionContext;
use crate::domain::{CryptoError, EncryptedRecord, HeCiphertext};
use crate::ports::HomomorphicBackend;

/// How ciphertexts are summed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReductionStrategy {
    /// Left-to-right fold. The canonical result.
    #[default]
    Fold,
    /// Balanced pairwise reduction, on the rayon pool when the backend
    /// evaluates concurrently.
    Tree,
}

impl std::str::FromStr for ReductionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fold" => Ok(Self::Fold),
            "tree" => Ok(Self::Tree),
            other => Err(format!("unknown reduction strategy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticKind {
    Sum,
    Mean,
    MeanOfSquares,
}

impl StatisticKind {
    /// Multiplicative depth the statistic consumes.
    #[must_use]
    pub fn depth(self) -> u32 {
        match self {
            Self::Sum => 0,
            Self::Mean => 1,
            Self::MeanOfSquares => 2,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::MeanOfSquares => "mean_of_squares",
        }
    }
}

/// Encrypted statistic plus the bookkeeping needed to interpret it.
#[derive(Debug, Clone, Serialize)]
pub struct StatisticResult {
    #[serde(skip)]
    pub ciphertext: HeCiphertext,
    pub operation: StatisticKind,
    pub input_count: usize,
    pub depth_consumed: u32,
}

/// `E[x²]` and `E[x]`, finalised client side by [`finalize_variance`].
#[derive(Debug, Clone, Serialize)]
pub struct VarianceResult {
    pub mean_of_squares: StatisticResult,
    pub mean: StatisticResult,
}

/// Lifecycle of one statistics request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Requested,
    DepthChecked,
    Computed,
    Rejected,
}

/// Depth accounting for a single request. Never shared between requests.
#[derive(Debug, Clone)]
pub struct DepthBudget {
    operation: &'static str,
    required: u32,
    available: u32,
    state: RequestState,
}

impl DepthBudget {
    #[must_use]
    pub fn new(operation: &'static str, required: u32, available: u32) -> Self {
        tracing::debug!(
            "{operation}: requested (needs {required} level(s), {available} available)"
        );
        Self {
            operation,
            required,
            available,
            state: RequestState::Requested,
        }
    }

    #[must_use]
    pub fn state(&self) -> RequestState {
        self.state
    }

    #[must_use]
    pub fn required(&self) -> u32 {
        self.required
    }

    #[must_use]
    pub fn available(&self) -> u32 {
        self.available
    }

    /// Move to `DepthChecked`, or to `Rejected` if the budget is short.
    ///
    /// # Errors
    /// Returns `CryptoError::NoiseBudgetExhausted` on rejection.
    pub fn check(&mut self) -> Result<(), CryptoError> {
        if self.available < self.required {
            self.state = RequestState::Rejected;
            tracing::warn!(
                "{}: rejected, needs {} level(s) but only {} remain",
                self.operation,
                self.required,
                self.available
            );
            return Err(CryptoError::NoiseBudgetExhausted {
                required: self.required,
                remaining: self.available,
            });
        }
        self.state = RequestState::DepthChecked;
        tracing::debug!("{}: depth checked", self.operation);
        Ok(())
    }

    pub fn mark_computed(&mut self) {
        self.state = RequestState::Computed;
        tracing::debug!("{}: computed", self.operation);
    }

    /// Close the request with the outcome of the evaluation.
    ///
    /// # Errors
    /// Passes the evaluation error through after moving to `Rejected`.
    pub fn settle<T>(&mut self, outcome: Result<T, CryptoError>) -> Result<T, CryptoError> {
        match outcome {
            Ok(value) => {
                self.mark_computed();
                Ok(value)
            }
            Err(e) => {
                self.state = RequestState::Rejected;
                tracing::warn!("{}: rejected during evaluation: {e}", self.operation);
                Err(e)
            }
        }
    }
}

/// Sum, mean and variance over ciphertexts of one context.
pub struct HomomorphicStatisticsEngine<B: HomomorphicBackend> {
    context: Arc<EncryptionContext<B>>,
    reduction: ReductionStrategy,
}

impl<B: HomomorphicBackend> HomomorphicStatisticsEngine<B> {
    #[must_use]
    pub fn new(context: Arc<EncryptionContext<B>>) -> Self {
        Self {
            context,
            reduction: ReductionStrategy::default(),
        }
    }

    #[must_use]
    pub fn with_reduction(mut self, reduction: ReductionStrategy) -> Self {
        self.reduction = reduction;
        self
    }

    #[must_use]
    pub fn reduction(&self) -> ReductionStrategy {
        self.reduction
    }

    #[must_use]
    pub fn context(&self) -> &EncryptionContext<B> {
        &self.context
    }

    /// Sum of all inputs. Consumes no depth.
    ///
    /// # Errors
    /// Returns `CryptoError::EmptyInput` for an empty sequence and
    /// `CryptoError::ParameterMismatch` for foreign ciphertexts.
    pub fn homomorphic_sum<'a, I>(&self, ciphertexts: I) -> Result<HeCiphertext, CryptoError>
    where
        I: IntoIterator<Item = &'a HeCiphertext>,
    {
        let inputs = self.gather(ciphertexts)?;
        self.reduce(&inputs)
    }

    /// Mean of all inputs. Consumes one level.
    ///
    /// # Errors
    /// Returns `CryptoError::EmptyInput` for an empty sequence and
    /// `CryptoError::NoiseBudgetExhausted` if the inputs have no level left.
    pub fn homomorphic_mean<'a, I>(&self, ciphertexts: I) -> Result<StatisticResult, CryptoError>
    where
        I: IntoIterator<Item = &'a HeCiphertext>,
    {
        let inputs = self.gather(ciphertexts)?;
        let mut budget = self.budget(StatisticKind::Mean, &inputs);
        budget.check()?;
        budget.settle(self.mean_of(&inputs))
    }

    /// `E[x²]` and `E[x]` of the inputs. Consumes two levels.
    ///
    /// # Errors
    /// Returns `CryptoError::EmptyInput` for an empty sequence and
    /// `CryptoError::NoiseBudgetExhausted` unless every input has at least
    /// two levels left, and `CryptoError::HeadroomExhausted` if squaring the
    /// inputs could overflow the fixed-point range.
    pub fn homomorphic_variance<'a, I>(&self, ciphertexts: I) -> Result<VarianceResult, CryptoError>
    where
        I: IntoIterator<Item = &'a HeCiphertext>,
    {
        let inputs = self.gather(ciphertexts)?;
        let mut budget = DepthBudget::new("variance", 2, self.available_depth(&inputs));
        budget.check()?;

        let (mean_of_squares, mean) = budget.settle(
            self.mean_of_squares(&inputs)
                .and_then(|squares| self.mean_of(&inputs).map(|mean| (squares, mean))),
        )?;

        tracing::info!("Computed encrypted variance over {} values", inputs.len());
        Ok(VarianceResult {
            mean_of_squares,
            mean,
        })
    }

    /// Run `kind` on one clinical field across encrypted records.
    ///
    /// # Errors
    /// Returns `CryptoError::EmptyInput` if no record carries the field.
    pub fn column_statistic(
        &self,
        records: &[EncryptedRecord],
        field: &str,
        kind: StatisticKind,
    ) -> Result<StatisticResult, CryptoError> {
        let column = clinical_column(records, field);
        tracing::debug!("{} over column '{field}' ({} values)", kind.label(), column.len());

        match kind {
            StatisticKind::Sum => {
                let ciphertext = self.homomorphic_sum(column.iter().copied())?;
                Ok(StatisticResult {
                    ciphertext,
                    operation: StatisticKind::Sum,
                    input_count: column.len(),
                    depth_consumed: 0,
                })
            }
            StatisticKind::Mean => self.homomorphic_mean(column.iter().copied()),
            StatisticKind::MeanOfSquares => {
                let inputs = self.gather(column.iter().copied())?;
                let mut budget = self.budget(kind, &inputs);
                budget.check()?;
                budget.settle(self.mean_of_squares(&inputs))
            }
        }
    }

    fn gather<'a, I>(&self, ciphertexts: I) -> Result<Vec<&'a HeCiphertext>, CryptoError>
    where
        I: IntoIterator<Item = &'a HeCiphertext>,
    {
        let inputs: Vec<&HeCiphertext> = ciphertexts.into_iter().collect();
        if inputs.is_empty() {
            return Err(CryptoError::EmptyInput);
        }
        let params = self.context.params();
        for ct in &inputs {
            self.context.backend().ensure_owned(params, ct)?;
        }
        Ok(inputs)
    }

    /// Smallest remaining depth across the inputs.
    fn available_depth(&self, inputs: &[&HeCiphertext]) -> u32 {
        inputs
            .iter()
            .map(|ct| self.context.remaining_depth(ct))
            .min()
            .unwrap_or(0)
    }

    fn budget(&self, kind: StatisticKind, inputs: &[&HeCiphertext]) -> DepthBudget {
        DepthBudget::new(kind.label(), kind.depth(), self.available_depth(inputs))
    }

    fn parallel(&self) -> bool {
        self.context.backend().parallel_evaluation()
    }

    fn reduce(&self, inputs: &[&HeCiphertext]) -> Result<HeCiphertext, CryptoError> {
        let (first, rest) = inputs.split_first().ok_or(CryptoError::EmptyInput)?;
        match self.reduction {
            ReductionStrategy::Fold => rest
                .iter()
                .try_fold((*first).clone(), |acc, ct| self.context.add(&acc, ct)),
            ReductionStrategy::Tree if self.parallel() => inputs
                .par_iter()
                .map(|ct| Ok((*ct).clone()))
                .try_reduce_with(|a, b| self.context.add(&a, &b))
                .unwrap_or(Err(CryptoError::EmptyInput)),
            ReductionStrategy::Tree => self.pairwise(inputs),
        }
    }

    /// Sequential balanced reduction: adds neighbours level by level.
    fn pairwise(&self, inputs: &[&HeCiphertext]) -> Result<HeCiphertext, CryptoError> {
        let mut layer: Vec<HeCiphertext> = inputs.iter().map(|ct| (*ct).clone()).collect();
        while layer.len() > 1 {
            layer = layer
                .chunks(2)
                .map(|pair| match pair {
                    [a, b] => self.context.add(a, b),
                    [single] => Ok(single.clone()),
                    _ => Err(CryptoError::EmptyInput),
                })
                .collect::<Result<_, _>>()?;
        }
        layer.pop().ok_or(CryptoError::EmptyInput)
    }

    fn mean_of(&self, inputs: &[&HeCiphertext]) -> Result<StatisticResult, CryptoError> {
        let sum = self.reduce(inputs)?;
        let ciphertext = self.context.multiply_plain(&sum, 1.0 / inputs.len() as f64)?;
        Ok(StatisticResult {
            ciphertext,
            operation: StatisticKind::Mean,
            input_count: inputs.len(),
            depth_consumed: 1,
        })
    }

    fn mean_of_squares(&self, inputs: &[&HeCiphertext]) -> Result<StatisticResult, CryptoError> {
        let squares: Vec<HeCiphertext> = if self.parallel() {
            inputs
                .par_iter()
                .map(|ct| self.context.multiply(ct, ct))
                .collect::<Result<_, _>>()?
        } else {
            inputs
                .iter()
                .map(|ct| self.context.multiply(ct, ct))
                .collect::<Result<_, _>>()?
        };
        let refs: Vec<&HeCiphertext> = squares.iter().collect();

        let mut result = self.mean_of(&refs)?;
        result.operation = StatisticKind::MeanOfSquares;
        result.depth_consumed = 2;
        Ok(result)
    }
}

/// Client-side `E[x²] − E[x]²`.
///
/// Approximation error can push a near-zero variance slightly negative; the
/// result is clamped at zero.
///
/// # Errors
/// Returns `CryptoError::KeyUnavailable` without the secret key.
pub fn finalize_variance<B: HomomorphicBackend>(
    context: &EncryptionContext<B>,
    result: &VarianceResult,
) -> Result<f64, CryptoError> {
    let mean_of_squares = context.decrypt_value(&result.mean_of_squares.ciphertext)?;
    let mean = context.decrypt_value(&result.mean.ciphertext)?;
    Ok((mean_of_squares - mean * mean).max(0.0))
}

/// One field's ciphertexts across records, in record order. Records without
/// the field are skipped.
#[must_use]
pub fn clinical_column<'a>(records: &'a [EncryptedRecord], field: &str) -> Vec<&'a HeCiphertext> {
    records
        .iter()
        .filter_map(|record| record.clinical.get(field))
        .collect()
}
