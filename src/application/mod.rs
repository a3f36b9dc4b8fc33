//! Application layer: Use cases and services.
//!
//! This module wires the domain types to the ports: classification, context
//! and key management, hybrid encryption, encrypted statistics and the
//! accuracy checks run after client-side decryption.

mod accuracy;
mod classifier;
mod context;
mod orchestrator;
mod statistics;

pub use accuracy::{AccuracyError, AccuracyReport, AccuracyValidator, DEFAULT_EPSILON};
pub use classifier::{ClassificationReport, FieldClassifier};
pub use context::{EncryptionContext, KeyIsolationReport, KeyManager, PublicContextExport};
pub use orchestrator::HybridEncryptionOrchestrator;
pub use statistics::{
    clinical_column, finalize_variance, DepthBudget, HomomorphicStatisticsEngine,
    ReductionStrategy, RequestState, StatisticKind, StatisticResult, VarianceResult,
};
