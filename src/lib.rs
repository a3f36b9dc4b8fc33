//! # Vitalseal
//!
//! Hybrid encryption for healthcare records.
//!
//! This crate provides:
//! - Deterministic classification of record fields into identifiers,
//!   clinical measurements and discarded fields
//! - AES-256-GCM for identifiers, approximate homomorphic encryption for
//!   clinical values
//! - Sum, mean and variance computed on ciphertexts with depth tracking
//! - Accuracy checks of decrypted results against plaintext references
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture:
//! - `domain`: Core types (records, schema, parameters, key material)
//! - `ports`: Trait definitions for the homomorphic backend and audit sink
//! - `adapters`: Concrete implementations (tfhe-rs, AES-GCM, log sanitizer)
//! - `application`: Use cases orchestrating domain and ports
//! - `config`: Environment-driven pipeline settings

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

#[cfg(test)]
mod testing;

pub use application::{
    EncryptionContext, FieldClassifier, HomomorphicStatisticsEngine, HybridEncryptionOrchestrator,
    KeyManager,
};
pub use domain::{CryptoError, EncryptedRecord, Record};

/// Result type for Vitalseal operations
pub type Result<T> = std::result::Result<T, VitalsealError>;

/// Main error type for Vitalseal
#[derive(Debug, thiserror::Error)]
pub enum VitalsealError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(#[from] domain::CryptoError),

    #[error("Invalid field schema: {0}")]
    Schema(#[from] domain::SchemaError),

    #[error("Accuracy check failed: {0}")]
    Accuracy(#[from] application::AccuracyError),

    #[error("Key wrapping failed: {0}")]
    Kdf(#[from] domain::keywrap::KdfError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}
