//! Adapters layer: Concrete implementations of ports.
//!
//! These modules contain the actual integration with external libraries:
//! - `tfhe`: tfhe-rs as the homomorphic backend
//! - `aead`: AES-256-GCM for identifier fields
//! - `audit`: classification event sinks
//! - `sanitize`: PII filtering for logs

pub mod aead;
pub mod audit;
pub mod sanitize;
pub mod tfhe;
