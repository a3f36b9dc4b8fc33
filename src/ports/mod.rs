//! Ports layer: Trait definitions for external operations.
//!
//! Following Hexagonal Architecture, these traits define the boundaries
//! between the application and external systems (HE library, audit trail).

mod audit;
mod he_backend;

pub use audit::AuditSink;
pub use he_backend::HomomorphicBackend;
