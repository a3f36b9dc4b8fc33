//! Domain layer: Core record, schema and cryptographic value types.
//!
//! Pure Rust types with no knowledge of any particular HE library.
//! All wire-facing types are serializable and validate their inputs.

mod crypto;
pub mod keywrap;
mod params;
mod record;
mod schema;

pub use crypto::{
    AeadBlob, CryptoError, HeCiphertext, SymmetricKey, NONCE_LEN, SYMMETRIC_KEY_LEN, TAG_LEN,
};
pub(crate) use crypto::compute_fingerprint;
pub use params::ContextParams;
pub use record::{
    Category, ClassificationEvent, ClassifiedRecord, EncryptedRecord, FieldValue, Record,
};
pub use schema::{normalize_field_name, FieldSchema, SchemaError, DEFAULT_SCHEMA_VERSION};
