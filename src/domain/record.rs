//! Healthcare record types.
//!
//! A [`Record`] is a flat map of field names to values, built once per input
//! row and never mutated. Classification and encryption produce new values
//! rather than editing the record in place.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::crypto::{AeadBlob, HeCiphertext};

/// A single field value as it arrives from the ingestion layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Interpret the value as a finite number.
    ///
    /// Text that parses as a finite `f64` is accepted, since CSV-derived
    /// records frequently carry vitals as strings.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        let value = match self {
            Self::Number(n) => *n,
            Self::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        value.is_finite().then_some(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Immutable healthcare record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Number of fields in the record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Iterate fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Field names in name order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

impl<K, V> FromIterator<(K, V)> for Record
where
    K: Into<String>,
    V: Into<FieldValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Field category assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Personally identifying; encrypted with AES-256-GCM.
    Identifier,
    /// Numeric clinical measurement; encrypted homomorphically.
    Clinical,
    /// Neither; dropped before encryption.
    Unknown,
}

/// Output of segmenting a record. Transient: lives only for one
/// `encrypt_record` call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClassifiedRecord {
    pub identifier_fields: BTreeMap<String, FieldValue>,
    pub clinical_fields: BTreeMap<String, f64>,
    pub discarded_fields: Vec<String>,
}

/// A record after hybrid encryption.
///
/// Identifier fields and clinical fields never overlap. Discarded field names
/// are kept so the external layer can report what was dropped; their values
/// are gone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncryptedRecord {
    pub identifiers: BTreeMap<String, AeadBlob>,
    pub clinical: BTreeMap<String, HeCiphertext>,
    #[serde(default)]
    pub discarded: Vec<String>,
}

impl EncryptedRecord {
    /// Total serialized size of all ciphertexts, in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        let aead: usize = self.identifiers.values().map(AeadBlob::size_bytes).sum();
        let he: usize = self.clinical.values().map(HeCiphertext::size_bytes).sum();
        aead + he
    }
}

/// Counts emitted once per classified record, for audit purposes.
///
/// Carries field names and counts only, never values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationEvent {
    pub schema_version: String,
    pub accepted_identifiers: usize,
    pub accepted_clinical: usize,
    pub discarded: Vec<String>,
    pub observed_at: chrono::DateTime<chrono::Utc>,
}

impl ClassificationEvent {
    #[must_use]
    pub fn from_classified(schema_version: &str, classified: &ClassifiedRecord) -> Self {
        Self {
            schema_version: schema_version.to_string(),
            accepted_identifiers: classified.identifier_fields.len(),
            accepted_clinical: classified.clinical_fields.len(),
            discarded: classified.discarded_fields.clone(),
            observed_at: chrono::Utc::now(),
        }
    }
}
