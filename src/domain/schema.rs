//! Versioned field schema.
//!
//! The schema is the only source of truth for which field names are
//! identifying and which are clinical. It is loaded once at startup and
//! shared read-only.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Built-in schema version.
pub const DEFAULT_SCHEMA_VERSION: &str = "v1";

const DEFAULT_IDENTIFIER_FIELDS: [&str; 6] =
    ["patient_id", "name", "address", "phone", "email", "dob"];

const DEFAULT_CLINICAL_FIELDS: [&str; 7] = [
    "heart_rate",
    "blood_pressure_sys",
    "blood_pressure_dia",
    "temperature",
    "glucose",
    "bmi",
    "cholesterol",
];

/// Errors while building or loading a schema.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Field(s) listed as both identifier and clinical: {0:?}")]
    Overlap(Vec<String>),

    #[error("Schema version must not be empty")]
    EmptyVersion,

    #[error("Invalid schema document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to read schema file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Deserialize)]
struct SchemaDocument {
    version: String,
    identifier_fields: Vec<String>,
    clinical_fields: Vec<String>,
}

/// Two disjoint, normalised sets of field names plus a version tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSchema {
    version: String,
    identifier_fields: BTreeSet<String>,
    clinical_fields: BTreeSet<String>,
}

/// Normalise a field name for lookup: trimmed, ASCII-lowercased.
#[must_use]
pub fn normalize_field_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

impl FieldSchema {
    /// Build a schema from explicit name lists.
    ///
    /// # Errors
    /// Returns `SchemaError::Overlap` if any normalised name appears in both
    /// sets, or `SchemaError::EmptyVersion` for a blank version tag.
    pub fn new<I, C, S>(version: &str, identifiers: I, clinical: C) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = S>,
        C: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let version = version.trim();
        if version.is_empty() {
            return Err(SchemaError::EmptyVersion);
        }

        let identifier_fields: BTreeSet<String> = identifiers
            .into_iter()
            .map(|s| normalize_field_name(s.as_ref()))
            .filter(|s| !s.is_empty())
            .collect();
        let clinical_fields: BTreeSet<String> = clinical
            .into_iter()
            .map(|s| normalize_field_name(s.as_ref()))
            .filter(|s| !s.is_empty())
            .collect();

        let overlap: Vec<String> = identifier_fields
            .intersection(&clinical_fields)
            .cloned()
            .collect();
        if !overlap.is_empty() {
            return Err(SchemaError::Overlap(overlap));
        }

        Ok(Self {
            version: version.to_string(),
            identifier_fields,
            clinical_fields,
        })
    }

    /// Parse a schema from its JSON document form.
    ///
    /// # Errors
    /// Returns an error on malformed JSON or an invalid schema.
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        let doc: SchemaDocument = serde_json::from_str(json)?;
        Self::new(&doc.version, doc.identifier_fields, doc.clinical_fields)
    }

    /// Load a schema document from disk.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a valid schema.
    pub fn from_path(path: &Path) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path)?;
        let schema = Self::from_json(&content)?;
        tracing::info!(
            "Loaded field schema {} from {:?} ({} identifier, {} clinical)",
            schema.version,
            path,
            schema.identifier_fields.len(),
            schema.clinical_fields.len()
        );
        Ok(schema)
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn identifier_fields(&self) -> &BTreeSet<String> {
        &self.identifier_fields
    }

    #[must_use]
    pub fn clinical_fields(&self) -> &BTreeSet<String> {
        &self.clinical_fields
    }

    /// Lookup on an already-normalised name.
    pub(crate) fn is_identifier(&self, normalized: &str) -> bool {
        self.identifier_fields.contains(normalized)
    }

    pub(crate) fn is_clinical(&self, normalized: &str) -> bool {
        self.clinical_fields.contains(normalized)
    }
}

impl Default for FieldSchema {
    fn default() -> Self {
        Self {
            version: DEFAULT_SCHEMA_VERSION.to_string(),
            identifier_fields: DEFAULT_IDENTIFIER_FIELDS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            clinical_fields: DEFAULT_CLINICAL_FIELDS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}
