//! Field classifier: routes each field to identifier, clinical or discard.
//!
//! Classification is a pure lookup against the injected [`FieldSchema`];
//! there is no inference from values. Unknown fields are dropped before
//! encryption (data minimisation).

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::domain::{normalize_field_name, Category, ClassifiedRecord, FieldSchema, Record};

/// Dataset-level classification summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub schema_version: String,
    pub row_count: usize,
    pub total_fields: usize,
    pub identifier_count: usize,
    pub clinical_count: usize,
    pub unknown_count: usize,
    pub identifier_percent: f64,
    pub clinical_percent: f64,
    pub unknown_percent: f64,
    /// Field name → category, in name order.
    pub field_categories: BTreeMap<String, Category>,
}

impl ClassificationReport {
    /// Values that will be AES-encrypted across the whole dataset.
    #[must_use]
    pub fn identifier_cells(&self) -> usize {
        self.identifier_count * self.row_count
    }

    /// Values that will be homomorphically encrypted across the dataset.
    #[must_use]
    pub fn clinical_cells(&self) -> usize {
        self.clinical_count * self.row_count
    }

    /// Values that never reach an encryptor.
    #[must_use]
    pub fn discarded_cells(&self) -> usize {
        self.unknown_count * self.row_count
    }
}

/// Deterministic field classifier over a shared schema.
#[derive(Debug, Clone)]
pub struct FieldClassifier {
    schema: Arc<FieldSchema>,
}

impl FieldClassifier {
    #[must_use]
    pub fn new(schema: FieldSchema) -> Self {
        Self {
            schema: Arc::new(schema),
        }
    }

    #[must_use]
    pub fn with_shared(schema: Arc<FieldSchema>) -> Self {
        Self { schema }
    }

    #[must_use]
    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    /// Classify a field name. Case and surrounding whitespace are ignored.
    #[must_use]
    pub fn classify(&self, field_name: &str) -> Category {
        let normalized = normalize_field_name(field_name);
        if self.schema.is_identifier(&normalized) {
            Category::Identifier
        } else if self.schema.is_clinical(&normalized) {
            Category::Clinical
        } else {
            Category::Unknown
        }
    }

    /// Partition a record. Every field lands in exactly one output.
    ///
    /// Clinical fields whose value is not a finite number are discarded
    /// along with unknown fields.
    #[must_use]
    pub fn segment(&self, record: &Record) -> ClassifiedRecord {
        let mut out = ClassifiedRecord::default();

        for (name, value) in record.iter() {
            match self.classify(name) {
                Category::Identifier => {
                    out.identifier_fields.insert(name.to_string(), value.clone());
                }
                Category::Clinical => match value.as_number() {
                    Some(number) => {
                        out.clinical_fields.insert(name.to_string(), number);
                    }
                    None => {
                        tracing::debug!("Discarding non-numeric clinical field {name}");
                        out.discarded_fields.push(name.to_string());
                    }
                },
                Category::Unknown => out.discarded_fields.push(name.to_string()),
            }
        }

        out
    }

    /// Summarise how a dataset's columns would be routed.
    pub fn classification_report<I, S>(&self, field_names: I, row_count: usize) -> ClassificationReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let field_categories: BTreeMap<String, Category> = field_names
            .into_iter()
            .map(|name| {
                let name = name.as_ref().to_string();
                let category = self.classify(&name);
                (name, category)
            })
            .collect();

        let count = |c: Category| field_categories.values().filter(|v| **v == c).count();
        let identifier_count = count(Category::Identifier);
        let clinical_count = count(Category::Clinical);
        let unknown_count = count(Category::Unknown);
        let total_fields = field_categories.len();

        let percent = |n: usize| {
            if total_fields == 0 {
                0.0
            } else {
                n as f64 * 100.0 / total_fields as f64
            }
        };

        ClassificationReport {
            schema_version: self.schema.version().to_string(),
            row_count,
            total_fields,
            identifier_count,
            clinical_count,
            unknown_count,
            identifier_percent: percent(identifier_count),
            clinical_percent: percent(clinical_count),
            unknown_percent: percent(unknown_count),
            field_categories,
        }
    }
}

impl Default for FieldClassifier {
    fn default() -> Self {
        Self::new(FieldSchema::default())
    }
}
