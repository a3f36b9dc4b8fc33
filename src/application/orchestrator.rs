//! Hybrid encryption: AES-256-GCM for identifiers, homomorphic encryption
//! for clinical values.

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;

use crate::adapters::aead::IdentifierCipher;
use crate::application::{EncryptionContext, FieldClassifier};
use crate::domain::{
    ClassificationEvent, CryptoError, EncryptedRecord, FieldValue, Record, SymmetricKey,
};
use crate::ports::{AuditSink, HomomorphicBackend};

/// Routes each record through the classifier and the two encryptors.
pub struct HybridEncryptionOrchestrator<A: AuditSink> {
    classifier: FieldClassifier,
    audit: Arc<A>,
}

impl<A: AuditSink> HybridEncryptionOrchestrator<A> {
    #[must_use]
    pub fn new(classifier: FieldClassifier, audit: Arc<A>) -> Self {
        Self { classifier, audit }
    }

    #[must_use]
    pub fn classifier(&self) -> &FieldClassifier {
        &self.classifier
    }

    /// Classify and encrypt one record. Unknown fields are dropped and only
    /// their names are kept.
    ///
    /// # Errors
    /// Returns `CryptoError::NonceExhausted` if the key's nonce sequence is
    /// spent, or an encoding/encryption error for a clinical value.
    pub fn encrypt_record<B: HomomorphicBackend>(
        &self,
        record: &Record,
        context: &EncryptionContext<B>,
        key: &SymmetricKey,
    ) -> Result<EncryptedRecord, CryptoError> {
        let classified = self.classifier.segment(record);
        let cipher = IdentifierCipher::new(key)?;

        let identifiers = classified
            .identifier_fields
            .iter()
            .map(|(name, value)| Ok((name.clone(), cipher.seal(name, value)?)))
            .collect::<Result<BTreeMap<_, _>, CryptoError>>()?;

        let clinical = classified
            .clinical_fields
            .iter()
            .map(|(name, value)| Ok((name.clone(), context.encrypt_value(*value)?)))
            .collect::<Result<BTreeMap<_, _>, CryptoError>>()?;

        self.audit.record_classification(&ClassificationEvent::from_classified(
            self.classifier.schema().version(),
            &classified,
        ));

        tracing::debug!(
            "Encrypted record: {} identifier(s), {} clinical, {} discarded",
            identifiers.len(),
            clinical.len(),
            classified.discarded_fields.len()
        );

        Ok(EncryptedRecord {
            identifiers,
            clinical,
            discarded: classified.discarded_fields,
        })
    }

    /// Encrypt records on the rayon pool, or one after another when the
    /// backend cannot evaluate concurrently. Output order matches input
    /// order; the first error aborts the batch.
    ///
    /// # Errors
    /// Propagates the first `encrypt_record` error.
    pub fn encrypt_batch<B: HomomorphicBackend>(
        &self,
        records: &[Record],
        context: &EncryptionContext<B>,
        key: &SymmetricKey,
    ) -> Result<Vec<EncryptedRecord>, CryptoError> {
        tracing::info!("Encrypting batch of {} records", records.len());
        let encrypted = if context.backend().parallel_evaluation() {
            records
                .par_iter()
                .map(|record| self.encrypt_record(record, context, key))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            records
                .iter()
                .map(|record| self.encrypt_record(record, context, key))
                .collect::<Result<Vec<_>, _>>()?
        };
        tracing::info!(
            "Batch encrypted ({} nonces issued under key {})",
            key.nonces_issued(),
            key.fingerprint()
        );
        Ok(encrypted)
    }

    /// Decrypt a record. Nothing is returned unless every identifier blob
    /// authenticates.
    ///
    /// # Errors
    /// Returns `CryptoError::KeyUnavailable` for a public-only context,
    /// `CryptoError::AuthenticationFailure` naming the first field whose tag
    /// does not verify.
    pub fn decrypt_record<B: HomomorphicBackend>(
        &self,
        encrypted: &EncryptedRecord,
        context: &EncryptionContext<B>,
        key: &SymmetricKey,
    ) -> Result<Record, CryptoError> {
        if !context.has_secret() {
            return Err(CryptoError::KeyUnavailable);
        }

        let cipher = IdentifierCipher::new(key)?;
        let mut staged: Vec<(String, FieldValue)> =
            Vec::with_capacity(encrypted.identifiers.len() + encrypted.clinical.len());

        for (name, blob) in &encrypted.identifiers {
            match cipher.open(name, blob) {
                Ok(value) => staged.push((name.clone(), value)),
                Err(e) => {
                    tracing::warn!("Rejected record: authentication failed for field {name}");
                    return Err(e);
                }
            }
        }

        for (name, ciphertext) in &encrypted.clinical {
            let value = context.decrypt_value(ciphertext)?;
            staged.push((name.clone(), FieldValue::Number(value)));
        }

        Ok(staged.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::audit::MemoryAuditSink;
    use crate::testing::{plain_context, plain_public, shared_tfhe_context};

    fn orchestrator() -> (HybridEncryptionOrchestrator<MemoryAuditSink>, Arc<MemoryAuditSink>) {
        let audit = Arc::new(MemoryAuditSink::new());
        (
            HybridEncryptionOrchestrator::new(FieldClassifier::default(), Arc::clone(&audit)),
            audit,
        )
    }

    fn sample_record() -> Record {
        serde_json::from_str(
            r#"{
                "patient_id": "P-000123",
                "name": "Jane Doe",
                "dob": "1984-03-12",
                "heart_rate": 72.5,
                "glucose": "104.2",
                "ward_notes": "stable"
            }"#,
        )
        .expect("parse")
    }

    #[test]
    fn test_roundtrip_with_plain_backend() {
        let (orchestrator, audit) = orchestrator();
        let context = plain_context(2);
        let key = SymmetricKey::generate();
        let record = sample_record();

        let encrypted = orchestrator
            .encrypt_record(&record, &context, &key)
            .expect("encrypt");
        assert_eq!(encrypted.identifiers.len(), 3);
        assert_eq!(encrypted.clinical.len(), 2);
        assert_eq!(encrypted.discarded, vec!["ward_notes".to_string()]);

        let decrypted = orchestrator
            .decrypt_record(&encrypted, &context, &key)
            .expect("decrypt");
        assert_eq!(decrypted.get("patient_id"), record.get("patient_id"));
        assert_eq!(decrypted.get("dob"), record.get("dob"));
        let glucose = decrypted
            .get("glucose")
            .and_then(FieldValue::as_number)
            .expect("glucose");
        assert!((glucose - 104.2).abs() < 1e-9);
        assert!(decrypted.get("ward_notes").is_none());

        let events = audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].accepted_identifiers, 3);
        assert_eq!(events[0].discarded, vec!["ward_notes".to_string()]);
    }

    #[test]
    fn test_identifier_values_not_in_output() {
        let (orchestrator, _) = orchestrator();
        let context = plain_context(2);
        let key = SymmetricKey::generate();
        let encrypted = orchestrator
            .encrypt_record(&sample_record(), &context, &key)
            .expect("encrypt");

        let json = serde_json::to_string(&encrypted).expect("serialize");
        assert!(!json.contains("Jane"));
        assert!(!json.contains("P-000123"));
    }

    #[test]
    fn test_public_context_cannot_decrypt() {
        let (orchestrator, _) = orchestrator();
        let client = plain_context(2);
        let remote = plain_public(&client);
        let key = SymmetricKey::generate();

        let encrypted = orchestrator
            .encrypt_record(&sample_record(), &remote, &key)
            .expect("remote side can encrypt");
        assert!(matches!(
            orchestrator.decrypt_record(&encrypted, &remote, &key),
            Err(CryptoError::KeyUnavailable)
        ));
        assert!(orchestrator.decrypt_record(&encrypted, &client, &key).is_ok());
    }

    #[test]
    fn test_tampered_identifier_rejects_whole_record() {
        let (orchestrator, _) = orchestrator();
        let context = plain_context(2);
        let key = SymmetricKey::generate();
        let mut encrypted = orchestrator
            .encrypt_record(&sample_record(), &context, &key)
            .expect("encrypt");

        let blob = encrypted.identifiers.get_mut("name").expect("name blob");
        blob.tag[0] ^= 0x80;

        match orchestrator.decrypt_record(&encrypted, &context, &key) {
            Err(CryptoError::AuthenticationFailure { field }) => assert_eq!(field, "name"),
            other => panic!("expected authentication failure, got {other:?}"),
        }
    }

    #[test]
    fn test_swapped_blobs_detected() {
        let (orchestrator, _) = orchestrator();
        let context = plain_context(2);
        let key = SymmetricKey::generate();
        let mut encrypted = orchestrator
            .encrypt_record(&sample_record(), &context, &key)
            .expect("encrypt");

        let name = encrypted.identifiers.remove("name").expect("name");
        let dob = encrypted.identifiers.remove("dob").expect("dob");
        encrypted.identifiers.insert("name".into(), dob);
        encrypted.identifiers.insert("dob".into(), name);

        assert!(matches!(
            orchestrator.decrypt_record(&encrypted, &context, &key),
            Err(CryptoError::AuthenticationFailure { .. })
        ));
    }

    #[test]
    fn test_batch_preserves_order() {
        let (orchestrator, audit) = orchestrator();
        let context = plain_context(2);
        let key = SymmetricKey::generate();
        let records: Vec<Record> = (0..64)
            .map(|i| {
                [
                    ("patient_id", FieldValue::from(format!("P-{i:04}"))),
                    ("heart_rate", FieldValue::Number(60.0 + f64::from(i))),
                ]
                .into_iter()
                .collect()
            })
            .collect();

        let encrypted = orchestrator
            .encrypt_batch(&records, &context, &key)
            .expect("batch");
        assert_eq!(encrypted.len(), records.len());
        assert_eq!(key.nonces_issued(), 64);
        assert_eq!(audit.events().len(), 64);

        for (i, enc) in encrypted.iter().enumerate() {
            let back = orchestrator
                .decrypt_record(enc, &context, &key)
                .expect("decrypt");
            assert_eq!(back.get("patient_id"), Some(&FieldValue::from(format!("P-{i:04}"))));
        }
    }

    #[test]
    fn test_tfhe_batch_inside_multithreaded_pool() {
        let (orchestrator, audit) = orchestrator();
        let shared = shared_tfhe_context();
        let key = SymmetricKey::generate();
        let records: Vec<Record> = (0..8)
            .map(|i| {
                [
                    ("patient_id", FieldValue::from(format!("P-{i}"))),
                    ("heart_rate", FieldValue::Number(60.0 + f64::from(i))),
                ]
                .into_iter()
                .collect()
            })
            .collect();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(4)
            .build()
            .expect("pool");
        let encrypted = pool
            .install(|| orchestrator.encrypt_batch(&records, shared.as_ref(), &key))
            .expect("batch");
        assert_eq!(audit.events().len(), 8);

        for (i, enc) in encrypted.iter().enumerate() {
            let back = orchestrator
                .decrypt_record(enc, shared.as_ref(), &key)
                .expect("decrypt");
            let hr = back.get("heart_rate").and_then(FieldValue::as_number).expect("hr");
            assert!((hr - (60.0 + i as f64)).abs() < 1e-9, "record {i}: {hr}");
        }
    }

    #[test]
    fn test_roundtrip_with_tfhe() {
        let (orchestrator, _) = orchestrator();
        let shared = shared_tfhe_context();
        let context = shared.as_ref();
        let key = SymmetricKey::generate();
        let record: Record = [
            ("patient_id", FieldValue::from("P-42")),
            ("temperature", FieldValue::Number(37.8)),
            ("blood_pressure_sys", FieldValue::Number(128.0)),
        ]
        .into_iter()
        .collect();

        let encrypted = orchestrator
            .encrypt_record(&record, context, &key)
            .expect("encrypt");
        let decrypted = orchestrator
            .decrypt_record(&encrypted, context, &key)
            .expect("decrypt");

        assert_eq!(decrypted.get("patient_id"), record.get("patient_id"));
        for field in ["temperature", "blood_pressure_sys"] {
            let expected = record.get(field).and_then(FieldValue::as_number).expect("input");
            let actual = decrypted.get(field).and_then(FieldValue::as_number).expect("output");
            assert!((actual - expected).abs() < 1e-4, "{field}: {actual}");
        }
    }
}
