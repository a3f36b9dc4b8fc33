//! Vitalseal: hybrid encryption pipeline over a JSON records file.
//!
//! Classifies and encrypts every record, computes per-column statistics on a
//! public-only context, decrypts client side and prints a JSON report.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose;
use base64::Engine;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vitalseal::adapters::audit::{MemoryAuditSink, TracingAuditSink};
use vitalseal::adapters::sanitize::SanitizingMakeWriter;
use vitalseal::adapters::tfhe::TfheBackend;
use vitalseal::application::{
    clinical_column, finalize_variance, AccuracyReport, AccuracyValidator, ClassificationReport,
    EncryptionContext, HomomorphicStatisticsEngine, HybridEncryptionOrchestrator,
    KeyIsolationReport, KeyManager,
};
use vitalseal::config::{LogMode, PipelineConfig};
use vitalseal::domain::{Category, EncryptedRecord, FieldValue, Record};
use vitalseal::ports::HomomorphicBackend;
use vitalseal::CryptoError;

#[derive(Serialize)]
struct ColumnReport {
    count: usize,
    plaintext_mean: f64,
    plaintext_variance: f64,
    encrypted_mean: Option<f64>,
    encrypted_variance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct SampleRecord {
    /// Field → base64 of `nonce ‖ ciphertext ‖ tag`.
    identifiers: BTreeMap<String, String>,
    /// Field → serialized ciphertext size in bytes.
    clinical_sizes: BTreeMap<String, usize>,
    discarded: Vec<String>,
}

#[derive(Serialize)]
struct AuditSummary {
    events: usize,
    discarded_fields: usize,
}

#[derive(Serialize)]
struct PipelineReport {
    scheme: &'static str,
    preset: String,
    public_fingerprint: String,
    classification: ClassificationReport,
    key_isolation: KeyIsolationReport,
    audit: AuditSummary,
    columns: BTreeMap<String, ColumnReport>,
    column_accuracy: Option<AccuracyReport>,
    record_accuracy: Option<AccuracyReport>,
    sample: Option<SampleRecord>,
}

fn init_logging(config: &PipelineConfig) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let (writer, guard) = match config.log_mode {
        LogMode::File => {
            if let Some(parent) = config.log_file.parent() {
                // Best-effort: a missing directory surfaces as an open error below.
                let _ = std::fs::create_dir_all(parent);
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&config.log_file)
                .with_context(|| format!("opening log file {:?}", config.log_file))?;
            tracing_appender::non_blocking(file)
        }
        // The JSON report owns stdout.
        LogMode::Stdout => tracing_appender::non_blocking(std::io::stderr()),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(SanitizingMakeWriter::new(writer)))
        .init();
    Ok(guard)
}

fn plaintext_moments(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance)
}

fn sample_of(record: &EncryptedRecord) -> SampleRecord {
    SampleRecord {
        identifiers: record
            .identifiers
            .iter()
            .map(|(k, blob)| (k.clone(), general_purpose::STANDARD.encode(blob.to_bytes())))
            .collect(),
        clinical_sizes: record
            .clinical
            .iter()
            .map(|(k, ct)| (k.clone(), ct.size_bytes()))
            .collect(),
        discarded: record.discarded.clone(),
    }
}

fn column_report(
    engine: &HomomorphicStatisticsEngine<TfheBackend>,
    client: &EncryptionContext<TfheBackend>,
    encrypted: &[EncryptedRecord],
    field: &str,
    plaintext: &[f64],
) -> ColumnReport {
    let (plaintext_mean, plaintext_variance) = plaintext_moments(plaintext);
    let mut report = ColumnReport {
        count: plaintext.len(),
        plaintext_mean,
        plaintext_variance,
        encrypted_mean: None,
        encrypted_variance: None,
        error: None,
    };

    let column = clinical_column(encrypted, field);
    let outcome = match engine.homomorphic_variance(column.iter().copied()) {
        Ok(variance) => client.decrypt_value(&variance.mean.ciphertext).and_then(|mean| {
            Ok((mean, Some(finalize_variance(client, &variance)?)))
        }),
        // Variance out of reach for these inputs: report the mean alone.
        Err(e @ (CryptoError::NoiseBudgetExhausted { .. } | CryptoError::HeadroomExhausted { .. })) => {
            report.error = Some(e.to_string());
            engine
                .homomorphic_mean(column.iter().copied())
                .and_then(|mean| Ok((client.decrypt_value(&mean.ciphertext)?, None)))
        }
        Err(e) => Err(e),
    };

    match outcome {
        Ok((mean, variance)) => {
            report.encrypted_mean = Some(mean);
            report.encrypted_variance = variance;
        }
        Err(e) => {
            tracing::warn!("Statistics for column {field} failed: {e}");
            report.error = Some(e.to_string());
        }
    }
    report
}

fn main() -> Result<()> {
    let config = PipelineConfig::from_env_or_default();
    let _guard = init_logging(&config)?;
    config.log_ignored();

    let path = match std::env::args().nth(1) {
        Some(p) if p != "-h" && p != "--help" => p,
        _ => {
            eprintln!("Usage: vitalseal <records.json>\n\nReads a JSON array of flat records, encrypts them and prints a JSON report.");
            std::process::exit(2);
        }
    };

    tracing::info!("Starting Vitalseal (preset {})...", config.preset);

    let content = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
    let records: Vec<Record> = serde_json::from_str(&content).context("parsing records")?;
    if records.is_empty() {
        bail!("{path} contains no records");
    }

    let classifier = vitalseal::FieldClassifier::new(config.load_schema()?);
    let field_names: std::collections::BTreeSet<&str> =
        records.iter().flat_map(Record::field_names).collect();
    let classification = classifier.classification_report(field_names, records.len());

    let manager = KeyManager::new(TfheBackend::new());
    let client = manager.create_context(config.params.clone())?;
    let key = manager.generate_symmetric_key();

    let memory_audit = Arc::new(MemoryAuditSink::new());
    let orchestrator = HybridEncryptionOrchestrator::new(
        classifier,
        Arc::new((TracingAuditSink, Arc::clone(&memory_audit))),
    );
    let encrypted = orchestrator.encrypt_batch(&records, &client, &key)?;

    // Server side: statistics run on the public export only.
    let export = manager.export_public(&client)?;
    let key_isolation = manager.verify_key_isolation(export.as_bytes(), &client)?;
    if !key_isolation.overall_pass {
        bail!("public export failed the key isolation check");
    }
    let remote = Arc::new(manager.load_context(export.as_bytes())?);
    let engine = HomomorphicStatisticsEngine::new(remote).with_reduction(config.reduction);

    let segmented: Vec<_> = records
        .iter()
        .map(|r| orchestrator.classifier().segment(r))
        .collect();
    let mut columns = BTreeMap::new();
    let (mut reference, mut decrypted_stats) = (Vec::new(), Vec::new());
    for field in clinical_fields(&classification) {
        let plaintext: Vec<f64> = segmented
            .iter()
            .filter_map(|c| c.clinical_fields.get(&field).copied())
            .collect();
        if plaintext.is_empty() {
            continue;
        }
        let report = column_report(&engine, &client, &encrypted, &field, &plaintext);
        if let Some(mean) = report.encrypted_mean {
            reference.push(report.plaintext_mean);
            decrypted_stats.push(mean);
        }
        if let Some(variance) = report.encrypted_variance {
            reference.push(report.plaintext_variance);
            decrypted_stats.push(variance);
        }
        columns.insert(field, report);
    }

    let validator = AccuracyValidator::new();
    let column_accuracy = validator.evaluate(&reference, &decrypted_stats).ok();

    // Client side: full record round trip.
    let (mut expected, mut actual) = (Vec::new(), Vec::new());
    for (original, enc) in records.iter().zip(&encrypted) {
        let restored = orchestrator.decrypt_record(enc, &client, &key)?;
        for name in enc.clinical.keys() {
            let before = original.get(name).and_then(FieldValue::as_number);
            let after = restored.get(name).and_then(FieldValue::as_number);
            if let (Some(b), Some(a)) = (before, after) {
                expected.push(b);
                actual.push(a);
            }
        }
    }
    let record_accuracy = validator.evaluate(&expected, &actual).ok();

    let report = PipelineReport {
        scheme: client.backend().scheme_name(),
        preset: config.preset.clone(),
        public_fingerprint: client.public_fingerprint().to_string(),
        classification,
        key_isolation,
        audit: AuditSummary {
            events: memory_audit.events().len(),
            discarded_fields: memory_audit.total_discarded(),
        },
        columns,
        column_accuracy,
        record_accuracy,
        sample: encrypted.first().map(sample_of),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    tracing::info!("Vitalseal run complete.");
    Ok(())
}

fn clinical_fields(report: &ClassificationReport) -> Vec<String> {
    report
        .field_categories
        .iter()
        .filter(|(_, c)| **c == Category::Clinical)
        .map(|(name, _)| name.clone())
        .collect()
}
