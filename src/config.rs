//! Environment-driven pipeline configuration.
//!
//! Every setting has a default. Invalid values are ignored and noted in
//! [`PipelineConfig::ignored`]; configuration is read before logging is up,
//! so the binaries report the notes once their subscriber is installed.

use std::path::PathBuf;

use crate::application::ReductionStrategy;
use crate::domain::{ContextParams, FieldSchema, SchemaError};

pub const PRESET_ENV: &str = "VITALSEAL_CONTEXT_PRESET";
pub const SCHEMA_ENV: &str = "VITALSEAL_FIELD_SCHEMA";
pub const REDUCTION_ENV: &str = "VITALSEAL_REDUCTION";
pub const LOG_MODE_ENV: &str = "VITALSEAL_LOG_MODE";
pub const LOG_FILE_ENV: &str = "VITALSEAL_LOG_FILE";

const DEFAULT_LOG_FILE: &str = "vitalseal.log";

/// Where the binaries send their logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogMode {
    #[default]
    Stdout,
    File,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Name of the parameter preset in use.
    pub preset: String,
    pub params: ContextParams,
    /// Schema JSON to load instead of the built-in v1 lists.
    pub schema_path: Option<PathBuf>,
    pub reduction: ReductionStrategy,
    pub log_mode: LogMode,
    pub log_file: PathBuf,
    /// One note per environment value that was rejected.
    pub ignored: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            preset: "standard".to_string(),
            params: ContextParams::standard(),
            schema_path: None,
            reduction: ReductionStrategy::Fold,
            log_mode: LogMode::Stdout,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            ignored: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Load overrides from the process environment.
    ///
    /// Supported:
    /// - VITALSEAL_CONTEXT_PRESET=standard|extended
    /// - VITALSEAL_FIELD_SCHEMA=<path to schema JSON>
    /// - VITALSEAL_REDUCTION=fold|tree
    /// - VITALSEAL_LOG_MODE=stdout|file
    /// - VITALSEAL_LOG_FILE=<path>
    #[must_use]
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Self::from_env_or_default`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get(PRESET_ENV) {
            match ContextParams::preset(&v) {
                Some(params) => {
                    cfg.preset = v.to_ascii_lowercase();
                    cfg.params = params;
                }
                None => cfg
                    .ignored
                    .push(format!("Ignoring {PRESET_ENV}={v}: unknown preset")),
            }
        }

        if let Some(v) = get(SCHEMA_ENV) {
            cfg.schema_path = Some(PathBuf::from(v));
        }

        if let Some(v) = get(REDUCTION_ENV) {
            match v.parse() {
                Ok(reduction) => cfg.reduction = reduction,
                Err(e) => cfg.ignored.push(format!("Ignoring {REDUCTION_ENV}: {e}")),
            }
        }

        if let Some(v) = get(LOG_MODE_ENV) {
            match v.to_ascii_lowercase().as_str() {
                "stdout" => cfg.log_mode = LogMode::Stdout,
                "file" => cfg.log_mode = LogMode::File,
                _ => cfg
                    .ignored
                    .push(format!("Ignoring {LOG_MODE_ENV}={v}: expected stdout or file")),
            }
        }

        if let Some(v) = get(LOG_FILE_ENV) {
            cfg.log_file = PathBuf::from(v);
        }

        cfg
    }

    /// Emit the notes collected while parsing. Call after logging is set up.
    pub fn log_ignored(&self) {
        for note in &self.ignored {
            tracing::warn!("{note}");
        }
    }

    /// Schema from `schema_path`, or the built-in v1 lists.
    ///
    /// # Errors
    /// Returns a `SchemaError` if the file cannot be read or is invalid.
    pub fn load_schema(&self) -> Result<FieldSchema, SchemaError> {
        match &self.schema_path {
            Some(path) => FieldSchema::from_path(path),
            None => Ok(FieldSchema::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = PipelineConfig::from_lookup(lookup(&[]));
        assert_eq!(cfg.preset, "standard");
        assert_eq!(cfg.params, ContextParams::standard());
        assert_eq!(cfg.reduction, ReductionStrategy::Fold);
        assert_eq!(cfg.log_mode, LogMode::Stdout);
        assert!(cfg.schema_path.is_none());
        assert!(cfg.ignored.is_empty());
    }

    #[test]
    fn test_overrides() {
        let cfg = PipelineConfig::from_lookup(lookup(&[
            (PRESET_ENV, "Extended"),
            (REDUCTION_ENV, "tree"),
            (LOG_MODE_ENV, "file"),
            (LOG_FILE_ENV, "/tmp/vs.log"),
            (SCHEMA_ENV, "/etc/vitalseal/schema.json"),
        ]));
        assert_eq!(cfg.preset, "extended");
        assert_eq!(cfg.params.max_depth, 4);
        assert_eq!(cfg.reduction, ReductionStrategy::Tree);
        assert_eq!(cfg.log_mode, LogMode::File);
        assert_eq!(cfg.log_file, PathBuf::from("/tmp/vs.log"));
        assert_eq!(
            cfg.schema_path,
            Some(PathBuf::from("/etc/vitalseal/schema.json"))
        );
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let cfg = PipelineConfig::from_lookup(lookup(&[
            (PRESET_ENV, "huge"),
            (REDUCTION_ENV, "random"),
            (LOG_MODE_ENV, "syslog"),
            (LOG_FILE_ENV, "   "),
        ]));
        assert_eq!(cfg.preset, "standard");
        assert_eq!(cfg.reduction, ReductionStrategy::Fold);
        assert_eq!(cfg.log_mode, LogMode::Stdout);
        assert_eq!(cfg.log_file, PathBuf::from(DEFAULT_LOG_FILE));

        assert_eq!(cfg.ignored.len(), 3);
        assert!(cfg.ignored[0].contains(PRESET_ENV));
        assert!(cfg.ignored[1].contains(REDUCTION_ENV));
        assert!(cfg.ignored[2].contains("syslog"));
    }

    #[test]
    fn test_load_schema_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("schema.json");
        std::fs::write(
            &path,
            r#"{"version":"icu-2","identifier_fields":["mrn"],"clinical_fields":["spo2"]}"#,
        )
        .expect("write");

        let cfg = PipelineConfig {
            schema_path: Some(path),
            ..PipelineConfig::default()
        };
        let schema = cfg.load_schema().expect("schema");
        assert_eq!(schema.version(), "icu-2");

        assert_eq!(
            PipelineConfig::default().load_schema().expect("default").version(),
            "v1"
        );
    }
}
