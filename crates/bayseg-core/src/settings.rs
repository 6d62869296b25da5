//! Global settings loaded from TOML, lazily initialized behind a OnceLock.
//!
//! - `init_custom(toml_content)` sets a custom TOML before first `settings()` call
//! - `settings()` returns `&'static Settings` (lazy-init singleton)
//! - Default values are embedded via `include_str!("default_settings.toml")`

use std::sync::OnceLock;

use serde::Deserialize;

use crate::config::{HyperSchedule, ModelConfig, ModelKind};
use crate::error::SegError;

pub const DEFAULT_SETTINGS_TOML: &str = include_str!("default_settings.toml");

static CUSTOM_TOML: OnceLock<String> = OnceLock::new();

/// Set custom TOML before first `settings()` call.
pub fn init_custom(toml_content: String) -> Result<(), SettingsError> {
    parse_settings_toml(&toml_content)?;
    CUSTOM_TOML
        .set(toml_content)
        .map_err(|_| SettingsError::AlreadyInitialized)
}

/// Get or initialize the global settings singleton.
pub fn settings() -> &'static Settings {
    static INSTANCE: OnceLock<Settings> = OnceLock::new();
    INSTANCE.get_or_init(|| {
        let toml_str = CUSTOM_TOML
            .get()
            .map(|s| s.as_str())
            .unwrap_or(DEFAULT_SETTINGS_TOML);
        // build.rs validates the embedded default; custom TOML is validated in init_custom.
        parse_settings_toml(toml_str).expect("settings TOML must be valid")
    })
}

/// Returns the embedded default settings TOML content.
pub fn default_toml() -> &'static str {
    DEFAULT_SETTINGS_TOML
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("TOML parse error: {0}")]
    Parse(String),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("settings already initialized")]
    AlreadyInitialized,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub model: ModelConfig,
    pub training: TrainingSettings,
    pub corpus: CorpusSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainingSettings {
    pub threads: usize,
    pub batch_size: usize,
    pub epochs: usize,
    #[serde(rename = "hyper_schedule")]
    pub schedule: HyperSchedule,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorpusSettings {
    pub lowercase: bool,
}

pub fn parse_settings_toml(toml_str: &str) -> Result<Settings, SettingsError> {
    let s: Settings = toml::from_str(toml_str).map_err(|e| SettingsError::Parse(e.to_string()))?;
    validate(&s)?;
    Ok(s)
}

fn validate(s: &Settings) -> Result<(), SettingsError> {
    macro_rules! check_positive_int {
        ($section:ident . $field:ident) => {
            if s.$section.$field == 0 {
                return Err(SettingsError::InvalidValue {
                    field: concat!(stringify!($section), ".", stringify!($field)).to_string(),
                    reason: "must be positive".to_string(),
                });
            }
        };
    }

    // Model bounds are the ones `Model::new` enforces; pyhsmm is the stricter kind.
    if let Err(e) = s.model.validate(ModelKind::Pyhsmm) {
        return Err(match e {
            SegError::Configuration { field, reason } => SettingsError::InvalidValue {
                field: format!("model.{field}"),
                reason,
            },
            other => SettingsError::Parse(other.to_string()),
        });
    }

    check_positive_int!(training.threads);
    check_positive_int!(training.batch_size);
    check_positive_int!(training.epochs);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_line(key: &str, value: &str) -> String {
        DEFAULT_SETTINGS_TOML
            .lines()
            .map(|line| {
                if line.split('=').next().map(str::trim) == Some(key) {
                    format!("{key} = {value}")
                } else {
                    line.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn parse_default_toml() {
        let s = parse_settings_toml(DEFAULT_SETTINGS_TOML).unwrap();
        assert!((s.model.theta - 2.0).abs() < f64::EPSILON);
        assert!((s.model.d - 0.5).abs() < f64::EPSILON);
        assert_eq!(s.model.max_ngram, 2);
        assert_eq!(s.model.max_word_length, 10);
        assert_eq!(s.model.pos_size, 10);
        assert_eq!(s.model.vocab_size, 2_097_152);
        assert_eq!(s.model.max_sentence_length, 128);
        assert_eq!(s.model.seed, None);
        assert_eq!(s.training.threads, 8);
        assert_eq!(s.training.batch_size, 16);
        assert_eq!(s.training.epochs, 100);
        assert_eq!(s.training.schedule, HyperSchedule::Batch);
        assert!(s.corpus.lowercase);
    }

    #[test]
    fn parse_epoch_schedule() {
        let toml = DEFAULT_SETTINGS_TOML.replace("\"batch\"", "\"epoch\"");
        let s = parse_settings_toml(&toml).unwrap();
        assert_eq!(s.training.schedule, HyperSchedule::Epoch);
    }

    #[test]
    fn parse_seed() {
        let toml = DEFAULT_SETTINGS_TOML.replace("[model]", "[model]\nseed = 42");
        let s = parse_settings_toml(&toml).unwrap();
        assert_eq!(s.model.seed, Some(42));
    }

    #[test]
    fn error_discount_out_of_range() {
        let err = parse_settings_toml(&with_line("d", "1.0")).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue { .. }));
        assert!(err.to_string().contains("model.d"));
    }

    #[test]
    fn error_zero_theta() {
        let err = parse_settings_toml(&with_line("theta", "0.0")).unwrap_err();
        assert!(err.to_string().contains("model.theta"));
    }

    #[test]
    fn error_trigram() {
        let err = parse_settings_toml(&with_line("max_ngram", "3")).unwrap_err();
        assert!(err.to_string().contains("model.max_ngram"));
    }

    #[test]
    fn error_word_length_beyond_depth_memory() {
        let err = parse_settings_toml(&with_line("max_word_length", "300")).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::InvalidValue { ref field, .. } if field == "model.max_word_length"
        ));
    }

    #[test]
    fn error_pos_size_too_large() {
        let err = parse_settings_toml(&with_line("pos_size", "70000")).unwrap_err();
        assert!(err.to_string().contains("model.pos_size"));
        assert!(parse_settings_toml(&with_line("pos_size", "0")).is_err());
    }

    #[test]
    fn error_zero_batch_size() {
        let err = parse_settings_toml(&with_line("batch_size", "0")).unwrap_err();
        assert!(err.to_string().contains("training.batch_size"));
    }

    #[test]
    fn error_invalid_toml() {
        let err = parse_settings_toml("not valid toml {{{").unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }

    #[test]
    fn error_missing_section() {
        let toml = r#"
[training]
threads = 4
batch_size = 8
epochs = 10
hyper_schedule = "batch"
"#;
        let err = parse_settings_toml(toml).unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }

    #[test]
    fn error_unknown_schedule() {
        let toml = DEFAULT_SETTINGS_TOML.replace("\"batch\"", "\"sometimes\"");
        let err = parse_settings_toml(&toml).unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }
}
