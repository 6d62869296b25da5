//! Model hyperparameters and training options.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SegError};
use crate::settings::settings;

/// Which segmentation model a [`crate::Model`] runs. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Nested Pitman-Yor language model: word segmentation only.
    Npylm,
    /// Pitman-Yor hidden semi-Markov model: joint segmentation and tagging.
    Pyhsmm,
}

impl ModelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::Npylm => "npylm",
            ModelKind::Pyhsmm => "pyhsmm",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = SegError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "npylm" => Ok(ModelKind::Npylm),
            "pyhsmm" => Ok(ModelKind::Pyhsmm),
            other => Err(SegError::config(
                "kind",
                format!("unknown model kind {other:?} (expected npylm or pyhsmm)"),
            )),
        }
    }
}

/// Hyperparameters fixed at model construction.
///
/// `theta`/`d` are the initial Pitman-Yor strength and discount of every
/// restaurant depth; they are resampled during training. The `gamma_*` and
/// `beta_*` pairs are the Gamma and Beta priors those draws are conditioned
/// on. `alpha`/`beta` are the Beta prior on the character model's per-node
/// stop probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub theta: f64,
    pub d: f64,
    pub gamma_a: f64,
    pub gamma_b: f64,
    pub beta_a: f64,
    pub beta_b: f64,
    pub alpha: f64,
    pub beta: f64,
    pub max_ngram: usize,
    pub max_word_length: usize,
    pub pos_size: usize,
    /// Size of the character vocabulary; the character base measure is `1 / vocab_size`.
    pub vocab_size: u64,
    pub max_sentence_length: usize,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        settings().model.clone()
    }
}

impl ModelConfig {
    /// Check every hyperparameter against the range the model can run with.
    pub fn validate(&self, kind: ModelKind) -> Result<()> {
        macro_rules! check_positive {
            ($field:ident) => {
                if !(self.$field > 0.0) || !self.$field.is_finite() {
                    return Err(SegError::config(
                        stringify!($field),
                        format!("must be a positive finite number, got {}", self.$field),
                    ));
                }
            };
        }

        check_positive!(theta);
        check_positive!(gamma_a);
        check_positive!(gamma_b);
        check_positive!(beta_a);
        check_positive!(beta_b);
        check_positive!(alpha);
        check_positive!(beta);
        if !(self.d > 0.0 && self.d < 1.0) {
            return Err(SegError::config(
                "d",
                format!("discount must lie in (0, 1), got {}", self.d),
            ));
        }
        if self.max_ngram != 2 {
            return Err(SegError::config(
                "max_ngram",
                format!(
                    "the word lattice conditions on one previous word, so max_ngram must be 2 (got {})",
                    self.max_ngram
                ),
            ));
        }
        if self.max_word_length == 0 || self.max_word_length >= u8::MAX as usize {
            return Err(SegError::config(
                "max_word_length",
                format!("must be in 1..255, got {}", self.max_word_length),
            ));
        }
        if self.vocab_size == 0 {
            return Err(SegError::config("vocab_size", "must be positive"));
        }
        if self.max_sentence_length == 0 {
            return Err(SegError::config("max_sentence_length", "must be positive"));
        }
        if kind == ModelKind::Pyhsmm && (self.pos_size == 0 || self.pos_size >= u16::MAX as usize)
        {
            return Err(SegError::config(
                "pos_size",
                format!("must be in 1..65535 for pyhsmm, got {}", self.pos_size),
            ));
        }
        Ok(())
    }

    /// Uniform probability of one character under the base measure.
    pub fn char_base(&self) -> f64 {
        1.0 / self.vocab_size as f64
    }
}

/// When hyperparameters are resampled during an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HyperSchedule {
    /// After every batch (full barrier between batches).
    #[default]
    Batch,
    /// Once, after the last batch of the epoch.
    Epoch,
}

/// Cooperative cancellation flag, checked between batches only.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Options for one blocked Gibbs epoch.
#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub threads: usize,
    pub batch_size: usize,
    pub schedule: HyperSchedule,
    pub cancel: Option<CancelFlag>,
}

impl Default for TrainOptions {
    fn default() -> Self {
        let t = &settings().training;
        Self {
            threads: t.threads,
            batch_size: t.batch_size,
            schedule: t.schedule,
            cancel: None,
        }
    }
}

impl TrainOptions {
    pub fn new(threads: usize, batch_size: usize) -> Self {
        Self {
            threads,
            batch_size,
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(SegError::config("threads", "must be positive"));
        }
        if self.batch_size == 0 {
            return Err(SegError::config("batch_size", "must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ModelConfig {
        ModelConfig {
            theta: 1.0,
            d: 0.1,
            gamma_a: 1.0,
            gamma_b: 1.0,
            beta_a: 1.0,
            beta_b: 1.0,
            alpha: 1.0,
            beta: 1.0,
            max_ngram: 2,
            max_word_length: 4,
            pos_size: 2,
            vocab_size: 100,
            max_sentence_length: 64,
            seed: Some(7),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(base_config().validate(ModelKind::Npylm).is_ok());
        assert!(base_config().validate(ModelKind::Pyhsmm).is_ok());
    }

    #[test]
    fn test_negative_discount_rejected() {
        let mut c = base_config();
        c.d = -0.1;
        let err = c.validate(ModelKind::Npylm).unwrap_err();
        assert!(matches!(err, SegError::Configuration { ref field, .. } if field == "d"));
    }

    #[test]
    fn test_zero_vocab_rejected() {
        let mut c = base_config();
        c.vocab_size = 0;
        assert!(c.validate(ModelKind::Npylm).is_err());
    }

    #[test]
    fn test_pos_size_only_checked_for_pyhsmm() {
        let mut c = base_config();
        c.pos_size = 0;
        assert!(c.validate(ModelKind::Npylm).is_ok());
        let err = c.validate(ModelKind::Pyhsmm).unwrap_err();
        assert!(err.to_string().contains("pos_size"));
    }

    #[test]
    fn test_trigram_rejected() {
        let mut c = base_config();
        c.max_ngram = 3;
        assert!(c.validate(ModelKind::Npylm).is_err());
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("npylm".parse::<ModelKind>().unwrap(), ModelKind::Npylm);
        assert_eq!("pyhsmm".parse::<ModelKind>().unwrap(), ModelKind::Pyhsmm);
        assert!("hpylm".parse::<ModelKind>().is_err());
    }

    #[test]
    fn test_cancel_flag_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}
