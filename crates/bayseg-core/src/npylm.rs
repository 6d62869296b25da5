//! Nested Pitman-Yor language model: a word bigram HPYLM whose base measure
//! is the character model.

use std::slice;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug_span;

use crate::char_model::{CharModel, CharModelRecord};
use crate::config::ModelConfig;
use crate::corpus::{check_tiling, Sentence, Span};
use crate::error::{Result, SegError};
use crate::hpylm::{Hpylm, HpylmRecord};
use crate::lattice::Scorer;
use crate::token::Token;

#[derive(Debug, Clone)]
pub struct Npylm {
    max_word_length: usize,
    char_base: f64,
    words: Hpylm,
    chars: CharModel,
}

impl Npylm {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            max_word_length: config.max_word_length,
            char_base: config.char_base(),
            words: Hpylm::new(config.max_ngram - 1, config),
            chars: CharModel::new(config),
        }
    }

    pub fn word_model(&self) -> &Hpylm {
        &self.words
    }

    pub fn char_model(&self) -> &CharModel {
        &self.chars
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty() && self.chars.is_empty()
    }

    /// `P(word | prev)` including the character-model base.
    pub fn word_probability(&self, word: &str, prev: &Token) -> f64 {
        let base = self.chars.word_probability(word);
        self.words
            .probability(&Token::word(word), slice::from_ref(prev), base)
    }

    /// Seat every word of `spans` plus the end-of-sentence marker.
    pub fn add_sentence<R: Rng + ?Sized>(
        &mut self,
        sentence: &Sentence,
        spans: &[Span],
        rng: &mut R,
    ) -> Result<()> {
        check_tiling(sentence.len(), spans)?;
        let mut prev = Token::Bos;
        for span in spans {
            let surface = sentence.slice(span.start, span.end);
            let word = Token::word(surface);
            let base = self.chars.word_probability(surface);
            if self
                .words
                .add_customer(&word, slice::from_ref(&prev), base, rng)?
            {
                self.chars.add_word(surface, rng)?;
            }
            prev = word;
        }
        self.words
            .add_customer(&Token::Eos, slice::from_ref(&prev), self.char_base, rng)?;
        Ok(())
    }

    /// Inverse of [`Npylm::add_sentence`].
    pub fn remove_sentence<R: Rng + ?Sized>(
        &mut self,
        sentence: &Sentence,
        spans: &[Span],
        rng: &mut R,
    ) -> Result<()> {
        check_tiling(sentence.len(), spans)?;
        let mut prev = Token::Bos;
        for span in spans {
            let surface = sentence.slice(span.start, span.end);
            let word = Token::word(surface);
            if self
                .words
                .remove_customer(&word, slice::from_ref(&prev), rng)?
            {
                self.chars.remove_word(surface, rng)?;
            }
            prev = word;
        }
        self.words
            .remove_customer(&Token::Eos, slice::from_ref(&prev), rng)?;
        Ok(())
    }

    pub fn sample_hyperparameters<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let _span = debug_span!("npylm_hyper").entered();
        self.words.sample_hyperparameters(rng);
        self.chars.sample_hyperparameters(rng);
    }

    pub fn check(&self) -> Result<()> {
        self.words.check()?;
        self.chars.check()
    }

    pub fn to_record(&self) -> NpylmRecord {
        NpylmRecord {
            words: self.words.to_record(),
            chars: self.chars.to_record(),
        }
    }

    pub fn from_record(record: NpylmRecord, config: &ModelConfig) -> Result<Self> {
        let words = Hpylm::from_record(record.words)?;
        if words.max_depth() != config.max_ngram - 1 {
            return Err(SegError::Persistence(format!(
                "word model depth {} does not match max_ngram {}",
                words.max_depth(),
                config.max_ngram
            )));
        }
        Ok(Self {
            max_word_length: config.max_word_length,
            char_base: config.char_base(),
            words,
            chars: CharModel::from_record(record.chars)?,
        })
    }
}

impl Scorer for Npylm {
    fn num_states(&self) -> usize {
        1
    }

    fn max_word_length(&self) -> usize {
        self.max_word_length
    }

    fn word_base(&self, word: &str) -> f64 {
        self.chars.word_probability(word)
    }

    fn emission(&self, _state: usize, word: &Token, prev: &Token, base: f64) -> f64 {
        self.words.probability(word, slice::from_ref(prev), base)
    }

    fn eos_emission(&self, prev: &Token) -> f64 {
        self.words
            .probability(&Token::Eos, slice::from_ref(prev), self.char_base)
    }

    fn transition(&self, _from: Option<usize>, _to: Option<usize>) -> f64 {
        1.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpylmRecord {
    pub words: HpylmRecord,
    pub chars: CharModelRecord,
}
