//! Variable-order character model: the base measure of every word model.
//!
//! A word is spelled as `Bow c1 .. cn Eow`. Each outcome is drawn from a
//! mixture over context depths, with a Beta(`alpha`, `beta`) stop probability
//! at every node of the character HPYLM. The deepest available depth always
//! stops, so the mixture is a proper distribution.

use std::collections::{HashMap, VecDeque};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug_span;

use crate::config::ModelConfig;
use crate::error::{Result, SegError};
use crate::hpylm::{Hpylm, HpylmRecord};
use crate::hyper;
use crate::token::Token;

#[derive(Debug, Clone)]
pub struct CharModel {
    lm: Hpylm,
    alpha: f64,
    beta: f64,
    base: f64,
    /// Sampled depths per seated word occurrence, oldest first.
    depth_memory: HashMap<String, VecDeque<Vec<u8>>>,
}

fn spell(word: &str) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(word.chars().count() + 2);
    tokens.push(Token::Bow);
    tokens.extend(word.chars().map(Token::Char));
    tokens.push(Token::Eow);
    tokens
}

impl CharModel {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            lm: Hpylm::new(config.max_word_length + 1, config),
            alpha: config.alpha,
            beta: config.beta,
            base: config.char_base(),
            depth_memory: HashMap::new(),
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn hpylm(&self) -> &Hpylm {
        &self.lm
    }

    pub fn is_empty(&self) -> bool {
        self.lm.is_empty() && self.depth_memory.is_empty()
    }

    /// Number of seated word occurrences.
    pub fn word_count(&self) -> usize {
        self.depth_memory.values().map(VecDeque::len).sum()
    }

    /// Context for the outcome at `pos` of a spelled word.
    fn context<'a>(&self, spelled: &'a [Token], pos: usize) -> &'a [Token] {
        let start = pos.saturating_sub(self.lm.max_depth());
        &spelled[start..pos]
    }

    /// Joint weight of stopping at each depth and emitting `outcome` there.
    fn depth_weights(&self, outcome: &Token, context: &[Token]) -> Vec<f64> {
        let probs = self.lm.probabilities_by_depth(outcome, context, self.base);
        let counts = self.lm.stop_pass_by_depth(context);
        let deepest = context.len();
        let mut pass_mass = 1.0;
        let mut weights = Vec::with_capacity(deepest + 1);
        for (k, (&p, &(stop, pass))) in probs.iter().zip(&counts).enumerate() {
            let stop_prob = if k == deepest {
                1.0
            } else {
                (stop as f64 + self.alpha) / ((stop + pass) as f64 + self.alpha + self.beta)
            };
            weights.push(pass_mass * stop_prob * p);
            pass_mass *= 1.0 - stop_prob;
        }
        weights
    }

    /// Probability of one character (or `Eow`) after `context`.
    pub fn outcome_probability(&self, outcome: &Token, context: &[Token]) -> f64 {
        self.depth_weights(outcome, context).iter().sum()
    }

    /// Probability of spelling `word` under the character model.
    pub fn word_probability(&self, word: &str) -> f64 {
        let spelled = spell(word);
        (1..spelled.len())
            .map(|pos| self.outcome_probability(&spelled[pos], self.context(&spelled, pos)))
            .product()
    }

    /// Seat every character of `word`, sampling a context depth per character.
    pub fn add_word<R: Rng + ?Sized>(&mut self, word: &str, rng: &mut R) -> Result<()> {
        let spelled = spell(word);
        let mut depths = Vec::with_capacity(spelled.len() - 1);
        for pos in 1..spelled.len() {
            let outcome = &spelled[pos];
            let context = self.context(&spelled, pos);
            let weights = self.depth_weights(outcome, context);
            let depth = sample_index(&weights, rng);
            let suffix = &context[context.len() - depth..];
            self.lm.add_customer(outcome, suffix, self.base, rng)?;
            self.lm.add_stop_pass(suffix)?;
            depths.push(depth as u8);
        }
        self.depth_memory
            .entry(word.to_string())
            .or_default()
            .push_back(depths);
        Ok(())
    }

    /// Remove the customers of one earlier [`CharModel::add_word`] of `word`.
    pub fn remove_word<R: Rng + ?Sized>(&mut self, word: &str, rng: &mut R) -> Result<()> {
        let queue = self.depth_memory.get_mut(word).ok_or_else(|| {
            SegError::Consistency(format!("word {word:?} was never spelled out"))
        })?;
        let depths = queue.pop_front().ok_or_else(|| {
            SegError::Consistency(format!("no depth memory left for {word:?}"))
        })?;
        if queue.is_empty() {
            self.depth_memory.remove(word);
        }

        let spelled = spell(word);
        if depths.len() != spelled.len() - 1 {
            return Err(SegError::Consistency(format!(
                "depth memory for {word:?} has {} entries",
                depths.len()
            )));
        }
        for (pos, &depth) in (1..spelled.len()).zip(&depths) {
            let context = self.context(&spelled, pos);
            let depth = depth as usize;
            if depth > context.len() {
                return Err(SegError::Consistency(format!(
                    "remembered depth {depth} too deep for {word:?}"
                )));
            }
            let suffix = &context[context.len() - depth..];
            self.lm.remove_customer(&spelled[pos], suffix, rng)?;
            self.lm.remove_stop_pass(suffix)?;
        }
        Ok(())
    }

    /// Resample theta/d per depth, then the stop prior.
    pub fn sample_hyperparameters<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let _span = debug_span!("char_model_hyper").entered();
        self.lm.sample_hyperparameters(rng);
        let counts = self.lm.stop_pass_counts();
        (self.alpha, self.beta) = hyper::sample_stop_prior(self.alpha, self.beta, &counts, rng);
    }

    pub fn check(&self) -> Result<()> {
        self.lm.check()?;
        if self.lm.root_customers() > 0 && self.depth_memory.is_empty() {
            return Err(SegError::Consistency(
                "character customers seated without depth memory".into(),
            ));
        }
        Ok(())
    }

    pub fn to_record(&self) -> CharModelRecord {
        let mut depth_memory: Vec<DepthMemoryRecord> = self
            .depth_memory
            .iter()
            .map(|(word, depths)| DepthMemoryRecord {
                word: word.clone(),
                depths: depths.iter().cloned().collect(),
            })
            .collect();
        depth_memory.sort_by(|a, b| a.word.cmp(&b.word));
        CharModelRecord {
            alpha: self.alpha,
            beta: self.beta,
            base: self.base,
            hpylm: self.lm.to_record(),
            depth_memory,
        }
    }

    pub fn from_record(record: CharModelRecord) -> Result<Self> {
        if !(record.alpha > 0.0 && record.beta > 0.0) {
            return Err(SegError::Persistence("alpha/beta must be positive".into()));
        }
        if !(record.base > 0.0 && record.base <= 1.0) {
            return Err(SegError::Persistence(format!(
                "character base {} out of range",
                record.base
            )));
        }
        let mut depth_memory = HashMap::new();
        for entry in record.depth_memory {
            if entry.depths.is_empty() {
                return Err(SegError::Persistence(format!(
                    "empty depth memory for {:?}",
                    entry.word
                )));
            }
            depth_memory.insert(entry.word, entry.depths.into_iter().collect());
        }
        let model = Self {
            lm: Hpylm::from_record(record.hpylm)?,
            alpha: record.alpha,
            beta: record.beta,
            base: record.base,
            depth_memory,
        };
        model
            .check()
            .map_err(|e| SegError::Persistence(e.to_string()))?;
        Ok(model)
    }
}

/// Draw an index proportionally to `weights`. Falls back to the last index
/// when every weight underflowed.
pub(crate) fn sample_index<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> usize {
    let total: f64 = weights.iter().sum();
    if !(total > 0.0) || !total.is_finite() {
        return weights.len().saturating_sub(1);
    }
    let mut r = rng.gen::<f64>() * total;
    for (i, &w) in weights.iter().enumerate() {
        r -= w;
        if r < 0.0 {
            return i;
        }
    }
    weights.len() - 1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharModelRecord {
    pub alpha: f64,
    pub beta: f64,
    pub base: f64,
    pub hpylm: HpylmRecord,
    pub depth_memory: Vec<DepthMemoryRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthMemoryRecord {
    pub word: String,
    pub depths: Vec<Vec<u8>>,
}
