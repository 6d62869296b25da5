//! The model a caller trains and queries: one of the two segmentation
//! models, chosen at construction, plus its random stream.

#[cfg(test)]
mod tests;

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug_span, info};

use crate::config::{ModelConfig, ModelKind, TrainOptions};
use crate::corpus::{Corpus, Sentence};
use crate::error::{Result, SegError};
use crate::hpylm::Hpylm;
use crate::lattice::{path_log_probability, Lattice, Scorer};
use crate::npylm::Npylm;
use crate::persistence::ModelRecord;
use crate::pyhsmm::Pyhsmm;
use crate::token::Token;
use crate::trainer::{self, build_pool, EpochStats};

#[derive(Debug, Clone)]
enum Inner {
    Npylm(Npylm),
    Pyhsmm(Pyhsmm),
}

#[derive(Debug, Clone)]
pub struct Model {
    kind: ModelKind,
    config: ModelConfig,
    inner: Inner,
    rng: StdRng,
}

fn wrong_mode(expected: ModelKind, actual: ModelKind, operation: &str) -> SegError {
    SegError::config(
        "kind",
        format!("{operation} needs a {expected} model, this one is {actual}"),
    )
}

fn rng_for(config: &ModelConfig) -> StdRng {
    match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

impl Model {
    /// Build an untrained model. Fails on any out-of-range hyperparameter.
    pub fn new(kind: ModelKind, config: ModelConfig) -> Result<Self> {
        config.validate(kind)?;
        let inner = match kind {
            ModelKind::Npylm => Inner::Npylm(Npylm::new(&config)),
            ModelKind::Pyhsmm => Inner::Pyhsmm(Pyhsmm::new(&config)),
        };
        let rng = rng_for(&config);
        Ok(Self {
            kind,
            config,
            inner,
            rng,
        })
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// True when no customer is seated anywhere.
    pub fn is_empty(&self) -> bool {
        match &self.inner {
            Inner::Npylm(m) => m.is_empty(),
            Inner::Pyhsmm(m) => m.is_empty(),
        }
    }

    fn scorer(&self) -> &dyn Scorer {
        match &self.inner {
            Inner::Npylm(m) => m,
            Inner::Pyhsmm(m) => m,
        }
    }

    /// Seat a random initial segmentation (and tagging) of every sentence.
    pub fn initialize(&mut self, corpus: &mut Corpus) -> Result<()> {
        let max = self.config.max_sentence_length;
        match &mut self.inner {
            Inner::Npylm(m) => trainer::initialize(m, corpus, max, &mut self.rng),
            Inner::Pyhsmm(m) => trainer::initialize(m, corpus, max, &mut self.rng),
        }
    }

    /// One epoch of blocked Gibbs sampling over word boundaries.
    pub fn train_word_segmentation(
        &mut self,
        corpus: &mut Corpus,
        options: &TrainOptions,
    ) -> Result<EpochStats> {
        match &mut self.inner {
            Inner::Npylm(m) => trainer::train_epoch(m, corpus, options, &mut self.rng),
            Inner::Pyhsmm(_) => Err(wrong_mode(
                ModelKind::Npylm,
                self.kind,
                "word segmentation training",
            )),
        }
    }

    /// One epoch of blocked Gibbs sampling over word boundaries and tags jointly.
    pub fn train_word_segmentation_and_pos_tagging(
        &mut self,
        corpus: &mut Corpus,
        options: &TrainOptions,
    ) -> Result<EpochStats> {
        match &mut self.inner {
            Inner::Pyhsmm(m) => trainer::train_epoch(m, corpus, options, &mut self.rng),
            Inner::Npylm(_) => Err(wrong_mode(
                ModelKind::Pyhsmm,
                self.kind,
                "joint segmentation and tagging",
            )),
        }
    }

    /// Epoch with whichever training mode this model's kind runs.
    pub fn train(&mut self, corpus: &mut Corpus, options: &TrainOptions) -> Result<EpochStats> {
        match self.kind {
            ModelKind::Npylm => self.train_word_segmentation(corpus, options),
            ModelKind::Pyhsmm => self.train_word_segmentation_and_pos_tagging(corpus, options),
        }
    }

    fn prepare(&self, sentences: &[&str]) -> Result<Vec<Sentence>> {
        sentences
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let sentence = Sentence::new(*text);
                if sentence.is_empty() {
                    return Err(SegError::Input(format!("sentence {i} is empty")));
                }
                if sentence.len() > self.config.max_sentence_length {
                    return Err(SegError::Input(format!(
                        "sentence {i} has {} characters, more than max_sentence_length {}",
                        sentence.len(),
                        self.config.max_sentence_length
                    )));
                }
                Ok(sentence)
            })
            .collect()
    }

    /// Most probable segmentation of each sentence. Never mutates the model.
    ///
    /// Text is decoded as given: callers apply the same normalization the
    /// training corpus went through (see [`crate::CorpusOptions`]).
    pub fn test_word_segmentation(&self, sentences: &[&str], threads: usize) -> Result<ResultSet> {
        let prepared = self.prepare(sentences)?;
        let pool = build_pool(threads)?;
        let scorer = self.scorer();
        let _span = debug_span!("test_segmentation", sentences = prepared.len()).entered();
        let decoded = pool.install(|| {
            prepared
                .into_par_iter()
                .map(|mut sentence| {
                    let (spans, score) = Lattice::new(scorer, sentence.text()).viterbi();
                    sentence.set_segmentation(spans)?;
                    Ok((sentence, score))
                })
                .collect::<Result<Vec<_>>>()
        })?;
        Ok(self.result_set(decoded))
    }

    /// One posterior sample per sentence, reproducible for a given `seed`.
    /// Never mutates the model. Text is decoded as given, like
    /// [`Model::test_word_segmentation`].
    pub fn sample_word_segmentation(
        &self,
        sentences: &[&str],
        threads: usize,
        seed: u64,
    ) -> Result<ResultSet> {
        let prepared = self.prepare(sentences)?;
        let pool = build_pool(threads)?;
        let scorer = self.scorer();
        let mut seeder = StdRng::seed_from_u64(seed);
        let seeds: Vec<u64> = prepared.iter().map(|_| seeder.gen()).collect();
        let decoded = pool.install(|| {
            prepared
                .into_par_iter()
                .zip(seeds)
                .map(|(mut sentence, seed)| {
                    let mut rng = StdRng::seed_from_u64(seed);
                    let spans = Lattice::new(scorer, sentence.text()).sample(&mut rng);
                    let score = path_log_probability(scorer, &sentence, &spans);
                    sentence.set_segmentation(spans)?;
                    Ok((sentence, score))
                })
                .collect::<Result<Vec<_>>>()
        })?;
        Ok(self.result_set(decoded))
    }

    fn result_set(&self, decoded: Vec<(Sentence, f64)>) -> ResultSet {
        let (sentences, log_probs) = decoded.into_iter().unzip();
        ResultSet {
            tagged: self.kind == ModelKind::Pyhsmm,
            sentences,
            log_probs,
        }
    }

    /// `P(word | prev, state)` with the character model as base measure.
    /// `prev` is `None` at the start of a sentence; `state` must be 0 for
    /// npylm models.
    pub fn word_probability(&self, word: &str, prev: Option<&str>, state: usize) -> Result<f64> {
        if word.is_empty() {
            return Err(SegError::Input("cannot score an empty word".into()));
        }
        let scorer = self.scorer();
        if state >= scorer.num_states() {
            return Err(SegError::Input(format!(
                "state {state} out of range for a model with {} states",
                scorer.num_states()
            )));
        }
        let prev = prev.map_or(Token::Bos, Token::word);
        Ok(scorer.emission(state, &Token::word(word), &prev, scorer.word_base(word)))
    }

    /// Log marginal probability of `sentence`, summed over every
    /// segmentation (and tag sequence).
    pub fn log_likelihood(&self, sentence: &str) -> Result<f64> {
        let prepared = self.prepare(&[sentence])?;
        Ok(Lattice::new(self.scorer(), prepared[0].text()).log_likelihood())
    }

    /// Negative log probability of the decoded paths under the current
    /// model, per word and per sentence.
    pub fn test_score(&self, results: &ResultSet) -> Result<TestScore> {
        if results.is_empty() {
            return Err(SegError::Input("cannot score an empty result set".into()));
        }
        let scorer = self.scorer();
        let states = scorer.num_states();
        let mut total = 0.0;
        let mut words = 0;
        for sentence in &results.sentences {
            let spans = sentence.segmentation();
            if let Some(span) = spans.iter().find(|s| s.state >= states) {
                return Err(SegError::Input(format!(
                    "tag {} out of range for a model with {states} states",
                    span.state
                )));
            }
            total += path_log_probability(scorer, sentence, spans);
            words += spans.len();
        }
        let score = TestScore {
            per_word: -total / words as f64,
            per_sentence: -total / results.len() as f64,
        };
        info!(
            per_word = score.per_word,
            per_sentence = score.per_sentence,
            "test score"
        );
        Ok(score)
    }

    /// Current hyperparameters of every language model.
    pub fn report(&self) -> ParameterReport {
        let describe = |name: String, lm: &Hpylm| LmReport {
            name,
            theta: lm.theta().to_vec(),
            d: lm.d().to_vec(),
        };
        let (mut models, chars) = match &self.inner {
            Inner::Npylm(m) => (vec![describe("word".into(), m.word_model())], m.char_model()),
            Inner::Pyhsmm(m) => {
                let mut models: Vec<LmReport> = (0..m.pos_size())
                    .filter_map(|s| m.word_model(s).map(|w| describe(format!("word[{s}]"), w)))
                    .collect();
                if let Some(eos) = m.word_model(m.pos_size()) {
                    models.push(describe("word[eos]".into(), eos));
                }
                models.push(describe("tag".into(), m.tag_model()));
                (models, m.char_model())
            }
        };
        models.push(describe("char".into(), chars.hpylm()));
        ParameterReport {
            kind: self.kind,
            models,
            alpha: chars.alpha(),
            beta: chars.beta(),
        }
    }

    pub(crate) fn check(&self) -> Result<()> {
        match &self.inner {
            Inner::Npylm(m) => m.check(),
            Inner::Pyhsmm(m) => m.check(),
        }
    }

    pub(crate) fn to_record(&self) -> ModelRecord {
        match &self.inner {
            Inner::Npylm(m) => ModelRecord::Npylm(m.to_record()),
            Inner::Pyhsmm(m) => ModelRecord::Pyhsmm(m.to_record()),
        }
    }

    /// Rebuild a model from saved tables. The random stream restarts from
    /// `config.seed` (or entropy); it is not part of the saved state.
    pub(crate) fn from_record(kind: ModelKind, config: ModelConfig, record: ModelRecord) -> Result<Self> {
        config
            .validate(kind)
            .map_err(|e| SegError::Persistence(e.to_string()))?;
        let inner = match (kind, record) {
            (ModelKind::Npylm, ModelRecord::Npylm(r)) => Inner::Npylm(Npylm::from_record(r, &config)?),
            (ModelKind::Pyhsmm, ModelRecord::Pyhsmm(r)) => {
                Inner::Pyhsmm(Pyhsmm::from_record(r, &config)?)
            }
            (kind, _) => {
                return Err(SegError::Persistence(format!(
                    "tables do not belong to a {kind} model"
                )))
            }
        };
        let rng = rng_for(&config);
        Ok(Self {
            kind,
            config,
            inner,
            rng,
        })
    }
}

/// Decoded sentences from [`Model::test_word_segmentation`] or
/// [`Model::sample_word_segmentation`].
#[derive(Debug, Clone)]
pub struct ResultSet {
    tagged: bool,
    sentences: Vec<Sentence>,
    log_probs: Vec<f64>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    pub fn word_sequence(&self, i: usize) -> Option<Vec<&str>> {
        self.sentences.get(i).map(Sentence::words)
    }

    /// Tags of sentence `i`; `None` for untagged models.
    pub fn tag_sequence(&self, i: usize) -> Option<Vec<usize>> {
        if !self.tagged {
            return None;
        }
        self.sentences.get(i).map(Sentence::tags)
    }

    /// Log probability of the decoded path when it was produced.
    pub fn log_probability(&self, i: usize) -> Option<f64> {
        self.log_probs.get(i).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TestScore {
    pub per_word: f64,
    pub per_sentence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LmReport {
    pub name: String,
    /// Strength per depth, root first.
    pub theta: Vec<f64>,
    /// Discount per depth, root first.
    pub d: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterReport {
    pub kind: ModelKind,
    pub models: Vec<LmReport>,
    pub alpha: f64,
    pub beta: f64,
}

impl fmt::Display for ParameterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} model", self.kind)?;
        for lm in &self.models {
            writeln!(f, "  {}:", lm.name)?;
            for (depth, (theta, d)) in lm.theta.iter().zip(&lm.d).enumerate() {
                writeln!(f, "    depth {depth}: theta={theta:.4} d={d:.4}")?;
            }
        }
        write!(f, "  char stop prior: alpha={:.4} beta={:.4}", self.alpha, self.beta)
    }
}
