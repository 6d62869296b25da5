//! Pitman-Yor hidden semi-Markov model: one word bigram HPYLM per hidden
//! state, a bigram HPYLM over states, and a character model shared by every
//! state as the word base measure.
//!
//! The end of a sentence is its own state: the transition model predicts
//! `Eos` after the last tag, and a dedicated word model predicts `Eos` after
//! the last word.

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
pub struct Pyhsmm {
    pos_size: usize,
    max_word_length: usize,
    char_base: f64,
    /// `pos_size` emission models followed by the end-of-sentence model.
    words: Vec<Hpylm>,
    tags: Hpylm,
    chars: CharModel,
}

fn tag_token(state: Option<usize>, boundary: Token) -> Token {
    state.map_or(boundary, Token::tag)
}

impl Pyhsmm {
    pub fn new(config: &ModelConfig) -> Self {
        let depth = config.max_ngram - 1;
        Self {
            pos_size: config.pos_size,
            max_word_length: config.max_word_length,
            char_base: config.char_base(),
            words: (0..=config.pos_size)
                .map(|_| Hpylm::new(depth, config))
                .collect(),
            tags: Hpylm::new(1, config),
            chars: CharModel::new(config),
        }
    }

    pub fn pos_size(&self) -> usize {
        self.pos_size
    }

    /// Emission model for a state; index `pos_size` is the end-of-sentence model.
    pub fn word_model(&self, state: usize) -> Option<&Hpylm> {
        self.words.get(state)
    }

    pub fn tag_model(&self) -> &Hpylm {
        &self.tags
    }

    pub fn char_model(&self) -> &CharModel {
        &self.chars
    }

    fn tag_base(&self) -> f64 {
        1.0 / (self.pos_size + 1) as f64
    }

    fn eos_state(&self) -> usize {
        self.pos_size
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(Hpylm::is_empty) && self.tags.is_empty() && self.chars.is_empty()
    }

    /// Reject a segmentation before any table is touched.
    fn check_spans(&self, sentence: &Sentence, spans: &[Span]) -> Result<()> {
        check_tiling(sentence.len(), spans)?;
        if let Some(span) = spans.iter().find(|s| s.state >= self.pos_size) {
            return Err(SegError::Consistency(format!(
                "state {} out of range for {} tags",
                span.state, self.pos_size
            )));
        }
        Ok(())
    }

    /// Seat every (word, tag) pair of `spans` plus both end-of-sentence markers.
    pub fn add_sentence<R: Rng + ?Sized>(
        &mut self,
        sentence: &Sentence,
        spans: &[Span],
        rng: &mut R,
    ) -> Result<()> {
        self.check_spans(sentence, spans)?;
        let tag_base = self.tag_base();
        let mut prev_word = Token::Bos;
        let mut prev_tag = Token::Bos;
        for span in spans {
            let surface = sentence.slice(span.start, span.end);
            let word = Token::word(surface);
            let tag = Token::tag(span.state);
            self.tags
                .add_customer(&tag, slice::from_ref(&prev_tag), tag_base, rng)?;
            let base = self.chars.word_probability(surface);
            if self.words[span.state].add_customer(&word, slice::from_ref(&prev_word), base, rng)? {
                self.chars.add_word(surface, rng)?;
            }
            prev_word = word;
            prev_tag = tag;
        }
        self.tags
            .add_customer(&Token::Eos, slice::from_ref(&prev_tag), tag_base, rng)?;
        let eos = self.eos_state();
        self.words[eos].add_customer(&Token::Eos, slice::from_ref(&prev_word), self.char_base, rng)?;
        Ok(())
    }

    /// Inverse of [`Pyhsmm::add_sentence`].
    pub fn remove_sentence<R: Rng + ?Sized>(
        &mut self,
        sentence: &Sentence,
        spans: &[Span],
        rng: &mut R,
    ) -> Result<()> {
        self.check_spans(sentence, spans)?;
        let mut prev_word = Token::Bos;
        let mut prev_tag = Token::Bos;
        for span in spans {
            let surface = sentence.slice(span.start, span.end);
            let word = Token::word(surface);
            let tag = Token::tag(span.state);
            self.tags
                .remove_customer(&tag, slice::from_ref(&prev_tag), rng)?;
            if self.words[span.state].remove_customer(&word, slice::from_ref(&prev_word), rng)? {
                self.chars.remove_word(surface, rng)?;
            }
            prev_word = word;
            prev_tag = tag;
        }
        self.tags
            .remove_customer(&Token::Eos, slice::from_ref(&prev_tag), rng)?;
        let eos = self.eos_state();
        self.words[eos].remove_customer(&Token::Eos, slice::from_ref(&prev_word), rng)?;
        Ok(())
    }

    pub fn sample_hyperparameters<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let _span = debug_span!("pyhsmm_hyper", pos_size = self.pos_size).entered();
        for lm in &mut self.words {
            lm.sample_hyperparameters(rng);
        }
        self.tags.sample_hyperparameters(rng);
        self.chars.sample_hyperparameters(rng);
    }

    pub fn check(&self) -> Result<()> {
        for lm in &self.words {
            lm.check()?;
        }
        self.tags.check()?;
        self.chars.check()
    }

    pub fn to_record(&self) -> PyhsmmRecord {
        PyhsmmRecord {
            pos_size: self.pos_size,
            words: self.words.iter().map(Hpylm::to_record).collect(),
            tags: self.tags.to_record(),
            chars: self.chars.to_record(),
        }
    }

    pub fn from_record(record: PyhsmmRecord, config: &ModelConfig) -> Result<Self> {
        if record.pos_size != config.pos_size || record.words.len() != record.pos_size + 1 {
            return Err(SegError::Persistence(format!(
                "expected {} word models for pos_size {}, found {}",
                config.pos_size + 1,
                config.pos_size,
                record.words.len()
            )));
        }
        let words = record
            .words
            .into_iter()
            .map(Hpylm::from_record)
            .collect::<Result<Vec<_>>>()?;
        if words.iter().any(|lm| lm.max_depth() != config.max_ngram - 1) {
            return Err(SegError::Persistence(
                "word model depth does not match max_ngram".into(),
            ));
        }
        Ok(Self {
            pos_size: record.pos_size,
            max_word_length: config.max_word_length,
            char_base: config.char_base(),
            words,
            tags: Hpylm::from_record(record.tags)?,
            chars: CharModel::from_record(record.chars)?,
        })
    }
}

impl Scorer for Pyhsmm {
    fn num_states(&self) -> usize {
        self.pos_size
    }

    fn max_word_length(&self) -> usize {
        self.max_word_length
    }

    fn word_base(&self, word: &str) -> f64 {
        self.chars.word_probability(word)
    }

    fn emission(&self, state: usize, word: &Token, prev: &Token, base: f64) -> f64 {
        self.words[state].probability(word, slice::from_ref(prev), base)
    }

    fn eos_emission(&self, prev: &Token) -> f64 {
        self.words[self.eos_state()].probability(&Token::Eos, slice::from_ref(prev), self.char_base)
    }

    fn transition(&self, from: Option<usize>, to: Option<usize>) -> f64 {
        let context = tag_token(from, Token::Bos);
        self.tags.probability(
            &tag_token(to, Token::Eos),
            slice::from_ref(&context),
            self.tag_base(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PyhsmmRecord {
    pub pos_size: usize,
    pub words: Vec<HpylmRecord>,
    pub tags: HpylmRecord,
    pub chars: CharModelRecord,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::{path_log_probability, Lattice};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config(pos_size: usize) -> ModelConfig {
        ModelConfig {
            theta: 1.0,
            d: 0.5,
            gamma_a: 1.0,
            gamma_b: 1.0,
            beta_a: 1.0,
            beta_b: 1.0,
            alpha: 1.0,
            beta: 1.0,
            max_ngram: 2,
            max_word_length: 3,
            pos_size,
            vocab_size: 64,
            max_sentence_length: 32,
            seed: None,
        }
    }

    fn tagged(text: &str, spans: &[(usize, usize, usize)]) -> (Sentence, Vec<Span>) {
        let spans = spans.iter().map(|&(a, b, s)| Span::new(a, b, s)).collect();
        (Sentence::new(text), spans)
    }

    #[test]
    fn test_transition_distribution_is_proper() {
        let mut rng = StdRng::seed_from_u64(71);
        let mut model = Pyhsmm::new(&config(3));
        let (s, spans) = tagged("abcab", &[(0, 1, 0), (1, 3, 2), (3, 5, 2)]);
        model.add_sentence(&s, &spans, &mut rng).unwrap();
        for from in [None, Some(0), Some(1), Some(2)] {
            let mut total = model.transition(from, None);
            for to in 0..3 {
                total += model.transition(from, Some(to));
            }
            assert!((total - 1.0).abs() < 1e-9, "from {from:?} sums to {total}");
        }
    }

    #[test]
    fn test_tagged_emission_is_state_specific() {
        let mut rng = StdRng::seed_from_u64(72);
        let mut model = Pyhsmm::new(&config(2));
        let (s, spans) = tagged("abab", &[(0, 2, 1), (2, 4, 1)]);
        for _ in 0..3 {
            model.add_sentence(&s, &spans, &mut rng).unwrap();
        }
        let base = model.word_base("ab");
        let in_state = model.emission(1, &Token::word("ab"), &Token::Bos, base);
        let other = model.emission(0, &Token::word("ab"), &Token::Bos, base);
        assert!(in_state > other);
        assert!(model.transition(Some(1), Some(1)) > model.transition(Some(1), Some(0)));
    }

    #[test]
    fn test_add_then_remove_is_empty() {
        let mut rng = StdRng::seed_from_u64(73);
        let mut model = Pyhsmm::new(&config(2));
        let data = [
            tagged("abcab", &[(0, 3, 0), (3, 5, 1)]),
            tagged("xy", &[(0, 1, 1), (1, 2, 1)]),
        ];
        for (s, spans) in &data {
            model.add_sentence(s, spans, &mut rng).unwrap();
        }
        model.check().unwrap();
        for (s, spans) in &data {
            model.remove_sentence(s, spans, &mut rng).unwrap();
        }
        assert!(model.is_empty());
    }

    #[test]
    fn test_out_of_range_state_rejected() {
        let mut rng = StdRng::seed_from_u64(74);
        let mut model = Pyhsmm::new(&config(2));
        let (s, spans) = tagged("ab", &[(0, 2, 2)]);
        assert!(model.add_sentence(&s, &spans, &mut rng).is_err());
    }

    #[test]
    fn test_rejected_sentence_leaves_tables_untouched() {
        let mut rng = StdRng::seed_from_u64(76);
        let mut model = Pyhsmm::new(&config(2));
        let (s, bad_state) = tagged("abcab", &[(0, 3, 0), (3, 5, 2)]);
        assert!(model.add_sentence(&s, &bad_state, &mut rng).is_err());
        assert!(model.is_empty());

        let (_, overrun) = tagged("abcab", &[(0, 3, 0), (3, 9, 1)]);
        assert!(matches!(
            model.add_sentence(&s, &overrun, &mut rng),
            Err(SegError::Consistency(_))
        ));
        assert!(model.is_empty());

        let (_, good) = tagged("abcab", &[(0, 3, 0), (3, 5, 1)]);
        model.add_sentence(&s, &good, &mut rng).unwrap();
        let before = model.to_record();
        assert!(model.remove_sentence(&s, &bad_state, &mut rng).is_err());
        assert_eq!(model.to_record(), before);
    }

    #[test]
    fn test_single_state_lattice_includes_transitions() {
        let mut rng = StdRng::seed_from_u64(77);
        let mut model = Pyhsmm::new(&config(1));
        let (s, spans) = tagged("abcab", &[(0, 2, 0), (2, 3, 0), (3, 5, 0)]);
        for _ in 0..5 {
            model.add_sentence(&s, &spans, &mut rng).unwrap();
        }
        assert!(model.transition(Some(0), Some(0)) < 1.0);

        // A one-character sentence has exactly one path.
        let word = Token::word("a");
        let joint = model.transition(None, Some(0)).ln()
            + model.emission(0, &word, &Token::Bos, model.word_base("a")).ln()
            + model.transition(Some(0), None).ln()
            + model.eos_emission(&word).ln();
        let lattice = Lattice::new(&model, "a");
        assert!((lattice.log_likelihood() - joint).abs() < 1e-9);

        // "ab" splits as [ab] or [a][b].
        let two = Sentence::new("ab");
        let whole = path_log_probability(&model, &two, &[Span::new(0, 2, 0)]);
        let split =
            path_log_probability(&model, &two, &[Span::new(0, 1, 0), Span::new(1, 2, 0)]);
        let marginal = (whole.exp() + split.exp()).ln();
        let lattice = Lattice::new(&model, "ab");
        assert!((lattice.log_likelihood() - marginal).abs() < 1e-9);
        let (best, score) = lattice.viterbi();
        assert!((score - whole.max(split)).abs() < 1e-9);
        assert_eq!(best.len(), if whole >= split { 1 } else { 2 });
    }

    #[test]
    fn test_record_round_trip() {
        let mut rng = StdRng::seed_from_u64(75);
        let mut model = Pyhsmm::new(&config(2));
        let (s, spans) = tagged("abcab", &[(0, 3, 0), (3, 5, 1)]);
        model.add_sentence(&s, &spans, &mut rng).unwrap();
        model.sample_hyperparameters(&mut rng);
        let restored = Pyhsmm::from_record(model.to_record(), &config(2)).unwrap();
        assert_eq!(restored.to_record(), model.to_record());
        assert_eq!(restored.transition(Some(0), Some(1)), model.transition(Some(0), Some(1)));
        assert!(Pyhsmm::from_record(model.to_record(), &config(3)).is_err());
    }
}
