//! Word lattice over one sentence and the forward pass in log space.
//!
//! Cell `(t, k, s)` covers every segmentation of the prefix `[0, t)` whose
//! last word is the `k + 1` characters ending at `t`, emitted from state `s`.
//! Word tokens and their character-model base probabilities are computed
//! once per `(t, k)` and shared by forward, sampling and Viterbi passes.

mod sample;
mod viterbi;


use tracing::{debug, debug_span};

use crate::corpus::{Sentence, Span};
use crate::token::Token;

/// Probabilities a lattice pass needs from a model. Every method returns a
/// plain (linear) probability; the lattice takes logs.
pub(crate) trait Scorer: Sync {
    fn num_states(&self) -> usize;
    fn max_word_length(&self) -> usize;
    /// Character-model probability of spelling `word`.
    fn word_base(&self, word: &str) -> f64;
    /// `P(word | prev, state)` with the given base probability for `word`.
    fn emission(&self, state: usize, word: &Token, prev: &Token, base: f64) -> f64;
    /// `P(end of sentence | last word)`.
    fn eos_emission(&self, prev: &Token) -> f64;
    /// `P(to | from)` where `None` stands for the sentence boundary.
    fn transition(&self, from: Option<usize>, to: Option<usize>) -> f64;
}

/// Online log-sum-exp accumulator.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LogSum {
    max: f64,
    sum: f64,
}

impl LogSum {
    pub fn new() -> Self {
        Self {
            max: f64::NEG_INFINITY,
            sum: 0.0,
        }
    }

    pub fn push(&mut self, x: f64) {
        if x == f64::NEG_INFINITY || x.is_nan() {
            return;
        }
        if x > self.max {
            self.sum = self.sum * (self.max - x).exp() + 1.0;
            self.max = x;
        } else {
            self.sum += (x - self.max).exp();
        }
    }

    pub fn value(&self) -> f64 {
        if self.sum == 0.0 {
            f64::NEG_INFINITY
        } else {
            self.max + self.sum.ln()
        }
    }
}

/// Log probability of one complete path (segmentation plus states), scored
/// the same way the lattice scores it.
pub(crate) fn path_log_probability(scorer: &dyn Scorer, sentence: &Sentence, spans: &[Span]) -> f64 {
    let log_trans = |from: Option<usize>, to: Option<usize>| scorer.transition(from, to).ln();
    let mut total = 0.0;
    let mut prev = Token::Bos;
    let mut prev_state = None;
    for span in spans {
        let surface = sentence.slice(span.start, span.end);
        let word = Token::word(surface);
        total += log_trans(prev_state, Some(span.state));
        total += scorer
            .emission(span.state, &word, &prev, scorer.word_base(surface))
            .ln();
        prev = word;
        prev_state = Some(span.state);
    }
    total + log_trans(prev_state, None) + scorer.eos_emission(&prev).ln()
}

pub(crate) struct Lattice<'a> {
    scorer: &'a dyn Scorer,
    /// Number of characters.
    len: usize,
    /// Maximum word length in characters.
    width: usize,
    states: usize,
    /// Word token per `(t, k)`.
    words: Vec<Token>,
    /// Character-model probability per `(t, k)`.
    bases: Vec<f64>,
    /// Log transition weights, `(states + 1)^2`; index `states` is the boundary.
    /// Models without a tag chain return 1 for every transition.
    log_trans: Vec<f64>,
    /// Log forward weights per `(t, k, s)`; `t = 0` is unused.
    alpha: Vec<f64>,
    log_z: f64,
}

impl<'a> Lattice<'a> {
    /// Build the lattice for `text` and run the forward pass.
    pub fn new(scorer: &'a dyn Scorer, text: &str) -> Self {
        let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        offsets.push(text.len());
        let len = offsets.len() - 1;
        let width = scorer.max_word_length().max(1);
        let states = scorer.num_states().max(1);
        let _span = debug_span!("lattice", len, width, states).entered();

        let cells = (len + 1) * width;
        let mut words = Vec::with_capacity(cells);
        let mut bases = Vec::with_capacity(cells);
        for t in 0..=len {
            for k in 0..width {
                if k < t {
                    let word = &text[offsets[t - k - 1]..offsets[t]];
                    bases.push(scorer.word_base(word));
                    words.push(Token::word(word));
                } else {
                    bases.push(0.0);
                    words.push(Token::Eos);
                }
            }
        }

        let edge = states + 1;
        let mut log_trans = vec![0.0; edge * edge];
        let state = |i: usize| (i < states).then_some(i);
        for from in 0..edge {
            for to in 0..edge {
                log_trans[from * edge + to] = scorer.transition(state(from), state(to)).ln();
            }
        }

        let mut lattice = Self {
            scorer,
            len,
            width,
            states,
            words,
            bases,
            log_trans,
            alpha: vec![f64::NEG_INFINITY; cells * states],
            log_z: f64::NEG_INFINITY,
        };
        lattice.forward();
        debug!(log_z = lattice.log_z, "forward pass done");
        lattice
    }

    /// Log marginal probability of the sentence, summed over segmentations
    /// (and tag sequences).
    pub fn log_likelihood(&self) -> f64 {
        self.log_z
    }

    fn cell(&self, t: usize, k: usize) -> usize {
        t * self.width + k
    }

    fn alpha_at(&self, t: usize, k: usize, s: usize) -> f64 {
        self.alpha[self.cell(t, k) * self.states + s]
    }

    fn word(&self, t: usize, k: usize) -> &Token {
        &self.words[self.cell(t, k)]
    }

    fn base(&self, t: usize, k: usize) -> f64 {
        self.bases[self.cell(t, k)]
    }

    /// Number of word lengths that can end at `t`.
    fn lengths_ending_at(&self, t: usize) -> usize {
        t.min(self.width)
    }

    fn log_transition(&self, from: Option<usize>, to: Option<usize>) -> f64 {
        let edge = self.states + 1;
        let from = from.unwrap_or(self.states);
        let to = to.unwrap_or(self.states);
        self.log_trans[from * edge + to]
    }

    /// Log weight of emitting the word at `(t, k)` from state `s` after the
    /// word at `(t - k - 1, j)`, or after the sentence start when `j` is `None`.
    fn log_emission(&self, t: usize, k: usize, s: usize, prev: Option<usize>) -> f64 {
        let start = t - k - 1;
        let prev_token = match prev {
            Some(j) => self.word(start, j),
            None => &Token::Bos,
        };
        self.scorer
            .emission(s, self.word(t, k), prev_token, self.base(t, k))
            .ln()
    }

    /// Log weight of closing the sentence after the word at `(len, k)` in `s`.
    fn log_final(&self, k: usize, s: usize) -> f64 {
        self.log_transition(Some(s), None) + self.scorer.eos_emission(self.word(self.len, k)).ln()
    }

    fn forward(&mut self) {
        let mut alpha = std::mem::take(&mut self.alpha);
        for t in 1..=self.len {
            for k in 0..self.lengths_ending_at(t) {
                let start = t - k - 1;
                for s in 0..self.states {
                    let value = if start == 0 {
                        self.log_transition(None, Some(s)) + self.log_emission(t, k, s, None)
                    } else {
                        let mut acc = LogSum::new();
                        for j in 0..self.lengths_ending_at(start) {
                            let emit = self.log_emission(t, k, s, Some(j));
                            let base_idx = self.cell(start, j) * self.states;
                            for prev_s in 0..self.states {
                                acc.push(
                                    alpha[base_idx + prev_s]
                                        + self.log_transition(Some(prev_s), Some(s))
                                        + emit,
                                );
                            }
                        }
                        acc.value()
                    };
                    alpha[self.cell(t, k) * self.states + s] = value;
                }
            }
        }

        let mut z = LogSum::new();
        for k in 0..self.lengths_ending_at(self.len) {
            let base_idx = self.cell(self.len, k) * self.states;
            for s in 0..self.states {
                z.push(alpha[base_idx + s] + self.log_final(k, s));
            }
        }
        self.alpha = alpha;
        self.log_z = z.value();
    }
}
