use tracing::{debug, debug_span};

use super::Lattice;
use crate::corpus::Span;

/// Backpointer marking a word that starts the sentence.
const START: usize = usize::MAX;

impl Lattice<'_> {
    /// Most probable segmentation (and state sequence) with its log
    /// probability, by max-product search over the same cells as the
    /// forward pass.
    pub fn viterbi(&self) -> (Vec<Span>, f64) {
        let _span = debug_span!("viterbi", len = self.len).entered();
        if self.len == 0 {
            return (Vec::new(), f64::NEG_INFINITY);
        }
        let states = self.states;
        let idx = |t: usize, k: usize, s: usize| self.cell(t, k) * states + s;
        let mut best = vec![f64::NEG_INFINITY; self.alpha.len()];
        // (j * states + prev_s) of the best predecessor, or START.
        let mut back = vec![START; self.alpha.len()];

        for t in 1..=self.len {
            for k in 0..self.lengths_ending_at(t) {
                let start = t - k - 1;
                for s in 0..states {
                    let cell = idx(t, k, s);
                    if start == 0 {
                        best[cell] =
                            self.log_transition(None, Some(s)) + self.log_emission(t, k, s, None);
                        continue;
                    }
                    for j in 0..self.lengths_ending_at(start) {
                        let emit = self.log_emission(t, k, s, Some(j));
                        for prev_s in 0..states {
                            let score = best[idx(start, j, prev_s)]
                                + self.log_transition(Some(prev_s), Some(s))
                                + emit;
                            if score > best[cell] {
                                best[cell] = score;
                                back[cell] = j * states + prev_s;
                            }
                        }
                    }
                }
            }
        }

        let mut score = f64::NEG_INFINITY;
        let (mut k, mut s) = (0, 0);
        for kk in 0..self.lengths_ending_at(self.len) {
            for ss in 0..states {
                let total = best[idx(self.len, kk, ss)] + self.log_final(kk, ss);
                if total > score {
                    score = total;
                    k = kk;
                    s = ss;
                }
            }
        }

        let mut spans = Vec::new();
        let mut t = self.len;
        loop {
            let start = t - k - 1;
            spans.push(Span::new(start, t, s));
            if start == 0 {
                break;
            }
            let pointer = back[idx(t, k, s)];
            if pointer == START {
                // Every predecessor underflowed; fall back to single characters.
                k = 0;
            } else {
                k = pointer / states;
                s = pointer % states;
            }
            t = start;
        }
        spans.reverse();
        debug!(words = spans.len(), score, "viterbi done");
        (spans, score)
    }
}
