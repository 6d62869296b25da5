//! Backward sampling of a full segmentation from the forward weights.

use rand::Rng;
use tracing::debug_span;

use super::Lattice;
use crate::char_model::sample_index;
use crate::corpus::Span;

/// Draw an index proportionally to `exp(log_weights)`.
fn sample_log<R: Rng + ?Sized>(log_weights: &[f64], rng: &mut R) -> usize {
    let max = log_weights
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return log_weights.len().saturating_sub(1);
    }
    let weights: Vec<f64> = log_weights.iter().map(|&w| (w - max).exp()).collect();
    sample_index(&weights, rng)
}

impl Lattice<'_> {
    /// Sample one segmentation (with states) from the posterior over all
    /// paths, walking back from the end of the sentence.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Span> {
        let _span = debug_span!("lattice_sample", len = self.len).entered();
        if self.len == 0 {
            return Vec::new();
        }
        let states = self.states;
        let mut weights = Vec::with_capacity(self.width * states);

        for k in 0..self.lengths_ending_at(self.len) {
            for s in 0..states {
                weights.push(self.alpha_at(self.len, k, s) + self.log_final(k, s));
            }
        }
        let idx = sample_log(&weights, rng);
        let (mut k, mut s) = (idx / states, idx % states);
        let mut t = self.len;

        let mut spans = Vec::new();
        loop {
            let start = t - k - 1;
            spans.push(Span::new(start, t, s));
            if start == 0 {
                break;
            }
            weights.clear();
            for j in 0..self.lengths_ending_at(start) {
                let emit = self.log_emission(t, k, s, Some(j));
                for prev_s in 0..states {
                    weights.push(
                        self.alpha_at(start, j, prev_s)
                            + self.log_transition(Some(prev_s), Some(s))
                            + emit,
                    );
                }
            }
            let idx = sample_log(&weights, rng);
            k = idx / states;
            s = idx % states;
            t = start;
        }
        spans.reverse();
        spans
    }
}
