//! Blocked Gibbs sampling over a corpus.
//!
//! Each batch runs in three phases: the batch's current segmentations are
//! removed from the tables, every sentence of the batch is resampled in
//! parallel against the now read-only model, and the new segmentations are
//! seated back in batch order. Only the first and last phase touch the
//! tables and both run on the calling thread.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, debug_span, info};

use crate::config::{HyperSchedule, TrainOptions};
use crate::corpus::{Corpus, Sentence, Span};
use crate::error::{Result, SegError};
use crate::lattice::{Lattice, Scorer};
use crate::npylm::Npylm;
use crate::pyhsmm::Pyhsmm;

/// A model whose tables can seat and unseat whole sentences.
pub(crate) trait Seating: Scorer {
    fn add_sentence(&mut self, sentence: &Sentence, spans: &[Span], rng: &mut StdRng)
        -> Result<()>;
    fn remove_sentence(
        &mut self,
        sentence: &Sentence,
        spans: &[Span],
        rng: &mut StdRng,
    ) -> Result<()>;
    fn sample_hyperparameters(&mut self, rng: &mut StdRng);
}

impl Seating for Npylm {
    fn add_sentence(&mut self, sentence: &Sentence, spans: &[Span], rng: &mut StdRng) -> Result<()> {
        Npylm::add_sentence(self, sentence, spans, rng)
    }

    fn remove_sentence(
        &mut self,
        sentence: &Sentence,
        spans: &[Span],
        rng: &mut StdRng,
    ) -> Result<()> {
        Npylm::remove_sentence(self, sentence, spans, rng)
    }

    fn sample_hyperparameters(&mut self, rng: &mut StdRng) {
        Npylm::sample_hyperparameters(self, rng)
    }
}

impl Seating for Pyhsmm {
    fn add_sentence(&mut self, sentence: &Sentence, spans: &[Span], rng: &mut StdRng) -> Result<()> {
        Pyhsmm::add_sentence(self, sentence, spans, rng)
    }

    fn remove_sentence(
        &mut self,
        sentence: &Sentence,
        spans: &[Span],
        rng: &mut StdRng,
    ) -> Result<()> {
        Pyhsmm::remove_sentence(self, sentence, spans, rng)
    }

    fn sample_hyperparameters(&mut self, rng: &mut StdRng) {
        Pyhsmm::sample_hyperparameters(self, rng)
    }
}

/// Summary of one training epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EpochStats {
    /// Sentences resampled.
    pub sentences: usize,
    pub batches: usize,
    /// Whether the epoch stopped early on the cancel flag.
    pub cancelled: bool,
}

pub(crate) fn build_pool(threads: usize) -> Result<ThreadPool> {
    // rayon reads zero as "pick for me"
    if threads == 0 {
        return Err(SegError::config("threads", "must be positive"));
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| SegError::config("threads", e.to_string()))
}

/// Random segmentation into chunks of at most `max_word_length` characters,
/// each tagged with a uniformly drawn state.
pub(crate) fn random_segmentation<R: Rng + ?Sized>(
    len: usize,
    max_word_length: usize,
    states: usize,
    rng: &mut R,
) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut start = 0;
    while start < len {
        let width = rng.gen_range(1..=max_word_length.min(len - start));
        let state = if states > 1 { rng.gen_range(0..states) } else { 0 };
        spans.push(Span::new(start, start + width, state));
        start += width;
    }
    spans
}

/// Seat an initial random segmentation for every sentence of the corpus.
///
/// The whole corpus is checked before anything is seated, so a rejected
/// corpus leaves the model untouched.
pub(crate) fn initialize<M: Seating>(
    model: &mut M,
    corpus: &mut Corpus,
    max_sentence_length: usize,
    rng: &mut StdRng,
) -> Result<()> {
    if corpus.is_empty() {
        return Err(SegError::Input("cannot initialize from an empty corpus".into()));
    }
    for (i, sentence) in corpus.sentences().iter().enumerate() {
        if sentence.is_empty() {
            return Err(SegError::Input(format!("sentence {i} is empty")));
        }
        if sentence.len() > max_sentence_length {
            return Err(SegError::Input(format!(
                "sentence {i} has {} characters, more than max_sentence_length {max_sentence_length}",
                sentence.len()
            )));
        }
        if sentence.is_segmented() {
            return Err(SegError::Input(format!(
                "sentence {i} is already seated in a model"
            )));
        }
    }

    let width = model.max_word_length();
    let states = model.num_states();
    for sentence in corpus.sentences_mut() {
        let spans = random_segmentation(sentence.len(), width, states, rng);
        model.add_sentence(sentence, &spans, rng)?;
        sentence.set_segmentation(spans)?;
    }
    info!(sentences = corpus.len(), "initial segmentation seated");
    Ok(())
}

/// One pass of blocked Gibbs sampling over `corpus` in random order.
pub(crate) fn train_epoch<M: Seating>(
    model: &mut M,
    corpus: &mut Corpus,
    options: &TrainOptions,
    rng: &mut StdRng,
) -> Result<EpochStats> {
    options.validate()?;
    if let Some(i) = corpus.sentences().iter().position(|s| !s.is_segmented()) {
        return Err(SegError::Input(format!(
            "sentence {i} has no segmentation; initialize the model with this corpus first"
        )));
    }
    let pool = build_pool(options.threads)?;
    let _span = debug_span!("epoch", sentences = corpus.len(), threads = options.threads).entered();

    let mut order: Vec<usize> = (0..corpus.len()).collect();
    order.shuffle(rng);

    let mut stats = EpochStats::default();
    for batch in order.chunks(options.batch_size) {
        if options.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            info!(batches = stats.batches, "training cancelled");
            stats.cancelled = true;
            break;
        }

        for &i in batch {
            let spans = corpus.sentences_mut()[i].take_segmentation();
            model.remove_sentence(&corpus.sentences()[i], &spans, rng)?;
        }

        let seeds: Vec<u64> = batch.iter().map(|_| rng.gen()).collect();
        let sampled: Vec<Vec<Span>> = {
            let scorer: &M = model;
            let sentences = corpus.sentences();
            pool.install(|| {
                batch
                    .par_iter()
                    .zip(seeds.par_iter())
                    .map(|(&i, &seed)| {
                        let mut rng = StdRng::seed_from_u64(seed);
                        Lattice::new(scorer, sentences[i].text()).sample(&mut rng)
                    })
                    .collect()
            })
        };

        let mut words = 0;
        for (&i, spans) in batch.iter().zip(sampled) {
            words += spans.len();
            model.add_sentence(&corpus.sentences()[i], &spans, rng)?;
            corpus.sentences_mut()[i].set_segmentation(spans)?;
        }

        if options.schedule == HyperSchedule::Batch {
            model.sample_hyperparameters(rng);
        }
        stats.batches += 1;
        stats.sentences += batch.len();
        debug!(batch = stats.batches, sentences = batch.len(), words, "batch done");
    }

    if options.schedule == HyperSchedule::Epoch && stats.batches > 0 {
        model.sample_hyperparameters(rng);
    }
    info!(
        sentences = stats.sentences,
        batches = stats.batches,
        cancelled = stats.cancelled,
        "epoch done"
    );
    Ok(stats)
}
