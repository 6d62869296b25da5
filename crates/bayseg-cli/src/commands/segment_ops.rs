use std::path::Path;

use serde::Serialize;

use bayseg_core::{persistence, Corpus, CorpusOptions, ModelKind, Result, ResultSet};

/// One decoded input line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segmented {
    pub text: String,
    pub words: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<usize>>,
}

impl Segmented {
    /// `word/tag` pairs for tagged models, plain words otherwise.
    pub fn to_line(&self) -> String {
        match &self.tags {
            Some(tags) => self
                .words
                .iter()
                .zip(tags)
                .map(|(w, t)| format!("{w}/{t}"))
                .collect::<Vec<_>>()
                .join(" "),
            None => self.words.join(" "),
        }
    }
}

fn collect(texts: &[&str], results: &ResultSet) -> Vec<Segmented> {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| Segmented {
            text: text.to_string(),
            words: results
                .word_sequence(i)
                .unwrap_or_default()
                .into_iter()
                .map(String::from)
                .collect(),
            tags: results.tag_sequence(i),
        })
        .collect()
}

/// Decode every line of `input` with a saved model: Viterbi by default, one
/// posterior sample per line when `sample_seed` is set.
pub fn segment_file(
    kind: ModelKind,
    model_file: &Path,
    input: &Path,
    threads: usize,
    sample_seed: Option<u64>,
    corpus_options: &CorpusOptions,
) -> Result<Vec<Segmented>> {
    let model = persistence::load(kind, model_file)?;
    let options = CorpusOptions {
        max_sentence_length: model.config().max_sentence_length,
        ..corpus_options.clone()
    };
    let corpus = Corpus::from_file(input, &options)?;
    let texts = corpus.texts();
    let results = match sample_seed {
        Some(seed) => model.sample_word_segmentation(&texts, threads, seed)?,
        None => model.test_word_segmentation(&texts, threads)?,
    };
    Ok(collect(&texts, &results))
}

pub fn segment_cmd(
    kind: ModelKind,
    model_file: &Path,
    input: &Path,
    threads: usize,
    sample_seed: Option<u64>,
    json: bool,
) {
    let lines = die!(
        segment_file(
            kind,
            model_file,
            input,
            threads,
            sample_seed,
            &CorpusOptions::default()
        ),
        "Error: {}"
    );
    for line in &lines {
        if json {
            println!("{}", die!(serde_json::to_string(line), "Error: {}"));
        } else {
            println!("{}", line.to_line());
        }
    }
}
