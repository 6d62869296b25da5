use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use bayseg_core::{
    persistence, Corpus, CorpusOptions, Model, ModelConfig, ModelKind, ParameterReport, Result,
    SaveFormat, TestScore, TrainOptions,
};

/// Everything one `train` run needs.
#[derive(Debug, Clone)]
pub struct TrainJob {
    pub kind: ModelKind,
    pub config: ModelConfig,
    pub corpus: PathBuf,
    /// Sentences decoded after every epoch; the training corpus when `None`.
    pub test: Option<PathBuf>,
    pub epochs: usize,
    pub options: TrainOptions,
    pub corpus_options: CorpusOptions,
    pub save: Option<(PathBuf, SaveFormat)>,
}

/// What one epoch produced, printed as it completes.
#[derive(Debug, Serialize)]
pub struct EpochReport {
    pub epoch: usize,
    pub sentences: usize,
    pub cancelled: bool,
    pub segmentations: Vec<Vec<String>>,
    pub score: TestScore,
    pub parameters: ParameterReport,
}

/// Initialize, train for `job.epochs` epochs, decode the test sentences after
/// each one, then save. Returns the trained model.
pub fn run_training<F>(job: &TrainJob, mut on_epoch: F) -> Result<Model>
where
    F: FnMut(&EpochReport),
{
    let corpus_options = CorpusOptions {
        max_sentence_length: job.config.max_sentence_length,
        ..job.corpus_options.clone()
    };
    let mut corpus = Corpus::from_file(&job.corpus, &corpus_options)?;
    let test = match &job.test {
        Some(path) => Corpus::from_file(path, &corpus_options)?,
        None => corpus.clone(),
    };

    let mut model = Model::new(job.kind, job.config.clone())?;
    model.initialize(&mut corpus)?;
    info!(
        kind = %job.kind,
        sentences = corpus.len(),
        test = test.len(),
        epochs = job.epochs,
        "training started"
    );

    let texts = test.texts();
    for epoch in 0..job.epochs {
        let stats = model.train(&mut corpus, &job.options)?;
        let results = model.test_word_segmentation(&texts, job.options.threads)?;
        let segmentations: Vec<Vec<String>> = (0..results.len())
            .filter_map(|i| results.word_sequence(i))
            .map(|words| words.into_iter().map(String::from).collect())
            .collect();
        let report = EpochReport {
            epoch,
            sentences: stats.sentences,
            cancelled: stats.cancelled,
            segmentations,
            score: model.test_score(&results)?,
            parameters: model.report(),
        };
        on_epoch(&report);
        if stats.cancelled {
            break;
        }
    }

    if let Some((path, format)) = &job.save {
        persistence::save(&model, path, *format)?;
    }
    Ok(model)
}

fn print_epoch(report: &EpochReport, json: bool) {
    if json {
        println!("{}", die!(serde_json::to_string(report), "Error: {}"));
        return;
    }
    for words in &report.segmentations {
        println!("{} test {}", report.epoch, words.join(" "));
    }
    println!(
        "score/word = {:.4}\tscore/sentence = {:.4}",
        report.score.per_word, report.score.per_sentence
    );
    println!("{}", report.parameters);
}

pub fn train_cmd(job: TrainJob, json: bool) {
    die!(
        run_training(&job, |report| print_epoch(report, json)),
        "Error: {}"
    );
    if let Some((path, format)) = &job.save {
        eprintln!("Saved {} model to {} ({format})", job.kind, path.display());
    }
}

/// Print the hyperparameters stored in a saved model.
pub fn report_cmd(kind: ModelKind, model_file: &Path, json: bool) {
    let model = die!(persistence::load(kind, model_file), "Error loading model: {}");
    let report = model.report();
    if json {
        println!("{}", die!(serde_json::to_string_pretty(&report), "Error: {}"));
    } else {
        println!("{report}");
    }
}
