use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use bayseg_cli::commands::{config_ops, segment_ops, train_ops};
use bayseg_cli::trace_init::init_tracing;
use bayseg_core::settings::settings;
use bayseg_core::{
    CorpusOptions, HyperSchedule, ModelConfig, ModelKind, SaveFormat, TrainOptions,
};

#[derive(Parser)]
#[command(name = "bayseg", about = "Unsupervised word segmentation with NPYLM / PYHSMM")]
struct Cli {
    /// Custom settings TOML replacing the built-in defaults
    #[arg(long, global = true)]
    settings: Option<String>,
    /// Emit log lines as JSON
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Command,
}

/// Hyperparameter overrides; anything unset comes from the settings file.
#[derive(Args, Debug, Default)]
struct ModelArgs {
    #[arg(long)]
    theta: Option<f64>,
    #[arg(long)]
    d: Option<f64>,
    #[arg(long)]
    gamma_a: Option<f64>,
    #[arg(long)]
    gamma_b: Option<f64>,
    #[arg(long)]
    beta_a: Option<f64>,
    #[arg(long)]
    beta_b: Option<f64>,
    /// Beta prior on the character model's stop probability
    #[arg(long)]
    alpha: Option<f64>,
    #[arg(long)]
    beta: Option<f64>,
    #[arg(long)]
    max_word_length: Option<usize>,
    /// Number of hidden tags (pyhsmm only)
    #[arg(long)]
    pos_size: Option<usize>,
    #[arg(long)]
    vocab_size: Option<u64>,
    #[arg(long)]
    max_sentence_length: Option<usize>,
    /// Seed for reproducible training
    #[arg(long)]
    seed: Option<u64>,
}

impl ModelArgs {
    fn into_config(self) -> ModelConfig {
        let args = self;
        let mut c = ModelConfig::default();
        macro_rules! apply {
            ($($field:ident),*) => {
                $(if let Some(v) = args.$field {
                    c.$field = v;
                })*
            };
        }
        apply!(
            theta,
            d,
            gamma_a,
            gamma_b,
            beta_a,
            beta_b,
            alpha,
            beta,
            max_word_length,
            pos_size,
            vocab_size,
            max_sentence_length
        );
        if args.seed.is_some() {
            c.seed = args.seed;
        }
        c
    }
}

#[derive(Subcommand)]
enum Command {
    /// Train a model on unsegmented text, one sentence per line
    Train {
        /// Model kind: npylm or pyhsmm
        #[arg(long)]
        kind: ModelKind,
        /// Training corpus
        corpus: PathBuf,
        /// Sentences to decode after every epoch (default: the training corpus)
        #[arg(long)]
        test: Option<PathBuf>,
        /// Where to save the trained model
        #[arg(long)]
        save: Option<PathBuf>,
        /// Save format: indent or notindent
        #[arg(long, default_value = "notindent")]
        format: SaveFormat,
        #[arg(long)]
        epochs: Option<usize>,
        #[arg(long)]
        threads: Option<usize>,
        #[arg(long)]
        batch_size: Option<usize>,
        /// Resample hyperparameters after every batch or once per epoch
        #[arg(long, value_parser = ["batch", "epoch"])]
        schedule: Option<String>,
        /// Keep the input's case
        #[arg(long)]
        keep_case: bool,
        /// Output as JSON lines instead of text
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        model: ModelArgs,
    },

    /// Segment text with a saved model
    Segment {
        #[arg(long)]
        kind: ModelKind,
        /// Saved model file
        #[arg(long)]
        model: PathBuf,
        /// Input file, one sentence per line
        input: PathBuf,
        #[arg(long)]
        threads: Option<usize>,
        /// Draw one posterior sample per line with this seed instead of Viterbi
        #[arg(long)]
        sample: Option<u64>,
        #[arg(long)]
        json: bool,
    },

    /// Show the hyperparameters of a saved model
    Report {
        #[arg(long)]
        kind: ModelKind,
        /// Saved model file
        model: PathBuf,
        #[arg(long)]
        json: bool,
    },

    /// Export the default settings TOML to stdout
    SettingsExport,

    /// Validate a settings TOML file
    SettingsValidate {
        /// Path to the settings TOML file
        file: String,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    if let Some(file) = &cli.settings {
        config_ops::settings_load(file);
    }

    match cli.command {
        Command::Train {
            kind,
            corpus,
            test,
            save,
            format,
            epochs,
            threads,
            batch_size,
            schedule,
            keep_case,
            json,
            model,
        } => {
            let training = &settings().training;
            let options = TrainOptions {
                threads: threads.unwrap_or(training.threads),
                batch_size: batch_size.unwrap_or(training.batch_size),
                schedule: match schedule.as_deref() {
                    Some("epoch") => HyperSchedule::Epoch,
                    Some(_) => HyperSchedule::Batch,
                    None => training.schedule,
                },
                cancel: None,
            };
            let corpus_options = CorpusOptions {
                lowercase: !keep_case && settings().corpus.lowercase,
                ..CorpusOptions::default()
            };
            let job = train_ops::TrainJob {
                kind,
                config: model.into_config(),
                corpus,
                test,
                epochs: epochs.unwrap_or(training.epochs),
                options,
                corpus_options,
                save: save.map(|path| (path, format)),
            };
            train_ops::train_cmd(job, json);
        }
        Command::Segment {
            kind,
            model,
            input,
            threads,
            sample,
            json,
        } => {
            let threads = threads.unwrap_or(settings().training.threads);
            segment_ops::segment_cmd(kind, &model, &input, threads, sample, json);
        }
        Command::Report { kind, model, json } => train_ops::report_cmd(kind, &model, json),
        Command::SettingsExport => config_ops::settings_export(),
        Command::SettingsValidate { file } => config_ops::settings_validate(&file),
    }
}
