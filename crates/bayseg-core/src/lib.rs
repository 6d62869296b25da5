//! Unsupervised word segmentation and joint part-of-speech tagging with
//! nested Pitman-Yor language models.

pub mod char_model;
pub mod config;
pub mod corpus;
pub mod error;
pub mod hpylm;
pub mod hyper;
pub(crate) mod lattice;
pub mod model;
pub mod npylm;
pub mod persistence;
pub mod pyhsmm;
pub mod restaurant;
pub mod settings;
pub mod token;
pub(crate) mod trainer;

pub use config::{CancelFlag, HyperSchedule, ModelConfig, ModelKind, TrainOptions};
pub use corpus::{Corpus, CorpusOptions, Sentence, Span};
pub use error::{Result, SegError};
pub use model::{Model, ParameterReport, ResultSet, TestScore};
pub use persistence::{load, save, SaveFormat};
pub use token::Token;
pub use trainer::EpochStats;
