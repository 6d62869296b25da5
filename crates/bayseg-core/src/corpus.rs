//! In-memory sentence container: raw text plus the current segmentation.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Result, SegError};
use crate::settings::settings;

/// One word of a segmentation, in character positions `[start, end)`.
///
/// `state` is the hidden tag for joint tagging models and 0 otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub state: usize,
}

impl Span {
    pub fn new(start: usize, end: usize, state: usize) -> Self {
        Self { start, end, state }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    text: String,
    /// Byte offset of every character, plus `text.len()` at the end.
    offsets: Vec<usize>,
    segmentation: Vec<Span>,
}

impl Sentence {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        offsets.push(text.len());
        Self {
            text,
            offsets,
            segmentation: Vec::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Substring for character positions `[start, end)`.
    pub fn slice(&self, start: usize, end: usize) -> &str {
        &self.text[self.offsets[start]..self.offsets[end]]
    }

    pub fn segmentation(&self) -> &[Span] {
        &self.segmentation
    }

    pub fn is_segmented(&self) -> bool {
        !self.segmentation.is_empty()
    }

    pub fn words(&self) -> Vec<&str> {
        self.segmentation
            .iter()
            .map(|s| self.slice(s.start, s.end))
            .collect()
    }

    pub fn tags(&self) -> Vec<usize> {
        self.segmentation.iter().map(|s| s.state).collect()
    }

    /// Install a segmentation after checking that it tiles the sentence.
    pub(crate) fn set_segmentation(&mut self, spans: Vec<Span>) -> Result<()> {
        check_tiling(self.len(), &spans)?;
        self.segmentation = spans;
        Ok(())
    }

    pub(crate) fn take_segmentation(&mut self) -> Vec<Span> {
        std::mem::take(&mut self.segmentation)
    }
}

/// Spans must be non-empty, contiguous and cover `[0, len)` exactly.
pub(crate) fn check_tiling(len: usize, spans: &[Span]) -> Result<()> {
    let mut pos = 0;
    for span in spans {
        if span.start != pos || span.end <= span.start || span.end > len {
            return Err(SegError::Consistency(format!(
                "segmentation {spans:?} does not tile a sentence of length {len}"
            )));
        }
        pos = span.end;
    }
    if pos != len {
        return Err(SegError::Consistency(format!(
            "segmentation covers {pos} of {len} characters"
        )));
    }
    Ok(())
}

/// How raw lines become sentences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusOptions {
    pub lowercase: bool,
    /// Longer lines are skipped with a warning.
    pub max_sentence_length: usize,
}

impl Default for CorpusOptions {
    fn default() -> Self {
        let s = settings();
        Self {
            lowercase: s.corpus.lowercase,
            max_sentence_length: s.model.max_sentence_length,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Corpus {
    sentences: Vec<Sentence>,
}

impl Corpus {
    /// One sentence per line; empty lines are skipped.
    pub fn from_lines<I, S>(lines: I, options: &CorpusOptions) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut sentences = Vec::new();
        for (lineno, line) in lines.into_iter().enumerate() {
            let line = line.as_ref().trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                continue;
            }
            let text = if options.lowercase {
                line.to_lowercase()
            } else {
                line.to_string()
            };
            let sentence = Sentence::new(text);
            if sentence.len() > options.max_sentence_length {
                warn!(
                    line = lineno + 1,
                    chars = sentence.len(),
                    max = options.max_sentence_length,
                    "skipping over-long sentence"
                );
                continue;
            }
            sentences.push(sentence);
        }
        debug!(sentences = sentences.len(), "corpus loaded");
        Self { sentences }
    }

    pub fn from_file(path: &Path, options: &CorpusOptions) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let corpus = Self::from_lines(content.lines(), options);
        if corpus.is_empty() {
            return Err(SegError::Input(format!(
                "{} contains no usable sentences",
                path.display()
            )));
        }
        Ok(corpus)
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    pub fn sentences(&self) -> &[Sentence] {
        &self.sentences
    }

    pub fn get(&self, i: usize) -> Option<&Sentence> {
        self.sentences.get(i)
    }

    pub(crate) fn sentences_mut(&mut self) -> &mut [Sentence] {
        &mut self.sentences
    }

    /// Raw texts, e.g. to feed back into inference.
    pub fn texts(&self) -> Vec<&str> {
        self.sentences.iter().map(Sentence::text).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> CorpusOptions {
        CorpusOptions {
            lowercase: true,
            max_sentence_length: 8,
        }
    }

    #[test]
    fn test_multibyte_slicing() {
        let s = Sentence::new("きょうは");
        assert_eq!(s.len(), 4);
        assert_eq!(s.slice(0, 3), "きょう");
        assert_eq!(s.slice(3, 4), "は");
    }

    #[test]
    fn test_from_lines_skips_empty_and_long() {
        let corpus = Corpus::from_lines(["AbC", "", "abcdefghijk", "xy\r"], &opts());
        assert_eq!(corpus.texts(), vec!["abc", "xy"]);
    }

    #[test]
    fn test_lowercase_disabled() {
        let options = CorpusOptions {
            lowercase: false,
            ..opts()
        };
        let corpus = Corpus::from_lines(["AbC"], &options);
        assert_eq!(corpus.texts(), vec!["AbC"]);
    }

    #[test]
    fn test_segmentation_must_tile() {
        let mut s = Sentence::new("abcd");
        assert!(s
            .set_segmentation(vec![Span::new(0, 2, 0), Span::new(2, 4, 1)])
            .is_ok());
        assert_eq!(s.words(), vec!["ab", "cd"]);
        assert_eq!(s.tags(), vec![0, 1]);
        assert!(s.set_segmentation(vec![Span::new(0, 2, 0)]).is_err());
        assert!(s
            .set_segmentation(vec![Span::new(0, 2, 0), Span::new(1, 4, 0)])
            .is_err());
        assert!(s
            .set_segmentation(vec![Span::new(0, 0, 0), Span::new(0, 4, 0)])
            .is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.txt");
        std::fs::write(&path, "Hello\n\nworld\n").unwrap();
        let corpus = Corpus::from_file(&path, &opts()).unwrap();
        assert_eq!(corpus.texts(), vec!["hello", "world"]);

        let empty = dir.path().join("empty.txt");
        std::fs::write(&empty, "\n\n").unwrap();
        assert!(matches!(
            Corpus::from_file(&empty, &opts()),
            Err(SegError::Input(_))
        ));
    }
}
