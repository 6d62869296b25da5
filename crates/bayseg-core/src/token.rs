use std::fmt;

use serde::{Deserialize, Serialize};

/// Dish and context key for every restaurant in the engine.
///
/// Sentence and word markers are their own variants so they never collide
/// with text, whatever characters the corpus contains.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Token {
    /// Beginning of sentence.
    Bos,
    /// End of sentence.
    Eos,
    /// Beginning of word (character model context).
    Bow,
    /// End of word (character model outcome).
    Eow,
    Char(char),
    Word(String),
    Tag(u16),
}

impl Token {
    pub fn word(s: &str) -> Self {
        Token::Word(s.to_string())
    }

    pub fn tag(state: usize) -> Self {
        Token::Tag(state as u16)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Bos => f.write_str("<BOS>"),
            Token::Eos => f.write_str("<EOS>"),
            Token::Bow => f.write_str("<BOW>"),
            Token::Eow => f.write_str("<EOW>"),
            Token::Char(c) => write!(f, "{c}"),
            Token::Word(w) => f.write_str(w),
            Token::Tag(t) => write!(f, "<T{t}>"),
        }
    }
}
