//! Word resolution interface consumed by the model.

use std::collections::{HashMap, HashSet};

/// A word known to the pronunciation dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Word {
    pub spelling: String,
}

impl Word {
    pub fn new(spelling: impl Into<String>) -> Self {
        Self {
            spelling: spelling.into(),
        }
    }
}

/// Resolves spellings to dictionary words.
pub trait Lexicon {
    fn get_word(&self, spelling: &str) -> Option<Word>;
}

impl Lexicon for HashSet<String> {
    fn get_word(&self, spelling: &str) -> Option<Word> {
        self.get(spelling).map(|s| Word::new(s.as_str()))
    }
}

impl Lexicon for HashMap<String, Word> {
    fn get_word(&self, spelling: &str) -> Option<Word> {
        self.get(spelling).cloned()
    }
}
