use std::sync::Arc;

/// Integer id of a vocabulary word.
pub type WordId = u32;

/// Id given to words the model does not know. It never matches a record.
pub const UNKNOWN_WORD_ID: WordId = WordId::MAX;

/// An immutable sequence of resolved word ids, most recent word last.
///
/// Cheap to clone; equality and hashing are by value, so it doubles as the
/// probability cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WordSequence {
    ids: Arc<[WordId]>,
}

impl WordSequence {
    pub fn new(ids: impl Into<Arc<[WordId]>>) -> Self {
        Self { ids: ids.into() }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[WordId] {
        &self.ids
    }

    /// The trailing `n` words (all of them when shorter).
    pub fn suffix(&self, n: usize) -> WordSequence {
        let start = self.ids.len().saturating_sub(n);
        WordSequence::new(&self.ids[start..])
    }
}

impl From<Vec<WordId>> for WordSequence {
    fn from(ids: Vec<WordId>) -> Self {
        Self::new(ids)
    }
}
