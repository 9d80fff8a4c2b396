//! Error types for loading and querying trie language models

/// Errors that abort loading a binary language model.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("bad binary LM file header: {found:?}")]
    BadHeader { found: String },

    #[error("unknown quantization type: {0}")]
    UnknownQuantType(u32),

    #[error("vocabulary holds {found} words, expected {expected}")]
    VocabularyMismatch { expected: usize, found: usize },

    #[error("vocabulary is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("order {order} has {count} n-grams (max {max})")]
    TooManyNgrams { order: usize, count: u64, max: u64 },

    #[error("vocabulary of {0} words needs word ids wider than 25 bits")]
    VocabularyTooLarge(u64),

    #[error("requested max depth {requested} but the model has order {order}")]
    InvalidMaxDepth { requested: usize, order: usize },

    #[error("invalid language model format: {0}")]
    Format(String),
}

/// Contract violations raised by probability queries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("unsupported n-gram of order {requested} (model max depth is {max_depth})")]
    OrderTooHigh { requested: usize, max_depth: usize },

    #[error("cannot score an empty word sequence")]
    EmptySequence,
}

/// Errors raised while writing a binary language model.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("word {0:?} is not in the vocabulary")]
    UnknownWord(String),

    #[error("n-gram {0:?} has no lower-order entry for its context")]
    MissingSuffix(Vec<String>),

    #[error("n-gram {0:?} does not match any declared order")]
    BadOrder(Vec<String>),

    #[error("vocabulary word {0:?} contains a NUL byte")]
    NulInWord(String),

    #[error("invalid model: {0}")]
    Invalid(String),
}
