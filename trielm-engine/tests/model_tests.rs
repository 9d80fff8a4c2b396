//! Integration tests for loading and querying binary trie language models

use std::sync::Arc;

use tempfile::{NamedTempFile, tempdir};
use trielm_engine::{
    LoadError, LogMath, ModelConfig, NgramTrieModel, QuantType, QueryError, TrieModelWriter,
};

// ============================================================================
// Helper functions
// ============================================================================

const UNIGRAMS: [(&str, f32, f32); 5] = [
    ("a", -1.0, -0.5),
    ("b", -1.2, -0.4),
    ("c", -1.4, -0.3),
    ("d", -2.0, -0.2),
    ("e", -2.5, 0.0),
];

/// Trigram model: bigrams "a b", "a c", "b c", "b e" and trigram "a b c".
fn trigram_writer() -> TrieModelWriter {
    let mut w = TrieModelWriter::new(3);
    for (word, prob, backoff) in UNIGRAMS {
        w.add_unigram(word, prob, backoff);
    }
    w.add_ngram(&["a", "b"], -0.6, -0.25);
    w.add_ngram(&["a", "c"], -0.9, -0.1);
    w.add_ngram(&["b", "c"], -0.7, -0.15);
    w.add_ngram(&["b", "e"], -0.8, -0.05);
    w.add_ngram(&["a", "b", "c"], -0.2, 0.0);
    w
}

/// Order-4 model: bigrams "a b", "b c", "c d", trigrams "a b c", "b c d"
/// and no 4-grams.
fn fourgram_model() -> NgramTrieModel {
    let mut w = TrieModelWriter::new(4);
    for (word, prob, backoff) in &UNIGRAMS[..4] {
        w.add_unigram(word, *prob, *backoff);
    }
    w.add_ngram(&["a", "b"], -0.6, -0.25);
    w.add_ngram(&["b", "c"], -0.7, -0.15);
    w.add_ngram(&["c", "d"], -0.8, -0.1);
    w.add_ngram(&["a", "b", "c"], -0.3, -0.12);
    w.add_ngram(&["b", "c", "d"], -0.32, -0.05);
    let bytes = w.to_bytes(QuantType::None).unwrap();
    load(&bytes, &ModelConfig::default())
}

fn load(bytes: &[u8], config: &ModelConfig) -> NgramTrieModel {
    NgramTrieModel::from_reader(bytes, config).unwrap()
}

fn trigram_model(quant: QuantType) -> NgramTrieModel {
    let bytes = trigram_writer().to_bytes(quant).unwrap();
    load(&bytes, &ModelConfig::default())
}

fn assert_close(actual: f32, expected: f32) {
    assert!(
        (actual - expected).abs() < 1e-5,
        "expected {expected}, got {actual}"
    );
}

fn load_err(bytes: &[u8]) -> LoadError {
    match NgramTrieModel::from_reader(bytes, &ModelConfig::default()) {
        Ok(_) => panic!("expected a load error"),
        Err(e) => e,
    }
}

// ============================================================================
// Scoring
// ============================================================================

mod scoring_tests {
    use super::*;

    #[test]
    fn test_unigrams_are_exact() {
        let model = trigram_model(QuantType::None);
        for (word, prob, _) in UNIGRAMS {
            assert_eq!(model.probability(&[word]).unwrap(), prob);
        }
    }

    #[test]
    fn test_exact_trigram_hit() {
        let model = trigram_model(QuantType::None);
        assert_eq!(model.probability(&["a", "b", "c"]).unwrap(), -0.2);
        let lookup = model.lookup(&model.word_sequence(&["a", "b", "c"])).unwrap();
        assert_eq!(lookup.depth, 3);
    }

    #[test]
    fn test_exact_bigram_hit() {
        let model = trigram_model(QuantType::None);
        assert_eq!(model.probability(&["b", "c"]).unwrap(), -0.7);
        assert_eq!(model.probability(&["a", "c"]).unwrap(), -0.9);
    }

    #[test]
    fn test_backoff_from_bigram_context() {
        let model = trigram_model(QuantType::None);
        // "a b e" is missing; "b e" matched, backoff of "a b" added
        assert_close(model.probability(&["a", "b", "e"]).unwrap(), -0.8 - 0.25);
        let lookup = model.lookup(&model.word_sequence(&["a", "b", "e"])).unwrap();
        assert_eq!(lookup.depth, 2);
    }

    #[test]
    fn test_backoff_to_unigram() {
        let model = trigram_model(QuantType::None);
        // Only the unigram "d" matches: backoffs of "b" and "a b" both apply
        assert_close(model.probability(&["a", "b", "d"]).unwrap(), -2.0 - 0.4 - 0.25);
        assert_close(model.probability(&["c", "d"]).unwrap(), -2.0 - 0.3);
        assert_close(model.probability(&["d", "c"]).unwrap(), -1.4 - 0.2);
    }

    #[test]
    fn test_unseen_context_contributes_nothing() {
        let model = trigram_model(QuantType::None);
        // "d b" is not a context in the model
        assert_eq!(model.probability(&["d", "b", "c"]).unwrap(), -0.7);
        let lookup = model.lookup(&model.word_sequence(&["d", "b", "c"])).unwrap();
        assert_eq!(lookup.depth, 2);
    }

    #[test]
    fn test_trigram_match_skips_shorter_context_backoffs() {
        let model = fourgram_model();
        assert_eq!(model.counts(), &[4, 3, 2, 0]);
        // "b c d" matched: only the backoff of "a b c" applies, not "b c"
        assert_close(model.probability(&["a", "b", "c", "d"]).unwrap(), -0.32 - 0.12);
        let lookup = model.lookup(&model.word_sequence(&["a", "b", "c", "d"])).unwrap();
        assert_eq!(lookup.depth, 3);
    }

    #[test]
    fn test_unigram_match_sums_every_context_backoff() {
        let model = fourgram_model();
        // Nothing ends in "a": backoffs of "c", "b c" and "a b c" all apply
        assert_close(
            model.probability(&["a", "b", "c", "a"]).unwrap(),
            -1.0 - 0.3 - 0.15 - 0.12,
        );
    }

    #[test]
    fn test_unseen_trigram_context_stops_backoff_walk() {
        let model = fourgram_model();
        // "a b c" matched; the context "d a b" is not in the model
        assert_eq!(model.probability(&["d", "a", "b", "c"]).unwrap(), -0.3);
        let lookup = model.lookup(&model.word_sequence(&["d", "a", "b", "c"])).unwrap();
        assert_eq!(lookup.depth, 3);
    }

    #[test]
    fn test_unknown_predicted_word() {
        let model = trigram_model(QuantType::None);
        assert_eq!(
            model.probability(&["a", "b", "zzz"]).unwrap(),
            LogMath::LOG_ZERO
        );
        let lookup = model.lookup(&model.word_sequence(&["zzz"])).unwrap();
        assert_eq!(lookup.depth, 0);
    }

    #[test]
    fn test_query_errors() {
        let model = trigram_model(QuantType::None);
        assert_eq!(
            model.probability(&["a", "b", "c", "d"]),
            Err(QueryError::OrderTooHigh {
                requested: 4,
                max_depth: 3
            })
        );
        let empty: Vec<String> = Vec::new();
        assert_eq!(model.probability(&empty), Err(QueryError::EmptySequence));
    }

    #[test]
    fn test_quant16_matches_unquantized() {
        // Few distinct weights per order, so every value is a table entry
        let plain = trigram_model(QuantType::None);
        let quant = trigram_model(QuantType::Quant16);
        assert_eq!(quant.quant_type(), QuantType::Quant16);

        let queries: [&[&str]; 8] = [
            &["a"],
            &["b", "c"],
            &["a", "b", "c"],
            &["a", "b", "e"],
            &["a", "b", "d"],
            &["d", "b", "c"],
            &["c", "d"],
            &["e", "a", "c"],
        ];
        for query in queries {
            assert_eq!(
                quant.probability(query).unwrap(),
                plain.probability(query).unwrap(),
                "query {query:?}"
            );
        }
    }

    #[test]
    fn test_max_depth_limits_queries() {
        let bytes = trigram_writer().to_bytes(QuantType::None).unwrap();
        let config = ModelConfig {
            max_depth: Some(2),
            ..ModelConfig::default()
        };
        let model = load(&bytes, &config);
        assert_eq!(model.order(), 3);
        assert_eq!(model.probability(&["b", "c"]).unwrap(), -0.7);
        assert!(model.probability(&["a", "b", "c"]).is_err());
    }
}

// ============================================================================
// Cache and utterance lifecycle
// ============================================================================

mod cache_tests {
    use super::*;

    #[test]
    fn test_second_max_order_query_hits_cache() {
        let model = trigram_model(QuantType::None);
        let first = model.probability(&["a", "b", "c"]).unwrap();
        let second = model.probability(&["a", "b", "c"]).unwrap();
        assert_eq!(first, second);

        let stats = model.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.len, 1);
    }

    #[test]
    fn test_shorter_queries_bypass_cache() {
        let model = trigram_model(QuantType::None);
        model.probability(&["b", "c"]).unwrap();
        model.probability(&["c"]).unwrap();
        let stats = model.cache_stats();
        assert_eq!((stats.hits, stats.misses, stats.len), (0, 0, 0));
    }

    #[test]
    fn test_clear_cache_after_utterance() {
        let bytes = trigram_writer().to_bytes(QuantType::None).unwrap();
        let config = ModelConfig {
            clear_cache_after_utterance: true,
            ..ModelConfig::default()
        };
        let model = load(&bytes, &config);
        model.probability(&["a", "b", "c"]).unwrap();
        assert_eq!(model.cache_stats().len, 1);
        model.on_utterance_end();
        assert_eq!(model.cache_stats().len, 0);
    }

    #[test]
    fn test_cache_kept_across_utterances_by_default() {
        let model = trigram_model(QuantType::None);
        model.probability(&["a", "b", "c"]).unwrap();
        model.on_utterance_end();
        model.probability(&["a", "b", "c"]).unwrap();
        assert_eq!(model.cache_stats().hits, 1);
    }

    #[test]
    fn test_query_log() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("queries.log");
        let bytes = trigram_writer().to_bytes(QuantType::None).unwrap();
        let config = ModelConfig {
            query_log: Some(log_path.clone()),
            ..ModelConfig::default()
        };
        let model = load(&bytes, &config);
        model.probability(&["a", "b", "c"]).unwrap();
        model.probability(&["b", "c"]).unwrap();
        model.on_utterance_end();

        let log = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(log, "a b c : -0.2\nb c : -0.7\n<END_UTT>\n");
    }

    #[test]
    fn test_concurrent_queries() {
        let model = Arc::new(trigram_model(QuantType::None));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let model = Arc::clone(&model);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        assert_eq!(model.probability(&["a", "b", "c"]).unwrap(), -0.2);
                        assert_eq!(model.probability(&["d", "b", "c"]).unwrap(), -0.7);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let stats = model.cache_stats();
        assert_eq!(stats.hits + stats.misses, 800);
        assert_eq!(stats.len, 2);
    }
}

// ============================================================================
// Loading
// ============================================================================

mod loading_tests {
    use super::*;

    #[test]
    fn test_load_from_file() {
        let file = NamedTempFile::new().unwrap();
        trigram_writer()
            .save(file.path(), QuantType::Quant16)
            .unwrap();

        let model = NgramTrieModel::load(&ModelConfig::for_model(file.path())).unwrap();
        assert_eq!(model.order(), 3);
        assert_eq!(model.counts(), &[5, 4, 1]);
        assert_eq!(
            model.vocabulary().collect::<Vec<_>>(),
            vec!["a", "b", "c", "d", "e"]
        );
        assert_eq!(model.probability(&["a", "b", "c"]).unwrap(), -0.2);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let config = ModelConfig::for_model(dir.path().join("missing.bin"));
        assert!(matches!(
            NgramTrieModel::load(&config),
            Err(LoadError::Io(_))
        ));
    }

    #[test]
    fn test_malformed_header() {
        let err = load_err(b"Not a Language Model at all");
        assert!(matches!(err, LoadError::BadHeader { .. }));
    }

    #[test]
    fn test_oversized_vocabulary_count() {
        let mut bytes = b"Trie Language Model".to_vec();
        bytes.push(1);
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 24]);
        assert!(matches!(load_err(&bytes), LoadError::VocabularyTooLarge(_)));
    }

    #[test]
    fn test_unknown_quant_type() {
        let mut bytes = trigram_writer().to_bytes(QuantType::None).unwrap();
        // magic (19) + order (1) + 3 counts (12)
        bytes[32..36].copy_from_slice(&7u32.to_le_bytes());
        assert!(matches!(load_err(&bytes), LoadError::UnknownQuantType(7)));
    }

    #[test]
    fn test_vocabulary_count_mismatch() {
        let mut w = TrieModelWriter::new(1);
        w.add_unigram("a", -1.0, 0.0);
        w.add_unigram("b", -1.0, 0.0);
        let mut bytes = w.to_bytes(QuantType::None).unwrap();

        // Replace the words block "a\0b\0" with "a\0"
        bytes.truncate(bytes.len() - 8);
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(b"a\0");
        assert!(matches!(
            load_err(&bytes),
            LoadError::VocabularyMismatch {
                expected: 2,
                found: 1
            }
        ));
    }

    #[test]
    fn test_truncated_trie() {
        let bytes = trigram_writer().to_bytes(QuantType::None).unwrap();
        let err = load_err(&bytes[..bytes.len() / 2]);
        assert!(matches!(err, LoadError::Io(_)));
    }

    #[test]
    fn test_unigram_only_model() {
        let mut w = TrieModelWriter::new(1);
        w.add_unigram("<s>", -99.0, -0.5);
        w.add_unigram("hello", -1.5, 0.0);
        let bytes = w.to_bytes(QuantType::Quant16).unwrap();
        let model = load(&bytes, &ModelConfig::default());
        assert_eq!(model.order(), 1);
        assert_eq!(model.quant_type(), QuantType::None);
        assert_eq!(model.trie_bytes(), 0);
        assert_eq!(model.probability(&["hello"]).unwrap(), -1.5);
    }
}
