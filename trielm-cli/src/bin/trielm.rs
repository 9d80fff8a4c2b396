//! Inspect and query binary trie language models.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trielm_engine::{ModelConfig, NgramTrieModel, QuantType, Settings, WordSequence};

/// trielm: binary trie language model tool
#[derive(Parser, Debug)]
#[command(name = "trielm")]
#[command(about = "Inspect and query binary trie n-gram language models", long_about = None)]
struct Cli {
    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file (TOML); the model path on the command line wins
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print header information: order, n-gram counts, quantization.
    Info {
        /// Binary language model
        model: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Score one word sequence (most recent word last).
    Query {
        /// Binary language model
        model: PathBuf,

        /// Words, oldest first
        #[arg(required = true)]
        words: Vec<String>,
    },

    /// Score every line of a text file with a sliding max-order window.
    Score {
        /// Binary language model
        model: PathBuf,

        /// Whitespace-tokenized text, one utterance per line
        text: PathBuf,

        /// Number of threads (default: all cores)
        #[arg(long)]
        threads: Option<usize>,
    },
}

#[derive(Debug, Serialize)]
struct ModelInfo {
    path: PathBuf,
    order: usize,
    max_depth: usize,
    counts: Vec<u32>,
    quantization: QuantType,
    trie_bytes: usize,
}

/// Score of one input line
#[derive(Debug)]
struct LineScore {
    words: usize,
    log_prob: f64,
}

fn model_config(cli: &Cli, model: &Path) -> Result<ModelConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            Settings::load_from(path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?
                .model
        }
        None => ModelConfig::default(),
    };
    config.model_path = model.to_path_buf();
    Ok(config)
}

fn load_model(cli: &Cli, model: &Path) -> Result<NgramTrieModel> {
    let config = model_config(cli, model)?;
    NgramTrieModel::load(&config)
        .with_context(|| format!("Failed to load language model from {}", model.display()))
}

fn run_info(cli: &Cli, path: &Path, json: bool) -> Result<()> {
    let model = load_model(cli, path)?;
    let info = ModelInfo {
        path: path.to_path_buf(),
        order: model.order(),
        max_depth: model.max_depth(),
        counts: model.counts().to_vec(),
        quantization: model.quant_type(),
        trie_bytes: model.trie_bytes(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Model:        {}", info.path.display());
    println!("Order:        {}", info.order);
    println!("Max depth:    {}", info.max_depth);
    for (i, count) in info.counts.iter().enumerate() {
        println!("{}-grams:      {}", i + 1, count);
    }
    println!("Quantization: {:?}", info.quantization);
    println!("Trie bytes:   {}", info.trie_bytes);
    Ok(())
}

fn run_query(cli: &Cli, path: &Path, words: &[String]) -> Result<()> {
    let model = load_model(cli, path)?;
    let sequence = model.word_sequence(words);
    let score = model.probability_of(&sequence)?;
    let lookup = model.lookup(&sequence)?;
    println!("{}\t{}\tdepth={}", words.join(" "), score, lookup.depth);
    model.on_utterance_end();
    Ok(())
}

/// Sum of the scores of every word of `words`, each conditioned on at most
/// `max_depth - 1` preceding words.
fn score_words(model: &NgramTrieModel, words: &[&str]) -> Result<f64> {
    let ids = model.word_sequence(words);
    let mut total = 0.0f64;
    for end in 1..=ids.len() {
        let window = WordSequence::new(&ids.ids()[..end]).suffix(model.max_depth());
        total += model.probability_of(&window)? as f64;
    }
    Ok(total)
}

fn run_score(cli: &Cli, path: &Path, text: &Path, threads: Option<usize>) -> Result<()> {
    if let Some(threads) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .ok(); // ignore error if already initialized
    }

    let model = load_model(cli, path)?;
    let content = std::fs::read_to_string(text)
        .with_context(|| format!("Failed to read {}", text.display()))?;
    let lines: Vec<&str> = content.lines().collect();

    eprintln!(
        "Scoring {} lines (threads={})...",
        lines.len(),
        rayon::current_num_threads()
    );

    let scores: Vec<LineScore> = lines
        .par_iter()
        .map(|line| -> Result<LineScore> {
            let words: Vec<&str> = line.split_whitespace().collect();
            let log_prob = score_words(&model, &words)?;
            Ok(LineScore {
                words: words.len(),
                log_prob,
            })
        })
        .collect::<Result<_>>()?;
    model.on_utterance_end();

    let mut total = 0.0f64;
    let mut total_words = 0usize;
    for (line, score) in lines.iter().zip(&scores) {
        println!("{:.4}\t{}", score.log_prob, line);
        total += score.log_prob;
        total_words += score.words;
    }

    let stats = model.cache_stats();
    println!("Total: {:.4} over {} words", total, total_words);
    eprintln!(
        "Cache: {} hits, {} misses ({} entries)",
        stats.hits, stats.misses, stats.len
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Default: info level, with --verbose: debug level
    let default_filter = if cli.verbose {
        "trielm=debug,trielm_engine=debug"
    } else {
        "trielm=info,trielm_engine=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match &cli.command {
        Commands::Info { model, json } => run_info(&cli, model, *json),
        Commands::Query { model, words } => run_query(&cli, model, words),
        Commands::Score {
            model,
            text,
            threads,
        } => run_score(&cli, model, text, *threads),
    }
}
