//! seqtag command-line tool
//!
//! Trains a tagger from CoNLL files, scores a saved model and tags raw text.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use seqtag::{
    EmbeddingInit, EmbeddingTable, ModelConfig, Sequence, SequenceConfig, TrainingConfig,
    load_conll,
};
use tracing::info;

/// CLI arguments
#[derive(Parser)]
#[command(name = "seqtag")]
#[command(about = "Train and run BiLSTM-CRF sequence taggers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model and save it to a directory
    Train {
        /// Training data (CoNLL)
        #[arg(long)]
        train: PathBuf,

        /// Validation data (CoNLL)
        #[arg(long)]
        valid: Option<PathBuf>,

        /// Pretrained vectors in GloVe text format
        #[arg(long)]
        embeddings: Option<PathBuf>,

        /// Output model directory
        #[arg(short, long)]
        out: PathBuf,

        /// Checkpoint directory
        #[arg(long, env = "SEQTAG_LOG_DIR")]
        log_dir: Option<PathBuf>,

        #[arg(long, default_value_t = 15)]
        epochs: usize,

        #[arg(long, default_value_t = 20)]
        batch_size: usize,

        #[arg(long, default_value_t = 0.001)]
        learning_rate: f64,

        /// Decode with per-token argmax instead of the CRF
        #[arg(long)]
        no_crf: bool,

        /// Disable character features
        #[arg(long)]
        no_char_feature: bool,

        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Score a saved model on labeled data
    Eval {
        /// Saved model directory
        #[arg(short, long)]
        model: PathBuf,

        /// Test data (CoNLL)
        #[arg(long)]
        test: PathBuf,
    },
    /// Tag raw text and print the entities as JSON
    Analyze {
        /// Saved model directory
        #[arg(short, long)]
        model: PathBuf,

        /// Text to tag
        text: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            train,
            valid,
            embeddings,
            out,
            log_dir,
            epochs,
            batch_size,
            learning_rate,
            no_crf,
            no_char_feature,
            seed,
        } => {
            let train_set = load_conll(&train)
                .with_context(|| format!("failed to read training data {}", train.display()))?;
            if train_set.is_empty() {
                bail!("no sentences in {}", train.display());
            }
            let valid_set = valid
                .as_ref()
                .map(|path| {
                    load_conll(path)
                        .with_context(|| format!("failed to read validation data {}", path.display()))
                })
                .transpose()?;

            let mut config = SequenceConfig::new()
                .with_model(
                    ModelConfig::new()
                        .with_crf(!no_crf)
                        .with_char_feature(!no_char_feature),
                )
                .with_training(
                    TrainingConfig::new()
                        .with_max_epoch(epochs)
                        .with_batch_size(batch_size)
                        .with_learning_rate(learning_rate)
                        .with_seed(seed),
                );
            if let Some(path) = &embeddings {
                let table = EmbeddingTable::load_glove(path)
                    .with_context(|| format!("failed to read embeddings {}", path.display()))?;
                config = config.with_embeddings(table, EmbeddingInit::default().with_seed(seed));
            }
            if let Some(dir) = log_dir {
                config = config.with_log_dir(dir);
            }

            let mut model = Sequence::new(config);
            let report = model.train(
                &train_set.sentences,
                &train_set.labels,
                valid_set.as_ref().map(|v| v.sentences.as_slice()),
                valid_set.as_ref().map(|v| v.labels.as_slice()),
            )?;
            info!(
                epochs = report.epochs_run,
                best_f1 = report.best_f1.unwrap_or(f64::NAN),
                "training done"
            );

            model
                .save(&out)
                .with_context(|| format!("failed to save model to {}", out.display()))?;
            info!(dir = %out.display(), "model saved");
        }
        Commands::Eval { model, test } => {
            let tagger = Sequence::load(&model)
                .with_context(|| format!("failed to load model from {}", model.display()))?;
            let test_set = load_conll(&test)
                .with_context(|| format!("failed to read test data {}", test.display()))?;

            let metrics = tagger.eval(&test_set.sentences, &test_set.labels)?;
            println!("{metrics}");
        }
        Commands::Analyze { model, text } => {
            let tagger = Sequence::load(&model)
                .with_context(|| format!("failed to load model from {}", model.display()))?;
            let analysis = tagger.analyze_text(&text)?;
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_train_defaults() {
        let cli = Cli::try_parse_from(["seqtag", "train", "--train", "a.conll", "--out", "m"]).unwrap();
        match cli.command {
            Commands::Train {
                epochs,
                batch_size,
                no_crf,
                valid,
                ..
            } => {
                assert_eq!(epochs, 15);
                assert_eq!(batch_size, 20);
                assert!(!no_crf);
                assert!(valid.is_none());
            }
            _ => panic!("expected train"),
        }
    }

    #[test]
    fn test_analyze_requires_text() {
        assert!(Cli::try_parse_from(["seqtag", "analyze", "--model", "m"]).is_err());
    }
}
