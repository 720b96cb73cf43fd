// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands: `train` and `evaluate`
// and their configurable flags. Most hyperparameters live in
// the JSON run config; the flags here cover paths and the
// overrides worth reaching for from the shell.
//
// Reference: Rust Book §12 (Building a CLI Program)

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::application::train_use_case::RunConfig;

/// The two top-level subcommands available to the user
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the dialogue model on a JSON corpus
    Train(TrainArgs),

    /// Evaluate a trained checkpoint on a held-out corpus
    Evaluate(EvaluateArgs),
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// JSON corpus of {history, reply, distractor} records
    #[arg(long, default_value = "data/dialogues.json")]
    pub corpus: String,

    /// Directory for model checkpoints and the tokenizer
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// Directory for scalar metrics and qualitative tables
    #[arg(long, default_value = "metrics")]
    pub metrics_dir: String,

    /// Optional JSON run config; missing sections use defaults
    #[arg(long)]
    pub config: Option<String>,

    /// Override the number of training epochs
    #[arg(long)]
    pub epochs: Option<usize>,

    /// Override the batch size
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Override the peak learning rate
    #[arg(long)]
    pub lr: Option<f64>,
}

impl TrainArgs {
    /// Resolve config file + flag overrides into the RunConfig.
    /// This is the boundary between Layer 1 and Layer 2 —
    /// the application layer never sees clap types.
    pub fn into_config(self) -> Result<RunConfig> {
        let mut cfg = match &self.config {
            Some(path) => RunConfig::from_file(path)?,
            None       => RunConfig::default(),
        };

        cfg.data.corpus_path    = self.corpus;
        cfg.data.checkpoint_dir = self.checkpoint_dir;
        cfg.data.metrics_dir    = self.metrics_dir;

        if let Some(epochs) = self.epochs {
            cfg.train.epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            cfg.train.batch_size = batch_size;
        }
        if let Some(lr) = self.lr {
            cfg.optimizer.kwargs.insert("lr".to_string(), lr);
        }

        Ok(cfg)
    }
}

/// All arguments for the `evaluate` command
#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// JSON corpus with the held-out test dialogues
    #[arg(long, default_value = "data/test_dialogues.json")]
    pub corpus: String,

    /// Directory where checkpoints were saved during training
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> TrainArgs {
        TrainArgs {
            corpus:         "data/dialogues.json".to_string(),
            checkpoint_dir: "ckpt".to_string(),
            metrics_dir:    "metrics".to_string(),
            config:         None,
            epochs:         None,
            batch_size:     None,
            lr:             None,
        }
    }

    #[test]
    fn test_flag_overrides_take_precedence() {
        let mut args = base_args();
        args.epochs = Some(7);
        args.lr     = Some(1e-3);

        let cfg = args.into_config().unwrap();
        assert_eq!(cfg.train.epochs, 7);
        assert_eq!(cfg.optimizer.kwargs["lr"], 1e-3);
        assert_eq!(cfg.data.checkpoint_dir, "ckpt");
    }

    #[test]
    fn test_defaults_survive_without_overrides() {
        let cfg = base_args().into_config().unwrap();
        assert_eq!(cfg.train.epochs, RunConfig::default().train.epochs);
    }
}
