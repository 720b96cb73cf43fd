// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full training pipeline in order:
//
//   Step 1: Load the dialogue corpus     (Layer 4 - data)
//   Step 2: Build / load the tokenizer   (Layer 6 - infra)
//   Step 3: Encode records to samples    (Layer 4 - data)
//   Step 4: Split train/validation       (Layer 4 - data)
//   Step 5: Build datasets               (Layer 4 - data)
//   Step 6: Save config                  (Layer 6 - infra)
//   Step 7: Run training loop            (Layer 5 - ml)
//
// Reference: Burn Book §5 (Training)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::data::{
    corpus::{corpus_texts, CorpusLoader},
    dataset::DialogueDataset,
    encoder::SampleEncoder,
    splitter::split_train_val,
};
use crate::domain::tokens::SpecialTokens;
use crate::infra::{checkpoint::CheckpointManager, tokenizer_store::TokenizerStore};
use crate::ml::trainer::run_training;

// ─── Run Configuration ───────────────────────────────────────────────────────
// All settings for a run, grouped into sections. Serialisable so
// the exact configuration can be saved next to the checkpoints
// and reloaded for evaluation.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSection {
    pub corpus_path:    String,
    pub checkpoint_dir: String,
    pub metrics_dir:    String,
    pub max_seq_len:    usize,
    pub vocab_size:     usize,
    /// Share of the corpus held out for validation
    pub val_fraction:   f64,
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            corpus_path:    "data/dialogues.json".to_string(),
            checkpoint_dir: "checkpoints".to_string(),
            metrics_dir:    "metrics".to_string(),
            max_seq_len:    256,
            vocab_size:     8000,
            val_fraction:   0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSection {
    pub d_model:    usize,
    pub num_heads:  usize,
    pub num_layers: usize,
    pub d_ff:       usize,
    pub dropout:    f64,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            d_model:    256,
            num_heads:  8,
            num_layers: 6,
            d_ff:       1024,
            dropout:    0.1,
        }
    }
}

/// The learning algorithm by name plus its keyword arguments.
/// `kwargs` must include `lr` — the schedule peaks there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerSection {
    pub name:   String,
    pub kwargs: HashMap<String, f64>,
}

impl Default for OptimizerSection {
    fn default() -> Self {
        Self {
            name:   "AdamW".to_string(),
            kwargs: HashMap::from([
                ("lr".to_string(), 6.25e-5),
                ("weight_decay".to_string(), 0.01),
            ]),
        }
    }
}

/// One-cycle shape hyperparameters; the peak rate comes from
/// optimizer.kwargs.lr and the step count from the data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    pub pct_start:        f64,
    pub div_factor:       f64,
    pub final_div_factor: f64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            pct_start:        0.3,
            div_factor:       25.0,
            final_div_factor: 1e4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainSection {
    pub lm_weight:  f64,
    pub mc_weight:  f64,
    pub epochs:     usize,
    pub batch_size: usize,
}

impl Default for TrainSection {
    fn default() -> Self {
        Self {
            lm_weight:  2.0,
            mc_weight:  1.0,
            epochs:     3,
            batch_size: 8,
        }
    }
}

/// Generation bounds are relative: the controller adds them to
/// each stripped history length, capped by the model's context
/// window. The decoding hyperparameters pass through opaquely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceSection {
    pub min_length:  usize,
    pub max_length:  usize,
    pub temperature: f64,
    pub top_k:       usize,
    pub sample:      bool,
}

impl Default for InferenceSection {
    fn default() -> Self {
        Self {
            min_length:  1,
            max_length:  25,
            temperature: 0.7,
            top_k:       20,
            sample:      true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub data:      DataSection,
    #[serde(default)]
    pub model:     ModelSection,
    #[serde(default)]
    pub optimizer: OptimizerSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub train:     TrainSection,
    #[serde(default)]
    pub inference: InferenceSection,
}

impl RunConfig {
    /// Load a config file; absent sections keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read config '{}': {e}", path.display()))?;
        Ok(serde_json::from_str(&json)?)
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
// Owns the config and runs the full training pipeline.
pub struct TrainUseCase {
    config: RunConfig,
}

impl TrainUseCase {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline end to end
    pub fn execute(&self) -> Result<()> {
        let cfg = &self.config;

        // ── Step 1: Load the dialogue corpus ─────────────────────────────────
        tracing::info!("Loading corpus from '{}'", cfg.data.corpus_path);
        let records = CorpusLoader::new(&cfg.data.corpus_path).load()?;

        // ── Step 2: Build / load tokenizer ────────────────────────────────────
        let tok_store = TokenizerStore::new(&cfg.data.checkpoint_dir);
        let tokenizer = tok_store.load_or_build(&corpus_texts(&records), cfg.data.vocab_size)?;
        let special   = SpecialTokens::resolve(&tokenizer)?;

        // ── Step 3: Encode records into two-candidate samples ─────────────────
        let encoder = SampleEncoder::new(&tokenizer, special, cfg.data.max_seq_len);
        let samples = encoder.encode_all(&records)?;
        tracing::info!("Encoded {} samples", samples.len());

        // ── Step 4: Train / validation split ──────────────────────────────────
        let (train_samples, val_samples) =
            split_train_val(samples, 1.0 - cfg.data.val_fraction);
        tracing::info!(
            "Split: {} train, {} validation",
            train_samples.len(),
            val_samples.len()
        );

        // ── Step 5: Build Burn datasets ───────────────────────────────────────
        let train_dataset = DialogueDataset::new(train_samples);
        let val_dataset   = DialogueDataset::new(val_samples);

        // ── Step 6: Save config for evaluation ────────────────────────────────
        let ckpt_manager = CheckpointManager::new(&cfg.data.checkpoint_dir);
        ckpt_manager.save_config(cfg)?;

        // ── Step 7: Run training loop (Layer 5) ───────────────────────────────
        run_training(cfg, tokenizer, train_dataset, val_dataset, ckpt_manager)?;

        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_optimizer_kwargs_include_lr() {
        let cfg = RunConfig::default();
        assert!(cfg.optimizer.kwargs.contains_key("lr"));
    }

    #[test]
    fn test_partial_config_file_keeps_section_defaults() {
        let parsed: RunConfig = serde_json::from_str(
            r#"{ "train": { "lm_weight": 1.5, "mc_weight": 0.5, "epochs": 1, "batch_size": 2 } }"#,
        )
        .unwrap();
        assert_eq!(parsed.train.epochs, 1);
        assert!((parsed.train.lm_weight - 1.5).abs() < 1e-12);
        // Untouched sections fall back to defaults
        assert_eq!(parsed.model.num_layers, ModelSection::default().num_layers);
        assert_eq!(parsed.inference.max_length, InferenceSection::default().max_length);
    }
}
