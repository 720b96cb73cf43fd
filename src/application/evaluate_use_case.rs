// ============================================================
// Layer 2 — Evaluate Use Case
// ============================================================
// The final test pass over a held-out corpus:
//   1. Reload the run config saved at training time
//   2. Load the tokenizer and latest checkpoint
//   3. Encode the test corpus with the same schema
//   4. Run one evaluation phase; the qualitative table is
//      flushed as textgen_test

use anyhow::Result;

use crate::application::train_use_case::RunConfig;
use crate::data::{
    corpus::CorpusLoader,
    dataset::DialogueDataset,
    encoder::SampleEncoder,
};
use crate::domain::tokens::SpecialTokens;
use crate::infra::{checkpoint::CheckpointManager, tokenizer_store::TokenizerStore};
use crate::ml::trainer::run_test;

pub struct EvaluateUseCase {
    checkpoint_dir: String,
    corpus_path:    String,
}

impl EvaluateUseCase {
    pub fn new(checkpoint_dir: String, corpus_path: String) -> Self {
        Self { checkpoint_dir, corpus_path }
    }

    pub fn execute(&self) -> Result<()> {
        // ── Step 1: the config the checkpoint was trained with ────────────────
        let ckpt_manager = CheckpointManager::new(&self.checkpoint_dir);
        let cfg: RunConfig = ckpt_manager.load_config()?;

        // ── Step 2: tokenizer (same vocabulary as training) ───────────────────
        let tokenizer = TokenizerStore::new(&self.checkpoint_dir).load()?;
        let special   = SpecialTokens::resolve(&tokenizer)?;

        // ── Step 3: encode the held-out corpus ────────────────────────────────
        tracing::info!("Loading test corpus from '{}'", self.corpus_path);
        let records = CorpusLoader::new(&self.corpus_path).load()?;
        let encoder = SampleEncoder::new(&tokenizer, special, cfg.data.max_seq_len);
        let samples = encoder.encode_all(&records)?;
        tracing::info!("Encoded {} test samples", samples.len());

        // ── Step 4: one evaluation phase ──────────────────────────────────────
        run_test(&cfg, tokenizer, DialogueDataset::new(samples), &ckpt_manager)?;

        Ok(())
    }
}
