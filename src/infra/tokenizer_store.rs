// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Manages tokenizer building, saving, and loading.
//
// In tokenizers 0.15, train_from_files requires Trainer::Model
// to equal ModelWrapper. The correct approach is to build the
// tokenizer JSON manually and load it, bypassing the trainer
// type mismatch entirely. The dialogue control tokens occupy
// the first five ids so they stay stable across rebuilds.
//
// Reference: Sennrich et al. (2016) BPE paper

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokenizers::Tokenizer;

use crate::domain::tokens::SPECIAL_TOKENS;
use crate::domain::traits::DialogueTokenizer;

pub struct TokenizerStore {
    dir: PathBuf,
}

impl TokenizerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load existing tokenizer or build a new one from texts
    pub fn load_or_build(&self, texts: &[String], vocab_size: usize) -> Result<Tokenizer> {
        let tok_path = self.dir.join("tokenizer.json");
        if tok_path.exists() {
            tracing::info!("Loading existing tokenizer from disk");
            self.load()
        } else {
            tracing::info!("Building new tokenizer (vocab_size={})", vocab_size);
            self.build_and_save(texts, vocab_size)
        }
    }

    /// Load a previously saved tokenizer from JSON file
    pub fn load(&self) -> Result<Tokenizer> {
        let path = self.dir.join("tokenizer.json");
        Tokenizer::from_file(&path)
            .map_err(|e| anyhow::anyhow!(
                "Cannot load tokenizer from '{}': {}", path.display(), e
            ))
    }

    /// Build a word-level vocabulary from the corpus texts and
    /// write a valid tokenizer JSON directly.
    fn build_and_save(&self, texts: &[String], vocab_size: usize) -> Result<Tokenizer> {
        std::fs::create_dir_all(&self.dir).ok();

        // ── Step 1: Build vocabulary from word frequencies ────────────────────
        use std::collections::HashMap;
        let mut freq: HashMap<String, usize> = HashMap::new();

        for text in texts {
            for word in text.split_whitespace() {
                let w = word.to_lowercase();
                let w = w.trim_matches(|c: char| !c.is_alphanumeric());
                if !w.is_empty() {
                    *freq.entry(w.to_string()).or_insert(0) += 1;
                }
            }
        }

        // Sort by frequency descending; the control tokens take the
        // first five slots
        let mut words: Vec<(String, usize)> = freq.into_iter().collect();
        words.sort_by(|a, b| b.1.cmp(&a.1));
        let max_words = vocab_size.saturating_sub(SPECIAL_TOKENS.len());
        words.truncate(max_words);

        // ── Step 2: Build vocab JSON ──────────────────────────────────────────
        // Control tokens get the fixed leading ids
        let mut vocab = serde_json::Map::new();
        for (id, token) in SPECIAL_TOKENS.iter().enumerate() {
            vocab.insert(token.to_string(), serde_json::json!(id));
        }

        let mut next_id = SPECIAL_TOKENS.len();
        for (word, _) in &words {
            if !vocab.contains_key(word.as_str()) {
                vocab.insert(word.clone(), serde_json::json!(next_id));
                next_id += 1;
            }
        }

        // ── Step 3: Write tokenizer JSON in HuggingFace format ────────────────
        let added_tokens: Vec<serde_json::Value> = SPECIAL_TOKENS
            .iter()
            .enumerate()
            .map(|(id, token)| serde_json::json!({
                "id": id, "content": token,
                "single_word": false, "lstrip": false, "rstrip": false,
                "normalized": false, "special": true,
            }))
            .collect();

        let tokenizer_json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": added_tokens,
            "normalizer": {
                "type": "BertNormalizer",
                "clean_text": true,
                "handle_chinese_chars": true,
                "strip_accents": null,
                "lowercase": true
            },
            "pre_tokenizer": {
                "type": "Whitespace"
            },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": vocab,
                "unk_token": "<pad>"
            }
        });

        let tok_path = self.dir.join("tokenizer.json");
        std::fs::write(
            &tok_path,
            serde_json::to_string_pretty(&tokenizer_json)?
        ).with_context(|| "Cannot write tokenizer JSON")?;

        tracing::info!(
            "Tokenizer built with {} entries, saved to '{}'",
            next_id,
            tok_path.display()
        );

        Tokenizer::from_file(&tok_path)
            .map_err(|e| anyhow::anyhow!("Cannot reload tokenizer: {e}"))
    }
}

// ─── DialogueTokenizer capability ─────────────────────────────────────────────
// The orchestration layer consumes the tokenizer through this
// trait only, so tests can substitute a fixed vocabulary.
impl DialogueTokenizer for Tokenizer {
    fn token_id(&self, token: &str) -> Option<u32> {
        self.token_to_id(token)
    }

    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let enc = std::ops::Deref::deref(self).encode(text, false)
            .map_err(|e| anyhow::anyhow!("Tokenisation error: {e}"))?;
        Ok(enc.get_ids().to_vec())
    }

    fn eos_id(&self) -> Result<u32> {
        self.token_to_id(crate::domain::tokens::EOS_TOKEN)
            .with_context(|| "Vocabulary has no end-of-sequence token")
    }

    fn vocab_size(&self) -> usize {
        self.get_vocab_size(true)
    }

    fn batch_decode(&self, sequences: &[Vec<u32>], skip_special: bool) -> Result<Vec<String>> {
        sequences
            .iter()
            .map(|ids| {
                self.decode(ids, skip_special)
                    .map_err(|e| anyhow::anyhow!("Decode failed: {e}"))
            })
            .collect()
    }
}
