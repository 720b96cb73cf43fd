// ============================================================
// Layer 4 — Corpus Loader
// ============================================================
// Loads the dialogue corpus: a JSON array of records, each with
// a conversation history, the reply that followed, and one
// distractor reply. Example:
//
//   [
//     {
//       "history": ["hi there", "hello! how are you?"],
//       "reply": "doing great, thanks for asking",
//       "distractor": "the train leaves at noon"
//     },
//     ...
//   ]
//
// Reference: Rust Book §9 (Error Handling)

use anyhow::{Context, Result};
use std::{fs, path::PathBuf};

use crate::domain::dialogue::DialogueRecord;

/// Loads dialogue records from a single JSON file.
pub struct CorpusLoader {
    path: PathBuf,
}

impl CorpusLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read and parse the whole corpus.
    pub fn load(&self) -> Result<Vec<DialogueRecord>> {
        let json = fs::read_to_string(&self.path)
            .with_context(|| format!("Cannot read corpus file '{}'", self.path.display()))?;

        let records: Vec<DialogueRecord> = serde_json::from_str(&json)
            .with_context(|| format!("Corpus file '{}' is not valid JSON", self.path.display()))?;

        // Records with an empty history have nothing to condition on
        let total = records.len();
        let records: Vec<DialogueRecord> = records
            .into_iter()
            .filter(|r| !r.history.is_empty() && !r.reply.is_empty())
            .collect();
        if records.len() < total {
            tracing::warn!(
                "Dropped {} corpus records with empty history or reply",
                total - records.len()
            );
        }

        tracing::info!("Loaded {} dialogue records", records.len());
        Ok(records)
    }
}

/// Every utterance in the corpus as plain text, for building the
/// tokenizer vocabulary.
pub fn corpus_texts(records: &[DialogueRecord]) -> Vec<String> {
    let mut texts = Vec::with_capacity(records.len() * 3);
    for record in records {
        texts.extend(record.history.iter().cloned());
        texts.push(record.reply.clone());
        texts.push(record.distractor.clone());
    }
    texts
}
