// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// By programming against traits instead of concrete types,
// we can swap implementations without changing the code
// that uses them:
//   - tokenizers::Tokenizer implements DialogueTokenizer
//   - CsvTableSink and NoopTableSink implement TableSink
//   - The orchestration layer only sees the traits
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)
//            Rust Book §17 (Object Oriented Patterns)

use anyhow::Result;
use crate::domain::eval_row::EvalRow;

// ─── DialogueTokenizer ────────────────────────────────────────────────────────
/// The tokenizer capability the orchestration layer consumes.
///
/// Implementations:
///   - tokenizers::Tokenizer (see infra::tokenizer_store)
///   - test doubles with a fixed vocabulary
pub trait DialogueTokenizer {
    /// Map a control-token string to its vocabulary id
    fn token_id(&self, token: &str) -> Option<u32>;

    /// Encode plain text into vocabulary ids
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// The end-of-sequence id, used as the generation padding id
    fn eos_id(&self) -> Result<u32>;

    /// Vocabulary size, fixed at model construction time
    fn vocab_size(&self) -> usize;

    /// Decode one id sequence per input entry.
    /// Must return exactly one string per sequence — a batch of
    /// one decodes to a Vec of length one, never a bare string.
    fn batch_decode(&self, sequences: &[Vec<u32>], skip_special: bool) -> Result<Vec<String>>;
}

// ─── TableSink ────────────────────────────────────────────────────────────────
/// Receives a finished qualitative table at the end of an
/// evaluation phase.
///
/// Implementations:
///   - CsvTableSink  → one CSV file per table name
///   - NoopTableSink → bound when no sink is available
pub trait TableSink {
    /// Persist `rows` under `name` with the given column headers.
    fn write_table(&self, name: &str, columns: &[&str], rows: &[EvalRow]) -> Result<()>;
}
