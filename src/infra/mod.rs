// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns that don't belong in any specific
// business layer:
//
//   checkpoint.rs      — Saving and loading model weights with
//                        Burn's CompactRecorder, plus the run
//                        config as JSON so evaluation can
//                        rebuild the exact model.
//
//   tokenizer_store.rs — Tokenizer persistence. Builds a
//                        word-level tokenizer over the corpus
//                        with the dialogue control tokens at
//                        fixed ids, or loads a saved one.
//
//   metrics.rs         — Per-step scalar metrics appended to a
//                        CSV file (step,metric,value).
//
//   table_logger.rs    — The qualitative comparison table:
//                        accumulates rows during an evaluation
//                        phase, flushes them as a named CSV
//                        artifact at phase end.
//
// Reference: Rust Book §7 (Modules)
//            Burn Book §5 (Checkpointing)

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Tokenizer building, saving, and loading
pub mod tokenizer_store;

/// Per-step scalar metrics CSV sink
pub mod metrics;

/// Evaluation-phase table accumulator and sinks
pub mod table_logger;
