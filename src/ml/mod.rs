// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// This layer contains ALL Burn framework specific code.
// No other layer imports from burn directly — only this one
// and the data batcher.
//
// What's in this layer:
//
//   model.rs      — The double-heads dialogue transformer:
//                   causal decoder blocks with a language-model
//                   head and a multiple-choice head, plus the
//                   GenerativeModel capability trait the
//                   orchestration depends on
//
//   objective.rs  — Loss combination (lm_weight / mc_weight),
//                   perplexity, and the running multiple-choice
//                   accuracy
//
//   optim.rs      — Optimizer registry (general and
//                   transformer-tuned namespaces) and the
//                   one-cycle learning-rate schedule
//
//   generation.rs — Evaluation-time generation: dynamic length
//                   bounds, padding stripping, history priming,
//                   sampling, and qualitative row assembly
//
//   wrapper.rs    — The composition root driving one training
//                   step and one evaluation step
//
//   trainer.rs    — The epoch loop: forward, backward,
//                   optimizer step at the scheduled rate,
//                   validation phase, checkpointing
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Radford et al. (2019) GPT-2

/// Double-heads transformer architecture and capability trait
pub mod model;

/// Loss combination and running accuracy
pub mod objective;

/// Optimizer registry and one-cycle schedule
pub mod optim;

/// Constrained generation and qualitative row assembly
pub mod generation;

/// Composition root for training and evaluation steps
pub mod wrapper;

/// Full training loop with validation and checkpointing
pub mod trainer;
