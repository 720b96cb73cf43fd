// ============================================================
// Layer 5 — Training Objectives
// ============================================================
// The two per-batch losses are merged into one scalar with
// configured weights:
//
//   loss = lm_loss * lm_weight + mc_loss * mc_weight
//   ppl  = exp(lm_loss)
//
// RunningAccuracy accumulates multiple-choice hits across a
// phase; the external driver resets it at phase boundaries.
// Single-writer: one batch updates it at a time.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

// ─── ObjectiveWeights ─────────────────────────────────────────────────────────
/// Weights applied when combining the two objective losses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ObjectiveWeights {
    pub lm_weight: f64,
    pub mc_weight: f64,
}

impl ObjectiveWeights {
    pub fn new(lm_weight: f64, mc_weight: f64) -> Self {
        Self { lm_weight, mc_weight }
    }

    /// The combined scalar loss returned for backpropagation.
    pub fn combine<B: Backend>(&self, lm_loss: Tensor<B, 1>, mc_loss: Tensor<B, 1>) -> Tensor<B, 1> {
        lm_loss * self.lm_weight + mc_loss * self.mc_weight
    }

    /// Standard quality proxy for next-token prediction.
    pub fn perplexity(lm_loss: f64) -> f64 {
        lm_loss.exp()
    }
}

// ─── RunningAccuracy ──────────────────────────────────────────────────────────
/// Running multiple-choice classification accuracy.
#[derive(Debug, Default)]
pub struct RunningAccuracy {
    correct: usize,
    total:   usize,
}

impl RunningAccuracy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one batch in and return the updated running value.
    ///
    /// `mc_logits` is [batch, n_candidates], `mc_labels` [batch].
    /// argmax(1) returns [batch, 1] — flatten before .equal()
    /// so the comparison lines up with the label shape.
    pub fn update<B: Backend>(
        &mut self,
        mc_logits: Tensor<B, 2>,
        mc_labels: Tensor<B, 1, Int>,
    ) -> f64 {
        let batch = mc_labels.dims()[0];
        let preds = mc_logits.argmax(1).flatten::<1>(0, 1);
        let hits: i64 = preds
            .equal(mc_labels)
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>();

        self.correct += hits as usize;
        self.total   += batch;
        self.value()
    }

    /// Accuracy so far this phase; 0 before any update.
    pub fn value(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    /// Called by the driver at phase boundaries.
    pub fn reset(&mut self) {
        self.correct = 0;
        self.total   = 0;
    }
}
