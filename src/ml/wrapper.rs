// ============================================================
// Layer 5 — Model Wrapper (Composition Root)
// ============================================================
// Drives one training step and one evaluation step. The
// external trainer invokes it once per batch; this wrapper
// wires the objective weights, the running accuracy, the
// generation controller, and the sinks together.
//
// Training step:  squeeze → forward → combine → emit
//                 loss / mc_acc / lm_loss / ppl / mc_loss,
//                 return the combined loss for backprop.
// Evaluation step: the same forward for logging parity, plus
//                 generation rows into the table accumulator
//                 and the val_-prefixed scalar metrics.
//
// Phase boundaries are explicit: the driver calls
// begin_eval_phase / end_eval_phase(name) and reset_accuracy
// between phases.

use anyhow::Result;
use burn::{prelude::*, tensor::backend::AutodiffBackend};

use crate::data::batcher::DialogueBatch;
use crate::domain::traits::DialogueTokenizer;
use crate::infra::{metrics::ScalarLogger, table_logger::EvalTableLogger};
use crate::ml::generation::GenerationController;
use crate::ml::model::{ForwardInput, ForwardOutput, GenerativeModel};
use crate::ml::objective::{ObjectiveWeights, RunningAccuracy};

pub struct ModelWrapper<T: DialogueTokenizer> {
    tokenizer:  T,
    weights:    ObjectiveWeights,
    accuracy:   RunningAccuracy,
    controller: GenerationController,
    tables:     EvalTableLogger,
    scalars:    ScalarLogger,
}

impl<T: DialogueTokenizer> ModelWrapper<T> {
    pub fn new(
        tokenizer:  T,
        weights:    ObjectiveWeights,
        controller: GenerationController,
        tables:     EvalTableLogger,
        scalars:    ScalarLogger,
    ) -> Self {
        Self {
            tokenizer,
            weights,
            accuracy: RunningAccuracy::new(),
            controller,
            tables,
            scalars,
        }
    }

    /// Assemble the named inputs for the forward pass.
    /// The multiple-choice token indices and labels carry a
    /// singleton trailing dimension out of the batcher; squeeze
    /// it here, before dispatch. flatten keeps the batch
    /// dimension intact even at batch size one.
    fn dispatch<B: Backend>(
        model: &impl GenerativeModel<B>,
        batch: &DialogueBatch<B>,
    ) -> ForwardOutput<B> {
        let input = ForwardInput {
            input_ids:      batch.input_ids.clone(),
            token_type_ids: batch.token_type_ids.clone(),
            mc_token_ids:   batch.mc_token_ids.clone().flatten::<2>(1, 2),
            lm_labels:      batch.lm_labels.clone(),
            mc_labels:      batch.mc_labels.clone().flatten::<1>(0, 1),
        };
        model.forward(input)
    }

    /// One training step. Returns the combined scalar loss;
    /// backpropagation is owned by the caller.
    pub fn training_step<B: AutodiffBackend>(
        &mut self,
        model: &impl GenerativeModel<B>,
        batch: &DialogueBatch<B>,
        step:  usize,
    ) -> Result<Tensor<B, 1>> {
        let output = Self::dispatch(model, batch);
        let loss = self
            .weights
            .combine(output.lm_loss.clone(), output.mc_loss.clone());

        let mc_acc = self
            .accuracy
            .update(output.mc_logits, batch.mc_labels.clone().flatten::<1>(0, 1));

        let lm_loss: f64 = output.lm_loss.into_scalar().elem::<f64>();
        let mc_loss: f64 = output.mc_loss.into_scalar().elem::<f64>();
        let combined: f64 = loss.clone().into_scalar().elem::<f64>();

        self.scalars.log_all(step, &[
            ("loss",    combined),
            ("mc_acc",  mc_acc),
            ("lm_loss", lm_loss),
            ("ppl",     ObjectiveWeights::perplexity(lm_loss)),
            ("mc_loss", mc_loss),
        ])?;

        Ok(loss)
    }

    /// One evaluation step: forward exactly as in training for
    /// logging parity, then the generation pipeline into the
    /// table accumulator. Returns the combined loss value.
    pub fn eval_step<B: Backend>(
        &mut self,
        model: &impl GenerativeModel<B>,
        batch: &DialogueBatch<B>,
        step:  usize,
    ) -> Result<f64> {
        let output = Self::dispatch(model, batch);
        let loss = self
            .weights
            .combine(output.lm_loss.clone(), output.mc_loss.clone());

        let mc_acc = self
            .accuracy
            .update(output.mc_logits, batch.mc_labels.clone().flatten::<1>(0, 1));

        let rows = self.controller.rows(model, &self.tokenizer, batch)?;
        self.tables.append(rows);

        let lm_loss: f64 = output.lm_loss.into_scalar().elem::<f64>();
        let mc_loss: f64 = output.mc_loss.into_scalar().elem::<f64>();
        let combined: f64 = loss.into_scalar().elem::<f64>();

        self.scalars.log_all(step, &[
            ("val_loss",    combined),
            ("val_mc_acc",  mc_acc),
            ("val_lm_loss", lm_loss),
            ("val_mc_loss", mc_loss),
        ])?;

        Ok(combined)
    }

    /// Open a fresh table accumulator for the coming phase.
    pub fn begin_eval_phase(&mut self) {
        self.tables.begin_phase();
    }

    /// Flush the phase's table under its qualified name.
    pub fn end_eval_phase(&mut self, name: &str) -> Result<()> {
        self.tables.end_phase(name)
    }

    /// Multiple-choice accuracy accumulated this phase.
    pub fn mc_accuracy(&self) -> f64 {
        self.accuracy.value()
    }

    /// Called by the driver at phase boundaries.
    pub fn reset_accuracy(&mut self) {
        self.accuracy.reset();
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batcher::DialogueBatcher;
    use crate::data::encoder::EncodedSample;
    use crate::ml::generation::GenerationRequest;
    use burn::data::dataloader::batcher::Batcher;

    type TestBackend = burn::backend::NdArray<f32, i32>;

    /// Asserts the squeezed shapes the forward contract requires.
    struct ShapeCheckingModel;

    impl GenerativeModel<TestBackend> for ShapeCheckingModel {
        fn forward(&self, input: ForwardInput<TestBackend>) -> ForwardOutput<TestBackend> {
            let [batch, n_cand, seq] = input.input_ids.dims();
            assert_eq!(n_cand, 2);
            assert_eq!(input.mc_token_ids.dims(), [batch, 2]);
            assert_eq!(input.mc_labels.dims(), [batch]);
            assert_eq!(input.lm_labels.dims(), [batch, 2, seq]);

            let device = Default::default();
            ForwardOutput {
                lm_loss:   Tensor::from_floats([1.5], &device),
                mc_loss:   Tensor::from_floats([0.5], &device),
                lm_logits: Tensor::zeros([batch * 2, seq, 4], &device),
                mc_logits: Tensor::zeros([batch, 2], &device),
            }
        }

        fn generate(&self, seed: &[u32], _request: &GenerationRequest) -> Result<Vec<u32>> {
            Ok(seed.to_vec())
        }

        fn max_context_length(&self) -> usize {
            64
        }

        fn device(&self) -> <TestBackend as Backend>::Device {
            Default::default()
        }
    }

    fn batch() -> DialogueBatch<TestBackend> {
        let sample = EncodedSample {
            input_ids:      vec![vec![1, 3, 5, 2], vec![1, 3, 6, 2]],
            token_type_ids: vec![vec![3, 3, 4, 4]; 2],
            lm_labels:      vec![vec![0; 4], vec![0, 0, 6, 2]],
            mc_token_ids:   vec![3, 3],
            mc_label:       1,
        };
        DialogueBatcher::<TestBackend>::new(Default::default()).batch(vec![sample; 3], &Default::default())
    }

    #[test]
    fn test_dispatch_squeezes_trailing_singleton_dims() {
        let output = ModelWrapper::<MockTokenizer>::dispatch(&ShapeCheckingModel, &batch());
        assert_eq!(output.mc_logits.dims(), [3, 2]);
    }

    // Minimal tokenizer so the wrapper type parameter resolves
    struct MockTokenizer;

    impl DialogueTokenizer for MockTokenizer {
        fn token_id(&self, _token: &str) -> Option<u32> {
            None
        }
        fn encode(&self, _text: &str) -> Result<Vec<u32>> {
            Ok(Vec::new())
        }
        fn eos_id(&self) -> Result<u32> {
            Ok(2)
        }
        fn vocab_size(&self) -> usize {
            0
        }
        fn batch_decode(&self, sequences: &[Vec<u32>], _skip_special: bool) -> Result<Vec<String>> {
            Ok(vec![String::new(); sequences.len()])
        }
    }
}
