// ============================================================
// Layer 4 — Dialogue Batcher
// ============================================================
// Implements Burn's Batcher trait to convert a Vec of encoded
// samples into GPU-ready tensors.
//
// Input:  Vec of N EncodedSamples, 2 candidates of length S each
// Output: DialogueBatch with sequence tensors of shape [N, 2, S]
//
// We flatten each field into one long Vec, then reshape — all
// sequences are already padded to the same length by the
// encoder, so no dynamic padding is needed here.
//
// mc_token_ids and mc_labels keep a trailing singleton
// dimension ([N, 2, 1] and [N, 1]); the model wrapper squeezes
// them before the forward dispatch.
//
// Reference: Burn Book §4 (Batcher)

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::data::encoder::EncodedSample;

// ─── DialogueBatch ────────────────────────────────────────────────────────────
/// A batch of dialogue samples ready for the model forward pass.
/// All tensors have batch_size as their first dimension; the
/// second dimension indexes the candidates (0 = distractor,
/// 1 = true reply).
#[derive(Debug, Clone)]
pub struct DialogueBatch<B: Backend> {
    /// Token id sequences — shape: [batch, 2, seq_len]
    pub input_ids: Tensor<B, 3, Int>,

    /// Speaker-type ids — shape: [batch, 2, seq_len]
    pub token_type_ids: Tensor<B, 3, Int>,

    /// LM labels (pad everywhere except the true reply) —
    /// shape: [batch, 2, seq_len]
    pub lm_labels: Tensor<B, 3, Int>,

    /// Last-real-token index per candidate — shape: [batch, 2, 1]
    pub mc_token_ids: Tensor<B, 3, Int>,

    /// Correct-candidate index — shape: [batch, 1]
    pub mc_labels: Tensor<B, 2, Int>,
}

impl<B: Backend> DialogueBatch<B> {
    pub fn batch_size(&self) -> usize {
        self.input_ids.dims()[0]
    }

    pub fn seq_len(&self) -> usize {
        self.input_ids.dims()[2]
    }
}

// ─── DialogueBatcher ──────────────────────────────────────────────────────────
/// Holds the target device so tensors are created on the
/// correct GPU/CPU.
#[derive(Clone, Debug)]
pub struct DialogueBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> DialogueBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<B, EncodedSample, DialogueBatch<B>> for DialogueBatcher<B> {
    fn batch(&self, items: Vec<EncodedSample>, _device: &B::Device) -> DialogueBatch<B> {
        let batch_size = items.len();
        // All candidates share one pre-padded length
        let seq_len = items[0].input_ids[0].len();

        let flat_3d = |field: fn(&EncodedSample) -> &Vec<Vec<u32>>| -> Vec<i32> {
            items
                .iter()
                .flat_map(|s| field(s).iter().flatten().map(|&x| x as i32))
                .collect()
        };

        let input_flat = flat_3d(|s| &s.input_ids);
        let types_flat = flat_3d(|s| &s.token_type_ids);
        let labels_flat = flat_3d(|s| &s.lm_labels);

        let mc_idx_flat: Vec<i32> = items
            .iter()
            .flat_map(|s| s.mc_token_ids.iter().map(|&x| x as i32))
            .collect();

        let mc_label_flat: Vec<i32> = items.iter().map(|s| s.mc_label as i32).collect();

        let input_ids = Tensor::<B, 1, Int>::from_ints(
            input_flat.as_slice(), &self.device
        ).reshape([batch_size, 2, seq_len]);

        let token_type_ids = Tensor::<B, 1, Int>::from_ints(
            types_flat.as_slice(), &self.device
        ).reshape([batch_size, 2, seq_len]);

        let lm_labels = Tensor::<B, 1, Int>::from_ints(
            labels_flat.as_slice(), &self.device
        ).reshape([batch_size, 2, seq_len]);

        let mc_token_ids = Tensor::<B, 1, Int>::from_ints(
            mc_idx_flat.as_slice(), &self.device
        ).reshape([batch_size, 2, 1]);

        let mc_labels = Tensor::<B, 1, Int>::from_ints(
            mc_label_flat.as_slice(), &self.device
        ).reshape([batch_size, 1]);

        DialogueBatch {
            input_ids,
            token_type_ids,
            lm_labels,
            mc_token_ids,
            mc_labels,
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn::backend::NdArray<f32, i32>;

    fn sample(seq_len: usize, fill: u32) -> EncodedSample {
        EncodedSample {
            input_ids:      vec![vec![fill; seq_len], vec![fill + 1; seq_len]],
            token_type_ids: vec![vec![3; seq_len], vec![3; seq_len]],
            lm_labels:      vec![vec![0; seq_len], vec![fill + 1; seq_len]],
            mc_token_ids:   vec![(seq_len - 1) as u32, (seq_len - 1) as u32],
            mc_label:       1,
        }
    }

    #[test]
    fn test_batch_shapes() {
        let batcher = DialogueBatcher::<TestBackend>::new(Default::default());
        let batch = batcher.batch(vec![sample(8, 10), sample(8, 20)], &Default::default());

        assert_eq!(batch.input_ids.dims(), [2, 2, 8]);
        assert_eq!(batch.token_type_ids.dims(), [2, 2, 8]);
        assert_eq!(batch.lm_labels.dims(), [2, 2, 8]);
        assert_eq!(batch.mc_token_ids.dims(), [2, 2, 1]);
        assert_eq!(batch.mc_labels.dims(), [2, 1]);
        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.seq_len(), 8);
    }

    #[test]
    fn test_single_sample_keeps_batch_dimension() {
        let batcher = DialogueBatcher::<TestBackend>::new(Default::default());
        let batch = batcher.batch(vec![sample(4, 10)], &Default::default());
        assert_eq!(batch.input_ids.dims(), [1, 2, 4]);
        assert_eq!(batch.mc_labels.dims(), [1, 1]);
    }

    #[test]
    fn test_candidate_order_preserved() {
        let batcher = DialogueBatcher::<TestBackend>::new(Default::default());
        let batch = batcher.batch(vec![sample(4, 10)], &Default::default());

        let flat: Vec<i32> = batch.input_ids.into_data().to_vec().unwrap();
        // Candidate 0 first (fill), then candidate 1 (fill + 1)
        assert_eq!(&flat[0..4], &[10, 10, 10, 10]);
        assert_eq!(&flat[4..8], &[11, 11, 11, 11]);
    }
}
