// ============================================================
// Layer 5 — Constrained Generation
// ============================================================
// The evaluation-time pipeline that turns a batch into
// qualitative rows:
//
//   1. resolve the control tokens from the vocabulary
//   2. split the candidate dimension (0 = distractor, 1 = original)
//   3. select each example's ground-truth label sequence
//   4. reduce the distractor to the positions where it diverges
//      from the original (the shared history and padding are
//      identical at matching positions)
//   5. strip trailing padding from the original and prime it
//      with a single <speaker2> marker, so the model generates
//      that speaker's turn until <eos>
//   6. compute dynamic length bounds from the stripped history
//      length, capped by the model's absolute context window
//   7. generate, slice off the seed, decode, assemble rows
//
// Sequences move through host-side Vec<Vec<u32>> between
// stripping and decoding: one entry per example, so a
// batch-of-one keeps its batch dimension and decoding always
// yields exactly one string per example.
//
// Generation itself is the usual sampling loop: forward the
// running sequence, read the last position's logits, suppress
// <eos> below the minimum length, then pick greedily or sample
// from the temperature-scaled top-k distribution.

use anyhow::{Context, Result};
use rand::distributions::{Distribution, WeightedIndex};
use burn::prelude::*;

use crate::application::train_use_case::InferenceSection;
use crate::data::batcher::DialogueBatch;
use crate::domain::eval_row::EvalRow;
use crate::domain::tokens::SpecialTokens;
use crate::domain::traits::DialogueTokenizer;
use crate::ml::model::{DoubleHeadsModel, ForwardInput, ForwardOutput, GenerativeModel};

// ─── GenerationRequest ────────────────────────────────────────────────────────
/// Everything one generation call needs: absolute length bounds
/// for the full sequence (seed included), the stop/pad ids, and
/// the decoding hyperparameters passed through from the config.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub min_length:  usize,
    pub max_length:  usize,
    pub eos_id:      u32,
    /// Fill value when continuations are assembled into a
    /// rectangular batch; bound to the end-of-sequence id
    pub pad_id:      u32,
    pub temperature: f64,
    pub top_k:       usize,
    pub sample:      bool,
}

// ─── Length bounds ────────────────────────────────────────────────────────────
/// Dynamic decode bounds for one example.
///
/// `min = history + configured_min`;
/// `max = min(history + configured_max, model_max)` — generation
/// never exceeds the model's absolute context window, regardless
/// of configuration.
pub fn decode_bounds(
    history_len: usize,
    min_new:     usize,
    max_new:     usize,
    model_max:   usize,
) -> (usize, usize) {
    let min_length = history_len + min_new;
    let max_length = (history_len + max_new).min(model_max);
    (min_length, max_length)
}

// ─── Sequence helpers ─────────────────────────────────────────────────────────

/// Drop the padding tail; interior ids are untouched.
pub fn strip_trailing_padding(sequence: &[u32], pad_id: u32) -> Vec<u32> {
    let end = sequence
        .iter()
        .rposition(|&t| t != pad_id)
        .map_or(0, |i| i + 1);
    sequence[..end].to_vec()
}

/// The positions where the distractor candidate diverges from
/// the original: the shared history prefix and the shared
/// padding tail drop out, leaving the decoy reply.
pub fn differing_positions(distractor: &[u32], original: &[u32]) -> Vec<u32> {
    distractor
        .iter()
        .zip(original)
        .filter(|(d, o)| d != o)
        .map(|(&d, _)| d)
        .collect()
}

/// Append the speaker-2 marker so the model generates as that
/// speaker's turn.
pub fn prime_history(history: &[u32], speaker2: u32) -> Vec<u32> {
    let mut primed = history.to_vec();
    primed.push(speaker2);
    primed
}

/// Split a [batch, 2, seq] tensor into per-example
/// (candidate 0, candidate 1) host rows. Chunking by example
/// keeps the batch dimension intact even when batch == 1.
fn candidate_rows<B: Backend>(tensor: Tensor<B, 3, Int>) -> Result<Vec<[Vec<u32>; 2]>> {
    let [batch_size, n_cand, seq_len] = tensor.dims();
    debug_assert_eq!(n_cand, 2);

    let flat: Vec<i32> = tensor
        .into_data()
        .to_vec()
        .map_err(|e| anyhow::anyhow!("Cannot read batch tensor: {e:?}"))?;

    let row = |example: usize, cand: usize| -> Vec<u32> {
        let start = (example * n_cand + cand) * seq_len;
        flat[start..start + seq_len].iter().map(|&t| t as u32).collect()
    };

    Ok((0..batch_size).map(|i| [row(i, 0), row(i, 1)]).collect())
}

// ─── Sampling ─────────────────────────────────────────────────────────────────

/// Pick the next token from the last position's logits.
/// `suppress_eos` removes <eos> from consideration while the
/// sequence is still below its minimum length.
fn sample_token<R: rand::Rng>(
    mut logits:   Vec<f32>,
    request:      &GenerationRequest,
    suppress_eos: bool,
    rng:          &mut R,
) -> Result<u32> {
    if suppress_eos {
        if let Some(l) = logits.get_mut(request.eos_id as usize) {
            *l = f32::NEG_INFINITY;
        }
    }

    if !request.sample {
        return argmax(&logits).context("Empty logits from the model");
    }

    let temperature = if request.temperature > 0.0 { request.temperature as f32 } else { 1.0 };
    for l in logits.iter_mut() {
        *l /= temperature;
    }

    if request.top_k > 0 && request.top_k < logits.len() {
        let mut sorted: Vec<f32> = logits.clone();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        let threshold = sorted[request.top_k - 1];
        for l in logits.iter_mut() {
            if *l < threshold {
                *l = f32::NEG_INFINITY;
            }
        }
    }

    // Stable softmax; suppressed positions get weight 0
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let weights: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let dist = WeightedIndex::new(&weights)
        .map_err(|e| anyhow::anyhow!("Degenerate sampling distribution: {e}"))?;
    Ok(dist.sample(rng) as u32)
}

fn argmax(logits: &[f32]) -> Option<u32> {
    logits
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i as u32)
}

// ─── GenerationController ─────────────────────────────────────────────────────
/// Runs the evaluation-time generation pipeline for one batch
/// and assembles the qualitative rows.
pub struct GenerationController {
    inference: InferenceSection,
}

impl GenerationController {
    pub fn new(inference: InferenceSection) -> Self {
        Self { inference }
    }

    pub fn rows<B, M, T>(
        &self,
        model:     &M,
        tokenizer: &T,
        batch:     &DialogueBatch<B>,
    ) -> Result<Vec<EvalRow>>
    where
        B: Backend,
        M: GenerativeModel<B>,
        T: DialogueTokenizer + ?Sized,
    {
        let special = SpecialTokens::resolve(tokenizer)?;
        let batch_size = batch.batch_size();

        let candidates = candidate_rows(batch.input_ids.clone())?;
        let labels     = candidate_rows(batch.lm_labels.clone())?;
        let mc_labels: Vec<i32> = batch
            .mc_labels
            .clone()
            .reshape([batch_size])
            .into_data()
            .to_vec()
            .map_err(|e| anyhow::anyhow!("Cannot read mc_labels: {e:?}"))?;

        let mut seeds  = Vec::with_capacity(batch_size);
        let mut targets = Vec::with_capacity(batch_size);
        let mut decoys  = Vec::with_capacity(batch_size);

        for (example, [distractor, original]) in candidates.iter().enumerate() {
            // Ground truth: the label sequence of the correct
            // candidate, with the pad ignore-value filtered out
            let label_row = &labels[example][mc_labels[example] as usize];
            targets.push(
                label_row
                    .iter()
                    .copied()
                    .filter(|&t| t != special.pad)
                    .collect::<Vec<u32>>(),
            );

            decoys.push(differing_positions(distractor, original));

            let history = strip_trailing_padding(original, special.pad);
            seeds.push(prime_history(&history, special.speaker2));
        }

        // Generate each example under its own dynamic bounds
        let mut continuations = Vec::with_capacity(batch_size);
        for seed in &seeds {
            let (min_length, max_length) = decode_bounds(
                seed.len(),
                self.inference.min_length,
                self.inference.max_length,
                model.max_context_length(),
            );
            let request = GenerationRequest {
                min_length,
                max_length,
                eos_id:      special.eos,
                pad_id:      tokenizer.eos_id()?,
                temperature: self.inference.temperature,
                top_k:       self.inference.top_k,
                sample:      self.inference.sample,
            };
            let full = model.generate(seed, &request)?;
            // Keep only the newly generated tokens
            continuations.push(full[seed.len()..].to_vec());
        }

        // Rectangular batch, padded with the generation pad id;
        // special-token skipping strips it again on decode
        let widest = continuations.iter().map(Vec::len).max().unwrap_or(0);
        for c in &mut continuations {
            c.resize(widest, special.eos);
        }

        // History keeps its control tokens so the structure
        // stays inspectable; everything else drops them
        let original_text   = tokenizer.batch_decode(&seeds, false)?;
        let predicted_text  = tokenizer.batch_decode(&continuations, true)?;
        let target_text     = tokenizer.batch_decode(&targets, true)?;
        let distractor_text = tokenizer.batch_decode(&decoys, true)?;

        let rows: Vec<EvalRow> = original_text
            .into_iter()
            .zip(target_text)
            .zip(distractor_text)
            .zip(predicted_text)
            .map(|(((original, target), distractor), predicted)| {
                tracing::debug!("Generated: '{}' => '{}'", original, predicted);
                EvalRow::new(original, target, distractor, predicted)
            })
            .collect();

        Ok(rows)
    }
}

// ─── GenerativeModel for DoubleHeadsModel ─────────────────────────────────────
impl<B: Backend> GenerativeModel<B> for DoubleHeadsModel<B> {
    fn forward(&self, input: ForwardInput<B>) -> ForwardOutput<B> {
        self.forward_heads(input)
    }

    fn generate(&self, seed: &[u32], request: &GenerationRequest) -> Result<Vec<u32>> {
        let device = GenerativeModel::device(self);
        let mut ids: Vec<u32> = seed.to_vec();
        let mut rng = rand::thread_rng();

        while ids.len() < request.max_length {
            let window: Vec<i32> = ids.iter().map(|&t| t as i32).collect();
            let input = Tensor::<B, 1, Int>::from_ints(window.as_slice(), &device)
                .unsqueeze::<2>();

            let logits = self.lm_logits_flat(input); // [1, len, vocab]
            let [_, len, vocab] = logits.dims();
            let last: Vec<f32> = logits
                .slice([0..1, len - 1..len, 0..vocab])
                .reshape([vocab])
                .into_data()
                .to_vec()
                .map_err(|e| anyhow::anyhow!("Cannot read logits: {e:?}"))?;

            let suppress_eos = ids.len() < request.min_length;
            let next = sample_token(last, request, suppress_eos, &mut rng)?;
            ids.push(next);
            if next == request.eos_id {
                break;
            }
        }

        Ok(ids)
    }

    fn max_context_length(&self) -> usize {
        self.max_seq_len
    }

    fn device(&self) -> B::Device {
        self.devices().first().cloned().unwrap_or_default()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batcher::DialogueBatcher;
    use crate::data::encoder::EncodedSample;
    use burn::data::dataloader::batcher::Batcher;
    use std::collections::HashMap;

    type TestBackend = burn::backend::NdArray<f32, i32>;

    // Vocabulary: <pad>=0 <bos>=1 <eos>=2 <spk1>=3 <spk2>=4
    //             hi=5 yo=6 no=7 x=8 y=9
    struct MockTokenizer;

    impl MockTokenizer {
        fn words() -> HashMap<u32, &'static str> {
            HashMap::from([
                (0, "<pad>"), (1, "<bos>"), (2, "<eos>"),
                (3, "<speaker1>"), (4, "<speaker2>"),
                (5, "hi"), (6, "yo"), (7, "no"), (8, "x"), (9, "y"),
            ])
        }
    }

    impl DialogueTokenizer for MockTokenizer {
        fn token_id(&self, token: &str) -> Option<u32> {
            Self::words()
                .into_iter()
                .find(|(_, w)| *w == token)
                .map(|(id, _)| id)
        }

        fn encode(&self, _text: &str) -> Result<Vec<u32>> {
            unimplemented!("not used by the controller")
        }

        fn eos_id(&self) -> Result<u32> {
            Ok(2)
        }

        fn vocab_size(&self) -> usize {
            Self::words().len()
        }

        fn batch_decode(&self, sequences: &[Vec<u32>], skip_special: bool) -> Result<Vec<String>> {
            let words = Self::words();
            Ok(sequences
                .iter()
                .map(|seq| {
                    seq.iter()
                        .filter(|&&id| !(skip_special && id < 5))
                        .map(|id| words[id])
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .collect())
        }
    }

    /// Always continues the seed with "x y <eos>".
    struct StubModel {
        max_context: usize,
    }

    impl GenerativeModel<TestBackend> for StubModel {
        fn forward(&self, _input: ForwardInput<TestBackend>) -> ForwardOutput<TestBackend> {
            unreachable!("the controller never calls forward")
        }

        fn generate(&self, seed: &[u32], request: &GenerationRequest) -> Result<Vec<u32>> {
            let mut full = seed.to_vec();
            for token in [8, 9, request.eos_id] {
                if full.len() >= request.max_length {
                    break;
                }
                full.push(token);
            }
            Ok(full)
        }

        fn max_context_length(&self) -> usize {
            self.max_context
        }

        fn device(&self) -> <TestBackend as Backend>::Device {
            Default::default()
        }
    }

    fn encoded_sample() -> EncodedSample {
        EncodedSample {
            // dist: <bos> <spk1> hi <spk2> no <eos> pad pad
            // orig: <bos> <spk1> hi <spk2> yo <eos> pad pad
            input_ids: vec![
                vec![1, 3, 5, 4, 7, 2, 0, 0],
                vec![1, 3, 5, 4, 6, 2, 0, 0],
            ],
            token_type_ids: vec![vec![3, 3, 3, 4, 4, 4, 0, 0]; 2],
            lm_labels: vec![
                vec![0; 8],
                vec![0, 0, 0, 0, 6, 2, 0, 0],
            ],
            mc_token_ids: vec![5, 5],
            mc_label:     1,
        }
    }

    fn batch_of(n: usize) -> DialogueBatch<TestBackend> {
        let batcher = DialogueBatcher::<TestBackend>::new(Default::default());
        batcher.batch(vec![encoded_sample(); n], &Default::default())
    }

    fn inference() -> InferenceSection {
        InferenceSection {
            min_length:  1,
            max_length:  20,
            temperature: 1.0,
            top_k:       0,
            sample:      false,
        }
    }

    #[test]
    fn test_decode_bounds_cap_at_model_context() {
        assert_eq!(decode_bounds(10, 5, 50, 40), (15, 40));
    }

    #[test]
    fn test_decode_bounds_below_the_cap() {
        assert_eq!(decode_bounds(10, 5, 20, 1024), (15, 30));
    }

    #[test]
    fn test_strip_trailing_padding_keeps_interior_ids() {
        assert_eq!(strip_trailing_padding(&[5, 0, 6, 0, 0], 0), vec![5, 0, 6]);
        assert_eq!(strip_trailing_padding(&[0, 0], 0), Vec::<u32>::new());
        assert_eq!(strip_trailing_padding(&[5, 6], 0), vec![5, 6]);
    }

    #[test]
    fn test_differing_positions_isolate_the_decoy() {
        let orig = [1, 3, 5, 4, 6, 2, 0, 0];
        let dist = [1, 3, 5, 4, 7, 2, 0, 0];
        assert_eq!(differing_positions(&dist, &orig), vec![7]);
    }

    #[test]
    fn test_prime_history_appends_one_speaker2() {
        assert_eq!(prime_history(&[1, 5], 4), vec![1, 5, 4]);
    }

    #[test]
    fn test_greedy_sampling_picks_argmax() {
        let request = GenerationRequest {
            min_length: 0, max_length: 10, eos_id: 2, pad_id: 2,
            temperature: 1.0, top_k: 0, sample: false,
        };
        let mut rng = rand::thread_rng();
        let next = sample_token(vec![0.1, 0.3, 0.9, 0.2], &request, false, &mut rng).unwrap();
        assert_eq!(next, 2);
    }

    #[test]
    fn test_eos_suppressed_below_min_length() {
        let request = GenerationRequest {
            min_length: 5, max_length: 10, eos_id: 2, pad_id: 2,
            temperature: 1.0, top_k: 0, sample: false,
        };
        let mut rng = rand::thread_rng();
        // <eos> has the highest logit but is below min length
        let next = sample_token(vec![0.1, 0.3, 0.9, 0.2], &request, true, &mut rng).unwrap();
        assert_eq!(next, 1);
    }

    #[test]
    fn test_rows_slice_off_the_seed() {
        let controller = GenerationController::new(inference());
        let model = StubModel { max_context: 100 };

        let rows = controller.rows(&model, &MockTokenizer, &batch_of(2)).unwrap();
        assert_eq!(rows.len(), 2);
        for row in &rows {
            // Only the newly generated tokens, decoded
            assert_eq!(row.predicted, "x y");
            assert_eq!(row.target, "yo");
            assert_eq!(row.distractor, "no");
            // History keeps its control tokens
            assert!(row.original.contains("<speaker2>"));
            assert!(row.original.ends_with("<speaker2>"));
        }
    }

    #[test]
    fn test_batch_of_one_yields_exactly_one_row() {
        let controller = GenerationController::new(inference());
        let model = StubModel { max_context: 100 };

        let rows = controller.rows(&model, &MockTokenizer, &batch_of(1)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].predicted, "x y");
    }

    #[test]
    fn test_generation_respects_the_context_cap() {
        let controller = GenerationController::new(inference());
        // Seed length is 7 after priming; cap the context at 8
        let model = StubModel { max_context: 8 };

        let rows = controller.rows(&model, &MockTokenizer, &batch_of(1)).unwrap();
        // Only one token fits under the cap
        assert_eq!(rows[0].predicted, "x");
    }
}
