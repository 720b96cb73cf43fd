use anyhow::Result;
use burn::{
    nn::{
        attention::{
            generate_autoregressive_mask, MhaInput, MultiHeadAttention, MultiHeadAttentionConfig,
        },
        loss::CrossEntropyLossConfig,
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
};

use crate::ml::generation::GenerationRequest;

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally — do NOT add them again or you get conflicting impls.
#[derive(Config, Debug)]
pub struct DoubleHeadsConfig {
    pub vocab_size:  usize,
    pub max_seq_len: usize,
    pub d_model:     usize,
    pub num_heads:   usize,
    pub num_layers:  usize,
    pub d_ff:        usize,
    pub dropout:     f64,
    /// Padding id; doubles as the ignore value for LM labels
    pub pad_id:      usize,
}

impl DoubleHeadsConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> DoubleHeadsModel<B> {
        let token_embedding    = EmbeddingConfig::new(self.vocab_size, self.d_model).init(device);
        let position_embedding = EmbeddingConfig::new(self.max_seq_len, self.d_model).init(device);
        let layers: Vec<DecoderBlock<B>> = (0..self.num_layers)
            .map(|_| self.build_decoder_block(device))
            .collect();
        let final_norm = LayerNormConfig::new(self.d_model).init(device);
        let lm_head    = LinearConfig::new(self.d_model, self.vocab_size).init(device);
        let mc_head    = LinearConfig::new(self.d_model, 1).init(device);
        let dropout    = DropoutConfig::new(self.dropout).init();
        DoubleHeadsModel {
            token_embedding, position_embedding, layers,
            final_norm, lm_head, mc_head, dropout,
            max_seq_len: self.max_seq_len,
            pad_id:      self.pad_id,
        }
    }

    fn build_decoder_block<B: Backend>(&self, device: &B::Device) -> DecoderBlock<B> {
        let self_attn   = MultiHeadAttentionConfig::new(self.d_model, self.num_heads)
            .with_dropout(self.dropout)
            .init(device);
        let ffn_linear1 = LinearConfig::new(self.d_model, self.d_ff).init(device);
        let ffn_linear2 = LinearConfig::new(self.d_ff, self.d_model).init(device);
        let norm1   = LayerNormConfig::new(self.d_model).init(device);
        let norm2   = LayerNormConfig::new(self.d_model).init(device);
        let dropout = DropoutConfig::new(self.dropout).init();
        DecoderBlock { self_attn, ffn_linear1, ffn_linear2, norm1, norm2, dropout }
    }
}

#[derive(Module, Debug)]
pub struct DecoderBlock<B: Backend> {
    pub self_attn:   MultiHeadAttention<B>,
    pub ffn_linear1: Linear<B>,
    pub ffn_linear2: Linear<B>,
    pub norm1:       LayerNorm<B>,
    pub norm2:       LayerNorm<B>,
    pub dropout:     Dropout,
}

impl<B: Backend> DecoderBlock<B> {
    /// `mask` keeps attention causal — position i never attends
    /// to positions after i.
    pub fn forward(&self, x: Tensor<B, 3>, mask: Tensor<B, 3, Bool>) -> Tensor<B, 3> {
        let attn_output = self
            .self_attn
            .forward(MhaInput::self_attn(x.clone()).mask_attn(mask))
            .context;
        let x = self.norm1.forward(x + self.dropout.forward(attn_output));
        let ffn_out = self.ffn_linear2.forward(
            burn::tensor::activation::gelu(self.ffn_linear1.forward(x.clone()))
        );
        self.norm2.forward(x + self.dropout.forward(ffn_out))
    }
}

#[derive(Module, Debug)]
pub struct DoubleHeadsModel<B: Backend> {
    pub token_embedding:    Embedding<B>,
    pub position_embedding: Embedding<B>,
    pub layers:             Vec<DecoderBlock<B>>,
    pub final_norm:         LayerNorm<B>,
    pub lm_head:            Linear<B>,
    pub mc_head:            Linear<B>,
    pub dropout:            Dropout,
    pub max_seq_len:        usize,
    pub pad_id:             usize,
}

// ─── Capability contract ──────────────────────────────────────────────────────
/// What the orchestration layer needs from a sequence model:
/// a two-objective forward pass, autoregressive generation, and
/// the model's absolute context window. Tests substitute fixed
/// fake implementations.
pub trait GenerativeModel<B: Backend> {
    fn forward(&self, input: ForwardInput<B>) -> ForwardOutput<B>;

    /// Continue `seed` autoregressively until the request's
    /// length bounds or end-of-sequence id stop it. Returns the
    /// full sequence (seed + generated).
    fn generate(&self, seed: &[u32], request: &GenerationRequest) -> Result<Vec<u32>>;

    /// Absolute context window; generation never exceeds it
    fn max_context_length(&self) -> usize;

    fn device(&self) -> B::Device;
}

/// Named tensor inputs for one forward pass. The candidate
/// dimension is exactly 2: index 0 the distractor, index 1 the
/// true reply.
#[derive(Debug, Clone)]
pub struct ForwardInput<B: Backend> {
    /// [batch, 2, seq_len]
    pub input_ids: Tensor<B, 3, Int>,
    /// [batch, 2, seq_len]
    pub token_type_ids: Tensor<B, 3, Int>,
    /// [batch, 2] — singleton trailing dim already squeezed
    pub mc_token_ids: Tensor<B, 2, Int>,
    /// [batch, 2, seq_len]
    pub lm_labels: Tensor<B, 3, Int>,
    /// [batch] — singleton trailing dim already squeezed
    pub mc_labels: Tensor<B, 1, Int>,
}

#[derive(Debug, Clone)]
pub struct ForwardOutput<B: Backend> {
    pub lm_loss:   Tensor<B, 1>,
    pub mc_loss:   Tensor<B, 1>,
    /// [batch * 2, seq_len, vocab] — unused by the orchestration
    pub lm_logits: Tensor<B, 3>,
    /// [batch, 2]
    pub mc_logits: Tensor<B, 2>,
}

impl<B: Backend> DoubleHeadsModel<B> {
    /// Transformer body: embeddings in, final-normed hidden
    /// states out. `token_type_ids` is None during generation.
    pub(crate) fn hidden_states(
        &self,
        input_ids:      Tensor<B, 2, Int>,
        token_type_ids: Option<Tensor<B, 2, Int>>,
    ) -> Tensor<B, 3> {
        let [batch_size, seq_len] = input_ids.dims();

        let tok_emb = self.token_embedding.forward(input_ids);

        // Self-attention is permutation-invariant, so position must be injected explicitly.
        let positions = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &tok_emb.device())
            .unsqueeze::<2>()
            .expand([batch_size, seq_len]);
        let pos_emb = self.position_embedding.forward(positions);

        let mut x = tok_emb + pos_emb;
        if let Some(types) = token_type_ids {
            // Speaker markers are looked up in the token table
            x = x + self.token_embedding.forward(types);
        }
        let mut x = self.dropout.forward(x);

        let mask = generate_autoregressive_mask::<B>(batch_size, seq_len, &x.device());
        for layer in &self.layers {
            x = layer.forward(x, mask.clone());
        }
        self.final_norm.forward(x)
    }

    /// Language-model logits for a flat [batch, seq_len] input;
    /// the generation loop reads the last position.
    pub(crate) fn lm_logits_flat(&self, input_ids: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        self.lm_head.forward(self.hidden_states(input_ids, None))
    }

    /// Both objectives in one pass.
    ///
    /// LM loss is next-token prediction over the shifted labels;
    /// pad-labelled positions (history, padding, the whole
    /// distractor row) are excluded. MC loss classifies the
    /// correct candidate from the hidden state at each
    /// candidate's last real token.
    pub fn forward_heads(&self, input: ForwardInput<B>) -> ForwardOutput<B> {
        let [batch_size, n_cand, seq_len] = input.input_ids.dims();
        let flat = batch_size * n_cand;

        let flat_ids   = input.input_ids.reshape([flat, seq_len]);
        let flat_types = input.token_type_ids.reshape([flat, seq_len]);
        let hidden = self.hidden_states(flat_ids, Some(flat_types)); // [flat, seq, d]
        let d_model = hidden.dims()[2];

        let lm_logits = self.lm_head.forward(hidden.clone()); // [flat, seq, vocab]
        let vocab = lm_logits.dims()[2];

        // Shift: logits at position i predict the token at i + 1
        let pred = lm_logits
            .clone()
            .slice([0..flat, 0..seq_len - 1, 0..vocab])
            .reshape([flat * (seq_len - 1), vocab]);
        let target = input.lm_labels
            .reshape([flat, seq_len])
            .slice([0..flat, 1..seq_len])
            .reshape([flat * (seq_len - 1)]);

        let lm_ce = CrossEntropyLossConfig::new()
            .with_pad_tokens(Some(vec![self.pad_id]))
            .init(&hidden.device());
        let lm_loss = lm_ce.forward(pred, target);

        // Pool the hidden state at each candidate's last real token
        let idx = input.mc_token_ids
            .reshape([flat, 1, 1])
            .expand([flat, 1, d_model]);
        let pooled = hidden.gather(1, idx).flatten::<2>(0, 1); // [flat, d]
        let mc_logits = self.mc_head.forward(pooled).reshape([batch_size, n_cand]);

        let mc_ce = CrossEntropyLossConfig::new().init(&mc_logits.device());
        let mc_loss = mc_ce.forward(mc_logits.clone(), input.mc_labels);

        ForwardOutput { lm_loss, mc_loss, lm_logits, mc_logits }
    }
}
