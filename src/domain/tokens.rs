// ============================================================
// Layer 3 — Dialogue Control Tokens
// ============================================================
// The five control tokens every sequence is built from, and
// their resolved vocabulary ids. Sequence layout:
//
//   <bos> <speaker1> u1 <speaker2> u2 ... <speaker2> reply <eos>
//
// <speaker2> is also what primes generation: appended to a
// history, it tells the model the next turn is the bot's.

use anyhow::{Context, Result};

use crate::domain::traits::DialogueTokenizer;

pub const PAD_TOKEN: &str = "<pad>";
pub const BOS_TOKEN: &str = "<bos>";
pub const EOS_TOKEN: &str = "<eos>";
pub const SPEAKER1_TOKEN: &str = "<speaker1>";
pub const SPEAKER2_TOKEN: &str = "<speaker2>";

/// All control tokens, in the order the tokenizer store assigns ids.
pub const SPECIAL_TOKENS: [&str; 5] =
    [PAD_TOKEN, BOS_TOKEN, EOS_TOKEN, SPEAKER1_TOKEN, SPEAKER2_TOKEN];

/// Control-token ids resolved once against a tokenizer's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokens {
    pub pad:      u32,
    pub bos:      u32,
    pub eos:      u32,
    pub speaker1: u32,
    pub speaker2: u32,
}

impl SpecialTokens {
    /// Look up every control token; fails if the vocabulary was
    /// built without one of them.
    pub fn resolve<T: DialogueTokenizer + ?Sized>(tokenizer: &T) -> Result<Self> {
        let id = |token: &str| {
            tokenizer
                .token_id(token)
                .with_context(|| format!("Control token '{token}' missing from vocabulary"))
        };
        Ok(Self {
            pad:      id(PAD_TOKEN)?,
            bos:      id(BOS_TOKEN)?,
            eos:      id(EOS_TOKEN)?,
            speaker1: id(SPEAKER1_TOKEN)?,
            speaker2: id(SPEAKER2_TOKEN)?,
        })
    }
}
