// ============================================================
// Layer 4 — Sample Encoder
// ============================================================
// Renders one dialogue record into the two-candidate schema the
// model trains on. Candidate 0 is the distractor, candidate 1
// the true reply; both share the same history prefix:
//
//   <bos> <spk1> u1 <spk2> u2 ... <spk2> candidate <eos>
//
// Token-type ids carry the active speaker marker at every
// position. LM labels are pad everywhere except the true
// reply's tokens and its <eos>, so the language-model loss only
// trains on the response (the pad id doubles as the label
// ignore value). The multiple-choice head reads the hidden
// state at each candidate's <eos>, so mc_token_ids records that
// index per candidate.
//
// Reference: Rust Book §8 (Vectors)

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::domain::dialogue::DialogueRecord;
use crate::domain::tokens::SpecialTokens;
use crate::domain::traits::DialogueTokenizer;

/// One fully tokenised and padded training sample.
/// Outer Vec over the two candidates, inner Vec over positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedSample {
    pub input_ids:      Vec<Vec<u32>>,
    pub token_type_ids: Vec<Vec<u32>>,
    pub lm_labels:      Vec<Vec<u32>>,
    /// Index of each candidate's last real token (its <eos>)
    pub mc_token_ids:   Vec<u32>,
    /// Index of the correct candidate (always 1 by construction)
    pub mc_label:       u32,
}

pub struct SampleEncoder<'a, T: DialogueTokenizer> {
    tokenizer:   &'a T,
    special:     SpecialTokens,
    max_seq_len: usize,
}

impl<'a, T: DialogueTokenizer> SampleEncoder<'a, T> {
    pub fn new(tokenizer: &'a T, special: SpecialTokens, max_seq_len: usize) -> Self {
        Self { tokenizer, special, max_seq_len }
    }

    pub fn encode_all(&self, records: &[DialogueRecord]) -> Result<Vec<EncodedSample>> {
        records.iter().map(|r| self.encode_record(r)).collect()
    }

    /// Encode one record into both candidate sequences.
    pub fn encode_record(&self, record: &DialogueRecord) -> Result<EncodedSample> {
        let history: Vec<Vec<u32>> = record
            .history
            .iter()
            .map(|u| self.tokenizer.encode(u))
            .collect::<Result<_>>()?;
        let distractor = self.tokenizer.encode(&record.distractor)?;
        let reply      = self.tokenizer.encode(&record.reply)?;

        let mut input_ids      = Vec::with_capacity(2);
        let mut token_type_ids = Vec::with_capacity(2);
        let mut lm_labels      = Vec::with_capacity(2);
        let mut mc_token_ids   = Vec::with_capacity(2);

        // Candidate 0 is the distractor, candidate 1 the true reply
        for (candidate, is_reply) in [(&distractor, false), (&reply, true)] {
            let (ids, types, labels, mc_idx) = self.build_candidate(&history, candidate, is_reply);
            input_ids.push(ids);
            token_type_ids.push(types);
            lm_labels.push(labels);
            mc_token_ids.push(mc_idx);
        }

        Ok(EncodedSample {
            input_ids,
            token_type_ids,
            lm_labels,
            mc_token_ids,
            mc_label: 1,
        })
    }

    fn build_candidate(
        &self,
        history:   &[Vec<u32>],
        candidate: &[u32],
        is_reply:  bool,
    ) -> (Vec<u32>, Vec<u32>, Vec<u32>, u32) {
        let sp = self.special;

        // Drop the oldest turns until the sequence fits.
        // Overhead: <bos> + one marker per turn + marker + candidate + <eos>
        let mut start = 0;
        loop {
            let kept: usize = history[start..].iter().map(|u| u.len() + 1).sum();
            let total = 1 + kept + 1 + candidate.len() + 1;
            if total <= self.max_seq_len || start + 1 >= history.len() {
                break;
            }
            start += 1;
        }
        let kept = &history[start..];

        // <bos> shares the type of the first following segment
        let first_type = if kept.is_empty() {
            sp.speaker2
        } else {
            speaker_of(kept.len(), 0, sp)
        };
        let mut ids    = vec![sp.bos];
        let mut types  = vec![first_type];
        let mut labels = vec![sp.pad];

        for (turn, utterance) in kept.iter().enumerate() {
            let speaker = speaker_of(kept.len(), turn, sp);
            ids.push(speaker);
            types.push(speaker);
            labels.push(sp.pad);
            for &token in utterance {
                ids.push(token);
                types.push(speaker);
                labels.push(sp.pad);
            }
        }

        // The candidate is always the bot's turn
        ids.push(sp.speaker2);
        types.push(sp.speaker2);
        labels.push(sp.pad);
        for &token in candidate {
            ids.push(token);
            types.push(sp.speaker2);
            labels.push(if is_reply { token } else { sp.pad });
        }
        ids.push(sp.eos);
        types.push(sp.speaker2);
        labels.push(if is_reply { sp.eos } else { sp.pad });

        // Hard cap for over-long candidates; the last real token
        // must stay an <eos> so the MC head has a stable anchor
        if ids.len() > self.max_seq_len {
            ids.truncate(self.max_seq_len - 1);
            types.truncate(self.max_seq_len - 1);
            labels.truncate(self.max_seq_len - 1);
            ids.push(sp.eos);
            types.push(sp.speaker2);
            labels.push(if is_reply { sp.eos } else { sp.pad });
        }

        let mc_idx = (ids.len() - 1) as u32;

        while ids.len() < self.max_seq_len {
            ids.push(sp.pad);
            types.push(sp.pad);
            labels.push(sp.pad);
        }

        (ids, types, labels, mc_idx)
    }
}

/// Speaker marker for history turn `turn` out of `turns`: the
/// final turn belongs to speaker 1 (the user), alternating
/// backwards from there.
fn speaker_of(turns: usize, turn: usize, sp: SpecialTokens) -> u32 {
    if (turns - 1 - turn) % 2 == 0 {
        sp.speaker1
    } else {
        sp.speaker2
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Fixed-vocabulary tokenizer: every distinct word gets the
    /// next free id above the control tokens.
    struct MockTokenizer {
        vocab: HashMap<String, u32>,
    }

    impl MockTokenizer {
        fn new(words: &[&str]) -> Self {
            let mut vocab = HashMap::new();
            for (id, token) in crate::domain::tokens::SPECIAL_TOKENS.iter().enumerate() {
                vocab.insert(token.to_string(), id as u32);
            }
            for word in words {
                let next = vocab.len() as u32;
                vocab.entry(word.to_string()).or_insert(next);
            }
            Self { vocab }
        }
    }

    impl DialogueTokenizer for MockTokenizer {
        fn token_id(&self, token: &str) -> Option<u32> {
            self.vocab.get(token).copied()
        }

        fn encode(&self, text: &str) -> Result<Vec<u32>> {
            text.split_whitespace()
                .map(|w| {
                    self.vocab
                        .get(w)
                        .copied()
                        .ok_or_else(|| anyhow::anyhow!("unknown word '{w}'"))
                })
                .collect()
        }

        fn eos_id(&self) -> Result<u32> {
            Ok(2)
        }

        fn vocab_size(&self) -> usize {
            self.vocab.len()
        }

        fn batch_decode(&self, sequences: &[Vec<u32>], skip_special: bool) -> Result<Vec<String>> {
            let reverse: HashMap<u32, &str> =
                self.vocab.iter().map(|(w, &id)| (id, w.as_str())).collect();
            Ok(sequences
                .iter()
                .map(|seq| {
                    seq.iter()
                        .filter(|&&id| !(skip_special && id < 5))
                        .map(|id| reverse[id])
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .collect())
        }
    }

    fn special() -> SpecialTokens {
        SpecialTokens { pad: 0, bos: 1, eos: 2, speaker1: 3, speaker2: 4 }
    }

    fn sample() -> EncodedSample {
        let tokenizer = MockTokenizer::new(&["hi", "hello", "great", "noon"]);
        let encoder = SampleEncoder::new(&tokenizer, special(), 16);
        let record = DialogueRecord::new(vec!["hi".to_string()], "great", "noon");
        encoder.encode_record(&record).unwrap()
    }

    #[test]
    fn test_distractor_is_candidate_zero() {
        let tokenizer = MockTokenizer::new(&["hi", "hello", "great", "noon"]);
        let s = sample();
        let noon = tokenizer.token_id("noon").unwrap();
        let great = tokenizer.token_id("great").unwrap();
        assert!(s.input_ids[0].contains(&noon));
        assert!(s.input_ids[1].contains(&great));
        assert_eq!(s.mc_label, 1);
    }

    #[test]
    fn test_labels_only_cover_the_true_reply() {
        let s = sample();
        let sp = special();
        // Distractor row: no supervision at all
        assert!(s.lm_labels[0].iter().all(|&l| l == sp.pad));
        // Reply row: exactly the reply token and its <eos>
        let labelled: Vec<u32> = s.lm_labels[1]
            .iter()
            .copied()
            .filter(|&l| l != sp.pad)
            .collect();
        assert_eq!(labelled.last(), Some(&sp.eos));
        assert_eq!(labelled.len(), 2); // "great" + <eos>
    }

    #[test]
    fn test_mc_token_ids_point_at_eos() {
        let s = sample();
        for (cand, &idx) in s.input_ids.iter().zip(&s.mc_token_ids) {
            assert_eq!(cand[idx as usize], special().eos);
        }
    }

    #[test]
    fn test_sequences_padded_to_fixed_length() {
        let s = sample();
        for cand in 0..2 {
            assert_eq!(s.input_ids[cand].len(), 16);
            assert_eq!(s.token_type_ids[cand].len(), 16);
            assert_eq!(s.lm_labels[cand].len(), 16);
        }
    }

    #[test]
    fn test_history_alternates_speakers_ending_on_speaker1() {
        let tokenizer = MockTokenizer::new(&["a", "b", "c", "x", "y"]);
        let encoder = SampleEncoder::new(&tokenizer, special(), 32);
        let record = DialogueRecord::new(
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            "x",
            "y",
        );
        let s = encoder.encode_record(&record).unwrap();
        let sp = special();

        // Turns: a=<spk1>, b=<spk2>, c=<spk1>; candidate=<spk2>
        let markers: Vec<u32> = s.input_ids[1]
            .iter()
            .copied()
            .filter(|&t| t == sp.speaker1 || t == sp.speaker2)
            .collect();
        assert_eq!(markers, vec![sp.speaker1, sp.speaker2, sp.speaker1, sp.speaker2]);
    }

    #[test]
    fn test_long_history_drops_oldest_turns_first() {
        let tokenizer = MockTokenizer::new(&["a", "b", "c", "x", "y"]);
        let encoder = SampleEncoder::new(&tokenizer, special(), 10);
        let record = DialogueRecord::new(
            vec!["a a a".to_string(), "b".to_string(), "c".to_string()],
            "x",
            "y",
        );
        let s = encoder.encode_record(&record).unwrap();
        let a = tokenizer.token_id("a").unwrap();
        let c = tokenizer.token_id("c").unwrap();

        assert!(!s.input_ids[1].contains(&a));
        assert!(s.input_ids[1].contains(&c));
        assert!(s.input_ids[1].len() <= 10);
    }
}
