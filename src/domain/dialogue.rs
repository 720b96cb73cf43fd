// ============================================================
// Layer 3 — Dialogue Domain Type
// ============================================================
// One training record: a conversation history, the reply that
// actually followed it, and a decoy reply drawn from elsewhere
// in the corpus. The decoy is what the multiple-choice head
// learns to reject.
//
// Reference: Rust Book §5 (Structs and Methods)

use serde::{Deserialize, Serialize};

/// A single conversation exchange from the corpus.
///
/// Candidate ordering is fixed downstream: the distractor is
/// always candidate 0 and the true reply candidate 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueRecord {
    /// The conversation so far, one utterance per entry,
    /// alternating speakers starting with speaker 1
    pub history: Vec<String>,

    /// The response that actually followed the history
    pub reply: String,

    /// An incorrect candidate response from elsewhere in the corpus
    pub distractor: String,
}

impl DialogueRecord {
    pub fn new(
        history:    Vec<String>,
        reply:      impl Into<String>,
        distractor: impl Into<String>,
    ) -> Self {
        Self {
            history,
            reply:      reply.into(),
            distractor: distractor.into(),
        }
    }

    /// Number of utterances in the history
    pub fn turns(&self) -> usize {
        self.history.len()
    }
}
