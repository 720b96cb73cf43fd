// ============================================================
// Layer 3 — Evaluation Row
// ============================================================
// One row of the qualitative comparison table produced during
// an evaluation phase. All four fields are decoded text;
// the row is immutable once created.

/// Decoded texts for one evaluation example.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalRow {
    /// The conversation history fed to the model, decoded with
    /// control tokens intact so the structure stays inspectable
    pub original: String,

    /// The ground-truth reply
    pub target: String,

    /// The decoy candidate
    pub distractor: String,

    /// What the model generated after the history
    pub predicted: String,
}

impl EvalRow {
    pub fn new(
        original:   impl Into<String>,
        target:     impl Into<String>,
        distractor: impl Into<String>,
        predicted:  impl Into<String>,
    ) -> Self {
        Self {
            original:   original.into(),
            target:     target.into(),
            distractor: distractor.into(),
            predicted:  predicted.into(),
        }
    }
}
