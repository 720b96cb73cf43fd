// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs and traits that define the core concepts
// of the system.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O or network calls
//   - NO ML-specific code
//   - Only plain Rust structs, enums, and traits
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// A single conversation record from the corpus
pub mod dialogue;

// One qualitative evaluation row (original/target/distractor/predicted)
pub mod eval_row;

// Dialogue control tokens and their resolved ids
pub mod tokens;

// Capability traits the orchestration layer depends on
pub mod traits;
