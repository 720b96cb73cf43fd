// ============================================================
// Layer 6 — Evaluation Table Logger
// ============================================================
// Accumulates qualitative rows during an evaluation phase and
// flushes them to a TableSink at phase end under a
// phase-qualified name (textgen_val_<epoch>_step<step> for
// validation, textgen_test for the final test pass), so
// repeated phases never overwrite each other's artifacts.
//
// The sink is chosen once at construction: if a CSV sink can't
// be set up, a warning is logged and a no-op sink satisfying
// the same interface is bound instead — numeric metrics and
// training continue unaffected.
//
// Lifecycle per phase:
//   begin_phase() → append(rows) × N → end_phase(name)
// Single-writer: one evaluation batch at a time appends.

use anyhow::{Context, Result};
use std::{fs, io::Write, path::PathBuf};

use crate::domain::eval_row::EvalRow;
use crate::domain::traits::TableSink;

/// Fixed column order of every flushed table.
pub const TABLE_COLUMNS: [&str; 4] = ["Original", "Target", "Distractor", "Predicted"];

// ─── CsvTableSink ─────────────────────────────────────────────────────────────
/// Writes each table as `{dir}/{name}.csv`.
pub struct CsvTableSink {
    dir: PathBuf,
}

impl CsvTableSink {
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create table directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }
}

impl TableSink for CsvTableSink {
    fn write_table(&self, name: &str, columns: &[&str], rows: &[EvalRow]) -> Result<()> {
        let path = self.dir.join(format!("{name}.csv"));
        let mut f = fs::File::create(&path)
            .with_context(|| format!("Cannot create table file '{}'", path.display()))?;

        writeln!(f, "{}", columns.join(","))?;
        for row in rows {
            writeln!(
                f,
                "{},{},{},{}",
                csv_field(&row.original),
                csv_field(&row.target),
                csv_field(&row.distractor),
                csv_field(&row.predicted),
            )?;
        }

        tracing::info!("Wrote table '{}' ({} rows)", path.display(), rows.len());
        Ok(())
    }
}

/// Quote a field so commas, quotes and newlines in decoded text
/// survive the CSV round trip.
fn csv_field(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

// ─── NoopTableSink ────────────────────────────────────────────────────────────
/// Bound when no table sink is available; drops every table.
pub struct NoopTableSink;

impl TableSink for NoopTableSink {
    fn write_table(&self, _name: &str, _columns: &[&str], _rows: &[EvalRow]) -> Result<()> {
        Ok(())
    }
}

// ─── EvalTableLogger ──────────────────────────────────────────────────────────
/// Phase-scoped accumulator in front of a TableSink.
pub struct EvalTableLogger {
    rows: Vec<EvalRow>,
    sink: Box<dyn TableSink>,
}

impl EvalTableLogger {
    pub fn new(sink: Box<dyn TableSink>) -> Self {
        Self { rows: Vec::new(), sink }
    }

    /// Bind a CSV sink under `dir`, degrading to a no-op sink
    /// (with a single warning) if it cannot be created.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        match CsvTableSink::create(dir) {
            Ok(sink) => Self::new(Box::new(sink)),
            Err(e) => {
                tracing::warn!(
                    "Table sink unavailable ({e}). \
                     Qualitative tables will not be written; metrics and training continue."
                );
                Self::new(Box::new(NoopTableSink))
            }
        }
    }

    /// Start a fresh accumulator for a new evaluation phase.
    pub fn begin_phase(&mut self) {
        self.rows.clear();
    }

    /// Add this batch's rows to the current phase.
    pub fn append(&mut self, rows: Vec<EvalRow>) {
        self.rows.extend(rows);
    }

    /// Flush the accumulated rows under `name` and clear the
    /// accumulator so the next phase starts from empty.
    pub fn end_phase(&mut self, name: &str) -> Result<()> {
        self.sink.write_table(name, &TABLE_COLUMNS, &self.rows)?;
        self.rows.clear();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Captures flushed tables for assertions.
    struct RecordingSink {
        tables: Arc<Mutex<Vec<(String, usize)>>>,
    }

    impl TableSink for RecordingSink {
        fn write_table(&self, name: &str, _columns: &[&str], rows: &[EvalRow]) -> Result<()> {
            self.tables.lock().unwrap().push((name.to_string(), rows.len()));
            Ok(())
        }
    }

    fn row(tag: &str) -> EvalRow {
        EvalRow::new(format!("orig {tag}"), "target", "decoy", "pred")
    }

    #[test]
    fn test_flush_sends_all_rows_then_clears() {
        let tables = Arc::new(Mutex::new(Vec::new()));
        let mut logger = EvalTableLogger::new(Box::new(RecordingSink { tables: tables.clone() }));

        logger.begin_phase();
        logger.append(vec![row("a"), row("b")]);
        logger.append(vec![row("c")]);
        assert_eq!(logger.len(), 3);

        logger.end_phase("textgen_val_0_step10").unwrap();
        assert!(logger.is_empty());

        let seen = tables.lock().unwrap();
        assert_eq!(seen.as_slice(), &[("textgen_val_0_step10".to_string(), 3)]);
    }

    #[test]
    fn test_next_phase_starts_from_empty() {
        let tables = Arc::new(Mutex::new(Vec::new()));
        let mut logger = EvalTableLogger::new(Box::new(RecordingSink { tables: tables.clone() }));

        logger.begin_phase();
        logger.append(vec![row("a")]);
        logger.end_phase("textgen_val_0_step5").unwrap();

        logger.begin_phase();
        logger.append(vec![row("b"), row("c")]);
        logger.end_phase("textgen_test").unwrap();

        let seen = tables.lock().unwrap();
        assert_eq!(seen[0].1, 1);
        assert_eq!(seen[1], ("textgen_test".to_string(), 2));
    }

    #[test]
    fn test_csv_field_escapes_quotes() {
        assert_eq!(csv_field("a \"b\" c"), "\"a \"\"b\"\" c\"");
    }

    #[test]
    fn test_csv_sink_writes_header_and_rows() {
        let dir = std::env::temp_dir()
            .join(format!("dialogue-lm-tables-{}", std::process::id()));
        let sink = CsvTableSink::create(&dir).unwrap();
        sink.write_table("textgen_test", &TABLE_COLUMNS, &[row("a")]).unwrap();

        let text = fs::read_to_string(dir.join("textgen_test.csv")).unwrap();
        assert!(text.starts_with("Original,Target,Distractor,Predicted\n"));
        assert!(text.contains("\"orig a\""));
        fs::remove_dir_all(&dir).ok();
    }
}
