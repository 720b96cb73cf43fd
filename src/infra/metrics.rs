// ============================================================
// Layer 6 — Scalar Metrics Sink
// ============================================================
// Appends named scalar metrics to a CSV file, one row per
// emission in long format:
//
//   step,metric,value
//   12,loss,3.415000
//   12,ppl,28.204510
//   ...
//
// Training emits loss / mc_acc / lm_loss / ppl / mc_loss per
// step; evaluation emits the val_-prefixed counterparts.
//
// Reference: Rust Book §12 (I/O and File Handling)

use anyhow::Result;
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
};

/// Appends scalar metric rows to `metrics.csv` in the given directory.
pub struct ScalarLogger {
    csv_path: PathBuf,
}

impl ScalarLogger {
    /// Create the directory and write the CSV header if the file
    /// doesn't exist yet, so runs can append across restarts.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "step,metric,value")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one named scalar under the given step.
    pub fn log(&self, step: usize, metric: &str, value: f64) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)?;
        writeln!(f, "{},{},{:.6}", step, metric, value)?;
        Ok(())
    }

    /// Append several named scalars under the same step.
    pub fn log_all(&self, step: usize, metrics: &[(&str, f64)]) -> Result<()> {
        for (name, value) in metrics {
            self.log(step, name, *value)?;
        }
        Ok(())
    }

    pub fn csv_path(&self) -> &PathBuf {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("dialogue-lm-metrics-{tag}-{}", std::process::id()))
    }

    #[test]
    fn test_header_written_once() {
        let dir = scratch_dir("header");
        let logger = ScalarLogger::new(&dir).unwrap();
        logger.log(1, "loss", 3.5).unwrap();
        // Re-opening must not duplicate the header
        let logger = ScalarLogger::new(&dir).unwrap();
        logger.log(2, "loss", 3.1).unwrap();

        let text = fs::read_to_string(logger.csv_path()).unwrap();
        assert_eq!(text.matches("step,metric,value").count(), 1);
        assert_eq!(text.lines().count(), 3);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_log_all_appends_one_row_per_metric() {
        let dir = scratch_dir("all");
        let logger = ScalarLogger::new(&dir).unwrap();
        logger
            .log_all(7, &[("loss", 2.0), ("ppl", 7.389056), ("mc_acc", 0.5)])
            .unwrap();

        let text = fs::read_to_string(logger.csv_path()).unwrap();
        assert!(text.contains("7,loss,2.000000"));
        assert!(text.contains("7,ppl,7.389056"));
        assert!(text.contains("7,mc_acc,0.500000"));
        fs::remove_dir_all(&dir).ok();
    }
}
