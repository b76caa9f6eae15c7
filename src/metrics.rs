use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};

/// Exponential of the mean per-token cross-entropy.
pub fn perplexity(loss: f64) -> f64 {
    loss.exp()
}

/// Whole minutes and leftover seconds of an epoch.
pub fn epoch_time(elapsed: Duration) -> (u64, u64) {
    let secs = elapsed.as_secs();
    (secs / 60, secs % 60)
}

#[derive(Clone, Debug, PartialEq)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub valid_loss: f64,
    pub elapsed: Duration,
}

impl EpochMetrics {
    pub fn train_ppl(&self) -> f64 {
        perplexity(self.train_loss)
    }

    pub fn valid_ppl(&self) -> f64 {
        perplexity(self.valid_loss)
    }

    pub fn is_improvement(&self, best_valid_loss: f64) -> bool {
        self.valid_loss < best_valid_loss
    }
}

/// Appends one CSV row per epoch.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    const HEADER: &'static str = "epoch,train_loss,train_ppl,valid_loss,valid_ppl,seconds";

    /// Opens `path`, writing the header only if the file does not exist yet.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let csv_path = path.as_ref().to_path_buf();
        if let Some(dir) = csv_path.parent() {
            fs::create_dir_all(dir)?;
        }
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "{}", Self::HEADER)?;
        }
        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;
        writeln!(
            f,
            "{},{:.6},{:.6},{:.6},{:.6},{:.3}",
            m.epoch,
            m.train_loss,
            m.train_ppl(),
            m.valid_loss,
            m.valid_ppl(),
            m.elapsed.as_secs_f64(),
        )?;

        tracing::debug!(
            "Logged epoch {} metrics to '{}'",
            m.epoch,
            self.csv_path.display()
        );
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(epoch: usize, valid_loss: f64) -> EpochMetrics {
        EpochMetrics {
            epoch,
            train_loss: 0.0,
            valid_loss,
            elapsed: Duration::from_millis(1500),
        }
    }

    #[test]
    fn perplexity_is_exp_loss() {
        assert_eq!(perplexity(0.0), 1.0);
        assert!((perplexity(2.0_f64.ln()) - 2.0).abs() < 1e-12);
        assert_eq!(metrics(1, 0.0).train_ppl(), 1.0);
    }

    #[test]
    fn epoch_time_splits_minutes() {
        assert_eq!(epoch_time(Duration::from_secs(125)), (2, 5));
        assert_eq!(epoch_time(Duration::from_millis(59_999)), (0, 59));
    }

    #[test]
    fn improvement_is_strict() {
        let m = metrics(2, 2.3);
        assert!(m.is_improvement(3.0));
        assert!(m.is_improvement(f64::INFINITY));
        assert!(!m.is_improvement(2.3));
    }

    #[test]
    fn appends_rows_under_a_single_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("metrics.csv");

        MetricsLogger::new(&path).unwrap().log(&metrics(1, 4.0)).unwrap();
        let logger = MetricsLogger::new(&path).unwrap();
        logger.log(&metrics(2, 3.5)).unwrap();

        let csv = fs::read_to_string(logger.csv_path()).unwrap();
        let lines = csv.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], MetricsLogger::HEADER);
        assert!(lines[1].starts_with("1,0.000000,1.000000,4.000000,"));
        assert!(lines[2].ends_with(",1.500"));
    }
}
