//! Training progress logging
//!
//! - Structured per-interval records with averaged losses
//! - Timestamped output to stderr, optionally mirrored to a log file
//! - Swappable sink so workers beyond rank 0 can stay silent

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use crate::error::Result;

/// One averaged training-progress line
#[derive(Debug, Clone)]
pub struct TrainLogRecord {
    pub algorithm: String,
    pub task_name: String,
    pub task_id: usize,
    /// 1-based epoch in progress
    pub cur_epoch: usize,
    pub max_epochs: usize,
    pub cur_iter: usize,
    pub max_iters: usize,
    pub lr: f32,
    /// Loss components averaged over the interval
    pub losses: BTreeMap<String, f32>,
}

impl TrainLogRecord {
    fn render(&self) -> String {
        let mut line = format!(
            "[{} {}] task {} epoch {}/{} iter {}/{} lr {:.6}",
            self.algorithm,
            self.task_name,
            self.task_id,
            self.cur_epoch,
            self.max_epochs,
            self.cur_iter,
            self.max_iters,
            self.lr,
        );
        for (name, value) in &self.losses {
            let _ = write!(line, " {name} {value:.5}");
        }
        line
    }
}

/// Sink for progress lines
pub trait TrainLogger: Send {
    /// Free-form message
    fn info(&self, message: &str);

    /// Averaged training-interval record
    fn record(&self, record: &TrainLogRecord) {
        self.info(&record.render());
    }
}

/// Timestamped logger writing to stderr and optionally a file
pub struct LocalLogger {
    file: Option<Mutex<File>>,
}

impl LocalLogger {
    pub fn stderr_only() -> Self {
        Self { file: None }
    }

    /// Also append every line to `path`
    pub fn with_file(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Some(Mutex::new(file)),
        })
    }
}

impl TrainLogger for LocalLogger {
    fn info(&self, message: &str) {
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let line = format!("{stamp} {message}");
        eprintln!("{line}");
        if let Some(file) = &self.file {
            if let Ok(mut f) = file.lock() {
                let _ = writeln!(f, "{line}");
            }
        }
    }
}

/// Discards everything; used on non-primary workers
pub struct NullLogger;

impl TrainLogger for NullLogger {
    fn info(&self, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_renders_all_components() {
        let mut losses = BTreeMap::new();
        losses.insert("loss_seg".to_string(), 1.25);
        losses.insert("loss_kd".to_string(), 0.5);
        losses.insert("loss_total".to_string(), 1.75);
        let record = TrainLogRecord {
            algorithm: "mib".to_string(),
            task_name: "offline-15-5".to_string(),
            task_id: 1,
            cur_epoch: 3,
            max_epochs: 30,
            cur_iter: 120,
            max_iters: 900,
            lr: 0.00125,
            losses,
        };
        let line = record.render();
        assert!(line.contains("task 1"));
        assert!(line.contains("epoch 3/30"));
        assert!(line.contains("iter 120/900"));
        assert!(line.contains("loss_kd 0.50000"));
        assert!(line.contains("loss_total 1.75000"));
    }

    #[test]
    fn test_file_logger_appends_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("train.log");
        let logger = LocalLogger::with_file(&path).unwrap();
        logger.info("first");
        logger.info("second");
        let body = std::fs::read_to_string(&path).unwrap();
        assert_eq!(body.lines().count(), 2);
        assert!(body.lines().nth(1).unwrap().ends_with("second"));
    }
}
