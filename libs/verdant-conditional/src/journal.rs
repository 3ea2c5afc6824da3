//! Evaluation journal
//!
//! Independent daily log file per conditional recording every evaluation
//! pass: resolved values, rendered statement and result.

use crate::types::{short_id, EvaluationResult, ResolvedCondition};
use chrono::{Local, Utc};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

struct JournalFile {
    date: String,
    file: Option<File>,
}

/// Per-conditional evaluation log
///
/// Files live in `{log_root}/conditionals/{rule_id}/{YYYYMMDD}_{short_id}.log`.
pub struct EvaluationJournal {
    rule_id: String,
    log_dir: PathBuf,
    current: Mutex<JournalFile>,
}

impl EvaluationJournal {
    pub fn new(log_root: &Path, rule_id: &str) -> Self {
        let log_dir = log_root.join("conditionals").join(rule_id);
        if let Err(e) = fs::create_dir_all(&log_dir) {
            warn!("Journal dir err {:?}: {}", log_dir, e);
        }

        Self {
            rule_id: rule_id.to_string(),
            log_dir,
            current: Mutex::new(JournalFile {
                date: String::new(),
                file: None,
            }),
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Format: `c1=25 c2=40 | 25 > 20 and 40 < 50 | true`
    pub fn record(&self, values: &[ResolvedCondition], result: &EvaluationResult) {
        let values_str = if values.is_empty() {
            "-".to_string()
        } else {
            values
                .iter()
                .map(|v| format!("{}={}", v.placeholder(), v.value))
                .collect::<Vec<_>>()
                .join(" ")
        };
        self.write_line(&format!(
            "{} | {} | {}",
            values_str, result.rendered, result.outcome
        ));
    }

    /// Record a pass abandoned before evaluation
    pub fn record_abort(&self, reason: &str) {
        self.write_line(&format!("- | - | aborted: {}", reason));
    }

    fn write_line(&self, message: &str) {
        let today = Local::now().format("%Y%m%d").to_string();
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
        let short = short_id(&self.rule_id);

        let mut current = self.current.lock();
        if current.date != today {
            current.date = today.clone();
            let path = self.log_dir.join(format!("{}_{}.log", today, short));
            current.file = match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => Some(file),
                Err(e) => {
                    warn!("Journal open err {:?}: {}", path, e);
                    None
                },
            };
        }

        if let Some(file) = current.file.as_mut() {
            let line = format!("{} [COND] {} {}\n", timestamp, short, message);
            if let Err(e) = file.write_all(line.as_bytes()) {
                warn!("Journal write err: {}", e);
            }
        }
    }
}
