//! Training summaries as JSON lines under `<saver>/sum/summary.jsonl`.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};
use crate::losses::LossValues;

const SUMMARY_DIR: &str = "sum";
const SUMMARY_FILE: &str = "summary.jsonl";

/// One logged iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    /// Iteration counter.
    pub iteration: usize,
    /// Fractional epoch, `iteration / iterations_per_epoch`.
    pub epoch: f64,
    /// Learning rate in effect.
    pub lr: f64,
    /// Loss terms of the iteration.
    #[serde(flatten)]
    pub losses: LossValues,
}

/// Appends [`SummaryRecord`]s to a JSON-lines file.
#[derive(Debug)]
pub struct SummaryWriter {
    path: PathBuf,
    file: File,
}

impl SummaryWriter {
    /// Open (or create) the summary file of a run directory.
    pub fn create(saver_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = saver_dir.as_ref().join(SUMMARY_DIR);
        fs::create_dir_all(&dir)?;
        let path = dir.join(SUMMARY_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    /// Location of the summary file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record.
    pub fn write(&mut self, record: &SummaryRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        writeln!(self.file, "{}", line)
            .and_then(|_| self.file.flush())
            .map_err(|e| TrainError::SummaryError(format!("{}: {}", self.path.display(), e)))
    }
}

/// Read every record of a summary file.
pub fn read_summary(path: impl AsRef<Path>) -> Result<Vec<SummaryRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}
