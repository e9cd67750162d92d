//! Scalar writer for a run directory
//!
//! Every scalar is appended to `scalars.jsonl` as one JSON object per line.
//! The run configuration and augmentation descriptions are written next to it
//! as `args.json` and `augments.json`.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::utils::error::Result;

pub const SCALARS_FILE: &str = "scalars.jsonl";
pub const ARGS_FILE: &str = "args.json";
pub const AUGMENTS_FILE: &str = "augments.json";

/// One logged scalar value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarRecord {
    pub tag: String,
    pub step: usize,
    pub value: f64,
    pub wall_time: String,
}

pub struct ScalarWriter {
    log_dir: PathBuf,
    out: BufWriter<File>,
}

impl ScalarWriter {
    /// Create the run directory (if needed) and open its scalar file for appending
    pub fn create(log_dir: impl AsRef<Path>) -> Result<Self> {
        let log_dir = log_dir.as_ref().to_path_buf();
        fs::create_dir_all(&log_dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join(SCALARS_FILE))?;

        Ok(Self {
            log_dir,
            out: BufWriter::new(file),
        })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        let record = ScalarRecord {
            tag: tag.to_string(),
            step,
            value,
            wall_time: chrono::Local::now().to_rfc3339(),
        };
        serde_json::to_writer(&mut self.out, &record)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    /// Write a serializable value as pretty JSON under the run directory
    pub fn write_json<T: Serialize>(&self, file_name: &str, value: &T) -> Result<PathBuf> {
        let path = self.log_dir.join(file_name);
        fs::write(&path, serde_json::to_string_pretty(value)?)?;
        Ok(path)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

impl Drop for ScalarWriter {
    fn drop(&mut self) {
        let _ = self.out.flush();
    }
}

/// Read back every record of a scalar file
pub fn read_scalars(path: impl AsRef<Path>) -> Result<Vec<ScalarRecord>> {
    let content = fs::read_to_string(path)?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(Into::into))
        .collect()
}
