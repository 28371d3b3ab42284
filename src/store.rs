// SPDX-License-Identifier: Apache-2.0

//! Append-only persistent store.
//!
//! Layout under the output directory:
//!
//! ```text
//! data.jsonl              one DataRecord per generated program
//! rerun.jsonl             one RerunRecord per confirmation attempt
//! metadata/<id>.json      full metadata record of a program
//! programs/<id>_source.py, programs/<id>_followup.py
//! ```
//!
//! Each record is written with a single `write_all` of one line; a torn or
//! otherwise unreadable line is skipped with a warning when loading.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::morph_error::{MorphError, Result};

pub const DATA_FILE: &str = "data.jsonl";
pub const RERUN_FILE: &str = "rerun.jsonl";
pub const METADATA_DIR: &str = "metadata";
pub const PROGRAMS_DIR: &str = "programs";

/// Exception text captured for each side of a differential run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    pub source: Option<String>,
    pub followup: Option<String>,
}

impl ExceptionRecord {
    pub fn is_empty(&self) -> bool {
        self.source.is_none() && self.followup.is_none()
    }
}

/// One row of the DATA table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    pub program_id: String,
    pub iteration: u64,
    pub seed: u64,
    pub shots: u64,
    pub relations: Vec<String>,
    pub timed_out: bool,
    /// Flattened divergence columns; absent for incomplete iterations.
    pub test_name: Option<String>,
    pub statistic: Option<f64>,
    pub p_value: Option<f64>,
    pub exceptions: ExceptionRecord,
}

/// One row of the RERUN table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerunRecord {
    pub rerun_id: String,
    pub program_id: String,
    pub attempt: usize,
    pub shots: u64,
    pub timed_out: bool,
    pub test_name: Option<String>,
    pub statistic: Option<f64>,
    pub p_value: Option<f64>,
    pub exceptions: ExceptionRecord,
    /// Follow-up program text that was executed.
    pub followup_snapshot: String,
}

/// Short hex id derived from `parts`; stable across runs.
pub fn record_id(parts: &[&[u8]]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hasher.finalize().to_hex().as_str()[..16].to_string()
}

/// Id of the program generated at `iteration` of a campaign seeded with `seed`.
pub fn program_id(seed: u64, iteration: u64) -> String {
    record_id(&[&seed.to_le_bytes(), &iteration.to_le_bytes()])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramRole {
    Source,
    Followup,
}

impl ProgramRole {
    fn suffix(self) -> &'static str {
        match self {
            ProgramRole::Source => "source",
            ProgramRole::Followup => "followup",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

fn check_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(MorphError::Config(format!("invalid record id {:?}", id)))
    }
}

impl Store {
    /// Opens (creating if needed) the store rooted at `root`.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root.join(METADATA_DIR))?;
        fs::create_dir_all(root.join(PROGRAMS_DIR))?;
        debug!("store: opened {}", root.display());
        Ok(Store {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn append_line<T: Serialize>(&self, file: &str, record: &T) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(file))?;
        f.write_all(line.as_bytes())?;
        Ok(())
    }

    fn load_lines<T: DeserializeOwned>(&self, file: &str) -> Result<Vec<T>> {
        let path = self.root.join(file);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&path)?);
        let mut out = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => out.push(record),
                Err(e) => warn!(
                    "store: skipping unreadable line {} of {}: {}",
                    lineno + 1,
                    path.display(),
                    e
                ),
            }
        }
        Ok(out)
    }

    pub fn append_data(&self, record: &DataRecord) -> Result<()> {
        self.append_line(DATA_FILE, record)
    }

    pub fn append_rerun(&self, record: &RerunRecord) -> Result<()> {
        self.append_line(RERUN_FILE, record)
    }

    pub fn load_data(&self) -> Result<Vec<DataRecord>> {
        self.load_lines(DATA_FILE)
    }

    pub fn load_reruns(&self) -> Result<Vec<RerunRecord>> {
        self.load_lines(RERUN_FILE)
    }

    /// Program ids that already have at least one rerun.
    pub fn rerun_index(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .load_reruns()?
            .into_iter()
            .map(|r| r.program_id)
            .collect())
    }

    fn metadata_path(&self, program_id: &str) -> PathBuf {
        self.root
            .join(METADATA_DIR)
            .join(format!("{}.json", program_id))
    }

    pub fn write_metadata(&self, program_id: &str, metadata: &Value) -> Result<()> {
        check_id(program_id)?;
        fs::write(
            self.metadata_path(program_id),
            serde_json::to_string_pretty(metadata)?,
        )?;
        Ok(())
    }

    pub fn read_metadata(&self, program_id: &str) -> Result<Value> {
        check_id(program_id)?;
        let text = fs::read_to_string(self.metadata_path(program_id))?;
        Ok(serde_json::from_str(&text)?)
    }

    fn program_path(&self, program_id: &str, role: ProgramRole) -> PathBuf {
        self.root
            .join(PROGRAMS_DIR)
            .join(format!("{}_{}.py", program_id, role.suffix()))
    }

    pub fn write_program(&self, program_id: &str, role: ProgramRole, text: &str) -> Result<()> {
        check_id(program_id)?;
        fs::write(self.program_path(program_id, role), text)?;
        Ok(())
    }

    pub fn read_program(&self, program_id: &str, role: ProgramRole) -> Result<String> {
        check_id(program_id)?;
        Ok(fs::read_to_string(self.program_path(program_id, role))?)
    }
}
