// SPDX-License-Identifier: Apache-2.0

//! Execution results and the executor collaborator.
//!
//! The pipeline under test is a black box: a program is written to a
//! temporary file, run by an interpreter in a child process, and the value
//! bound to `RESULT` is read back as JSON from the path named by
//! [`RESULT_PATH_ENV`].

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::morph_error::{MorphError, Result};

pub const RESULT_PATH_ENV: &str = "QMORPH_RESULT_PATH";
pub const SHOTS_ENV: &str = "QMORPH_SHOTS";

/// Bitstring to count.
pub type CountMap = BTreeMap<String, u64>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunResult {
    Single(CountMap),
    /// One count map per independently executed partition.
    Partitioned(Vec<CountMap>),
}

impl RunResult {
    /// `{"0...0": shots}`, substituted when a run fails.
    pub fn sentinel(width: usize, shots: u64) -> RunResult {
        let mut map = CountMap::new();
        map.insert("0".repeat(width.max(1)), shots);
        RunResult::Single(map)
    }

    pub fn from_json(value: &Value) -> Result<RunResult> {
        match value {
            Value::Object(_) => Ok(RunResult::Single(count_map_from_json(value)?)),
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(MorphError::Execution(
                        "partitioned result has no partitions".to_string(),
                    ));
                }
                let maps = items
                    .iter()
                    .map(count_map_from_json)
                    .collect::<Result<Vec<_>>>()?;
                Ok(RunResult::Partitioned(maps))
            }
            other => Err(MorphError::Execution(format!(
                "RESULT must be a count map or a list of count maps, got {}",
                other
            ))),
        }
    }

    pub fn total_shots(&self) -> u64 {
        match self {
            RunResult::Single(m) => m.values().sum(),
            RunResult::Partitioned(maps) => maps.first().map_or(0, |m| m.values().sum()),
        }
    }
}

/// Strips register-group spaces and merges keys that collapse together.
pub fn normalize_count_map<'a>(entries: impl IntoIterator<Item = (&'a str, u64)>) -> Result<CountMap> {
    let mut out = CountMap::new();
    let mut width: Option<usize> = None;
    for (key, count) in entries {
        let bits: String = key.chars().filter(|c| !c.is_whitespace()).collect();
        if bits.is_empty() || !bits.chars().all(|c| c == '0' || c == '1') {
            return Err(MorphError::Execution(format!(
                "invalid bitstring {:?} in result",
                key
            )));
        }
        match width {
            Some(w) if w != bits.len() => {
                return Err(MorphError::Execution(format!(
                    "bitstring {:?} has width {}, expected {}",
                    key,
                    bits.len(),
                    w
                )))
            }
            _ => width = Some(bits.len()),
        }
        *out.entry(bits).or_insert(0) += count;
    }
    Ok(out)
}

fn count_map_from_json(value: &Value) -> Result<CountMap> {
    let obj = value.as_object().ok_or_else(|| {
        MorphError::Execution(format!("expected a count map object, got {}", value))
    })?;
    let mut entries = Vec::with_capacity(obj.len());
    for (key, v) in obj {
        let count = v
            .as_u64()
            .or_else(|| {
                v.as_f64()
                    .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                    .map(|f| f as u64)
            })
            .ok_or_else(|| {
                MorphError::Execution(format!("count for {:?} is not a non-negative integer", key))
            })?;
        entries.push((key.as_str(), count));
    }
    normalize_count_map(entries)
}

/// Collaborator that runs one program through the pipeline under test.
pub trait Executor: Send {
    fn name(&self) -> &str;

    /// Loads the program text to run.
    fn from_representation(&mut self, program_text: &str) -> Result<()>;

    fn execute(&mut self, shots: u64) -> Result<()>;

    fn get_result(&self) -> Result<RunResult>;
}

pub const DEFAULT_PYTHON_EPILOGUE: &str = "\
import json as _qmorph_json
import os as _qmorph_os
with open(_qmorph_os.environ['QMORPH_RESULT_PATH'], 'w') as _qmorph_f:
    _qmorph_json.dump(RESULT, _qmorph_f)
";

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_epilogue() -> String {
    DEFAULT_PYTHON_EPILOGUE.to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_kind() -> String {
    "subprocess".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Appended to every program before it is run.
    #[serde(default = "default_epilogue")]
    pub epilogue: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            kind: default_kind(),
            interpreter: default_interpreter(),
            args: Vec::new(),
            epilogue: default_epilogue(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

pub fn executor_names() -> Vec<&'static str> {
    vec!["subprocess"]
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<()> {
        if !executor_names().contains(&self.kind.as_str()) {
            return Err(MorphError::Config(format!(
                "unknown executor {:?}; expected one of {:?}",
                self.kind,
                executor_names()
            )));
        }
        if self.interpreter.trim().is_empty() {
            return Err(MorphError::Config("executor interpreter is empty".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(MorphError::Config("executor timeout_secs must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn build(&self) -> Result<Box<dyn Executor>> {
        self.validate()?;
        match self.kind.as_str() {
            "subprocess" => Ok(Box::new(SubprocessExecutor::new(self.clone()))),
            other => Err(MorphError::Config(format!("unknown executor {:?}", other))),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Runs a program with `interpreter args... <program file>` and a wall-clock
/// timeout.
#[derive(Debug)]
pub struct SubprocessExecutor {
    config: ExecutorConfig,
    timeout: Duration,
    program: Option<String>,
    result: Option<RunResult>,
}

impl SubprocessExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let timeout = config.timeout();
        SubprocessExecutor {
            config,
            timeout,
            program: None,
            result: None,
        }
    }

    /// Overrides the configured timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn tail(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

impl Executor for SubprocessExecutor {
    fn name(&self) -> &str {
        "subprocess"
    }

    fn from_representation(&mut self, program_text: &str) -> Result<()> {
        self.program = Some(program_text.to_string());
        self.result = None;
        Ok(())
    }

    fn execute(&mut self, shots: u64) -> Result<()> {
        let program = self.program.as_ref().ok_or_else(|| {
            MorphError::Execution("execute called before from_representation".to_string())
        })?;
        let dir = tempfile::Builder::new().prefix("qmorph-run-").tempdir()?;
        let program_path = dir.path().join("program.py");
        let result_path: PathBuf = dir.path().join("result.json");
        let stdout_path = dir.path().join("stdout.txt");
        let stderr_path = dir.path().join("stderr.txt");

        let mut text = program.clone();
        if !self.config.epilogue.is_empty() {
            if !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&self.config.epilogue);
        }
        fs::write(&program_path, text)?;

        let mut command = Command::new(&self.config.interpreter);
        command
            .args(&self.config.args)
            .arg(&program_path)
            .current_dir(dir.path())
            .env(RESULT_PATH_ENV, &result_path)
            .env(SHOTS_ENV, shots.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::from(fs::File::create(&stdout_path)?))
            .stderr(Stdio::from(fs::File::create(&stderr_path)?));
        info!("Running program: {:?}", command);

        let start = Instant::now();
        let mut child = command.spawn().map_err(|e| {
            MorphError::Execution(format!(
                "failed to spawn {}: {}",
                self.config.interpreter, e
            ))
        })?;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if start.elapsed() >= self.timeout {
                warn!(
                    "program exceeded {:?}; killing pid {}",
                    self.timeout,
                    child.id()
                );
                let _ = child.kill();
                let _ = child.wait();
                return Err(MorphError::Timeout(format!(
                    "program did not finish within {:?}",
                    self.timeout
                )));
            }
            thread::sleep(POLL_INTERVAL);
        };
        debug!("program exited with {} after {:?}", status, start.elapsed());

        if !status.success() {
            let stderr = fs::read_to_string(&stderr_path).unwrap_or_default();
            return Err(MorphError::Execution(format!(
                "program exited with {}: {}",
                status,
                tail(&stderr, 20)
            )));
        }
        let raw = fs::read_to_string(&result_path).map_err(|_| {
            MorphError::Execution("program finished without writing RESULT".to_string())
        })?;
        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| MorphError::Execution(format!("RESULT is not valid JSON: {}", e)))?;
        self.result = Some(RunResult::from_json(&value)?);
        Ok(())
    }

    fn get_result(&self) -> Result<RunResult> {
        self.result
            .clone()
            .ok_or_else(|| MorphError::Execution("no result available".to_string()))
    }
}

/// Loads, executes and returns the result in one step.
pub fn run_program(executor: &mut dyn Executor, program_text: &str, shots: u64) -> Result<RunResult> {
    executor.from_representation(program_text)?;
    executor.execute(shots)?;
    executor.get_result()
}
