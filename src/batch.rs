// SPDX-License-Identifier: Apache-2.0

//! Offline detection over stored result pairs, spread over a rayon pool.
//!
//! A job is a pair of files `<id>.a.json` and `<id>.b.json` holding the two
//! results, plus an optional `<id>.reconciliation.json`. Each worker builds
//! its own detector and writes `<id>.verdict.json` to the output directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::detectors::{self, DivergenceVerdict};
use crate::executor::RunResult;
use crate::morph_error::{MorphError, Result};
use crate::reconcile::Reconciliation;

#[derive(Debug, Clone, PartialEq)]
pub struct BatchJob {
    pub id: String,
    pub result_a: PathBuf,
    pub result_b: PathBuf,
    pub reconciliation: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchVerdict {
    pub id: String,
    pub verdict: DivergenceVerdict,
}

/// Pairs up result files in `dir`; ids with only one side are skipped.
pub fn discover_jobs(dir: &Path) -> Result<Vec<BatchJob>> {
    let mut sides: BTreeMap<String, (Option<PathBuf>, Option<PathBuf>)> = BTreeMap::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(id) = name.strip_suffix(".a.json") {
            sides.entry(id.to_string()).or_default().0 = Some(path.clone());
        } else if let Some(id) = name.strip_suffix(".b.json") {
            sides.entry(id.to_string()).or_default().1 = Some(path.clone());
        }
    }
    let mut jobs = Vec::new();
    for (id, pair) in sides {
        match pair {
            (Some(result_a), Some(result_b)) => {
                let reconciliation = dir.join(format!("{}.reconciliation.json", id));
                jobs.push(BatchJob {
                    reconciliation: reconciliation.exists().then_some(reconciliation),
                    id,
                    result_a,
                    result_b,
                });
            }
            _ => warn!("batch: {} has only one result file; skipping", id),
        }
    }
    debug!("batch: discovered {} jobs in {}", jobs.len(), dir.display());
    Ok(jobs)
}

fn read_json(path: &Path) -> Result<Value> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

fn run_job(job: &BatchJob, detector_name: &str) -> Result<DivergenceVerdict> {
    let detector = detectors::build_detector(detector_name)?;
    let a = match RunResult::from_json(&read_json(&job.result_a)?)? {
        RunResult::Single(map) => map,
        RunResult::Partitioned(_) => {
            return Err(MorphError::Detector(format!(
                "{}: result A must be a single count map",
                job.id
            )))
        }
    };
    let b = RunResult::from_json(&read_json(&job.result_b)?)?;
    let reconciliation: Reconciliation = match &job.reconciliation {
        Some(path) => serde_json::from_value(read_json(path)?)?,
        None => Reconciliation::Identity,
    };
    let b = reconciliation.apply(&b)?;
    Ok(detector.verdict(&a, &b))
}

/// Runs every job on a pool of `threads` workers and writes one verdict
/// file per job. Unreadable jobs yield a failed verdict rather than
/// aborting the batch.
pub fn run_batch(
    jobs: &[BatchJob],
    detector_name: &str,
    threads: usize,
    out_dir: &Path,
) -> Result<Vec<BatchVerdict>> {
    detectors::build_detector(detector_name)?;
    fs::create_dir_all(out_dir)?;
    let pool = ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .build()
        .map_err(|e| MorphError::Config(format!("cannot build thread pool: {}", e)))?;
    info!("batch: {} jobs on {} threads", jobs.len(), threads.max(1));

    let results: Vec<Result<BatchVerdict>> = pool.install(|| {
        jobs.par_iter()
            .map(|job| -> Result<BatchVerdict> {
                let verdict = run_job(job, detector_name).unwrap_or_else(|e| {
                    warn!("batch: {}: {}", job.id, e);
                    DivergenceVerdict::failed(detector_name, &e.to_string())
                });
                let out = BatchVerdict {
                    id: job.id.clone(),
                    verdict,
                };
                fs::write(
                    out_dir.join(format!("{}.verdict.json", job.id)),
                    serde_json::to_string_pretty(&out)?,
                )?;
                Ok(out)
            })
            .collect()
    });
    results.into_iter().collect()
}
