// SPDX-License-Identifier: Apache-2.0

//! Confirmation reruns of the most suspicious programs.
//!
//! Candidates are the DATA rows with the smallest non-negative p-values
//! whose program has never been rerun. Each is re-executed from its stored
//! source and follow-up snapshots, and every attempt becomes one RERUN row.

use std::collections::BTreeSet;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::differential::DifferentialExecutor;
use crate::morph_error::{MorphError, Result};
use crate::program;
use crate::reconcile::Reconciliation;
use crate::relations::{build_relation, Derivation};
use crate::store::{record_id, DataRecord, ProgramRole, RerunRecord, Store};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetestConfig {
    /// Run a retest round every this many iterations; 0 disables it.
    pub every: u64,
    pub top_k: usize,
    pub attempts: usize,
}

impl Default for RetestConfig {
    fn default() -> Self {
        RetestConfig {
            every: 0,
            top_k: 5,
            attempts: 3,
        }
    }
}

impl RetestConfig {
    pub fn validate(&self) -> Result<()> {
        if self.every > 0 && (self.top_k == 0 || self.attempts == 0) {
            return Err(MorphError::Config(
                "retest needs top_k >= 1 and attempts >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetestReport {
    pub programs: usize,
    pub attempts: usize,
    /// Attempts that reproduced a p-value below alpha.
    pub reproduced: usize,
    pub skipped: usize,
}

/// Up to `top_k` distinct programs by ascending p-value, excluding failed
/// detector runs and programs already in `rerun_index`.
pub fn select_candidates<'a>(
    data: &'a [DataRecord],
    rerun_index: &BTreeSet<String>,
    top_k: usize,
) -> Vec<&'a DataRecord> {
    let mut scored: Vec<(&DataRecord, f64)> = data
        .iter()
        .filter(|r| !rerun_index.contains(&r.program_id))
        .filter_map(|r| r.p_value.filter(|p| *p >= 0.0).map(|p| (r, p)))
        .collect();
    scored.sort_by(|a, b| a.1.total_cmp(&b.1));
    let mut seen = BTreeSet::new();
    scored
        .into_iter()
        .filter(|(r, _)| seen.insert(r.program_id.clone()))
        .take(top_k)
        .map(|(r, _)| r)
        .collect()
}

/// Rebuilds what the original iteration compared from its metadata record
/// and program snapshots.
fn load_derivation(store: &Store, program_id: &str) -> Result<(program::Program, Derivation, String)> {
    let metadata = store.read_metadata(program_id)?;
    let relation_name = metadata["relations"]
        .as_array()
        .and_then(|rs| rs.last())
        .and_then(|r| r["name"].as_str())
        .ok_or_else(|| {
            MorphError::MalformedProgram(format!("{}: metadata lists no relations", program_id))
        })?
        .to_string();
    let reconciliation: Reconciliation = match metadata.get("reconciliation") {
        Some(v) if !v.is_null() => serde_json::from_value(v.clone())?,
        _ => Reconciliation::Identity,
    };
    let baseline = program::split(&store.read_program(program_id, ProgramRole::Source)?)?;
    let followup = program::split(&store.read_program(program_id, ProgramRole::Followup)?)?;
    let derivation = Derivation {
        program: followup,
        metadata: Map::new(),
        reconciliation,
    };
    Ok((baseline, derivation, relation_name))
}

/// Re-executes one program `attempts` times, appending each attempt.
pub fn rerun_program(
    store: &Store,
    differential: &mut DifferentialExecutor,
    program_id: &str,
    attempts: usize,
) -> Result<Vec<RerunRecord>> {
    let (baseline, derivation, relation_name) = load_derivation(store, program_id)?;
    let relation = build_relation(&relation_name, None)?;
    let snapshot = program::reconstruct(&derivation.program);
    let prior = store.load_reruns()?.len() as u64;
    let mut out = Vec::with_capacity(attempts);
    for attempt in 0..attempts {
        let outcome = differential.run(&baseline, &derivation, relation.as_ref());
        let nonce = prior + attempt as u64;
        let record = RerunRecord {
            rerun_id: record_id(&[program_id.as_bytes(), &nonce.to_le_bytes()]),
            program_id: program_id.to_string(),
            attempt,
            shots: outcome.shots,
            timed_out: outcome.timed_out,
            test_name: outcome.verdict.as_ref().map(|v| v.test_name.clone()),
            statistic: outcome.verdict.as_ref().map(|v| v.statistic),
            p_value: outcome.verdict.as_ref().map(|v| v.p_value),
            exceptions: outcome.exceptions,
            followup_snapshot: snapshot.clone(),
        };
        debug!(
            "retest: {} attempt {} p_value={:?}",
            program_id, attempt, record.p_value
        );
        store.append_rerun(&record)?;
        out.push(record);
    }
    Ok(out)
}

/// One retest round over the current DATA table.
pub fn run_retest(
    store: &Store,
    differential: &mut DifferentialExecutor,
    config: &RetestConfig,
    alpha: f64,
) -> Result<RetestReport> {
    let data = store.load_data()?;
    let index = store.rerun_index()?;
    let candidates = select_candidates(&data, &index, config.top_k);
    let mut report = RetestReport::default();
    for candidate in candidates {
        match rerun_program(store, differential, &candidate.program_id, config.attempts) {
            Ok(records) => {
                report.programs += 1;
                report.attempts += records.len();
                report.reproduced += records
                    .iter()
                    .filter(|r| r.p_value.map_or(false, |p| (0.0..alpha).contains(&p)))
                    .count();
            }
            Err(e) => {
                warn!("retest: skipping {}: {}", candidate.program_id, e);
                report.skipped += 1;
            }
        }
    }
    info!(
        "retest: programs={} attempts={} reproduced={} skipped={}",
        report.programs, report.attempts, report.reproduced, report.skipped
    );
    Ok(report)
}

/// Reads the `divergence` entry of a metadata record, if any.
pub fn recorded_p_value(metadata: &Value) -> Option<f64> {
    metadata["divergence"]
        .as_object()?
        .values()
        .next()?
        .get("p_value")?
        .as_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::KsDetector;
    use crate::executor::ExecutorConfig;
    use crate::store::ExceptionRecord;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn row(id: &str, p: Option<f64>) -> DataRecord {
        DataRecord {
            program_id: id.to_string(),
            iteration: 0,
            seed: 0,
            shots: 10,
            relations: vec!["ChangeOptLevel".to_string()],
            timed_out: p.is_none(),
            test_name: p.map(|_| "ks".to_string()),
            statistic: p.map(|_| 0.0),
            p_value: p,
            exceptions: ExceptionRecord::default(),
        }
    }

    #[test]
    fn test_select_candidates() {
        let data = vec![
            row("a", Some(0.9)),
            row("b", Some(0.001)),
            row("c", Some(-1.0)),
            row("d", None),
            row("e", Some(0.2)),
            row("f", Some(0.0)),
        ];
        let index: BTreeSet<String> = ["f".to_string()].into_iter().collect();
        let picked: Vec<&str> = select_candidates(&data, &index, 2)
            .iter()
            .map(|r| r.program_id.as_str())
            .collect();
        assert_eq!(picked, vec!["b", "e"]);
        assert!(select_candidates(&data, &index, 0).is_empty());
    }

    #[test]
    fn test_recorded_p_value() {
        let meta = json!({"divergence": {"ks": {"statistic": 0.3, "p_value": 0.02}}});
        assert_eq!(recorded_p_value(&meta), Some(0.02));
        assert_eq!(recorded_p_value(&json!({"divergence": null})), None);
    }

    #[test]
    fn test_run_retest_appends_attempts_once() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let source = "# SECTION\n# NAME: EXECUTION\necho '{\"0\": 10}' > \"$QMORPH_RESULT_PATH\"\n";
        let followup = "# SECTION\n# NAME: EXECUTION\necho '{\"1\": 10}' > \"$QMORPH_RESULT_PATH\"\n";
        store.write_program("p1", ProgramRole::Source, source).unwrap();
        store.write_program("p1", ProgramRole::Followup, followup).unwrap();
        store
            .write_metadata(
                "p1",
                &json!({
                    "program_id": "p1",
                    "relations": [{"name": "ChangeOptLevel", "config": {}, "metadata": {}}],
                    "reconciliation": {"kind": "identity"},
                }),
            )
            .unwrap();
        store.append_data(&row("p1", Some(0.0001))).unwrap();
        // No snapshots for this one, so it is skipped.
        store.append_data(&row("p2", Some(0.01))).unwrap();

        let sh = ExecutorConfig {
            interpreter: "sh".to_string(),
            epilogue: String::new(),
            timeout_secs: 10,
            ..ExecutorConfig::default()
        };
        let mut differential =
            DifferentialExecutor::new(sh.build().unwrap(), sh.build().unwrap(), Box::new(KsDetector), 10);
        let config = RetestConfig {
            every: 1,
            top_k: 5,
            attempts: 2,
        };
        let report = run_retest(&store, &mut differential, &config, 0.05).unwrap();
        assert_eq!(
            report,
            RetestReport {
                programs: 1,
                attempts: 2,
                reproduced: 2,
                skipped: 1,
            }
        );
        let reruns = store.load_reruns().unwrap();
        assert_eq!(reruns.len(), 2);
        assert_ne!(reruns[0].rerun_id, reruns[1].rerun_id);
        assert_eq!(reruns[1].followup_snapshot, followup);

        // p1 is now in the index; p2 still lacks snapshots.
        let report = run_retest(&store, &mut differential, &config, 0.05).unwrap();
        assert_eq!(report.programs, 0);
        assert_eq!(store.load_reruns().unwrap().len(), 2);
    }
}
