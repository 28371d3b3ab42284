// SPDX-License-Identifier: Apache-2.0

//! Runs a baseline and its follow-up on two executors and compares them.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::detectors::{Detector, DivergenceVerdict};
use crate::executor::{run_program, Executor, RunResult};
use crate::morph_error::MorphError;
use crate::program::{self, Program};
use crate::queries;
use crate::relations::{Derivation, MetamorphicRelation};
use crate::store::ExceptionRecord;

/// What happened on one side of a differential run.
#[derive(Debug, Clone, PartialEq)]
pub enum SideRun {
    Completed(RunResult),
    /// The program raised; the sentinel stands in for its output.
    Failed { sentinel: RunResult, error: String },
    TimedOut(String),
}

impl SideRun {
    fn result(&self) -> Option<&RunResult> {
        match self {
            SideRun::Completed(r) => Some(r),
            SideRun::Failed { sentinel, .. } => Some(sentinel),
            SideRun::TimedOut(_) => None,
        }
    }

    fn error(&self) -> Option<String> {
        match self {
            SideRun::Completed(_) => None,
            SideRun::Failed { error, .. } => Some(error.clone()),
            SideRun::TimedOut(msg) => Some(msg.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifferentialOutcome {
    pub shots: u64,
    pub baseline: Option<RunResult>,
    pub followup: Option<RunResult>,
    pub exceptions: ExceptionRecord,
    pub timed_out: bool,
    /// Absent when either side timed out.
    pub verdict: Option<DivergenceVerdict>,
    pub platform_a: String,
    pub platform_b: String,
}

pub struct DifferentialExecutor {
    baseline_executor: Box<dyn Executor>,
    followup_executor: Box<dyn Executor>,
    detector: Box<dyn Detector>,
    default_shots: u64,
}

impl DifferentialExecutor {
    pub fn new(
        baseline_executor: Box<dyn Executor>,
        followup_executor: Box<dyn Executor>,
        detector: Box<dyn Detector>,
        default_shots: u64,
    ) -> Self {
        DifferentialExecutor {
            baseline_executor,
            followup_executor,
            detector,
            default_shots,
        }
    }

    pub fn detector(&self) -> &dyn Detector {
        self.detector.as_ref()
    }

    /// Shot count of the baseline's execution call, else the default.
    pub fn shots_for(&self, baseline: &Program) -> u64 {
        baseline
            .get(program::EXECUTION)
            .and_then(|text| queries::execution_calls(text).ok())
            .and_then(|calls| calls.first().and_then(|c| c.shots))
            .unwrap_or(self.default_shots)
    }

    fn run_side(
        executor: &mut dyn Executor,
        text: &str,
        shots: u64,
        width: usize,
        label: &str,
    ) -> SideRun {
        match run_program(executor, text, shots) {
            Ok(result) => {
                debug!("differential: {} completed ({} shots)", label, result.total_shots());
                SideRun::Completed(result)
            }
            Err(MorphError::Timeout(msg)) => {
                warn!("differential: {} timed out: {}", label, msg);
                SideRun::TimedOut(msg)
            }
            Err(e) => {
                info!("differential: {} raised: {}", label, e);
                SideRun::Failed {
                    sentinel: RunResult::sentinel(width, shots),
                    error: e.to_string(),
                }
            }
        }
    }

    /// Executes both programs and applies the relation's output check.
    pub fn run(
        &mut self,
        baseline: &Program,
        derivation: &Derivation,
        relation: &dyn MetamorphicRelation,
    ) -> DifferentialOutcome {
        let shots = self.shots_for(baseline);
        let width = queries::measured_width(baseline).unwrap_or(1);
        let a = Self::run_side(
            self.baseline_executor.as_mut(),
            &program::reconstruct(baseline),
            shots,
            width,
            "baseline",
        );
        let b = Self::run_side(
            self.followup_executor.as_mut(),
            &program::reconstruct(&derivation.program),
            shots,
            width,
            "followup",
        );
        let exceptions = ExceptionRecord {
            source: a.error(),
            followup: b.error(),
        };
        let verdict = match (a.result(), b.result()) {
            (Some(ra), Some(rb)) => Some(
                relation
                    .check_output_relationship(derivation, ra, rb, self.detector.as_ref())
                    .unwrap_or_else(|e| {
                        warn!("differential: {}: detector failed: {}", relation.name(), e);
                        DivergenceVerdict::failed(self.detector.name(), &e.to_string())
                    }),
            ),
            _ => None,
        };
        DifferentialOutcome {
            shots,
            timed_out: verdict.is_none(),
            baseline: a.result().cloned(),
            followup: b.result().cloned(),
            exceptions,
            verdict,
            platform_a: self.baseline_executor.name().to_string(),
            platform_b: self.followup_executor.name().to_string(),
        }
    }
}
