// SPDX-License-Identifier: Apache-2.0

//! The campaign loop: generate, derive, execute, detect, persist.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;
use serde_json::{json, Map, Value};

use crate::config::FuzzConfig;
use crate::differential::{DifferentialExecutor, DifferentialOutcome};
use crate::generator::Generator;
use crate::morph_error::Result;
use crate::program::{self, Program};
use crate::relations::{Derivation, MetamorphicRelation};
use crate::retest::{self, RetestReport};
use crate::store::{self, DataRecord, ProgramRole, Store};

/// How a single iteration ended.
#[derive(Debug, Clone, PartialEq)]
pub enum IterationOutcome {
    GenerateFailure,
    NoApplicableRelation,
    /// `derive` raised; the iteration was abandoned.
    DeriveFailure { relation: String },
    TimedOut { relations: Vec<String> },
    Completed {
        relations: Vec<String>,
        divergent: bool,
        detector_failed: bool,
    },
}

pub struct IterationOutput {
    pub program_id: String,
    pub outcome: IterationOutcome,
    /// The DATA row written for this iteration, if any.
    pub record: Option<DataRecord>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FuzzStats {
    pub iterations: u64,
    pub completed: usize,
    pub divergent: usize,
    pub detector_failures: usize,
    pub timed_out: usize,
    pub no_applicable_relation: usize,
    pub derive_failures: usize,
    pub generate_failures: usize,
    /// Keyed by the last relation of the chain.
    pub completed_by_relation: HashMap<String, usize>,
    pub divergent_by_relation: HashMap<String, usize>,
}

impl FuzzStats {
    pub fn merge_from(&mut self, other: FuzzStats) {
        self.iterations += other.iterations;
        self.completed += other.completed;
        self.divergent += other.divergent;
        self.detector_failures += other.detector_failures;
        self.timed_out += other.timed_out;
        self.no_applicable_relation += other.no_applicable_relation;
        self.derive_failures += other.derive_failures;
        self.generate_failures += other.generate_failures;
        for (k, v) in other.completed_by_relation.into_iter() {
            *self.completed_by_relation.entry(k).or_insert(0) += v;
        }
        for (k, v) in other.divergent_by_relation.into_iter() {
            *self.divergent_by_relation.entry(k).or_insert(0) += v;
        }
    }

    pub fn update_for_iteration(&mut self, output: &IterationOutput) {
        self.iterations += 1;
        match &output.outcome {
            IterationOutcome::GenerateFailure => self.generate_failures += 1,
            IterationOutcome::NoApplicableRelation => self.no_applicable_relation += 1,
            IterationOutcome::DeriveFailure { .. } => self.derive_failures += 1,
            IterationOutcome::TimedOut { .. } => self.timed_out += 1,
            IterationOutcome::Completed {
                relations,
                divergent,
                detector_failed,
            } => {
                self.completed += 1;
                let last = relations.last().cloned().unwrap_or_default();
                *self.completed_by_relation.entry(last.clone()).or_insert(0) += 1;
                if *detector_failed {
                    self.detector_failures += 1;
                } else if *divergent {
                    self.divergent += 1;
                    *self.divergent_by_relation.entry(last).or_insert(0) += 1;
                }
            }
        }
    }

    fn log_summary(&self, prefix: &str) {
        info!(
            "{}: iterations={} completed={} divergent={} detector_failures={} timed_out={} no_relation={} derive_failures={} generate_failures={}",
            prefix,
            self.iterations,
            self.completed,
            self.divergent,
            self.detector_failures,
            self.timed_out,
            self.no_applicable_relation,
            self.derive_failures,
            self.generate_failures
        );
    }
}

#[derive(Debug, Clone)]
pub struct FuzzReport {
    pub stats: FuzzStats,
    pub retests: Vec<RetestReport>,
    pub elapsed: Duration,
}

/// One applied link of a relation chain.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedRelation {
    pub index: usize,
    pub name: String,
    pub config: Value,
    pub metadata: Map<String, Value>,
}

impl AppliedRelation {
    fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "config": self.config,
            "metadata": self.metadata,
        })
    }
}

#[derive(Debug)]
pub enum ChainOutcome {
    NoApplicableRelation,
    DeriveFailure { relation: String, error: String },
    Derived {
        applied: Vec<AppliedRelation>,
        derivation: Derivation,
    },
}

/// Applies up to `chain_length` distinct relations, each picked by weight
/// among those whose precondition holds on the current program. A relation
/// that is not semantically equivalent ends the chain.
pub fn derive_chain(
    relations: &[Box<dyn MetamorphicRelation>],
    chain_length: usize,
    baseline: &Program,
    rng: &mut dyn RngCore,
) -> ChainOutcome {
    let mut applied: Vec<AppliedRelation> = Vec::new();
    let mut current: Option<Derivation> = None;
    while applied.len() < chain_length {
        let program = current.as_ref().map_or(baseline, |d| &d.program);
        let candidates: Vec<(usize, _)> = relations
            .iter()
            .enumerate()
            .filter(|(i, r)| r.weight() > 0.0 && applied.iter().all(|a| a.index != *i))
            .filter_map(|(i, r)| r.check_precondition(program).map(|a| (i, a)))
            .collect();
        if candidates.is_empty() {
            break;
        }
        let weights: Vec<f64> = candidates.iter().map(|(i, _)| relations[*i].weight()).collect();
        let pick = match WeightedIndex::new(&weights) {
            Ok(dist) => dist.sample(&mut *rng),
            Err(e) => {
                warn!("orchestrator: cannot sample relation weights {:?}: {}", weights, e);
                break;
            }
        };
        let (index, analysis) = &candidates[pick];
        let relation = &relations[*index];
        debug!(
            "orchestrator: applying {} ({} candidates)",
            relation.name(),
            candidates.len()
        );
        match relation.derive(program, analysis, &mut *rng) {
            Ok(derivation) => {
                applied.push(AppliedRelation {
                    index: *index,
                    name: relation.name(),
                    config: relation.config_json(),
                    metadata: derivation.metadata.clone(),
                });
                current = Some(derivation);
                if !relation.is_semantically_equivalent() {
                    break;
                }
            }
            Err(e) => {
                warn!("orchestrator: {} failed to derive: {}", relation.name(), e);
                return ChainOutcome::DeriveFailure {
                    relation: relation.name(),
                    error: e.to_string(),
                };
            }
        }
    }
    match current {
        Some(derivation) => ChainOutcome::Derived {
            applied,
            derivation,
        },
        None => ChainOutcome::NoApplicableRelation,
    }
}

/// Each iteration draws from its own generator so any single iteration can
/// be replayed from `(seed, iteration)`.
pub fn iteration_rng(seed: u64, iteration: u64) -> Pcg64Mcg {
    Pcg64Mcg::seed_from_u64(seed ^ iteration.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

pub struct Orchestrator {
    config: FuzzConfig,
    relations: Vec<Box<dyn MetamorphicRelation>>,
    generator: Box<dyn Generator>,
    differential: DifferentialExecutor,
    store: Store,
    stop: Arc<AtomicBool>,
}

impl Orchestrator {
    /// Validates `config` and builds every collaborator it names.
    pub fn new(config: FuzzConfig) -> Result<Self> {
        config.validate()?;
        let relations = config.build_relations()?;
        let generator = config.generator.build()?;
        let differential = DifferentialExecutor::new(
            config.executor.build()?,
            config.followup_executor().build()?,
            config.detector.build()?,
            config.generator.shots,
        );
        let store = Store::open(&config.output_dir)?;
        info!(
            "orchestrator: {} relations enabled, output in {}",
            relations.len(),
            config.output_dir.display()
        );
        Ok(Orchestrator {
            config,
            relations,
            generator,
            differential,
            store,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn set_stop_flag(&mut self, stop: Arc<AtomicBool>) {
        self.stop = stop;
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn run_iteration(&mut self, iteration: u64) -> Result<IterationOutput> {
        let seed = self.config.seed;
        let program_id = store::program_id(seed, iteration);
        let mut rng = iteration_rng(seed, iteration);
        let gcfg = &self.config.generator;
        let n_qubits = gcfg.sample_qubits(&mut rng);
        let generated = self
            .generator
            .generate(
                n_qubits,
                (gcfg.min_ops, gcfg.max_ops),
                &gcfg.gate_set,
                rng.gen(),
                &program_id,
            )
            .and_then(|(text, meta)| Ok((program::split(&text)?, meta)));
        let (baseline, generator_metadata) = match generated {
            Ok(x) => x,
            Err(e) => {
                warn!("orchestrator: {}: generation failed: {}", program_id, e);
                return Ok(IterationOutput {
                    program_id,
                    outcome: IterationOutcome::GenerateFailure,
                    record: None,
                });
            }
        };

        let (applied, derivation) = match derive_chain(
            &self.relations,
            self.config.chain_length,
            &baseline,
            &mut rng,
        ) {
            ChainOutcome::Derived {
                applied,
                derivation,
            } => (applied, derivation),
            ChainOutcome::NoApplicableRelation => {
                debug!("orchestrator: {}: no applicable relation", program_id);
                return Ok(IterationOutput {
                    program_id,
                    outcome: IterationOutcome::NoApplicableRelation,
                    record: None,
                });
            }
            ChainOutcome::DeriveFailure { relation, .. } => {
                return Ok(IterationOutput {
                    program_id,
                    outcome: IterationOutcome::DeriveFailure { relation },
                    record: None,
                });
            }
        };
        let names: Vec<String> = applied.iter().map(|a| a.name.clone()).collect();
        let Some(last) = applied.last() else {
            return Ok(IterationOutput {
                program_id,
                outcome: IterationOutcome::NoApplicableRelation,
                record: None,
            });
        };
        let relation = self.relations[last.index].as_ref();
        let outcome = self.differential.run(&baseline, &derivation, relation);

        let metadata = self.metadata_record(
            &program_id,
            iteration,
            generator_metadata,
            &applied,
            &derivation,
            &outcome,
        );
        self.store
            .write_program(&program_id, ProgramRole::Source, &program::reconstruct(&baseline))?;
        self.store.write_program(
            &program_id,
            ProgramRole::Followup,
            &program::reconstruct(&derivation.program),
        )?;
        self.store.write_metadata(&program_id, &metadata)?;
        let record = DataRecord {
            program_id: program_id.clone(),
            iteration,
            seed,
            shots: outcome.shots,
            relations: names.clone(),
            timed_out: outcome.timed_out,
            test_name: outcome.verdict.as_ref().map(|v| v.test_name.clone()),
            statistic: outcome.verdict.as_ref().map(|v| v.statistic),
            p_value: outcome.verdict.as_ref().map(|v| v.p_value),
            exceptions: outcome.exceptions.clone(),
        };
        self.store.append_data(&record)?;

        let outcome = match &outcome.verdict {
            None => IterationOutcome::TimedOut { relations: names },
            Some(v) => {
                if !v.is_failure() && v.p_value < self.config.alpha {
                    info!(
                        "orchestrator: {}: divergence after {:?}: {}={} p={}",
                        program_id, names, v.test_name, v.statistic, v.p_value
                    );
                }
                IterationOutcome::Completed {
                    relations: names,
                    divergent: !v.is_failure() && v.p_value < self.config.alpha,
                    detector_failed: v.is_failure(),
                }
            }
        };
        Ok(IterationOutput {
            program_id,
            outcome,
            record: Some(record),
        })
    }

    fn metadata_record(
        &self,
        program_id: &str,
        iteration: u64,
        generator_metadata: Value,
        applied: &[AppliedRelation],
        derivation: &Derivation,
        outcome: &DifferentialOutcome,
    ) -> Value {
        let divergence = match &outcome.verdict {
            Some(v) => {
                let mut m = Map::new();
                m.insert(
                    v.test_name.clone(),
                    json!({"statistic": v.statistic, "p_value": v.p_value, "error": v.error}),
                );
                Value::Object(m)
            }
            None => Value::Null,
        };
        json!({
            "program_id": program_id,
            "iteration": iteration,
            "seed": self.config.seed,
            "generator": generator_metadata,
            "relations": applied.iter().map(AppliedRelation::to_json).collect::<Vec<_>>(),
            "platform_A": outcome.platform_a,
            "platform_B": outcome.platform_b,
            "shots": outcome.shots,
            "divergence": divergence,
            "exceptions": outcome.exceptions,
            "timed_out": outcome.timed_out,
            "reconciliation": derivation.reconciliation,
        })
    }

    /// First iteration index not yet present in the store, so a resumed
    /// campaign never reuses a program id.
    fn start_iteration(&self) -> Result<u64> {
        Ok(self
            .store
            .load_data()?
            .iter()
            .map(|r| r.iteration + 1)
            .max()
            .unwrap_or(0))
    }

    /// Runs until the budget is spent or the stop flag is raised.
    pub fn run(&mut self) -> Result<FuzzReport> {
        let start = Instant::now();
        let first = self.start_iteration()?;
        let mut stats = FuzzStats::default();
        let mut retests = Vec::new();
        let mut iters: u64 = 0;
        loop {
            if self.stop.load(Ordering::Relaxed) {
                info!("orchestrator: stop requested");
                break;
            }
            if let Some(max) = self.config.budget.iterations {
                if iters >= max {
                    break;
                }
            }
            if let Some(limit) = self.config.budget.wall_clock() {
                if start.elapsed() >= limit {
                    break;
                }
            }

            let output = self.run_iteration(first + iters)?;
            stats.update_for_iteration(&output);
            iters += 1;

            let every = self.config.retest.every;
            if every > 0 && iters % every == 0 {
                retests.push(retest::run_retest(
                    &self.store,
                    &mut self.differential,
                    &self.config.retest,
                    self.config.alpha,
                )?);
            }
            if iters % 25 == 0 {
                stats.log_summary("orchestrator: progress");
            }
        }
        stats.log_summary("orchestrator: done");
        Ok(FuzzReport {
            stats,
            retests,
            elapsed: start.elapsed(),
        })
    }
}
