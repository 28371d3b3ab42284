// SPDX-License-Identifier: Apache-2.0

pub mod batch;
pub mod circuit_ir;
pub mod config;
pub mod detectors;
pub mod differential;
pub mod executor;
pub mod gates;
pub mod generator;
pub mod lexer;
pub mod morph_error;
pub mod orchestrator;
pub mod program;
pub mod queries;
pub mod reconcile;
pub mod relations;
pub mod retest;
pub mod rewrite;
pub mod store;

pub use config::FuzzConfig;
pub use detectors::{build_detector, Detector, DivergenceVerdict};
pub use differential::{DifferentialExecutor, DifferentialOutcome};
pub use executor::{CountMap, Executor, ExecutorConfig, RunResult};
pub use morph_error::{MorphError, Result};
pub use orchestrator::{FuzzReport, FuzzStats, Orchestrator};
pub use program::Program;
pub use reconcile::Reconciliation;
pub use relations::{build_relation, get_all_relations, Derivation, MetamorphicRelation};
