// SPDX-License-Identifier: Apache-2.0

//! Catalog of metamorphic relations.
//!
//! A relation inspects a baseline program, and when its precondition holds,
//! derives a follow-up program whose output is either identical in
//! distribution (semantically equivalent relations) or reconstructible into
//! the baseline's layout through the recorded [`Reconciliation`].

#[allow(unused_imports)]
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[allow(unused_imports)]
use log::{debug, trace};
#[allow(unused_imports)]
use rand::seq::{index, SliceRandom};
#[allow(unused_imports)]
use rand::{Rng, RngCore};
#[allow(unused_imports)]
use serde::de::DeserializeOwned;
#[allow(unused_imports)]
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[allow(unused_imports)]
use crate::circuit_ir::{
    BitRef, CircuitDecl, Instruction, Param, Register, RegisterArg, RegisterKind, SectionIr,
    StmtId, StmtKind, SubcircuitAppend,
};
use crate::detectors::{Detector, DivergenceVerdict};
use crate::executor::RunResult;
use crate::gates;
use crate::morph_error::{MorphError, Result};
#[allow(unused_imports)]
use crate::program::{self, Anchor, Program};
#[allow(unused_imports)]
use crate::queries::{self, Circuit, ExecutionCall, GatePair, TranspileCall};
use crate::reconcile::Reconciliation;
use crate::rewrite::{self, GateRule};

mod add_unused_register;
mod cancel_consecutive_gates;
mod change_backend;
mod change_coupling_map;
mod change_opt_level;
mod change_qubit_order;
mod change_target_basis;
mod decompose_single_qubit_gate;
mod decompose_two_qubit_gate;
mod inject_null_effect;
mod inject_optimization_passes;
mod round_trip_conversion;
mod run_independent_partitions;
mod to_parametrized;

pub use add_unused_register::AddUnusedRegister;
pub use cancel_consecutive_gates::CancelConsecutiveGates;
pub use change_backend::ChangeBackend;
pub use change_coupling_map::ChangeCouplingMap;
pub use change_opt_level::ChangeOptLevel;
pub use change_qubit_order::ChangeQubitOrder;
pub use change_target_basis::ChangeTargetBasis;
pub use decompose_single_qubit_gate::DecomposeSingleQubitGate;
pub use decompose_two_qubit_gate::DecomposeTwoQubitGate;
pub use inject_null_effect::InjectNullEffect;
pub use inject_optimization_passes::InjectOptimizationPasses;
pub use round_trip_conversion::RoundTripConversion;
pub use run_independent_partitions::RunIndependentPartitions;
pub use to_parametrized::ToParametrized;

/// Kinds of metamorphic relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum RelationKind {
    /// Permute the qubit indices of the single quantum register; the output
    /// bits are permuted back before comparison.
    ChangeQubitOrder,
    /// Switch the transpiler `optimization_level=` argument.
    ChangeOptLevel,
    /// Switch the transpiler `basis_gates=` argument.
    ChangeTargetBasis,
    /// Transpile against a random coupling graph.
    ChangeCouplingMap,
    /// Run on another simulator backend.
    ChangeBackend,
    /// Append a synthesized sub-circuit and its inverse back to back.
    InjectNullEffect,
    /// Add a quantum register that no gate touches.
    AddUnusedRegister,
    /// Turn literal angles into bound symbolic parameters.
    ToParametrized,
    /// Serialize to an interchange format and parse back before a stage.
    RoundTripConversion,
    /// Run independent qubit clusters as separate programs and join the
    /// outputs as an outer product.
    RunIndependentPartitions,
    /// `G; G ↔ (nothing)` for self-inverse single-qubit `G`.
    CancelConsecutiveGates,
    /// `X ↔ H Z H`, `Z ↔ S S`, `S ↔ T T`, `Y ↔ S X Sdg`.
    DecomposeSingleQubitGate,
    /// `SWAP(a,b) ↔ CX(a,b) CX(b,a) CX(a,b)`, `CZ(a,b) ↔ H(b) CX(a,b) H(b)`.
    DecomposeTwoQubitGate,
    /// Run a random selection of optimization passes through a pass manager.
    InjectOptimizationPasses,
}

pub const ALL_RELATION_KINDS: [RelationKind; 14] = [
    RelationKind::ChangeQubitOrder,
    RelationKind::ChangeOptLevel,
    RelationKind::ChangeTargetBasis,
    RelationKind::ChangeCouplingMap,
    RelationKind::ChangeBackend,
    RelationKind::InjectNullEffect,
    RelationKind::AddUnusedRegister,
    RelationKind::ToParametrized,
    RelationKind::RoundTripConversion,
    RelationKind::RunIndependentPartitions,
    RelationKind::CancelConsecutiveGates,
    RelationKind::DecomposeSingleQubitGate,
    RelationKind::DecomposeTwoQubitGate,
    RelationKind::InjectOptimizationPasses,
];

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelationKind::ChangeQubitOrder => "ChangeQubitOrder",
            RelationKind::ChangeOptLevel => "ChangeOptLevel",
            RelationKind::ChangeTargetBasis => "ChangeTargetBasis",
            RelationKind::ChangeCouplingMap => "ChangeCouplingMap",
            RelationKind::ChangeBackend => "ChangeBackend",
            RelationKind::InjectNullEffect => "InjectNullEffect",
            RelationKind::AddUnusedRegister => "AddUnusedRegister",
            RelationKind::ToParametrized => "ToParametrized",
            RelationKind::RoundTripConversion => "RoundTripConversion",
            RelationKind::RunIndependentPartitions => "RunIndependentPartitions",
            RelationKind::CancelConsecutiveGates => "CancelConsecutiveGates",
            RelationKind::DecomposeSingleQubitGate => "DecomposeSingleQubitGate",
            RelationKind::DecomposeTwoQubitGate => "DecomposeTwoQubitGate",
            RelationKind::InjectOptimizationPasses => "InjectOptimizationPasses",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for RelationKind {
    type Err = MorphError;

    fn from_str(s: &str) -> Result<Self> {
        ALL_RELATION_KINDS
            .iter()
            .copied()
            .find(|k| k.to_string() == s)
            .ok_or_else(|| MorphError::Config(format!("unknown relation {:?}", s)))
    }
}

/// A transpile call found in some section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranspileSite {
    pub section: String,
    /// Statement index within the section.
    pub index: usize,
    pub call: TranspileCall,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSite {
    pub index: usize,
    pub variable: String,
    pub backend: String,
}

/// What a precondition learned about the program.
///
/// Statement ids refer to a fresh [`SectionIr::parse`] of the section they
/// were found in; parsing is deterministic so `derive` can re-parse and use
/// them directly.
#[derive(Debug, Clone, PartialEq)]
pub enum Analysis {
    QubitOrder {
        circuit: String,
        qreg: Register,
        creg: Register,
    },
    Transpile {
        sites: Vec<TranspileSite>,
    },
    Backends {
        sites: Vec<BackendSite>,
    },
    NullEffect {
        circuit: String,
        register: Register,
        /// Candidate statements to insert after; empty means "at the end".
        anchors: Vec<StmtId>,
    },
    Circuits {
        names: Vec<String>,
    },
    LiteralParams {
        circuit: String,
        params: Vec<(StmtId, usize, String)>,
    },
    Stage {
        anchor: String,
        circuit: String,
    },
    Partitions {
        circuit: Circuit,
        /// Connected components that contain at least one gate.
        used_clusters: Vec<BTreeSet<usize>>,
        unused: BTreeSet<usize>,
        execution: ExecutionCall,
    },
    GatePairs {
        pairs: Vec<GatePair>,
    },
    /// Matching statements with the index of the rule that matched.
    GateMatches {
        matches: Vec<(StmtId, usize)>,
    },
    Circuit {
        name: String,
    },
}

/// A follow-up program plus everything needed to compare its output.
#[derive(Debug, Clone, PartialEq)]
pub struct Derivation {
    pub program: Program,
    pub metadata: Map<String, Value>,
    pub reconciliation: Reconciliation,
}

impl Derivation {
    pub fn equivalent(program: Program, metadata: Map<String, Value>) -> Self {
        Derivation {
            program,
            metadata,
            reconciliation: Reconciliation::Identity,
        }
    }
}

pub trait MetamorphicRelation: fmt::Debug + Send + Sync {
    fn kind(&self) -> RelationKind;

    fn name(&self) -> String {
        self.kind().to_string()
    }

    /// Relative selection weight.
    fn weight(&self) -> f64;

    /// Effective configuration, recorded in metadata.
    fn config_json(&self) -> Value;

    /// Returns `None` when the relation cannot be applied to `program`.
    fn check_precondition(&self, program: &Program) -> Option<Analysis>;

    fn derive(
        &self,
        program: &Program,
        analysis: &Analysis,
        rng: &mut dyn RngCore,
    ) -> Result<Derivation>;

    /// Indicates whether the follow-up must produce the same distribution
    /// without any reconciliation.
    fn is_semantically_equivalent(&self) -> bool {
        true
    }

    /// Brings the follow-up output into the baseline's layout and runs the
    /// detector on the pair.
    fn check_output_relationship(
        &self,
        derivation: &Derivation,
        baseline: &RunResult,
        followup: &RunResult,
        detector: &dyn Detector,
    ) -> Result<DivergenceVerdict> {
        let baseline = match baseline {
            RunResult::Single(map) => map,
            RunResult::Partitioned(_) => {
                return Err(MorphError::Detector(
                    "baseline result must be a single count map".to_string(),
                ))
            }
        };
        let followup = derivation.reconciliation.apply(followup)?;
        Ok(detector.verdict(baseline, &followup))
    }
}

/// Checks the precondition and derives in one step.
pub fn try_apply(
    relation: &dyn MetamorphicRelation,
    program: &Program,
    rng: &mut dyn RngCore,
) -> Result<Option<Derivation>> {
    match relation.check_precondition(program) {
        Some(analysis) => relation.derive(program, &analysis, rng).map(Some),
        None => {
            debug!("{}: precondition not met", relation.name());
            Ok(None)
        }
    }
}

pub(crate) fn unexpected_analysis(kind: RelationKind, analysis: &Analysis) -> MorphError {
    MorphError::MalformedProgram(format!(
        "{}: unexpected analysis {:?}",
        kind, analysis
    ))
}

pub(crate) fn parse_section(program: &Program, name: &str) -> Result<SectionIr> {
    SectionIr::parse(program.require(name)?)
}

/// Replaces statement `index` of `section` by raw `text`, keeping indentation.
pub(crate) fn replace_statement(
    program: &Program,
    section: &str,
    index: usize,
    text: &str,
) -> Result<Program> {
    let mut ir = parse_section(program, section)?;
    let id = ir
        .stmts()
        .get(index)
        .map(|s| s.id)
        .ok_or_else(|| {
            MorphError::MalformedProgram(format!("{} has no statement {}", section, index))
        })?;
    ir.splice(id, vec![StmtKind::Raw(text.to_string())])?;
    let mut out = program.clone();
    out.set_section(section, &ir.emit())?;
    Ok(out)
}

/// Transpile calls across all sections that pass `keep`.
pub(crate) fn transpile_sites(
    program: &Program,
    keep: impl Fn(&TranspileCall) -> bool,
) -> Vec<TranspileSite> {
    let mut out = Vec::new();
    for section in program.sections() {
        let Ok(calls) = queries::transpile_calls(&section.body) else {
            continue;
        };
        for (index, call) in calls {
            if keep(&call) {
                out.push(TranspileSite {
                    section: section.name.clone(),
                    index,
                    call,
                });
            }
        }
    }
    out
}

/// The single execution call, if there is exactly one.
pub(crate) fn single_execution_call(program: &Program) -> Option<ExecutionCall> {
    let calls = queries::execution_calls(program.get(program::EXECUTION)?).ok()?;
    match calls.as_slice() {
        [call] => Some(call.clone()),
        _ => None,
    }
}

/// Short random hex tag for fresh identifiers.
pub(crate) fn fresh_tag(rng: &mut dyn RngCore) -> String {
    format!("{:04x}", rng.gen::<u16>())
}

/// Number of edits in `[min, max]`, clamped to what is available.
pub(crate) fn choose_count(rng: &mut dyn RngCore, min: usize, max: usize, available: usize) -> usize {
    let hi = max.min(available);
    let lo = min.max(1).min(hi);
    if hi == 0 {
        0
    } else {
        rng.gen_range(lo..=hi)
    }
}

/// Parses gate rewrite rules whose pattern gate takes `arity` qubits and
/// whose gates are all known.
pub(crate) fn parse_gate_rules(
    kind: RelationKind,
    rules: &[String],
    arity: usize,
) -> Result<Vec<GateRule>> {
    if rules.is_empty() {
        return Err(config_error(kind, "no rules configured"));
    }
    let mut out = Vec::with_capacity(rules.len());
    for text in rules {
        let rule = rewrite::parse_rule(text)
            .map_err(|e| config_error(kind, &format!("rule {:?}: {}", text, e)))?;
        if rule.operand_names.len() != arity {
            return Err(config_error(
                kind,
                &format!("rule {:?} must act on {} qubit(s)", text, arity),
            ));
        }
        let names = std::iter::once(&rule.gate_name)
            .chain(rule.replacement.iter().map(|t| &t.gate_name));
        for name in names {
            if gates::lookup(name).is_none() {
                return Err(config_error(kind, &format!("unknown gate {}", name)));
            }
        }
        out.push(rule);
    }
    Ok(out)
}

/// Gate statements of the `CIRCUIT` section matched by the first applicable
/// rule, paired with that rule's index.
pub(crate) fn gate_rule_matches(ir: &SectionIr, rules: &[GateRule]) -> Vec<(StmtId, usize)> {
    ir.instructions()
        .filter_map(|(id, instr)| {
            rules
                .iter()
                .position(|r| r.matches(instr))
                .map(|r| (id, r))
        })
        .collect()
}

/// Rewrites a random bounded subset of `matches` in descending statement
/// order. Returns the follow-up and a metadata entry per rewrite.
pub(crate) fn apply_gate_rules(
    kind: RelationKind,
    program: &Program,
    rules: &[GateRule],
    matches: &[(StmtId, usize)],
    (min, max): (usize, usize),
    rng: &mut dyn RngCore,
) -> Result<(Program, Vec<Value>)> {
    let count = choose_count(rng, min, max, matches.len());
    let mut ir = parse_section(program, program::CIRCUIT)?;
    let mut chosen = Vec::with_capacity(count);
    for i in index::sample(rng, matches.len(), count) {
        let (id, rule) = matches[i];
        let pos = ir.index_of(id).ok_or_else(|| {
            MorphError::MalformedProgram(format!("{}: no statement {}", kind, id))
        })?;
        let rule = rules
            .get(rule)
            .ok_or_else(|| MorphError::MalformedProgram(format!("{}: no rule {}", kind, rule)))?;
        chosen.push((pos, id, rule));
    }
    chosen.sort_by(|a, b| b.0.cmp(&a.0));

    let mut rewrites = Vec::with_capacity(chosen.len());
    for (_, id, rule) in chosen {
        let lineno = ir.get(id).map_or(0, |s| s.lineno);
        rule.to_pass().apply_to(&mut ir, &[id])?;
        trace!("{}: rewrote {} at line {}", kind, rule.gate_name, lineno);
        let mut entry = Map::new();
        entry.insert("gate".to_string(), Value::from(rule.gate_name.clone()));
        entry.insert("lineno".to_string(), Value::from(lineno));
        rewrites.push(Value::Object(entry));
    }
    // Report in source order.
    rewrites.reverse();

    let mut follow_up = program.clone();
    follow_up.set_section(program::CIRCUIT, &ir.emit())?;
    Ok((follow_up, rewrites))
}

pub(crate) fn config_error(kind: RelationKind, msg: &str) -> MorphError {
    MorphError::Config(format!("{}: {}", kind, msg))
}

pub(crate) fn default_weight() -> f64 {
    1.0
}

fn parse_config<T: DeserializeOwned + Default>(
    kind: RelationKind,
    value: Option<&toml::Value>,
) -> Result<T> {
    match value {
        None => Ok(T::default()),
        Some(v) => v
            .clone()
            .try_into()
            .map_err(|e| config_error(kind, &format!("invalid config: {}", e))),
    }
}

/// Builds the relation registered under `name` from an optional TOML table.
pub fn build_relation(
    name: &str,
    config: Option<&toml::Value>,
) -> Result<Box<dyn MetamorphicRelation>> {
    let kind: RelationKind = name.parse()?;
    let relation: Box<dyn MetamorphicRelation> = match kind {
        RelationKind::ChangeQubitOrder => {
            Box::new(ChangeQubitOrder::new(parse_config(kind, config)?)?)
        }
        RelationKind::ChangeOptLevel => Box::new(ChangeOptLevel::new(parse_config(kind, config)?)?),
        RelationKind::ChangeTargetBasis => {
            Box::new(ChangeTargetBasis::new(parse_config(kind, config)?)?)
        }
        RelationKind::ChangeCouplingMap => {
            Box::new(ChangeCouplingMap::new(parse_config(kind, config)?)?)
        }
        RelationKind::ChangeBackend => Box::new(ChangeBackend::new(parse_config(kind, config)?)?),
        RelationKind::InjectNullEffect => {
            Box::new(InjectNullEffect::new(parse_config(kind, config)?)?)
        }
        RelationKind::AddUnusedRegister => {
            Box::new(AddUnusedRegister::new(parse_config(kind, config)?)?)
        }
        RelationKind::ToParametrized => Box::new(ToParametrized::new(parse_config(kind, config)?)?),
        RelationKind::RoundTripConversion => {
            Box::new(RoundTripConversion::new(parse_config(kind, config)?)?)
        }
        RelationKind::RunIndependentPartitions => {
            Box::new(RunIndependentPartitions::new(parse_config(kind, config)?)?)
        }
        RelationKind::CancelConsecutiveGates => {
            Box::new(CancelConsecutiveGates::new(parse_config(kind, config)?)?)
        }
        RelationKind::DecomposeSingleQubitGate => {
            Box::new(DecomposeSingleQubitGate::new(parse_config(kind, config)?)?)
        }
        RelationKind::DecomposeTwoQubitGate => {
            Box::new(DecomposeTwoQubitGate::new(parse_config(kind, config)?)?)
        }
        RelationKind::InjectOptimizationPasses => {
            Box::new(InjectOptimizationPasses::new(parse_config(kind, config)?)?)
        }
    };
    if !(relation.weight() >= 0.0 && relation.weight().is_finite()) {
        return Err(config_error(kind, "weight must be a finite non-negative number"));
    }
    Ok(relation)
}

/// Every relation with its default configuration.
pub fn get_all_relations() -> Vec<Box<dyn MetamorphicRelation>> {
    ALL_RELATION_KINDS
        .iter()
        .filter_map(|k| build_relation(&k.to_string(), None).ok())
        .collect()
}

/// Selection weights, parallel to `relations`.
pub fn build_relation_weights<T: AsRef<[Box<dyn MetamorphicRelation>]>>(relations: T) -> Vec<f64> {
    relations.as_ref().iter().map(|r| r.weight()).collect()
}

#[cfg(test)]
pub(crate) mod test_programs {
    /// Four qubits; qubit 3 is never touched, qubit 2 carries an `XGate` pair.
    pub const BASELINE: &str = "\
# SECTION
# NAME: PROLOGUE
from qiskit import QuantumRegister, ClassicalRegister, QuantumCircuit, Aer, transpile, execute
from qiskit.circuit.library.standard_gates import *

# SECTION
# NAME: CIRCUIT
qr = QuantumRegister(4, name='qr')
cr = ClassicalRegister(4, name='cr')
qc = QuantumCircuit(qr, cr, name='qc')
qc.append(HGate(), qargs=[qr[0]], cargs=[])
qc.append(CXGate(), qargs=[qr[0], qr[1]], cargs=[])
qc.append(RZGate(0.25), qargs=[qr[2]], cargs=[])
qc.append(XGate(), qargs=[qr[2]], cargs=[])
qc.append(XGate(), qargs=[qr[2]], cargs=[])
qc.append(SwapGate(), qargs=[qr[1], qr[0]], cargs=[])

# SECTION
# NAME: OPTIMIZATION_LEVEL
qc = transpile(qc, basis_gates=None, optimization_level=2, coupling_map=None)

# SECTION
# NAME: MEASUREMENT
qc.measure(qr, cr)

# SECTION
# NAME: EXECUTION
backend_4a1f = Aer.get_backend('aer_simulator')
counts = execute(qc, backend=backend_4a1f, shots=1000).result().get_counts(qc)
RESULT = counts
";

    pub fn baseline() -> crate::program::Program {
        crate::program::split(BASELINE).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_kind_round_trips_through_name() {
        for kind in ALL_RELATION_KINDS {
            assert_eq!(kind.to_string().parse::<RelationKind>().unwrap(), kind);
        }
        assert!(matches!(
            "NoSuchRelation".parse::<RelationKind>(),
            Err(MorphError::Config(_))
        ));
    }

    #[test]
    fn test_all_relations_build_with_defaults() {
        let relations = get_all_relations();
        assert_eq!(relations.len(), ALL_RELATION_KINDS.len());
        let weights = build_relation_weights(&relations);
        assert!(weights.iter().all(|w| *w == 1.0));
    }

    #[test]
    fn test_build_relation_rejects_unknown_keys() {
        let value: toml::Value = toml::from_str("weight = 2.0\nbogus = 1").unwrap();
        assert!(matches!(
            build_relation("ChangeOptLevel", Some(&value)),
            Err(MorphError::Config(_))
        ));
    }

    #[test]
    fn test_build_relation_reads_weight() {
        let value: toml::Value = toml::from_str("weight = 2.5").unwrap();
        let r = build_relation("ChangeBackend", Some(&value)).unwrap();
        assert_eq!(r.weight(), 2.5);
        let value: toml::Value = toml::from_str("weight = -1.0").unwrap();
        assert!(build_relation("ChangeBackend", Some(&value)).is_err());
    }

    #[test]
    fn test_equivalence_flags() {
        for r in get_all_relations() {
            let expected = !matches!(
                r.kind(),
                RelationKind::ChangeQubitOrder | RelationKind::RunIndependentPartitions
            );
            assert_eq!(r.is_semantically_equivalent(), expected, "{}", r.name());
        }
    }

    #[test]
    fn test_every_relation_derivation_resplits() {
        use rand::SeedableRng;
        let program = test_programs::baseline();
        let mut rng = rand_pcg::Pcg64Mcg::seed_from_u64(11);
        for r in get_all_relations() {
            if let Some(d) = try_apply(r.as_ref(), &program, &mut rng).unwrap() {
                let text = program::reconstruct(&d.program);
                assert_eq!(program::split(&text).unwrap(), d.program, "{}", r.name());
                assert_ne!(d.program, program, "{} made no change", r.name());
            }
        }
    }
}
