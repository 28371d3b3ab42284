// SPDX-License-Identifier: Apache-2.0

//! Structural queries over section text.
//!
//! Everything here is read-only: the text is parsed into a [`SectionIr`] and
//! summarized into plain records.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::circuit_ir::{
    split_args, Instruction, Param, Register, RegisterArg, RegisterKind, SectionIr, StmtId,
    StmtKind,
};
use crate::lexer::lex_statements;
use crate::morph_error::{MorphError, Result};
use crate::program::{self, Program};

/// A circuit with its registers resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Circuit {
    pub name: String,
    pub quantum_registers: Vec<Register>,
    pub classical_registers: Vec<Register>,
    /// Total number of qubits.
    pub size: usize,
}

impl Circuit {
    /// The first declared quantum register, if any.
    pub fn quantum_register(&self) -> Option<&Register> {
        self.quantum_registers.first()
    }

    pub fn classical_register(&self) -> Option<&Register> {
        self.classical_registers.first()
    }

    pub fn num_clbits(&self) -> usize {
        self.classical_registers.iter().map(|r| r.size).sum()
    }
}

pub fn registers_used(circuit_text: &str) -> Result<Vec<Register>> {
    let ir = SectionIr::parse(circuit_text)?;
    Ok(registers_in(&ir))
}

pub fn registers_in(ir: &SectionIr) -> Vec<Register> {
    ir.stmts()
        .iter()
        .filter_map(|s| match s.kind() {
            StmtKind::Register(r) => Some(r.clone()),
            _ => None,
        })
        .collect()
}

pub fn circuits_used(circuit_text: &str) -> Result<Vec<Circuit>> {
    let ir = SectionIr::parse(circuit_text)?;
    circuits_in(&ir)
}

pub fn circuits_in(ir: &SectionIr) -> Result<Vec<Circuit>> {
    let registers: HashMap<String, Register> = registers_in(ir)
        .into_iter()
        .map(|r| (r.name.clone(), r))
        .collect();
    let resolve = |name: &str, circuit: &str| {
        registers.get(name).cloned().ok_or_else(|| {
            MorphError::MalformedProgram(format!(
                "circuit {} uses undeclared register {}",
                circuit, name
            ))
        })
    };

    let mut circuits: Vec<Circuit> = Vec::new();
    for stmt in ir.stmts() {
        match stmt.kind() {
            StmtKind::Circuit(decl) => {
                let mut circuit = Circuit {
                    name: decl.name.clone(),
                    quantum_registers: Vec::new(),
                    classical_registers: Vec::new(),
                    size: 0,
                };
                for reg_name in &decl.registers {
                    let reg = resolve(reg_name, &decl.name)?;
                    match reg.kind {
                        RegisterKind::Quantum => circuit.quantum_registers.push(reg),
                        RegisterKind::Classical => circuit.classical_registers.push(reg),
                    }
                }
                circuits.retain(|c| c.name != decl.name);
                circuits.push(circuit);
            }
            StmtKind::AddRegister {
                circuit_id,
                register,
            } => {
                let reg = resolve(register, circuit_id)?;
                if let Some(circuit) = circuits.iter_mut().find(|c| &c.name == circuit_id) {
                    match reg.kind {
                        RegisterKind::Quantum => circuit.quantum_registers.push(reg),
                        RegisterKind::Classical => circuit.classical_registers.push(reg),
                    }
                }
            }
            _ => {}
        }
    }

    for circuit in circuits.iter_mut() {
        for (q, c) in circuit
            .quantum_registers
            .iter()
            .zip(circuit.classical_registers.iter())
        {
            if q.size != c.size {
                return Err(MorphError::StructuralMismatch(format!(
                    "circuit {}: quantum register {} has size {} but paired classical register {} has size {}",
                    circuit.name, q.name, q.size, c.name, c.size
                )));
            }
        }
        circuit.size = circuit.quantum_registers.iter().map(|r| r.size).sum();
    }
    Ok(circuits)
}

pub fn instructions(text: &str) -> Result<Vec<Instruction>> {
    let ir = SectionIr::parse(text)?;
    Ok(ir.instructions().map(|(_, i)| i.clone()).collect())
}

/// Two back-to-back applications of the same single-qubit gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatePair {
    pub lineno: usize,
    pub next_lineno: usize,
    pub qbits: Vec<usize>,
    pub qregs: Vec<String>,
    pub circuit_id: String,
    pub first: StmtId,
    pub second: StmtId,
}

pub fn consecutive_same_gate_pairs(text: &str, gate_name: &str) -> Result<Vec<GatePair>> {
    let ir = SectionIr::parse(text)?;
    Ok(consecutive_same_gate_pairs_in(&ir, gate_name))
}

pub fn consecutive_same_gate_pairs_in(ir: &SectionIr, gate_name: &str) -> Vec<GatePair> {
    // (circuit, register, index) -> last instruction touching that qubit.
    let mut last: HashMap<(String, String, usize), (StmtId, &Instruction)> = HashMap::new();
    let mut pairs = Vec::new();

    for stmt in ir.stmts() {
        match stmt.kind() {
            StmtKind::Gate(instr) => {
                let is_candidate = instr.gate_name == gate_name
                    && instr.qargs.len() == 1
                    && instr.cargs.is_empty();
                if is_candidate {
                    let q = &instr.qargs[0];
                    let key = (instr.circuit_id.clone(), q.register.clone(), q.index);
                    if let Some((prev_id, prev)) = last.get(&key) {
                        if prev.gate_name == gate_name
                            && prev.qargs.len() == 1
                            && prev.cargs.is_empty()
                            && prev.params == instr.params
                        {
                            pairs.push(GatePair {
                                lineno: prev.lineno,
                                next_lineno: instr.lineno,
                                qbits: vec![q.index],
                                qregs: vec![q.register.clone()],
                                circuit_id: instr.circuit_id.clone(),
                                first: *prev_id,
                                second: stmt.id,
                            });
                            // Both gates are consumed; a third one starts afresh.
                            last.remove(&key);
                            continue;
                        }
                    }
                }
                for q in &instr.qargs {
                    last.insert(
                        (instr.circuit_id.clone(), q.register.clone(), q.index),
                        (stmt.id, instr),
                    );
                }
            }
            StmtKind::Subcircuit(sub) => match &sub.qargs {
                RegisterArg::Whole(reg) => {
                    last.retain(|(c, r, _), _| !(c == &sub.circuit_id && r == reg));
                }
                RegisterArg::Bits(bits) => {
                    for b in bits {
                        last.remove(&(sub.circuit_id.clone(), b.register.clone(), b.index));
                    }
                }
            },
            StmtKind::Measure { circuit_id, .. } => {
                last.retain(|(c, _, _), _| c != circuit_id);
            }
            StmtKind::Raw(_) => last.clear(),
            _ => {}
        }
    }
    pairs
}

/// Connected components of the qubit interaction graph of `circuit_name`
/// restricted to `register_name`; untouched qubits are singletons.
pub fn cluster_resources_by_connectivity(
    text: &str,
    circuit_name: &str,
    register_name: &str,
) -> Result<BTreeSet<BTreeSet<usize>>> {
    let ir = SectionIr::parse(text)?;
    cluster_resources_in(&ir, circuit_name, register_name)
}

pub fn cluster_resources_in(
    ir: &SectionIr,
    circuit_name: &str,
    register_name: &str,
) -> Result<BTreeSet<BTreeSet<usize>>> {
    let size = registers_in(ir)
        .into_iter()
        .find(|r| r.name == register_name)
        .map(|r| r.size)
        .ok_or_else(|| {
            MorphError::MalformedProgram(format!("register {} is not declared", register_name))
        })?;

    let mut parent: Vec<usize> = (0..size).collect();
    fn find(parent: &mut Vec<usize>, x: usize) -> usize {
        let mut root = x;
        while parent[root] != root {
            root = parent[root];
        }
        let mut cur = x;
        while parent[cur] != root {
            let next = parent[cur];
            parent[cur] = root;
            cur = next;
        }
        root
    }
    let mut union_all = |parent: &mut Vec<usize>, idxs: &[usize]| -> Result<()> {
        for &i in idxs {
            if i >= size {
                return Err(MorphError::MalformedProgram(format!(
                    "index {} out of range for register {} of size {}",
                    i, register_name, size
                )));
            }
        }
        for w in idxs.windows(2) {
            let a = find(parent, w[0]);
            let b = find(parent, w[1]);
            if a != b {
                parent[a.max(b)] = a.min(b);
            }
        }
        Ok(())
    };

    for stmt in ir.stmts() {
        match stmt.kind() {
            StmtKind::Gate(instr) if instr.circuit_id == circuit_name => {
                let idxs: Vec<usize> = instr
                    .qargs
                    .iter()
                    .filter(|b| b.register == register_name)
                    .map(|b| b.index)
                    .collect();
                union_all(&mut parent, &idxs)?;
            }
            StmtKind::Subcircuit(sub) if sub.circuit_id == circuit_name => {
                let idxs: Vec<usize> = match &sub.qargs {
                    RegisterArg::Whole(r) if r == register_name => (0..size).collect(),
                    RegisterArg::Whole(_) => Vec::new(),
                    RegisterArg::Bits(bits) => bits
                        .iter()
                        .filter(|b| b.register == register_name)
                        .map(|b| b.index)
                        .collect(),
                };
                union_all(&mut parent, &idxs)?;
            }
            _ => {}
        }
    }

    let mut groups: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
    for q in 0..size {
        let root = find(&mut parent, q);
        groups.entry(root).or_default().insert(q);
    }
    Ok(groups.into_values().collect())
}

/// Qubits of `register_name` touched by any instruction of `circuit_name`.
pub fn used_qubits_in(ir: &SectionIr, circuit_name: &str, register_name: &str) -> BTreeSet<usize> {
    let mut used = BTreeSet::new();
    for stmt in ir.stmts() {
        match stmt.kind() {
            StmtKind::Gate(instr) if instr.circuit_id == circuit_name => {
                used.extend(
                    instr
                        .qargs
                        .iter()
                        .filter(|b| b.register == register_name)
                        .map(|b| b.index),
                );
            }
            StmtKind::Subcircuit(sub) if sub.circuit_id == circuit_name => match &sub.qargs {
                RegisterArg::Whole(r) if r == register_name => {
                    if let Some(reg) = registers_in(ir).into_iter().find(|r| r.name == register_name) {
                        used.extend(0..reg.size);
                    }
                }
                RegisterArg::Bits(bits) => used.extend(
                    bits.iter()
                        .filter(|b| b.register == register_name)
                        .map(|b| b.index),
                ),
                _ => {}
            },
            _ => {}
        }
    }
    used
}

/// Literal gate parameters: (statement id, parameter position, value text).
pub fn literal_params_in(ir: &SectionIr) -> Vec<(StmtId, usize, String)> {
    let mut out = Vec::new();
    for (id, instr) in ir.instructions() {
        for (pos, p) in instr.params.iter().enumerate() {
            if let Param::Literal { text, .. } = p {
                out.push((id, pos, text.clone()));
            }
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionCall {
    pub result_var: String,
    pub circuit: String,
    pub backend: Option<String>,
    pub shots: Option<u64>,
}

static EXECUTE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_]\w*)\s*=\s*execute\(\s*([A-Za-z_]\w*)\s*(?:,(.*?))?\)(?:\..*)?$")
        .unwrap()
});
static BACKEND_KW_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"backend\s*=\s*([A-Za-z_]\w*)").unwrap());
static SHOTS_KW_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"shots\s*=\s*(\d+)").unwrap());

pub fn execution_calls(text: &str) -> Result<Vec<ExecutionCall>> {
    let mut out = Vec::new();
    for st in lex_statements(text)? {
        if let Some(caps) = EXECUTE_RE.captures(&st.text) {
            let rest = caps.get(3).map_or("", |m| m.as_str());
            out.push(ExecutionCall {
                result_var: caps[1].to_string(),
                circuit: caps[2].to_string(),
                backend: BACKEND_KW_RE.captures(rest).map(|c| c[1].to_string()),
                shots: SHOTS_KW_RE.captures(rest).and_then(|c| c[1].parse().ok()),
            });
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranspileCall {
    pub target: String,
    pub circuit: String,
    /// Keyword arguments in source order, values verbatim.
    pub kwargs: Vec<(String, String)>,
}

impl TranspileCall {
    pub fn kwarg(&self, key: &str) -> Option<&str> {
        self.kwargs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn optimization_level(&self) -> Option<u32> {
        self.kwarg("optimization_level").and_then(|v| v.parse().ok())
    }

    /// Renders the call back to a statement, replacing or adding `key`.
    pub fn with_kwarg(&self, key: &str, value: &str) -> String {
        let mut kwargs = self.kwargs.clone();
        match kwargs.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => kwargs.push((key.to_string(), value.to_string())),
        }
        let mut args = vec![self.circuit.clone()];
        args.extend(kwargs.iter().map(|(k, v)| format!("{}={}", k, v)));
        format!("{} = transpile({})", self.target, args.join(", "))
    }
}

static TRANSPILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z_]\w*)\s*=\s*transpile\((.*)\)$").unwrap());

/// Transpile statements of a section as (statement index, call).
pub fn transpile_calls(text: &str) -> Result<Vec<(usize, TranspileCall)>> {
    let mut out = Vec::new();
    for (idx, st) in lex_statements(text)?.iter().enumerate() {
        let Some(caps) = TRANSPILE_RE.captures(st.text.trim()) else {
            continue;
        };
        let (positional, keyword) = split_args(&caps[2]);
        let Some(circuit) = positional.first() else {
            continue;
        };
        out.push((
            idx,
            TranspileCall {
                target: caps[1].to_string(),
                circuit: circuit.to_string(),
                kwargs: keyword
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            },
        ));
    }
    Ok(out)
}

static GET_BACKEND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*([A-Za-z_]\w*)\s*=\s*[\w\.]*get_backend\(\s*['"]([^'"]+)['"]\s*\)$"#).unwrap()
});

/// Backend selections as (statement index, variable, backend name).
pub fn backend_names(text: &str) -> Result<Vec<(usize, String, String)>> {
    let mut out = Vec::new();
    for (idx, st) in lex_statements(text)?.iter().enumerate() {
        if let Some(caps) = GET_BACKEND_RE.captures(&st.text) {
            out.push((idx, caps[1].to_string(), caps[2].to_string()));
        }
    }
    Ok(out)
}

/// The circuit executed by the program's single execution call, resolved
/// against the CIRCUIT section.
pub fn executed_circuit(program: &Program) -> Result<Circuit> {
    let calls = execution_calls(program.require(program::EXECUTION)?)?;
    if calls.len() != 1 {
        return Err(MorphError::MalformedProgram(format!(
            "expected exactly one execution call, found {}",
            calls.len()
        )));
    }
    let circuits = circuits_used(program.require(program::CIRCUIT)?)?;
    circuits
        .into_iter()
        .find(|c| c.name == calls[0].circuit)
        .ok_or_else(|| {
            MorphError::MalformedProgram(format!(
                "executed circuit {} is not declared in CIRCUIT",
                calls[0].circuit
            ))
        })
}

/// Number of measured classical bits, i.e. the width of output bitstrings.
pub fn measured_width(program: &Program) -> Option<usize> {
    executed_circuit(program)
        .ok()
        .map(|c| c.num_clbits())
        .filter(|w| *w > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CIRCUIT_TEXT: &str = "\
qr = QuantumRegister(4, name='qr')
cr = ClassicalRegister(4, name='cr')
qc = QuantumCircuit(qr, cr, name='qc')
qc.append(HGate(), qargs=[qr[0]], cargs=[])
qc.append(CXGate(), qargs=[qr[0], qr[1]], cargs=[])
qc.append(RZGate(0.1), qargs=[qr[3]], cargs=[])";

    #[test]
    fn test_registers_and_circuits() {
        let regs = registers_used(CIRCUIT_TEXT).unwrap();
        assert_eq!(regs.len(), 2);
        let circuits = circuits_used(CIRCUIT_TEXT).unwrap();
        assert_eq!(circuits.len(), 1);
        assert_eq!(circuits[0].size, 4);
        assert_eq!(circuits[0].quantum_register().unwrap().name, "qr");
        assert_eq!(circuits[0].num_clbits(), 4);
    }

    #[test]
    fn test_mismatched_pair_is_structural_mismatch() {
        let text = "qr = QuantumRegister(3, name='qr')\ncr = ClassicalRegister(2, name='cr')\nqc = QuantumCircuit(qr, cr, name='qc')";
        assert!(matches!(
            circuits_used(text),
            Err(MorphError::StructuralMismatch(_))
        ));
    }

    #[test]
    fn test_add_register_extends_circuit() {
        let text = format!(
            "{}\nqr_x = QuantumRegister(2, name='qr_x')\nqc.add_register(qr_x)",
            CIRCUIT_TEXT
        );
        let circuits = circuits_used(&text).unwrap();
        assert_eq!(circuits[0].quantum_registers.len(), 2);
        assert_eq!(circuits[0].size, 6);
    }

    #[test]
    fn test_instructions_have_line_numbers() {
        let instrs = instructions(CIRCUIT_TEXT).unwrap();
        assert_eq!(instrs.len(), 3);
        assert_eq!(instrs[1].lineno, 5);
        assert_eq!(instrs[1].qbits(), vec![0, 1]);
        assert_eq!(instrs[1].qregs(), vec!["qr", "qr"]);
    }

    #[test]
    fn test_clusters() {
        let clusters = cluster_resources_by_connectivity(CIRCUIT_TEXT, "qc", "qr").unwrap();
        let expected: BTreeSet<BTreeSet<usize>> = vec![
            vec![0, 1].into_iter().collect(),
            vec![2].into_iter().collect(),
            vec![3].into_iter().collect(),
        ]
        .into_iter()
        .collect();
        assert_eq!(clusters, expected);
    }

    #[test]
    fn test_whole_register_subcircuit_joins_everything() {
        let text = format!("{}\nqc.append(sub, qargs=qr, cargs=cr)", CIRCUIT_TEXT);
        let clusters = cluster_resources_by_connectivity(&text, "qc", "qr").unwrap();
        assert_eq!(clusters.len(), 1);
    }

    #[test]
    fn test_execution_calls_and_backends() {
        let text = "backend_1 = Aer.get_backend('aer_simulator')\ncounts = execute(qc, backend=backend_1, shots=1000).result().get_counts(qc)\nRESULT = counts";
        let calls = execution_calls(text).unwrap();
        assert_eq!(
            calls,
            vec![ExecutionCall {
                result_var: "counts".to_string(),
                circuit: "qc".to_string(),
                backend: Some("backend_1".to_string()),
                shots: Some(1000),
            }]
        );
        let backends = backend_names(text).unwrap();
        assert_eq!(
            backends,
            vec![(0, "backend_1".to_string(), "aer_simulator".to_string())]
        );
    }

    #[test]
    fn test_transpile_call_rewrite() {
        let text = "from qiskit import transpile\nqc = transpile(qc, basis_gates=None, optimization_level=2, coupling_map=None)";
        let calls = transpile_calls(text).unwrap();
        assert_eq!(calls.len(), 1);
        let (idx, call) = &calls[0];
        assert_eq!(*idx, 1);
        assert_eq!(call.optimization_level(), Some(2));
        assert_eq!(
            call.with_kwarg("optimization_level", "0"),
            "qc = transpile(qc, basis_gates=None, optimization_level=0, coupling_map=None)"
        );
    }
}
