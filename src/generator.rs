// SPDX-License-Identifier: Apache-2.0

//! Baseline program generators.
//!
//! A generator turns `(n_qubits, n_ops_range, gate_set, seed, id)` into
//! program text in the sectioned format plus a JSON description of what it
//! produced. Generators are looked up by name; `random_circuit` emits a
//! single register pair, uniformly random gates, one transpile call, a
//! whole-register measurement and one execution call.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::circuit_ir::{CircuitDecl, Register, RegisterKind, StmtKind};
use crate::gates;
use crate::morph_error::{MorphError, Result};
use crate::program::{self, Program};

pub const RANDOM_CIRCUIT: &str = "random_circuit";

pub fn generator_names() -> Vec<&'static str> {
    vec![RANDOM_CIRCUIT]
}

pub trait Generator: Send {
    fn name(&self) -> &str;

    /// Returns the program text and generator metadata.
    fn generate(
        &self,
        n_qubits: usize,
        n_ops_range: (usize, usize),
        gate_set: &[String],
        seed: u64,
        id: &str,
    ) -> Result<(String, Value)>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneratorConfig {
    pub kind: String,
    pub min_qubits: usize,
    pub max_qubits: usize,
    pub min_ops: usize,
    pub max_ops: usize,
    pub gate_set: Vec<String>,
    pub backend: String,
    pub shots: u64,
    pub optimization_level: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            kind: RANDOM_CIRCUIT.to_string(),
            min_qubits: 2,
            max_qubits: 5,
            min_ops: 5,
            max_ops: 20,
            gate_set: gates::default_gate_set(),
            backend: "aer_simulator".to_string(),
            shots: 1000,
            optimization_level: 1,
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<()> {
        if !generator_names().contains(&self.kind.as_str()) {
            return Err(MorphError::Config(format!(
                "unknown generator {:?}; expected one of {:?}",
                self.kind,
                generator_names()
            )));
        }
        if self.min_qubits == 0 || self.min_qubits > self.max_qubits {
            return Err(MorphError::Config(
                "generator needs 1 <= min_qubits <= max_qubits".to_string(),
            ));
        }
        if self.min_ops > self.max_ops {
            return Err(MorphError::Config(
                "generator needs min_ops <= max_ops".to_string(),
            ));
        }
        if self.shots == 0 {
            return Err(MorphError::Config("generator shots must be > 0".to_string()));
        }
        if self.gate_set.is_empty() {
            return Err(MorphError::Config("generator gate_set is empty".to_string()));
        }
        if let Some(unknown) = self.gate_set.iter().find(|g| gates::lookup(g).is_none()) {
            return Err(MorphError::Config(format!(
                "generator gate_set names unknown gate {}",
                unknown
            )));
        }
        if self.backend.contains(['\'', '"', '\\']) {
            return Err(MorphError::Config(format!(
                "invalid backend name {:?}",
                self.backend
            )));
        }
        Ok(())
    }

    pub fn build(&self) -> Result<Box<dyn Generator>> {
        self.validate()?;
        match self.kind.as_str() {
            RANDOM_CIRCUIT => Ok(Box::new(RandomCircuitGenerator::new(self.clone()))),
            other => Err(MorphError::Config(format!("unknown generator {:?}", other))),
        }
    }

    /// Picks a register size within the configured range.
    pub fn sample_qubits<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        rng.gen_range(self.min_qubits..=self.max_qubits)
    }
}

#[derive(Debug)]
pub struct RandomCircuitGenerator {
    config: GeneratorConfig,
}

impl RandomCircuitGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        RandomCircuitGenerator { config }
    }
}

const PROLOGUE_BODY: &str = "\
from qiskit import QuantumRegister, ClassicalRegister, QuantumCircuit, Aer, transpile, execute
from qiskit.circuit.library.standard_gates import *";

impl Generator for RandomCircuitGenerator {
    fn name(&self) -> &str {
        RANDOM_CIRCUIT
    }

    fn generate(
        &self,
        n_qubits: usize,
        (min_ops, max_ops): (usize, usize),
        gate_set: &[String],
        seed: u64,
        id: &str,
    ) -> Result<(String, Value)> {
        if n_qubits == 0 {
            return Err(MorphError::Config("cannot generate a 0-qubit circuit".to_string()));
        }
        if min_ops > max_ops {
            return Err(MorphError::Config(format!(
                "empty op range [{}, {}]",
                min_ops, max_ops
            )));
        }
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        let qreg = Register {
            name: "qr".to_string(),
            kind: RegisterKind::Quantum,
            size: n_qubits,
        };
        let creg = Register {
            name: "cr".to_string(),
            kind: RegisterKind::Classical,
            size: n_qubits,
        };
        let mut circuit = vec![
            StmtKind::Register(qreg.clone()).to_string(),
            StmtKind::Register(creg.clone()).to_string(),
            StmtKind::Circuit(CircuitDecl {
                name: "qc".to_string(),
                registers: vec![qreg.name.clone(), creg.name.clone()],
            })
            .to_string(),
        ];
        let n_ops = rng.gen_range(min_ops..=max_ops);
        let mut gate_names = Vec::with_capacity(n_ops);
        for _ in 0..n_ops {
            if let Some(instr) =
                gates::random_instruction(&mut rng, "qc", &qreg.name, n_qubits, gate_set)
            {
                gate_names.push(instr.gate_name.clone());
                circuit.push(instr.to_string());
            }
        }

        let backend_var = format!("backend_{:04x}", rng.gen::<u16>());
        let execution = [
            format!(
                "{} = Aer.get_backend('{}')",
                backend_var, self.config.backend
            ),
            format!(
                "counts = execute(qc, backend={}, shots={}).result().get_counts(qc)",
                backend_var, self.config.shots
            ),
            "RESULT = counts".to_string(),
        ];
        let optimization = format!(
            "qc = transpile(qc, basis_gates=None, optimization_level={}, coupling_map=None)",
            self.config.optimization_level
        );

        let program = Program::from_sections(vec![
            (program::PROLOGUE, PROLOGUE_BODY.to_string()),
            (program::CIRCUIT, circuit.join("\n")),
            (program::OPTIMIZATION_LEVEL, optimization),
            (program::MEASUREMENT, "qc.measure(qr, cr)".to_string()),
            (program::EXECUTION, execution.join("\n")),
        ])?;

        let metadata = json!({
            "generator": self.name(),
            "id": id,
            "seed": seed,
            "n_qubits": n_qubits,
            "n_ops": gate_names.len(),
            "gates": gate_names,
            "backend": self.config.backend,
            "shots": self.config.shots,
            "optimization_level": self.config.optimization_level,
        });
        Ok((program::reconstruct(&program), metadata))
    }
}
