// SPDX-License-Identifier: Apache-2.0

use super::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChangeQubitOrderConfig {
    pub weight: f64,
    /// Upper bound on how many qubits take part in the permutation.
    pub max_subset: Option<usize>,
}

impl Default for ChangeQubitOrderConfig {
    fn default() -> Self {
        ChangeQubitOrderConfig {
            weight: default_weight(),
            max_subset: None,
        }
    }
}

/// Permutes the qubits of the single quantum register and records the
/// mapping so the output bits can be put back in place.
#[derive(Debug)]
pub struct ChangeQubitOrder {
    config: ChangeQubitOrderConfig,
}

impl ChangeQubitOrder {
    pub fn new(config: ChangeQubitOrderConfig) -> Result<Self> {
        if matches!(config.max_subset, Some(m) if m < 2) {
            return Err(config_error(
                RelationKind::ChangeQubitOrder,
                "max_subset must be at least 2",
            ));
        }
        Ok(ChangeQubitOrder { config })
    }

    /// Random permutation of `[0, n)` that moves a random subset of at least
    /// two qubits.
    pub fn random_mapping(&self, n: usize, rng: &mut dyn RngCore) -> Vec<usize> {
        let mut mapping: Vec<usize> = (0..n).collect();
        if n < 2 {
            return mapping;
        }
        let hi = self.config.max_subset.unwrap_or(n).min(n);
        let k = rng.gen_range(2..=hi);
        let mut subset = index::sample(rng, n, k).into_vec();
        subset.sort_unstable();
        let mut targets = subset.clone();
        targets.shuffle(rng);
        if targets == subset {
            targets.rotate_left(1);
        }
        for (s, t) in subset.iter().zip(targets) {
            mapping[*s] = t;
        }
        mapping
    }
}

fn remap_bits(bits: &mut [BitRef], register: &str, mapping: &[usize]) {
    for b in bits.iter_mut().filter(|b| b.register == register) {
        b.index = mapping[b.index];
    }
}

impl MetamorphicRelation for ChangeQubitOrder {
    fn kind(&self) -> RelationKind {
        RelationKind::ChangeQubitOrder
    }

    fn weight(&self) -> f64 {
        self.config.weight
    }

    fn config_json(&self) -> Value {
        serde_json::to_value(&self.config).unwrap_or(Value::Null)
    }

    fn is_semantically_equivalent(&self) -> bool {
        false
    }

    fn check_precondition(&self, program: &Program) -> Option<Analysis> {
        let circuit = queries::executed_circuit(program).ok()?;
        let ([qreg], [creg]) = (
            circuit.quantum_registers.as_slice(),
            circuit.classical_registers.as_slice(),
        ) else {
            return None;
        };
        if qreg.size != creg.size || qreg.size < 2 {
            return None;
        }
        let body = SectionIr::parse(program.get(program::CIRCUIT)?).ok()?;
        let indexed = format!("{}[", qreg.name);
        let opaque_use = body.stmts().iter().any(|s| match s.kind() {
            StmtKind::Raw(text) => text.contains(&indexed),
            _ => false,
        });
        if opaque_use {
            return None;
        }
        let measurement = SectionIr::parse(program.get(program::MEASUREMENT)?).ok()?;
        let measured_whole = measurement.stmts().iter().any(|s| {
            matches!(s.kind(), StmtKind::Measure { circuit_id, qreg: q, creg: c }
                if *circuit_id == circuit.name && *q == qreg.name && *c == creg.name)
        });
        measured_whole.then(|| Analysis::QubitOrder {
            circuit: circuit.name.clone(),
            qreg: qreg.clone(),
            creg: creg.clone(),
        })
    }

    fn derive(
        &self,
        program: &Program,
        analysis: &Analysis,
        rng: &mut dyn RngCore,
    ) -> Result<Derivation> {
        let Analysis::QubitOrder { circuit, qreg, .. } = analysis else {
            return Err(unexpected_analysis(self.kind(), analysis));
        };
        let mut ir = parse_section(program, program::CIRCUIT)?;
        let quantum = queries::registers_in(&ir)
            .into_iter()
            .filter(|r| r.kind == RegisterKind::Quantum)
            .count();
        if quantum != 1 {
            return Err(MorphError::MalformedProgram(format!(
                "{}: expected exactly one quantum register, found {}",
                self.kind(),
                quantum
            )));
        }

        let n = qreg.size;
        let out_of_range = ir.stmts().iter().any(|s| match s.kind() {
            StmtKind::Gate(i) => i.qargs.iter().any(|b| b.register == qreg.name && b.index >= n),
            StmtKind::Subcircuit(SubcircuitAppend {
                qargs: RegisterArg::Bits(bits),
                ..
            }) => bits.iter().any(|b| b.register == qreg.name && b.index >= n),
            _ => false,
        });
        if out_of_range {
            return Err(MorphError::MalformedProgram(format!(
                "{}: qubit index out of range for {}",
                self.kind(),
                qreg.name
            )));
        }

        let mapping = self.random_mapping(n, rng);
        // Sub-circuit bodies address their own qubit positions; only the
        // executed circuit's statements are remapped.
        for stmt in ir.iter_mut() {
            let touches = match stmt.kind() {
                StmtKind::Gate(i) => {
                    i.circuit_id == *circuit && i.qargs.iter().any(|b| b.register == qreg.name)
                }
                StmtKind::Subcircuit(s) if s.circuit_id == *circuit => match &s.qargs {
                    RegisterArg::Whole(r) => *r == qreg.name,
                    RegisterArg::Bits(bits) => bits.iter().any(|b| b.register == qreg.name),
                },
                _ => false,
            };
            if !touches {
                continue;
            }
            match stmt.kind_mut() {
                StmtKind::Gate(i) => remap_bits(&mut i.qargs, &qreg.name, &mapping),
                StmtKind::Subcircuit(s) => match &mut s.qargs {
                    RegisterArg::Bits(bits) => remap_bits(bits, &qreg.name, &mapping),
                    whole => {
                        // Sub-circuit qubit j stays bound to the same logical qubit.
                        *whole = RegisterArg::Bits(
                            mapping.iter().map(|t| BitRef::new(&qreg.name, *t)).collect(),
                        );
                    }
                },
                _ => {}
            }
        }

        let mut follow_up = program.clone();
        follow_up.set_section(program::CIRCUIT, &ir.emit())?;
        trace!("{}: mapping {:?}", self.kind(), mapping);

        let mut metadata = Map::new();
        metadata.insert("register".to_string(), Value::from(qreg.name.clone()));
        metadata.insert("mapping".to_string(), serde_json::to_value(&mapping)?);
        Ok(Derivation {
            program: follow_up,
            metadata,
            reconciliation: Reconciliation::BitPermutation { mapping },
        })
    }
}
