// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::gates;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InjectNullEffectConfig {
    pub weight: f64,
    pub min_gates: usize,
    pub max_gates: usize,
    pub gate_set: Vec<String>,
}

impl Default for InjectNullEffectConfig {
    fn default() -> Self {
        InjectNullEffectConfig {
            weight: default_weight(),
            min_gates: 1,
            max_gates: 4,
            gate_set: gates::default_gate_set(),
        }
    }
}

/// Appends `U` and `U.inverse()` back to back, where `U` is a small random
/// sub-circuit over the executed circuit's first quantum register.
#[derive(Debug)]
pub struct InjectNullEffect {
    config: InjectNullEffectConfig,
}

impl InjectNullEffect {
    pub fn new(config: InjectNullEffectConfig) -> Result<Self> {
        let kind = RelationKind::InjectNullEffect;
        if config.min_gates == 0 || config.min_gates > config.max_gates {
            return Err(config_error(kind, "need 1 <= min_gates <= max_gates"));
        }
        if let Some(unknown) = config.gate_set.iter().find(|g| gates::lookup(g).is_none()) {
            return Err(config_error(kind, &format!("unknown gate {}", unknown)));
        }
        if config.gate_set.is_empty() {
            return Err(config_error(kind, "gate_set is empty"));
        }
        Ok(InjectNullEffect { config })
    }
}

impl MetamorphicRelation for InjectNullEffect {
    fn kind(&self) -> RelationKind {
        RelationKind::InjectNullEffect
    }

    fn weight(&self) -> f64 {
        self.config.weight
    }

    fn config_json(&self) -> Value {
        serde_json::to_value(&self.config).unwrap_or(Value::Null)
    }

    fn check_precondition(&self, program: &Program) -> Option<Analysis> {
        let circuit = queries::executed_circuit(program).ok()?;
        let register = circuit.quantum_register()?.clone();
        let ir = SectionIr::parse(program.get(program::CIRCUIT)?).ok()?;
        let anchors = ir
            .stmts()
            .iter()
            .filter(|s| s.indent().is_empty())
            .filter(|s| match s.kind() {
                StmtKind::Gate(i) => i.circuit_id == circuit.name,
                StmtKind::Subcircuit(sub) => sub.circuit_id == circuit.name,
                _ => false,
            })
            .map(|s| s.id)
            .collect();
        Some(Analysis::NullEffect {
            circuit: circuit.name,
            register,
            anchors,
        })
    }

    fn derive(
        &self,
        program: &Program,
        analysis: &Analysis,
        rng: &mut dyn RngCore,
    ) -> Result<Derivation> {
        let Analysis::NullEffect {
            circuit,
            register,
            anchors,
        } = analysis
        else {
            return Err(unexpected_analysis(self.kind(), analysis));
        };
        let sub = format!("null_{}", fresh_tag(rng));
        let n_gates = rng.gen_range(self.config.min_gates..=self.config.max_gates);
        let mut body = Vec::with_capacity(n_gates);
        for _ in 0..n_gates {
            if let Some(instr) = gates::random_instruction(
                rng,
                &sub,
                &register.name,
                register.size,
                &self.config.gate_set,
            ) {
                body.push(instr);
            }
        }
        if body.is_empty() {
            return Err(MorphError::MalformedProgram(format!(
                "{}: no configured gate fits register {} of size {}",
                self.kind(),
                register.name,
                register.size
            )));
        }

        let append = |inverse| {
            StmtKind::Subcircuit(SubcircuitAppend {
                circuit_id: circuit.clone(),
                subcircuit: sub.clone(),
                inverse,
                qargs: RegisterArg::Whole(register.name.clone()),
                cargs: RegisterArg::Bits(Vec::new()),
            })
        };
        let mut kinds = vec![StmtKind::Circuit(CircuitDecl {
            name: sub.clone(),
            registers: vec![register.name.clone()],
        })];
        kinds.extend(body.iter().cloned().map(StmtKind::Gate));
        kinds.push(append(false));
        kinds.push(append(true));

        let mut ir = parse_section(program, program::CIRCUIT)?;
        let anchor = anchors.choose(rng).copied();
        match anchor {
            Some(id) => {
                ir.insert_after(id, kinds)?;
            }
            None => {
                let end = ir.len();
                ir.insert_at(end, kinds);
            }
        }
        let mut follow_up = program.clone();
        follow_up.set_section(program::CIRCUIT, &ir.emit())?;

        let mut metadata = Map::new();
        metadata.insert("subcircuit".to_string(), Value::from(sub));
        metadata.insert(
            "gates".to_string(),
            Value::from(body.iter().map(|i| i.gate_name.clone()).collect::<Vec<_>>()),
        );
        metadata.insert("at_end".to_string(), Value::from(anchor.is_none()));
        Ok(Derivation::equivalent(follow_up, metadata))
    }
}
