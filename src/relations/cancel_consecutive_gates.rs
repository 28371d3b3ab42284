// SPDX-License-Identifier: Apache-2.0

use super::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CancelConsecutiveGatesConfig {
    pub weight: f64,
    pub min_to_change: usize,
    pub max_to_change: usize,
    /// Self-inverse single-qubit gates whose back-to-back pairs may be removed.
    pub gates: Vec<String>,
}

impl Default for CancelConsecutiveGatesConfig {
    fn default() -> Self {
        CancelConsecutiveGatesConfig {
            weight: default_weight(),
            min_to_change: 1,
            max_to_change: 2,
            gates: gates::GATES
                .iter()
                .filter(|g| g.self_inverse && g.num_qubits == 1 && g.num_params == 0)
                .map(|g| g.name.to_string())
                .collect(),
        }
    }
}

#[derive(Debug)]
pub struct CancelConsecutiveGates {
    config: CancelConsecutiveGatesConfig,
}

impl CancelConsecutiveGates {
    pub fn new(config: CancelConsecutiveGatesConfig) -> Result<Self> {
        let kind = RelationKind::CancelConsecutiveGates;
        if config.min_to_change == 0 || config.min_to_change > config.max_to_change {
            return Err(config_error(kind, "need 1 <= min_to_change <= max_to_change"));
        }
        if config.gates.is_empty() {
            return Err(config_error(kind, "gates is empty"));
        }
        for name in &config.gates {
            match gates::lookup(name) {
                Some(g) if g.self_inverse && g.num_qubits == 1 && g.num_params == 0 => {}
                Some(_) => {
                    return Err(config_error(
                        kind,
                        &format!("{} is not a self-inverse single-qubit gate", name),
                    ))
                }
                None => return Err(config_error(kind, &format!("unknown gate {}", name))),
            }
        }
        Ok(CancelConsecutiveGates { config })
    }
}

impl MetamorphicRelation for CancelConsecutiveGates {
    fn kind(&self) -> RelationKind {
        RelationKind::CancelConsecutiveGates
    }

    fn weight(&self) -> f64 {
        self.config.weight
    }

    fn config_json(&self) -> Value {
        serde_json::to_value(&self.config).unwrap_or(Value::Null)
    }

    fn check_precondition(&self, program: &Program) -> Option<Analysis> {
        let ir = SectionIr::parse(program.get(program::CIRCUIT)?).ok()?;
        let top_level = |id: StmtId| ir.get(id).map_or(false, |s| s.indent().is_empty());
        let pairs: Vec<GatePair> = self
            .config
            .gates
            .iter()
            .flat_map(|g| queries::consecutive_same_gate_pairs_in(&ir, g))
            .filter(|p| top_level(p.first) && top_level(p.second))
            .collect();
        (!pairs.is_empty()).then_some(Analysis::GatePairs { pairs })
    }

    fn derive(
        &self,
        program: &Program,
        analysis: &Analysis,
        rng: &mut dyn RngCore,
    ) -> Result<Derivation> {
        let Analysis::GatePairs { pairs } = analysis else {
            return Err(unexpected_analysis(self.kind(), analysis));
        };
        let count = choose_count(
            rng,
            self.config.min_to_change,
            self.config.max_to_change,
            pairs.len(),
        );
        let mut chosen: Vec<&GatePair> = index::sample(rng, pairs.len(), count)
            .into_iter()
            .map(|i| &pairs[i])
            .collect();
        chosen.sort_by_key(|p| p.lineno);

        let mut ir = parse_section(program, program::CIRCUIT)?;
        let mut removed = Vec::with_capacity(chosen.len());
        let mut doomed = Vec::with_capacity(2 * chosen.len());
        for pair in &chosen {
            let gate = ir
                .get(pair.first)
                .and_then(|s| s.as_instruction())
                .map(|i| i.gate_name.clone())
                .ok_or_else(|| unexpected_analysis(self.kind(), analysis))?;
            for id in [pair.first, pair.second] {
                let pos = ir.index_of(id).ok_or_else(|| {
                    MorphError::MalformedProgram(format!("{}: no statement {}", self.kind(), id))
                })?;
                doomed.push((pos, id));
            }
            removed.push(serde_json::json!({
                "gate": gate,
                "circuit": pair.circuit_id,
                "register": pair.qregs.first(),
                "qubit": pair.qbits.first(),
                "lineno": pair.lineno,
                "next_lineno": pair.next_lineno,
            }));
        }
        doomed.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, id) in doomed {
            ir.remove(id);
        }

        let mut follow_up = program.clone();
        follow_up.set_section(program::CIRCUIT, &ir.emit())?;
        let mut metadata = Map::new();
        metadata.insert("removed_pairs".to_string(), Value::from(removed));
        Ok(Derivation::equivalent(follow_up, metadata))
    }
}
