// SPDX-License-Identifier: Apache-2.0

use super::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AddUnusedRegisterConfig {
    pub weight: f64,
    pub min_size: usize,
    pub max_size: usize,
}

impl Default for AddUnusedRegisterConfig {
    fn default() -> Self {
        AddUnusedRegisterConfig {
            weight: default_weight(),
            min_size: 1,
            max_size: 3,
        }
    }
}

#[derive(Debug)]
pub struct AddUnusedRegister {
    config: AddUnusedRegisterConfig,
}

impl AddUnusedRegister {
    pub fn new(config: AddUnusedRegisterConfig) -> Result<Self> {
        if config.min_size == 0 || config.min_size > config.max_size {
            return Err(config_error(
                RelationKind::AddUnusedRegister,
                "need 1 <= min_size <= max_size",
            ));
        }
        Ok(AddUnusedRegister { config })
    }
}

impl MetamorphicRelation for AddUnusedRegister {
    fn kind(&self) -> RelationKind {
        RelationKind::AddUnusedRegister
    }

    fn weight(&self) -> f64 {
        self.config.weight
    }

    fn config_json(&self) -> Value {
        serde_json::to_value(&self.config).unwrap_or(Value::Null)
    }

    fn check_precondition(&self, program: &Program) -> Option<Analysis> {
        let circuits = queries::circuits_used(program.get(program::CIRCUIT)?).ok()?;
        let names: Vec<String> = circuits.into_iter().map(|c| c.name).collect();
        (!names.is_empty()).then_some(Analysis::Circuits { names })
    }

    fn derive(
        &self,
        program: &Program,
        analysis: &Analysis,
        rng: &mut dyn RngCore,
    ) -> Result<Derivation> {
        let Analysis::Circuits { names } = analysis else {
            return Err(unexpected_analysis(self.kind(), analysis));
        };
        let circuit = names
            .choose(rng)
            .ok_or_else(|| unexpected_analysis(self.kind(), analysis))?;
        let register = Register {
            name: format!("qr_unused_{}", fresh_tag(rng)),
            kind: RegisterKind::Quantum,
            size: rng.gen_range(self.config.min_size..=self.config.max_size),
        };
        let lines = [
            StmtKind::Register(register.clone()).to_string(),
            StmtKind::AddRegister {
                circuit_id: circuit.clone(),
                register: register.name.clone(),
            }
            .to_string(),
        ];

        let follow_up = match program.get(program::USELESS_ENTITIES) {
            Some(existing) => {
                let mut body = existing.to_string();
                for line in &lines {
                    if !body.is_empty() {
                        body.push('\n');
                    }
                    body.push_str(line);
                }
                let mut p = program.clone();
                p.set_section(program::USELESS_ENTITIES, &body)?;
                p
            }
            None => program.insert_section_canonical(program::USELESS_ENTITIES, &lines.join("\n"))?,
        };

        let mut metadata = Map::new();
        metadata.insert("circuit".to_string(), Value::from(circuit.clone()));
        metadata.insert("register".to_string(), serde_json::to_value(&register)?);
        Ok(Derivation::equivalent(follow_up, metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_programs;
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    #[test]
    fn test_adds_register_after_circuit() {
        let r = AddUnusedRegister::new(AddUnusedRegisterConfig::default()).unwrap();
        let program = test_programs::baseline();
        let d = try_apply(&r, &program, &mut Pcg64Mcg::seed_from_u64(8))
            .unwrap()
            .unwrap();
        assert_eq!(
            d.program.section_names(),
            vec![
                "PROLOGUE",
                "CIRCUIT",
                "USELESS_ENTITIES",
                "OPTIMIZATION_LEVEL",
                "MEASUREMENT",
                "EXECUTION"
            ]
        );
        let body = d.program.get("USELESS_ENTITIES").unwrap();
        let regs = queries::registers_used(body).unwrap();
        assert_eq!(regs.len(), 1);
        assert!((1..=3).contains(&regs[0].size));
        assert!(body.contains(&format!("qc.add_register({})", regs[0].name)));
        assert_eq!(d.program.get("CIRCUIT"), program.get("CIRCUIT"));
    }

    #[test]
    fn test_appends_to_existing_section() {
        let r = AddUnusedRegister::new(AddUnusedRegisterConfig::default()).unwrap();
        let mut rng = Pcg64Mcg::seed_from_u64(8);
        let once = try_apply(&r, &test_programs::baseline(), &mut rng)
            .unwrap()
            .unwrap()
            .program;
        let twice = try_apply(&r, &once, &mut rng).unwrap().unwrap().program;
        let regs = queries::registers_used(twice.get("USELESS_ENTITIES").unwrap()).unwrap();
        assert_eq!(regs.len(), 2);
    }
}
