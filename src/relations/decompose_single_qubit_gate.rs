// SPDX-License-Identifier: Apache-2.0

use super::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecomposeSingleQubitGateConfig {
    pub weight: f64,
    pub min_to_change: usize,
    pub max_to_change: usize,
    /// Rewrite rules of the form `XGate(a) => HGate(a), ZGate(a), HGate(a)`.
    pub rules: Vec<String>,
}

impl Default for DecomposeSingleQubitGateConfig {
    fn default() -> Self {
        DecomposeSingleQubitGateConfig {
            weight: default_weight(),
            min_to_change: 1,
            max_to_change: 2,
            rules: [
                "XGate(a) => HGate(a), ZGate(a), HGate(a)",
                "ZGate(a) => SGate(a), SGate(a)",
                "SGate(a) => TGate(a), TGate(a)",
                "YGate(a) => SGate(a), XGate(a), SdgGate(a)",
            ]
            .iter()
            .map(|r| r.to_string())
            .collect(),
        }
    }
}

#[derive(Debug)]
pub struct DecomposeSingleQubitGate {
    config: DecomposeSingleQubitGateConfig,
    rules: Vec<GateRule>,
}

impl DecomposeSingleQubitGate {
    pub fn new(config: DecomposeSingleQubitGateConfig) -> Result<Self> {
        let kind = RelationKind::DecomposeSingleQubitGate;
        if config.min_to_change == 0 || config.min_to_change > config.max_to_change {
            return Err(config_error(kind, "need 1 <= min_to_change <= max_to_change"));
        }
        let rules = parse_gate_rules(kind, &config.rules, 1)?;
        Ok(DecomposeSingleQubitGate { config, rules })
    }
}

impl MetamorphicRelation for DecomposeSingleQubitGate {
    fn kind(&self) -> RelationKind {
        RelationKind::DecomposeSingleQubitGate
    }

    fn weight(&self) -> f64 {
        self.config.weight
    }

    fn config_json(&self) -> Value {
        serde_json::to_value(&self.config).unwrap_or(Value::Null)
    }

    fn check_precondition(&self, program: &Program) -> Option<Analysis> {
        let ir = SectionIr::parse(program.get(program::CIRCUIT)?).ok()?;
        let matches = gate_rule_matches(&ir, &self.rules);
        (!matches.is_empty()).then_some(Analysis::GateMatches { matches })
    }

    fn derive(
        &self,
        program: &Program,
        analysis: &Analysis,
        rng: &mut dyn RngCore,
    ) -> Result<Derivation> {
        let Analysis::GateMatches { matches } = analysis else {
            return Err(unexpected_analysis(self.kind(), analysis));
        };
        let (follow_up, rewrites) = apply_gate_rules(
            self.kind(),
            program,
            &self.rules,
            matches,
            (self.config.min_to_change, self.config.max_to_change),
            rng,
        )?;
        let mut metadata = Map::new();
        metadata.insert("rewrites".to_string(), Value::from(rewrites));
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
    fn test_decomposes_x_gates() {
        let r = DecomposeSingleQubitGate::new(DecomposeSingleQubitGateConfig {
            min_to_change: 2,
            max_to_change: 2,
            ..DecomposeSingleQubitGateConfig::default()
        })
        .unwrap();
        let program = test_programs::baseline();
        let d = try_apply(&r, &program, &mut Pcg64Mcg::seed_from_u64(6))
            .unwrap()
            .unwrap();
        let gates: Vec<String> = queries::instructions(d.program.get("CIRCUIT").unwrap())
            .unwrap()
            .into_iter()
            .map(|i| i.gate_name)
            .collect();
        assert_eq!(
            gates,
            vec![
                "HGate", "CXGate", "RZGate", "HGate", "ZGate", "HGate", "HGate", "ZGate",
                "HGate", "SwapGate"
            ]
        );
        let rewrites = d.metadata["rewrites"].as_array().unwrap();
        assert_eq!(rewrites.len(), 2);
        assert_eq!(rewrites[0]["gate"], Value::from("XGate"));
    }

    #[test]
    fn test_parametrized_gates_do_not_match() {
        let r = DecomposeSingleQubitGate::new(DecomposeSingleQubitGateConfig {
            rules: vec!["HGate(a) => HGate(a)".to_string()],
            ..DecomposeSingleQubitGateConfig::default()
        })
        .unwrap();
        let text = test_programs::BASELINE.replace("HGate()", "RZGate(0.5)");
        assert!(r.check_precondition(&program::split(&text).unwrap()).is_none());
    }

    #[test]
    fn test_rule_validation() {
        for bad in [
            "SwapGate(a, b) => CXGate(a, b)",
            "XGate(a) => FooGate(a)",
            "XGate(a) HGate(a)",
        ] {
            let config = DecomposeSingleQubitGateConfig {
                rules: vec![bad.to_string()],
                ..DecomposeSingleQubitGateConfig::default()
            };
            assert!(DecomposeSingleQubitGate::new(config).is_err(), "{}", bad);
        }
    }
}
