// SPDX-License-Identifier: Apache-2.0

use super::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChangeTargetBasisConfig {
    pub weight: f64,
    /// Candidate universal gate sets, by transpiler gate name.
    pub basis_sets: Vec<Vec<String>>,
}

impl Default for ChangeTargetBasisConfig {
    fn default() -> Self {
        let set = |gates: &[&str]| gates.iter().map(|g| g.to_string()).collect();
        ChangeTargetBasisConfig {
            weight: default_weight(),
            basis_sets: vec![
                set(&["cx", "rz", "sx", "x"]),
                set(&["cx", "u1", "u2", "u3"]),
                set(&["cz", "rx", "ry", "rz"]),
                set(&["ecr", "rz", "sx", "x"]),
            ],
        }
    }
}

#[derive(Debug)]
pub struct ChangeTargetBasis {
    config: ChangeTargetBasisConfig,
}

fn render_basis(gates: &[String]) -> String {
    format!(
        "[{}]",
        gates
            .iter()
            .map(|g| format!("'{}'", g))
            .collect::<Vec<_>>()
            .join(", ")
    )
}

impl ChangeTargetBasis {
    pub fn new(config: ChangeTargetBasisConfig) -> Result<Self> {
        if config.basis_sets.is_empty() || config.basis_sets.iter().any(|s| s.is_empty()) {
            return Err(config_error(
                RelationKind::ChangeTargetBasis,
                "basis_sets must be non-empty lists of gate names",
            ));
        }
        Ok(ChangeTargetBasis { config })
    }

    fn alternatives(&self, current: Option<&str>) -> Vec<String> {
        self.config
            .basis_sets
            .iter()
            .map(|s| render_basis(s))
            .filter(|s| Some(s.as_str()) != current)
            .collect()
    }
}

impl MetamorphicRelation for ChangeTargetBasis {
    fn kind(&self) -> RelationKind {
        RelationKind::ChangeTargetBasis
    }

    fn weight(&self) -> f64 {
        self.config.weight
    }

    fn config_json(&self) -> Value {
        serde_json::to_value(&self.config).unwrap_or(Value::Null)
    }

    fn check_precondition(&self, program: &Program) -> Option<Analysis> {
        let sites = transpile_sites(program, |call| {
            call.kwarg("basis_gates").is_some()
                && !self.alternatives(call.kwarg("basis_gates")).is_empty()
        });
        (!sites.is_empty()).then_some(Analysis::Transpile { sites })
    }

    fn derive(
        &self,
        program: &Program,
        analysis: &Analysis,
        rng: &mut dyn RngCore,
    ) -> Result<Derivation> {
        let Analysis::Transpile { sites } = analysis else {
            return Err(unexpected_analysis(self.kind(), analysis));
        };
        let site = sites
            .choose(rng)
            .ok_or_else(|| unexpected_analysis(self.kind(), analysis))?;
        let old = site.call.kwarg("basis_gates").map(str::to_string);
        let new_basis = self
            .alternatives(old.as_deref())
            .choose(rng)
            .cloned()
            .ok_or_else(|| unexpected_analysis(self.kind(), analysis))?;
        let text = site.call.with_kwarg("basis_gates", &new_basis);
        let follow_up = replace_statement(program, &site.section, site.index, &text)?;

        let mut metadata = Map::new();
        metadata.insert("section".to_string(), Value::from(site.section.clone()));
        metadata.insert("old_basis".to_string(), old.map_or(Value::Null, Value::from));
        metadata.insert("new_basis".to_string(), Value::from(new_basis));
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
    fn test_rewrites_basis_gates() {
        let r = ChangeTargetBasis::new(ChangeTargetBasisConfig::default()).unwrap();
        let program = test_programs::baseline();
        let d = try_apply(&r, &program, &mut Pcg64Mcg::seed_from_u64(4))
            .unwrap()
            .unwrap();
        let calls = queries::transpile_calls(d.program.get("OPTIMIZATION_LEVEL").unwrap()).unwrap();
        let basis = calls[0].1.kwarg("basis_gates").unwrap();
        assert!(basis.starts_with("['"), "{}", basis);
        assert_eq!(calls[0].1.optimization_level(), Some(2));
        assert_eq!(d.metadata["new_basis"], Value::from(basis));
    }

    #[test]
    fn test_render_basis() {
        assert_eq!(
            render_basis(&["cx".to_string(), "rz".to_string()]),
            "['cx', 'rz']"
        );
    }

    #[test]
    fn test_no_transpile_call_fails_precondition() {
        let r = ChangeTargetBasis::new(ChangeTargetBasisConfig::default()).unwrap();
        let text = test_programs::BASELINE.replace(
            "qc = transpile(qc, basis_gates=None, optimization_level=2, coupling_map=None)",
            "qc = qc",
        );
        assert!(r.check_precondition(&program::split(&text).unwrap()).is_none());
    }
}
