// SPDX-License-Identifier: Apache-2.0

use super::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChangeOptLevelConfig {
    pub weight: f64,
    pub levels: Vec<u32>,
}

impl Default for ChangeOptLevelConfig {
    fn default() -> Self {
        ChangeOptLevelConfig {
            weight: default_weight(),
            levels: vec![0, 1, 2, 3],
        }
    }
}

#[derive(Debug)]
pub struct ChangeOptLevel {
    config: ChangeOptLevelConfig,
}

impl ChangeOptLevel {
    pub fn new(config: ChangeOptLevelConfig) -> Result<Self> {
        if config.levels.len() < 2 {
            return Err(config_error(
                RelationKind::ChangeOptLevel,
                "at least two optimization levels are needed",
            ));
        }
        Ok(ChangeOptLevel { config })
    }

    fn alternatives(&self, current: Option<u32>) -> Vec<u32> {
        self.config
            .levels
            .iter()
            .copied()
            .filter(|l| Some(*l) != current)
            .collect()
    }
}

impl MetamorphicRelation for ChangeOptLevel {
    fn kind(&self) -> RelationKind {
        RelationKind::ChangeOptLevel
    }

    fn weight(&self) -> f64 {
        self.config.weight
    }

    fn config_json(&self) -> Value {
        serde_json::to_value(&self.config).unwrap_or(Value::Null)
    }

    fn check_precondition(&self, program: &Program) -> Option<Analysis> {
        let sites = transpile_sites(program, |call| {
            call.kwarg("optimization_level").is_some()
                && !self.alternatives(call.optimization_level()).is_empty()
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
        let old = site.call.optimization_level();
        let new_level = *self
            .alternatives(old)
            .choose(rng)
            .ok_or_else(|| unexpected_analysis(self.kind(), analysis))?;
        let text = site
            .call
            .with_kwarg("optimization_level", &new_level.to_string());
        let follow_up = replace_statement(program, &site.section, site.index, &text)?;

        let mut metadata = Map::new();
        metadata.insert("section".to_string(), Value::from(site.section.clone()));
        metadata.insert(
            "old_level".to_string(),
            old.map_or(Value::Null, Value::from),
        );
        metadata.insert("new_level".to_string(), Value::from(new_level));
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
    fn test_changes_level_only() {
        let r = ChangeOptLevel::new(ChangeOptLevelConfig::default()).unwrap();
        let program = test_programs::baseline();
        let mut rng = Pcg64Mcg::seed_from_u64(2);
        for _ in 0..10 {
            let d = try_apply(&r, &program, &mut rng).unwrap().unwrap();
            let calls = queries::transpile_calls(d.program.get("OPTIMIZATION_LEVEL").unwrap()).unwrap();
            let level = calls[0].1.optimization_level().unwrap();
            assert_ne!(level, 2);
            assert_eq!(calls[0].1.kwarg("basis_gates"), Some("None"));
            assert_eq!(d.metadata["new_level"], Value::from(level));
            assert_eq!(d.program.get("CIRCUIT"), program.get("CIRCUIT"));
        }
    }

    #[test]
    fn test_precondition_needs_alternative_level() {
        let config = ChangeOptLevelConfig {
            levels: vec![2, 2],
            ..ChangeOptLevelConfig::default()
        };
        let r = ChangeOptLevel::new(config).unwrap();
        assert!(r.check_precondition(&test_programs::baseline()).is_none());
        assert!(ChangeOptLevel::new(ChangeOptLevelConfig {
            levels: vec![1],
            ..ChangeOptLevelConfig::default()
        })
        .is_err());
    }
}
