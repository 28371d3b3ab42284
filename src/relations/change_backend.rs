// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::lexer::lex_statements;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChangeBackendConfig {
    pub weight: f64,
    pub backends: Vec<String>,
}

impl Default for ChangeBackendConfig {
    fn default() -> Self {
        ChangeBackendConfig {
            weight: default_weight(),
            backends: vec![
                "aer_simulator".to_string(),
                "aer_simulator_statevector".to_string(),
                "aer_simulator_density_matrix".to_string(),
                "aer_simulator_matrix_product_state".to_string(),
            ],
        }
    }
}

#[derive(Debug)]
pub struct ChangeBackend {
    config: ChangeBackendConfig,
}

impl ChangeBackend {
    pub fn new(config: ChangeBackendConfig) -> Result<Self> {
        if config.backends.len() < 2 {
            return Err(config_error(
                RelationKind::ChangeBackend,
                "at least two backends are needed",
            ));
        }
        if let Some(bad) = config
            .backends
            .iter()
            .find(|b| b.is_empty() || b.contains(['\'', '"', '\\']))
        {
            return Err(config_error(
                RelationKind::ChangeBackend,
                &format!("invalid backend name {:?}", bad),
            ));
        }
        Ok(ChangeBackend { config })
    }

    fn alternatives(&self, current: &str) -> Vec<&String> {
        self.config
            .backends
            .iter()
            .filter(|b| b.as_str() != current)
            .collect()
    }
}

impl MetamorphicRelation for ChangeBackend {
    fn kind(&self) -> RelationKind {
        RelationKind::ChangeBackend
    }

    fn weight(&self) -> f64 {
        self.config.weight
    }

    fn config_json(&self) -> Value {
        serde_json::to_value(&self.config).unwrap_or(Value::Null)
    }

    fn check_precondition(&self, program: &Program) -> Option<Analysis> {
        let found = queries::backend_names(program.get(program::EXECUTION)?).ok()?;
        let sites: Vec<BackendSite> = found
            .into_iter()
            .filter(|(_, _, backend)| !self.alternatives(backend).is_empty())
            .map(|(index, variable, backend)| BackendSite {
                index,
                variable,
                backend,
            })
            .collect();
        (!sites.is_empty()).then_some(Analysis::Backends { sites })
    }

    fn derive(
        &self,
        program: &Program,
        analysis: &Analysis,
        rng: &mut dyn RngCore,
    ) -> Result<Derivation> {
        let Analysis::Backends { sites } = analysis else {
            return Err(unexpected_analysis(self.kind(), analysis));
        };
        let site = sites
            .choose(rng)
            .ok_or_else(|| unexpected_analysis(self.kind(), analysis))?;
        let new_backend = self
            .alternatives(&site.backend)
            .choose(rng)
            .map(|b| b.to_string())
            .ok_or_else(|| unexpected_analysis(self.kind(), analysis))?;
        let statements = lex_statements(program.require(program::EXECUTION)?)?;
        let original = statements
            .get(site.index)
            .map(|s| s.text.trim().to_string())
            .ok_or_else(|| unexpected_analysis(self.kind(), analysis))?;
        let text = ['\'', '"'].iter().fold(original, |text, quote| {
            text.replacen(
                &format!("{q}{}{q}", site.backend, q = quote),
                &format!("{q}{}{q}", new_backend, q = quote),
                1,
            )
        });
        let follow_up = replace_statement(program, program::EXECUTION, site.index, &text)?;

        let mut metadata = Map::new();
        metadata.insert("variable".to_string(), Value::from(site.variable.clone()));
        metadata.insert("old_backend".to_string(), Value::from(site.backend.clone()));
        metadata.insert("new_backend".to_string(), Value::from(new_backend));
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
    fn test_switches_backend() {
        let r = ChangeBackend::new(ChangeBackendConfig::default()).unwrap();
        let program = test_programs::baseline();
        let d = try_apply(&r, &program, &mut Pcg64Mcg::seed_from_u64(6))
            .unwrap()
            .unwrap();
        let names = queries::backend_names(d.program.get("EXECUTION").unwrap()).unwrap();
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].1, "backend_4a1f");
        assert_ne!(names[0].2, "aer_simulator");
        assert_eq!(d.metadata["old_backend"], Value::from("aer_simulator"));
        assert!(d
            .program
            .get("EXECUTION")
            .unwrap()
            .contains("counts = execute(qc, backend=backend_4a1f, shots=1000)"));
    }

    #[test]
    fn test_config_validation() {
        assert!(ChangeBackend::new(ChangeBackendConfig {
            backends: vec!["a".to_string()],
            ..ChangeBackendConfig::default()
        })
        .is_err());
        assert!(ChangeBackend::new(ChangeBackendConfig {
            backends: vec!["a".to_string(), "b'c".to_string()],
            ..ChangeBackendConfig::default()
        })
        .is_err());
    }
}
