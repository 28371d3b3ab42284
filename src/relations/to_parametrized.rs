// SPDX-License-Identifier: Apache-2.0

use super::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToParametrizedConfig {
    pub weight: f64,
    pub max_params: usize,
}

impl Default for ToParametrizedConfig {
    fn default() -> Self {
        ToParametrizedConfig {
            weight: default_weight(),
            max_params: 3,
        }
    }
}

const PARAMETER_IMPORT: &str = "from qiskit.circuit import Parameter";

/// Replaces literal gate angles with symbolic parameters and binds them back
/// to the same values before execution.
#[derive(Debug)]
pub struct ToParametrized {
    config: ToParametrizedConfig,
}

impl ToParametrized {
    pub fn new(config: ToParametrizedConfig) -> Result<Self> {
        if config.max_params == 0 {
            return Err(config_error(
                RelationKind::ToParametrized,
                "max_params must be positive",
            ));
        }
        Ok(ToParametrized { config })
    }
}

impl MetamorphicRelation for ToParametrized {
    fn kind(&self) -> RelationKind {
        RelationKind::ToParametrized
    }

    fn weight(&self) -> f64 {
        self.config.weight
    }

    fn config_json(&self) -> Value {
        serde_json::to_value(&self.config).unwrap_or(Value::Null)
    }

    fn check_precondition(&self, program: &Program) -> Option<Analysis> {
        if program.contains(program::PARAMETERS) || program.contains(program::PARAMETER_BINDING) {
            return None;
        }
        let call = single_execution_call(program)?;
        let ir = SectionIr::parse(program.get(program::CIRCUIT)?).ok()?;
        let params = queries::literal_params_in(&ir);
        (!params.is_empty()).then_some(Analysis::LiteralParams {
            circuit: call.circuit,
            params,
        })
    }

    fn derive(
        &self,
        program: &Program,
        analysis: &Analysis,
        rng: &mut dyn RngCore,
    ) -> Result<Derivation> {
        let Analysis::LiteralParams { circuit, params } = analysis else {
            return Err(unexpected_analysis(self.kind(), analysis));
        };
        let count = choose_count(rng, 1, self.config.max_params, params.len());
        let mut chosen: Vec<&(StmtId, usize, String)> = index::sample(rng, params.len(), count)
            .into_iter()
            .map(|i| &params[i])
            .collect();
        chosen.sort();

        let tag = fresh_tag(rng);
        let mut ir = parse_section(program, program::CIRCUIT)?;
        let mut declarations = Vec::with_capacity(chosen.len() + 1);
        declarations.push(PARAMETER_IMPORT.to_string());
        let mut bindings = Vec::with_capacity(chosen.len());
        let mut replaced = Map::new();
        for (n, (id, pos, value)) in chosen.into_iter().enumerate() {
            let symbol = format!("p_{}_{}", tag, n);
            let stmt = ir.get_mut(*id).ok_or_else(|| {
                MorphError::MalformedProgram(format!("{}: no statement {}", self.kind(), id))
            })?;
            match stmt.kind_mut() {
                StmtKind::Gate(instr) if *pos < instr.params.len() => {
                    instr.params[*pos] = Param::Symbol(symbol.clone());
                }
                _ => return Err(unexpected_analysis(self.kind(), analysis)),
            }
            declarations.push(format!("{} = Parameter('{}')", symbol, symbol));
            bindings.push(format!("{}: {}", symbol, value));
            replaced.insert(symbol, Value::from(value.clone()));
        }

        let mut follow_up = program.clone();
        follow_up.set_section(program::CIRCUIT, &ir.emit())?;
        let follow_up = follow_up
            .insert_section_canonical(program::PARAMETERS, &declarations.join("\n"))?
            .insert_section_canonical(
                program::PARAMETER_BINDING,
                &format!(
                    "{} = {}.assign_parameters({{{}}})",
                    circuit,
                    circuit,
                    bindings.join(", ")
                ),
            )?;

        let mut metadata = Map::new();
        metadata.insert("parameters".to_string(), Value::Object(replaced));
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
    fn test_parametrizes_literal_angle() {
        let r = ToParametrized::new(ToParametrizedConfig::default()).unwrap();
        let program = test_programs::baseline();
        let d = try_apply(&r, &program, &mut Pcg64Mcg::seed_from_u64(13))
            .unwrap()
            .unwrap();
        assert_eq!(
            d.program.section_names(),
            vec![
                "PROLOGUE",
                "PARAMETERS",
                "CIRCUIT",
                "OPTIMIZATION_LEVEL",
                "MEASUREMENT",
                "PARAMETER_BINDING",
                "EXECUTION"
            ]
        );
        let params = d.metadata["parameters"].as_object().unwrap();
        assert_eq!(params.len(), 1);
        let (symbol, value) = params.iter().next().unwrap();
        assert_eq!(value, &Value::from("0.25"));
        let circuit = d.program.get("CIRCUIT").unwrap();
        assert!(circuit.contains(&format!("RZGate({})", symbol)));
        assert!(!circuit.contains("0.25"));
        assert_eq!(
            d.program.get("PARAMETERS").unwrap(),
            format!(
                "from qiskit.circuit import Parameter\n{} = Parameter('{}')",
                symbol, symbol
            )
        );
        assert_eq!(
            d.program.get("PARAMETER_BINDING").unwrap(),
            format!("qc = qc.assign_parameters({{{}: 0.25}})", symbol)
        );
    }

    #[test]
    fn test_precondition_gating() {
        let r = ToParametrized::new(ToParametrizedConfig::default()).unwrap();
        let no_literals = test_programs::BASELINE.replace("RZGate(0.25)", "RZGate(theta)");
        assert!(r
            .check_precondition(&program::split(&no_literals).unwrap())
            .is_none());
        let already = test_programs::baseline()
            .insert_section_canonical(program::PARAMETERS, "")
            .unwrap();
        assert!(r.check_precondition(&already).is_none());
    }
}
