// SPDX-License-Identifier: Apache-2.0

use super::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoundTripConversionConfig {
    pub weight: f64,
    /// The conversion is inserted immediately before this section.
    pub before_stage: String,
    /// Statements of the conversion; `{circuit}` names the executed circuit.
    pub template: Vec<String>,
}

impl Default for RoundTripConversionConfig {
    fn default() -> Self {
        RoundTripConversionConfig {
            weight: default_weight(),
            before_stage: program::EXECUTION.to_string(),
            template: vec![
                "from qiskit import qasm2".to_string(),
                "qasm_string = qasm2.dumps({circuit})".to_string(),
                "{circuit} = qasm2.loads(qasm_string, custom_instructions=qasm2.LEGACY_CUSTOM_INSTRUCTIONS)"
                    .to_string(),
            ],
        }
    }
}

/// Serializes the executed circuit to an interchange format and parses it
/// back before a configurable stage.
#[derive(Debug)]
pub struct RoundTripConversion {
    config: RoundTripConversionConfig,
}

impl RoundTripConversion {
    pub fn new(config: RoundTripConversionConfig) -> Result<Self> {
        let kind = RelationKind::RoundTripConversion;
        if program::canonical_rank(&config.before_stage).is_none() {
            return Err(config_error(
                kind,
                &format!("{} is not a known section", config.before_stage),
            ));
        }
        if config.template.is_empty() {
            return Err(config_error(kind, "template is empty"));
        }
        Ok(RoundTripConversion { config })
    }

    fn render(&self, circuit: &str) -> String {
        self.config
            .template
            .iter()
            .map(|line| line.replace("{circuit}", circuit))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl MetamorphicRelation for RoundTripConversion {
    fn kind(&self) -> RelationKind {
        RelationKind::RoundTripConversion
    }

    fn weight(&self) -> f64 {
        self.config.weight
    }

    fn config_json(&self) -> Value {
        serde_json::to_value(&self.config).unwrap_or(Value::Null)
    }

    fn check_precondition(&self, program: &Program) -> Option<Analysis> {
        if program.contains(program::QASM_CONVERSION) || !program.contains(&self.config.before_stage)
        {
            return None;
        }
        let call = single_execution_call(program)?;
        Some(Analysis::Stage {
            anchor: self.config.before_stage.clone(),
            circuit: call.circuit,
        })
    }

    fn derive(
        &self,
        program: &Program,
        analysis: &Analysis,
        _rng: &mut dyn RngCore,
    ) -> Result<Derivation> {
        let Analysis::Stage { anchor, circuit } = analysis else {
            return Err(unexpected_analysis(self.kind(), analysis));
        };
        let follow_up = program.insert_section(
            program::QASM_CONVERSION,
            &self.render(circuit),
            Anchor::Before(anchor),
        )?;
        let mut metadata = Map::new();
        metadata.insert("before_stage".to_string(), Value::from(anchor.clone()));
        Ok(Derivation::equivalent(follow_up, metadata))
    }
}
