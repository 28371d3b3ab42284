// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::lexer::is_ident;

/// Passes that can be built with no arguments.
const DEFAULT_PASSES: [&str; 5] = [
    "Optimize1qGates",
    "CXCancellation",
    "CommutativeCancellation",
    "RemoveDiagonalGatesBeforeMeasure",
    "Collect2qBlocks",
];

/// Passes whose constructors have required arguments; `Name()` fails for them.
const PASSES_WITH_REQUIRED_ARGS: [&str; 6] = [
    "InverseCancellation",
    "BasisTranslator",
    "Unroller",
    "SabreLayout",
    "SabreSwap",
    "CheckMap",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InjectOptimizationPassesConfig {
    pub weight: f64,
    /// Pass class names importable from `qiskit.transpiler.passes`.
    pub passes: Vec<String>,
    pub max_passes: usize,
}

impl Default for InjectOptimizationPassesConfig {
    fn default() -> Self {
        InjectOptimizationPassesConfig {
            weight: default_weight(),
            passes: DEFAULT_PASSES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            max_passes: 3,
        }
    }
}

#[derive(Debug)]
pub struct InjectOptimizationPasses {
    config: InjectOptimizationPassesConfig,
}

impl InjectOptimizationPasses {
    pub fn new(config: InjectOptimizationPassesConfig) -> Result<Self> {
        let kind = RelationKind::InjectOptimizationPasses;
        if config.passes.is_empty() || config.max_passes == 0 {
            return Err(config_error(kind, "need at least one pass"));
        }
        if let Some(bad) = config.passes.iter().find(|p| !is_ident(p)) {
            return Err(config_error(kind, &format!("invalid pass name {:?}", bad)));
        }
        if let Some(bad) = config
            .passes
            .iter()
            .find(|p| PASSES_WITH_REQUIRED_ARGS.contains(&p.as_str()))
        {
            return Err(config_error(
                kind,
                &format!("{} cannot be constructed without arguments", bad),
            ));
        }
        Ok(InjectOptimizationPasses { config })
    }
}

impl MetamorphicRelation for InjectOptimizationPasses {
    fn kind(&self) -> RelationKind {
        RelationKind::InjectOptimizationPasses
    }

    fn weight(&self) -> f64 {
        self.config.weight
    }

    fn config_json(&self) -> Value {
        serde_json::to_value(&self.config).unwrap_or(Value::Null)
    }

    fn check_precondition(&self, program: &Program) -> Option<Analysis> {
        if program.contains(program::OPTIMIZATION_PASSES) {
            return None;
        }
        let call = single_execution_call(program)?;
        Some(Analysis::Circuit { name: call.circuit })
    }

    fn derive(
        &self,
        program: &Program,
        analysis: &Analysis,
        rng: &mut dyn RngCore,
    ) -> Result<Derivation> {
        let Analysis::Circuit { name } = analysis else {
            return Err(unexpected_analysis(self.kind(), analysis));
        };
        let count = choose_count(rng, 1, self.config.max_passes, self.config.passes.len());
        let chosen: Vec<&String> = self
            .config
            .passes
            .choose_multiple(rng, count)
            .collect();
        let body = [
            "from qiskit.transpiler import PassManager".to_string(),
            format!(
                "from qiskit.transpiler.passes import {}",
                chosen
                    .iter()
                    .map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            format!(
                "pass_manager = PassManager([{}])",
                chosen
                    .iter()
                    .map(|p| format!("{}()", p))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            format!("{} = pass_manager.run({})", name, name),
        ];
        let follow_up =
            program.insert_section_canonical(program::OPTIMIZATION_PASSES, &body.join("\n"))?;

        let mut metadata = Map::new();
        metadata.insert(
            "passes".to_string(),
            Value::from(chosen.iter().map(|p| p.to_string()).collect::<Vec<_>>()),
        );
        Ok(Derivation::equivalent(follow_up, metadata))
    }
}
