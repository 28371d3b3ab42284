// SPDX-License-Identifier: Apache-2.0

use super::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecomposeTwoQubitGateConfig {
    pub weight: f64,
    pub min_to_change: usize,
    pub max_to_change: usize,
    pub rules: Vec<String>,
}

impl Default for DecomposeTwoQubitGateConfig {
    fn default() -> Self {
        DecomposeTwoQubitGateConfig {
            weight: default_weight(),
            min_to_change: 1,
            max_to_change: 2,
            rules: vec![
                "SwapGate(a, b) => CXGate(a, b), CXGate(b, a), CXGate(a, b)".to_string(),
                "CZGate(a, b) => HGate(b), CXGate(a, b), HGate(b)".to_string(),
            ],
        }
    }
}

/// Rewrites two-qubit gates into sequences over `{CX, H}`.
#[derive(Debug)]
pub struct DecomposeTwoQubitGate {
    config: DecomposeTwoQubitGateConfig,
    rules: Vec<GateRule>,
}

impl DecomposeTwoQubitGate {
    pub fn new(config: DecomposeTwoQubitGateConfig) -> Result<Self> {
        let kind = RelationKind::DecomposeTwoQubitGate;
        if config.min_to_change == 0 || config.min_to_change > config.max_to_change {
            return Err(config_error(kind, "need 1 <= min_to_change <= max_to_change"));
        }
        let rules = parse_gate_rules(kind, &config.rules, 2)?;
        Ok(DecomposeTwoQubitGate { config, rules })
    }
}

impl MetamorphicRelation for DecomposeTwoQubitGate {
    fn kind(&self) -> RelationKind {
        RelationKind::DecomposeTwoQubitGate
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
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    const SWAP_PROGRAM: &str = "\
# SECTION
# NAME: PROLOGUE
from qiskit import QuantumRegister, ClassicalRegister, QuantumCircuit, Aer, execute
from qiskit.circuit.library.standard_gates import *

# SECTION
# NAME: CIRCUIT
qr = QuantumRegister(2, name='qr')
cr = ClassicalRegister(2, name='cr')
qc = QuantumCircuit(qr, cr, name='qc')
qc.append(SwapGate(), qargs=[qr[1], qr[0]], cargs=[])

# SECTION
# NAME: MEASUREMENT
qc.measure(qr, cr)

# SECTION
# NAME: EXECUTION
backend = Aer.get_backend('aer_simulator')
counts = execute(qc, backend=backend, shots=500).result().get_counts(qc)
RESULT = counts
";

    #[test]
    fn test_swap_becomes_three_cx() {
        let r = DecomposeTwoQubitGate::new(DecomposeTwoQubitGateConfig {
            min_to_change: 1,
            max_to_change: 1,
            ..DecomposeTwoQubitGateConfig::default()
        })
        .unwrap();
        let program = program::split(SWAP_PROGRAM).unwrap();
        let d = try_apply(&r, &program, &mut Pcg64Mcg::seed_from_u64(0))
            .unwrap()
            .unwrap();
        assert_eq!(
            d.program.get("CIRCUIT").unwrap(),
            "qr = QuantumRegister(2, name='qr')\n\
             cr = ClassicalRegister(2, name='cr')\n\
             qc = QuantumCircuit(qr, cr, name='qc')\n\
             qc.append(CXGate(), qargs=[qr[1], qr[0]], cargs=[])\n\
             qc.append(CXGate(), qargs=[qr[0], qr[1]], cargs=[])\n\
             qc.append(CXGate(), qargs=[qr[1], qr[0]], cargs=[])"
        );
        for name in ["PROLOGUE", "MEASUREMENT", "EXECUTION"] {
            assert_eq!(d.program.get(name), program.get(name));
        }
        let resplit = program::split(&program::reconstruct(&d.program)).unwrap();
        assert_eq!(resplit.section_names(), program.section_names());
        assert_eq!(resplit, d.program);
    }

    #[test]
    fn test_cz_uses_target_hadamards() {
        let r = DecomposeTwoQubitGate::new(DecomposeTwoQubitGateConfig::default()).unwrap();
        let text = SWAP_PROGRAM.replace("SwapGate()", "CZGate()");
        let d = try_apply(&r, &program::split(&text).unwrap(), &mut Pcg64Mcg::seed_from_u64(1))
            .unwrap()
            .unwrap();
        let gates: Vec<String> = queries::instructions(d.program.get("CIRCUIT").unwrap())
            .unwrap()
            .iter()
            .map(|i| i.to_string())
            .collect();
        assert_eq!(
            gates,
            vec![
                "qc.append(HGate(), qargs=[qr[0]], cargs=[])",
                "qc.append(CXGate(), qargs=[qr[1], qr[0]], cargs=[])",
                "qc.append(HGate(), qargs=[qr[0]], cargs=[])",
            ]
        );
    }

    #[test]
    fn test_single_qubit_rules_are_rejected() {
        let config = DecomposeTwoQubitGateConfig {
            rules: vec!["XGate(a) => HGate(a), ZGate(a), HGate(a)".to_string()],
            ..DecomposeTwoQubitGateConfig::default()
        };
        assert!(DecomposeTwoQubitGate::new(config).is_err());
    }
}
