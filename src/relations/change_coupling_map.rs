// SPDX-License-Identifier: Apache-2.0

use super::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChangeCouplingMapConfig {
    pub weight: f64,
    /// Up to this many device qubits beyond the circuit's width.
    pub max_extra_qubits: usize,
    /// Every node reachable from node 0 (ignoring direction).
    pub connected: bool,
    /// Every edge also present in the reverse direction.
    pub symmetric: bool,
    /// Probability of each additional edge beyond the spanning tree.
    pub edge_probability: f64,
}

impl Default for ChangeCouplingMapConfig {
    fn default() -> Self {
        ChangeCouplingMapConfig {
            weight: default_weight(),
            max_extra_qubits: 2,
            connected: true,
            symmetric: false,
            edge_probability: 0.3,
        }
    }
}

#[derive(Debug)]
pub struct ChangeCouplingMap {
    config: ChangeCouplingMapConfig,
}

impl ChangeCouplingMap {
    pub fn new(config: ChangeCouplingMapConfig) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.edge_probability) {
            return Err(config_error(
                RelationKind::ChangeCouplingMap,
                "edge_probability must be in [0, 1]",
            ));
        }
        Ok(ChangeCouplingMap { config })
    }

    /// Random directed edge list over `n_nodes` nodes, sorted and unique.
    pub fn random_coupling_map(&self, n_nodes: usize, rng: &mut dyn RngCore) -> Vec<(usize, usize)> {
        let mut edges: BTreeSet<(usize, usize)> = BTreeSet::new();
        if self.config.connected {
            for node in 1..n_nodes {
                let other = rng.gen_range(0..node);
                if rng.gen_bool(0.5) {
                    edges.insert((other, node));
                } else {
                    edges.insert((node, other));
                }
            }
        }
        for a in 0..n_nodes {
            for b in 0..n_nodes {
                if a != b && rng.gen_bool(self.config.edge_probability) {
                    edges.insert((a, b));
                }
            }
        }
        if self.config.symmetric {
            let reversed: Vec<(usize, usize)> = edges.iter().map(|(a, b)| (*b, *a)).collect();
            edges.extend(reversed);
        }
        edges.into_iter().collect()
    }
}

fn render_coupling_map(edges: &[(usize, usize)]) -> String {
    format!(
        "[{}]",
        edges
            .iter()
            .map(|(a, b)| format!("[{}, {}]", a, b))
            .collect::<Vec<_>>()
            .join(", ")
    )
}

impl MetamorphicRelation for ChangeCouplingMap {
    fn kind(&self) -> RelationKind {
        RelationKind::ChangeCouplingMap
    }

    fn weight(&self) -> f64 {
        self.config.weight
    }

    fn config_json(&self) -> Value {
        serde_json::to_value(&self.config).unwrap_or(Value::Null)
    }

    fn check_precondition(&self, program: &Program) -> Option<Analysis> {
        // Extra registers would not fit the generated device.
        if program.contains(program::USELESS_ENTITIES) {
            return None;
        }
        let circuit = queries::executed_circuit(program).ok()?;
        // A device with fewer than two qubits has no edges to offer.
        if circuit.size + self.config.max_extra_qubits < 2 {
            return None;
        }
        let sites = transpile_sites(program, |call| call.kwarg("coupling_map").is_some());
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
        let circuit = queries::executed_circuit(program)?;
        let n_nodes = circuit.size + rng.gen_range(0..=self.config.max_extra_qubits);
        let edges = self.random_coupling_map(n_nodes, rng);
        let text = site
            .call
            .with_kwarg("coupling_map", &render_coupling_map(&edges));
        let follow_up = replace_statement(program, &site.section, site.index, &text)?;

        let mut metadata = Map::new();
        metadata.insert("n_nodes".to_string(), Value::from(n_nodes));
        metadata.insert("edges".to_string(), serde_json::to_value(&edges)?);
        Ok(Derivation::equivalent(follow_up, metadata))
    }
}
