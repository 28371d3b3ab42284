// SPDX-License-Identifier: Apache-2.0

//! Splits a circuit whose qubits form several independent connectivity
//! clusters into separately declared, compiled and executed circuits.
//!
//! Partition `p` gets its own `qr_p{p}`/`cr_p{p}`/`qc_p{p}`; local bit `j`
//! of partition `p` is the `j`-th smallest original qubit it holds. Every
//! section after `CIRCUIT` is replicated once per partition with the names
//! substituted, and the program's `RESULT` becomes the list of per-partition
//! count maps.

use once_cell::sync::Lazy;
use regex::Regex;

use super::*;
use crate::lexer::lex_statements;

static RESULT_ASSIGN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^RESULT\s*=").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunIndependentPartitionsConfig {
    pub weight: f64,
    pub max_partitions: usize,
}

impl Default for RunIndependentPartitionsConfig {
    fn default() -> Self {
        RunIndependentPartitionsConfig {
            weight: default_weight(),
            max_partitions: 2,
        }
    }
}

#[derive(Debug)]
pub struct RunIndependentPartitions {
    config: RunIndependentPartitionsConfig,
}

impl RunIndependentPartitions {
    pub fn new(config: RunIndependentPartitionsConfig) -> Result<Self> {
        if config.max_partitions < 2 {
            return Err(config_error(
                RelationKind::RunIndependentPartitions,
                "max_partitions must be at least 2",
            ));
        }
        Ok(RunIndependentPartitions { config })
    }
}

/// Groups `clusters` into `k` non-empty partitions ordered by lowest qubit;
/// `unused` qubits join partition 0.
fn assign_partitions(
    clusters: &[BTreeSet<usize>],
    unused: &BTreeSet<usize>,
    k: usize,
    rng: &mut dyn RngCore,
) -> Vec<BTreeSet<usize>> {
    let mut shuffled: Vec<&BTreeSet<usize>> = clusters.iter().collect();
    shuffled.shuffle(rng);
    let mut partitions: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); k];
    for (i, cluster) in shuffled.into_iter().enumerate() {
        let p = if i < k { i } else { rng.gen_range(0..k) };
        partitions[p].extend(cluster.iter().copied());
    }
    partitions.sort_by_key(|p| p.iter().next().copied());
    // Adding to the lowest partition keeps the order by lowest qubit.
    if let Some(first) = partitions.first_mut() {
        first.extend(unused.iter().copied());
    }
    partitions
}

fn gate_only_circuit(ir: &SectionIr, circuit: &Circuit) -> bool {
    let (Some(qreg), Some(creg)) = (circuit.quantum_register(), circuit.classical_register())
    else {
        return false;
    };
    ir.stmts().iter().all(|s| {
        s.indent().is_empty()
            && match s.kind() {
                StmtKind::Register(r) => r.name == qreg.name || r.name == creg.name,
                StmtKind::Circuit(c) => c.name == circuit.name,
                StmtKind::Gate(i) => {
                    i.circuit_id == circuit.name
                        && i.cargs.is_empty()
                        && i.qargs.iter().all(|b| b.register == qreg.name)
                }
                _ => false,
            }
    })
}

/// Renames whole identifiers in one pass so replacements never chain.
fn rename_identifiers(text: &str, renames: &[(String, String)]) -> Result<String> {
    let alternatives = renames
        .iter()
        .map(|(from, _)| regex::escape(from))
        .collect::<Vec<_>>()
        .join("|");
    let re = Regex::new(&format!(r"\b(?:{})\b", alternatives))
        .map_err(|e| MorphError::MalformedProgram(e.to_string()))?;
    Ok(re
        .replace_all(text, |caps: &regex::Captures| {
            let found = &caps[0];
            renames
                .iter()
                .find(|(from, _)| from == found)
                .map_or_else(|| found.to_string(), |(_, to)| to.clone())
        })
        .into_owned())
}

impl MetamorphicRelation for RunIndependentPartitions {
    fn kind(&self) -> RelationKind {
        RelationKind::RunIndependentPartitions
    }

    fn weight(&self) -> f64 {
        self.config.weight
    }

    fn config_json(&self) -> Value {
        serde_json::to_value(&self.config).unwrap_or(Value::Null)
    }

    fn is_semantically_equivalent(&self) -> bool {
        false
    }

    fn check_precondition(&self, program: &Program) -> Option<Analysis> {
        let blocked = [
            program::USELESS_ENTITIES,
            program::PARAMETERS,
            program::PARAMETER_BINDING,
        ];
        if blocked.iter().any(|s| program.contains(s)) {
            return None;
        }
        let execution = single_execution_call(program)?;
        if execution.result_var == "RESULT" {
            return None;
        }
        let circuit = queries::executed_circuit(program).ok()?;
        if circuit.quantum_registers.len() != 1 || circuit.classical_registers.len() != 1 {
            return None;
        }
        let qreg = circuit.quantum_register()?.clone();
        let creg = circuit.classical_register()?.clone();
        if qreg.size != creg.size {
            return None;
        }
        let measurement = SectionIr::parse(program.get(program::MEASUREMENT)?).ok()?;
        let whole_measure = measurement.stmts().iter().any(|s| {
            matches!(s.kind(), StmtKind::Measure { circuit_id, qreg: q, creg: c }
                if *circuit_id == circuit.name && *q == qreg.name && *c == creg.name)
        });
        if !whole_measure {
            return None;
        }

        let ir = SectionIr::parse(program.get(program::CIRCUIT)?).ok()?;
        if !gate_only_circuit(&ir, &circuit) {
            return None;
        }
        let clusters = queries::cluster_resources_in(&ir, &circuit.name, &qreg.name).ok()?;
        let used = queries::used_qubits_in(&ir, &circuit.name, &qreg.name);
        let (used_clusters, untouched): (Vec<_>, Vec<_>) = clusters
            .into_iter()
            .partition(|c| c.iter().any(|q| used.contains(q)));
        if used_clusters.len() < 2 {
            return None;
        }
        Some(Analysis::Partitions {
            circuit,
            used_clusters,
            unused: untouched.into_iter().flatten().collect(),
            execution,
        })
    }

    fn derive(
        &self,
        program: &Program,
        analysis: &Analysis,
        rng: &mut dyn RngCore,
    ) -> Result<Derivation> {
        let Analysis::Partitions {
            circuit,
            used_clusters,
            unused,
            execution,
        } = analysis
        else {
            return Err(unexpected_analysis(self.kind(), analysis));
        };
        let (Some(qreg), Some(creg)) = (circuit.quantum_register(), circuit.classical_register())
        else {
            return Err(unexpected_analysis(self.kind(), analysis));
        };
        let k = rng.gen_range(2..=self.config.max_partitions.min(used_clusters.len()));
        let partitions: Vec<Vec<usize>> = assign_partitions(used_clusters, unused, k, rng)
            .into_iter()
            .map(|p| p.into_iter().collect())
            .collect();
        debug!("{}: partitions {:?}", self.kind(), partitions);

        // qubit -> (partition, local index)
        let mut location = vec![None; qreg.size];
        for (p, part) in partitions.iter().enumerate() {
            for (local, &q) in part.iter().enumerate() {
                let slot = location.get_mut(q).ok_or_else(|| {
                    MorphError::MalformedProgram(format!(
                        "qubit {} out of range for {}",
                        q, qreg.name
                    ))
                })?;
                *slot = Some((p, local));
            }
        }

        let names = |p: usize| {
            (
                format!("{}_p{}", qreg.name, p),
                format!("{}_p{}", creg.name, p),
                format!("{}_p{}", circuit.name, p),
            )
        };

        let ir = parse_section(program, program::CIRCUIT)?;
        let mut blocks: Vec<Vec<String>> = partitions
            .iter()
            .enumerate()
            .map(|(p, part)| {
                let (qr, cr, qc) = names(p);
                vec![
                    StmtKind::Register(Register {
                        name: qr.clone(),
                        kind: RegisterKind::Quantum,
                        size: part.len(),
                    })
                    .to_string(),
                    StmtKind::Register(Register {
                        name: cr.clone(),
                        kind: RegisterKind::Classical,
                        size: part.len(),
                    })
                    .to_string(),
                    StmtKind::Circuit(CircuitDecl {
                        name: qc,
                        registers: vec![qr, cr],
                    })
                    .to_string(),
                ]
            })
            .collect();
        for (_, instr) in ir.instructions() {
            let mut target = None;
            let mut qargs = Vec::with_capacity(instr.qargs.len());
            for b in &instr.qargs {
                let (p, local) = location.get(b.index).copied().flatten().ok_or_else(|| {
                    MorphError::MalformedProgram(format!("{}: qubit {} is unassigned", self.kind(), b))
                })?;
                if target.map_or(false, |t| t != p) {
                    return Err(MorphError::MalformedProgram(format!(
                        "{}: gate at line {} spans partitions",
                        self.kind(),
                        instr.lineno
                    )));
                }
                target = Some(p);
                qargs.push(BitRef::new(&names(p).0, local));
            }
            let Some(p) = target else {
                continue;
            };
            let local = Instruction::new(&names(p).2, &instr.gate_name, instr.params.clone(), qargs);
            blocks[p].push(local.to_string());
        }

        let mut follow_up = program.clone();
        follow_up.set_section(
            program::CIRCUIT,
            &blocks.into_iter().flatten().collect::<Vec<_>>().join("\n"),
        )?;

        let circuit_rank = program
            .sections()
            .iter()
            .position(|s| s.name == program::CIRCUIT)
            .ok_or_else(|| MorphError::MalformedProgram("missing section CIRCUIT".to_string()))?;
        for section in &program.sections()[circuit_rank + 1..] {
            let statements = lex_statements(&section.body)?;
            let mut replicas = Vec::new();
            for p in 0..partitions.len() {
                let (qr, cr, qc) = names(p);
                let renames = [
                    (circuit.name.clone(), qc),
                    (qreg.name.clone(), qr),
                    (creg.name.clone(), cr),
                    (
                        execution.result_var.clone(),
                        format!("{}_p{}", execution.result_var, p),
                    ),
                ];
                for st in statements.iter().filter(|s| !RESULT_ASSIGN_RE.is_match(&s.text)) {
                    replicas.push(rename_identifiers(&st.text, &renames)?);
                }
            }
            if section.name == program::EXECUTION {
                replicas.push(format!(
                    "RESULT = [{}]",
                    (0..partitions.len())
                        .map(|p| format!("{}_p{}", execution.result_var, p))
                        .collect::<Vec<_>>()
                        .join(", ")
                ));
            }
            follow_up.set_section(&section.name, &replicas.join("\n"))?;
        }

        let mut metadata = Map::new();
        metadata.insert("n_partitions".to_string(), Value::from(partitions.len()));
        metadata.insert("partitions".to_string(), serde_json::to_value(&partitions)?);
        Ok(Derivation {
            program: follow_up,
            metadata,
            reconciliation: Reconciliation::JoinPartitions { partitions },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_programs;
    use super::*;
    use crate::detectors::KsDetector;
    use crate::executor::CountMap;
    use maplit::btreemap;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    #[test]
    fn test_fixture_splits_into_two_programs() {
        let r = RunIndependentPartitions::new(RunIndependentPartitionsConfig::default()).unwrap();
        let program = test_programs::baseline();
        let d = try_apply(&r, &program, &mut Pcg64Mcg::seed_from_u64(5))
            .unwrap()
            .unwrap();
        // {0, 1} and {2} are used; idle qubit 3 joins partition 0.
        assert_eq!(
            d.reconciliation,
            Reconciliation::JoinPartitions {
                partitions: vec![vec![0, 1, 3], vec![2]]
            }
        );
        assert_eq!(
            d.program.get("CIRCUIT").unwrap(),
            "qr_p0 = QuantumRegister(3, name='qr_p0')\n\
             cr_p0 = ClassicalRegister(3, name='cr_p0')\n\
             qc_p0 = QuantumCircuit(qr_p0, cr_p0, name='qc_p0')\n\
             qc_p0.append(HGate(), qargs=[qr_p0[0]], cargs=[])\n\
             qc_p0.append(CXGate(), qargs=[qr_p0[0], qr_p0[1]], cargs=[])\n\
             qc_p0.append(SwapGate(), qargs=[qr_p0[1], qr_p0[0]], cargs=[])\n\
             qr_p1 = QuantumRegister(1, name='qr_p1')\n\
             cr_p1 = ClassicalRegister(1, name='cr_p1')\n\
             qc_p1 = QuantumCircuit(qr_p1, cr_p1, name='qc_p1')\n\
             qc_p1.append(RZGate(0.25), qargs=[qr_p1[0]], cargs=[])\n\
             qc_p1.append(XGate(), qargs=[qr_p1[0]], cargs=[])\n\
             qc_p1.append(XGate(), qargs=[qr_p1[0]], cargs=[])"
        );
        assert_eq!(
            d.program.get("MEASUREMENT").unwrap(),
            "qc_p0.measure(qr_p0, cr_p0)\nqc_p1.measure(qr_p1, cr_p1)"
        );
        assert_eq!(
            d.program.get("EXECUTION").unwrap(),
            "backend_4a1f = Aer.get_backend('aer_simulator')\n\
             counts_p0 = execute(qc_p0, backend=backend_4a1f, shots=1000).result().get_counts(qc_p0)\n\
             backend_4a1f = Aer.get_backend('aer_simulator')\n\
             counts_p1 = execute(qc_p1, backend=backend_4a1f, shots=1000).result().get_counts(qc_p1)\n\
             RESULT = [counts_p0, counts_p1]"
        );
        assert_eq!(d.program.get("PROLOGUE"), program.get("PROLOGUE"));
        assert!(!r.is_semantically_equivalent());
        // Partitioned programs are not partitioned again.
        assert!(r.check_precondition(&d.program).is_none());
    }

    #[test]
    fn test_partitions_are_ordered_by_lowest_qubit() {
        let clusters: Vec<BTreeSet<usize>> = vec![
            [5].into_iter().collect(),
            [1, 4].into_iter().collect(),
            [2].into_iter().collect(),
            [6, 7].into_iter().collect(),
        ];
        let unused: BTreeSet<usize> = [0, 3].into_iter().collect();
        let mut rng = Pcg64Mcg::seed_from_u64(99);
        for _ in 0..50 {
            let k = rng.gen_range(2..=4);
            let parts = assign_partitions(&clusters, &unused, k, &mut rng);
            assert_eq!(parts.len(), k);
            assert!(parts.iter().all(|p| !p.is_empty()));
            let lows: Vec<usize> = parts.iter().map(|p| *p.iter().next().unwrap()).collect();
            let mut sorted = lows.clone();
            sorted.sort();
            assert_eq!(lows, sorted);
            assert!(parts[0].contains(&0) && parts[0].contains(&3));
            for c in &clusters {
                assert_eq!(parts.iter().filter(|p| p.is_superset(c)).count(), 1);
            }
            let total: usize = parts.iter().map(|p| p.len()).sum();
            assert_eq!(total, 8);
        }
    }

    #[test]
    fn test_joined_partition_output_matches_baseline() {
        let r = RunIndependentPartitions::new(RunIndependentPartitionsConfig::default()).unwrap();
        let program = test_programs::baseline();
        let d = try_apply(&r, &program, &mut Pcg64Mcg::seed_from_u64(5))
            .unwrap()
            .unwrap();
        // Partition 0 holds original qubits [0, 1, 3]; partition 1 holds [2].
        let p0: CountMap = btreemap! {"000".to_string() => 500, "011".to_string() => 500};
        let p1: CountMap = btreemap! {"0".to_string() => 1000};
        let baseline = RunResult::Single(btreemap! {
            "0000".to_string() => 500,
            "0011".to_string() => 500,
        });
        let followup = RunResult::Partitioned(vec![p0, p1]);
        let verdict = r
            .check_output_relationship(&d, &baseline, &followup, &KsDetector::default())
            .unwrap();
        assert_eq!(verdict.p_value, 1.0);
    }

    #[test]
    fn test_single_cluster_is_rejected() {
        let r = RunIndependentPartitions::new(RunIndependentPartitionsConfig::default()).unwrap();
        let text = test_programs::BASELINE.replace(
            "RZGate(0.25), qargs=[qr[2]]",
            "CRZGate(0.25), qargs=[qr[1], qr[2]]",
        );
        assert!(r.check_precondition(&program::split(&text).unwrap()).is_none());
    }

    #[test]
    fn test_rename_is_whole_word() {
        let renames = [
            ("qc".to_string(), "qc_p0".to_string()),
            ("qr".to_string(), "qr_p0".to_string()),
        ];
        assert_eq!(
            rename_identifiers("qc.measure(qr, cr) # qcx qr_extra", &renames).unwrap(),
            "qc_p0.measure(qr_p0, cr) # qcx qr_extra"
        );
    }
}
