// SPDX-License-Identifier: Apache-2.0

//! Static table of the gate kinds the catalog knows how to reason about.

use rand::seq::{index, SliceRandom};
use rand::Rng;

use crate::circuit_ir::{BitRef, Instruction, Param};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSpec {
    pub name: &'static str,
    pub num_qubits: usize,
    pub num_params: usize,
    /// Applying the gate twice on the same qubits is the identity.
    pub self_inverse: bool,
}

const fn gate(
    name: &'static str,
    num_qubits: usize,
    num_params: usize,
    self_inverse: bool,
) -> GateSpec {
    GateSpec {
        name,
        num_qubits,
        num_params,
        self_inverse,
    }
}

pub const GATES: &[GateSpec] = &[
    gate("HGate", 1, 0, true),
    gate("XGate", 1, 0, true),
    gate("YGate", 1, 0, true),
    gate("ZGate", 1, 0, true),
    gate("SGate", 1, 0, false),
    gate("SdgGate", 1, 0, false),
    gate("TGate", 1, 0, false),
    gate("TdgGate", 1, 0, false),
    gate("SXGate", 1, 0, false),
    gate("SXdgGate", 1, 0, false),
    gate("RXGate", 1, 1, false),
    gate("RYGate", 1, 1, false),
    gate("RZGate", 1, 1, false),
    gate("PhaseGate", 1, 1, false),
    gate("UGate", 1, 3, false),
    gate("CXGate", 2, 0, true),
    gate("CYGate", 2, 0, true),
    gate("CZGate", 2, 0, true),
    gate("CHGate", 2, 0, true),
    gate("SwapGate", 2, 0, true),
    gate("CRZGate", 2, 1, false),
    gate("RZZGate", 2, 1, false),
    gate("CCXGate", 3, 0, true),
];

pub fn lookup(name: &str) -> Option<&'static GateSpec> {
    GATES.iter().find(|g| g.name == name)
}

/// Gate names usable by generators and synthesized sub-circuits by default.
pub fn default_gate_set() -> Vec<String> {
    GATES.iter().map(|g| g.name.to_string()).collect()
}

/// Random angle rounded to three decimals, in `[0, 2*pi)`.
pub fn random_angle<R: Rng + ?Sized>(rng: &mut R) -> Param {
    let value: f64 = rng.gen_range(0.0..std::f64::consts::TAU);
    Param::literal((value * 1000.0).round() / 1000.0)
}

/// Draws one gate from `gate_set` that fits in a register of `width` qubits
/// and applies it to distinct random qubits. Returns `None` when no gate of
/// the set fits.
pub fn random_instruction<R: Rng + ?Sized>(
    rng: &mut R,
    circuit_id: &str,
    register: &str,
    width: usize,
    gate_set: &[String],
) -> Option<Instruction> {
    let fitting: Vec<&GateSpec> = gate_set
        .iter()
        .filter_map(|name| lookup(name))
        .filter(|g| g.num_qubits <= width)
        .collect();
    let spec = fitting.choose(rng)?;
    let qargs = index::sample(rng, width, spec.num_qubits)
        .into_iter()
        .map(|q| BitRef::new(register, q))
        .collect();
    let params = (0..spec.num_params).map(|_| random_angle(rng)).collect();
    Some(Instruction::new(circuit_id, spec.name, params, qargs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    #[test]
    fn test_lookup() {
        let cx = lookup("CXGate").unwrap();
        assert_eq!(cx.num_qubits, 2);
        assert!(cx.self_inverse);
        assert_eq!(lookup("UGate").unwrap().num_params, 3);
        assert!(lookup("NoSuchGate").is_none());
    }

    #[test]
    fn test_names_unique() {
        let mut names: Vec<&str> = GATES.iter().map(|g| g.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), GATES.len());
    }

    #[test]
    fn test_random_instruction_respects_width() {
        let mut rng = Pcg64Mcg::seed_from_u64(7);
        let set = default_gate_set();
        for _ in 0..200 {
            let instr = random_instruction(&mut rng, "qc", "qr", 2, &set).unwrap();
            let spec = lookup(&instr.gate_name).unwrap();
            assert!(spec.num_qubits <= 2);
            assert_eq!(instr.params.len(), spec.num_params);
            let mut qbits = instr.qbits();
            qbits.dedup();
            assert_eq!(qbits.len(), spec.num_qubits);
            assert!(qbits.iter().all(|q| *q < 2));
        }
        assert!(random_instruction(&mut rng, "qc", "qr", 1, &["CXGate".to_string()]).is_none());
    }
}
