// SPDX-License-Identifier: Apache-2.0

//! Undoing relation-specific output transforms before comparison.
//!
//! Bitstrings are big-endian: the character at position `width - 1 - k` is
//! classical bit `k`.

use serde::{Deserialize, Serialize};

use crate::executor::{CountMap, RunResult};
use crate::morph_error::{MorphError, Result};

/// How a follow-up result maps back onto the baseline's bit layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reconciliation {
    Identity,
    /// `mapping[i]` is the follow-up bit holding baseline bit `i`.
    BitPermutation { mapping: Vec<usize> },
    /// Each partition is the ascending list of original bits it measured.
    JoinPartitions { partitions: Vec<Vec<usize>> },
}

impl Reconciliation {
    /// Brings `followup` into the baseline's layout as a single count map.
    pub fn apply(&self, followup: &RunResult) -> Result<CountMap> {
        match (self, followup) {
            (Reconciliation::Identity, RunResult::Single(map)) => Ok(map.clone()),
            (Reconciliation::BitPermutation { mapping }, RunResult::Single(map)) => {
                unpermute_counts(map, mapping)
            }
            (Reconciliation::JoinPartitions { partitions }, RunResult::Partitioned(maps)) => {
                join_partitions(maps, partitions)
            }
            // A failed partitioned run comes back as a single sentinel map.
            (Reconciliation::JoinPartitions { .. }, RunResult::Single(map)) => Ok(map.clone()),
            (_, RunResult::Partitioned(_)) => Err(MorphError::Detector(
                "unexpected partitioned result for a non-partitioning relation".to_string(),
            )),
        }
    }
}

fn bit_at(bits: &[u8], k: usize) -> u8 {
    bits[bits.len() - 1 - k]
}

pub fn check_bijection(mapping: &[usize]) -> Result<()> {
    let mut seen = vec![false; mapping.len()];
    for &t in mapping {
        if t >= mapping.len() || seen[t] {
            return Err(MorphError::Detector(format!(
                "mapping {:?} is not a permutation",
                mapping
            )));
        }
        seen[t] = true;
    }
    Ok(())
}

/// Rewrites every key so that baseline bit `i` reads follow-up bit
/// `mapping[i]`.
pub fn unpermute_counts(map: &CountMap, mapping: &[usize]) -> Result<CountMap> {
    check_bijection(mapping)?;
    let n = mapping.len();
    let mut out = CountMap::new();
    for (key, count) in map {
        let bits = key.as_bytes();
        if bits.len() != n {
            return Err(MorphError::Detector(format!(
                "bitstring {:?} has width {}, mapping covers {}",
                key,
                bits.len(),
                n
            )));
        }
        let mut reordered = vec![b'0'; n];
        for (i, &target) in mapping.iter().enumerate() {
            reordered[n - 1 - i] = bit_at(bits, target);
        }
        let reordered = String::from_utf8(reordered)
            .map_err(|e| MorphError::Detector(e.to_string()))?;
        *out.entry(reordered).or_insert(0) += count;
    }
    Ok(out)
}

/// Outer product of independent partition results.
///
/// Joint probabilities are `prod_p c_p(s_p) / N_p`, scaled to the first
/// partition's shot total with largest-remainder rounding so the joint map
/// sums exactly to that total. Bit `partitions[p][j]` of a joint key is bit
/// `j` of partition `p`'s key.
pub fn join_partitions(maps: &[CountMap], partitions: &[Vec<usize>]) -> Result<CountMap> {
    if maps.len() != partitions.len() {
        return Err(MorphError::Detector(format!(
            "{} partition results for {} partitions",
            maps.len(),
            partitions.len()
        )));
    }
    let width: usize = partitions.iter().map(|p| p.len()).sum();
    let mut covered = vec![false; width];
    for &b in partitions.iter().flatten() {
        if b >= width || covered[b] {
            return Err(MorphError::Detector(format!(
                "partitions {:?} do not tile [0, {})",
                partitions, width
            )));
        }
        covered[b] = true;
    }

    let mut totals = Vec::with_capacity(maps.len());
    for (p, map) in maps.iter().enumerate() {
        let total: u64 = map.values().sum();
        if total == 0 {
            return Err(MorphError::Detector(format!("partition {} has no shots", p)));
        }
        if let Some(key) = map.keys().find(|k| k.len() != partitions[p].len()) {
            return Err(MorphError::Detector(format!(
                "partition {} key {:?} does not have width {}",
                p,
                key,
                partitions[p].len()
            )));
        }
        totals.push(total);
    }

    // Joint outcomes as (key, probability), built partition by partition.
    let mut joint: Vec<(Vec<u8>, f64)> = vec![(vec![b'0'; width], 1.0)];
    for (p, map) in maps.iter().enumerate() {
        let mut next = Vec::with_capacity(joint.len() * map.len());
        for (bits, prob) in &joint {
            for (key, count) in map {
                if *count == 0 {
                    continue;
                }
                let local = key.as_bytes();
                let mut combined = bits.clone();
                for (j, &orig) in partitions[p].iter().enumerate() {
                    combined[width - 1 - orig] = bit_at(local, j);
                }
                next.push((combined, prob * (*count as f64) / (totals[p] as f64)));
            }
        }
        joint = next;
    }

    let target = totals[0];
    let mut floors: Vec<(String, u64, f64)> = Vec::with_capacity(joint.len());
    for (bits, prob) in joint {
        let exact = prob * target as f64;
        let floor = exact.floor();
        let key = String::from_utf8(bits).map_err(|e| MorphError::Detector(e.to_string()))?;
        floors.push((key, floor as u64, exact - floor));
    }
    let assigned: u64 = floors.iter().map(|(_, f, _)| *f).sum();
    let mut remaining = target.saturating_sub(assigned);
    let mut order: Vec<usize> = (0..floors.len()).collect();
    order.sort_by(|a, b| {
        floors[*b]
            .2
            .partial_cmp(&floors[*a].2)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| floors[*a].0.cmp(&floors[*b].0))
    });
    for idx in order {
        if remaining == 0 {
            break;
        }
        floors[idx].1 += 1;
        remaining -= 1;
    }

    let mut out = CountMap::new();
    for (key, count, _) in floors {
        if count > 0 {
            *out.entry(key).or_insert(0) += count;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_unpermute_swaps_bits_back() {
        // Baseline bit 0 was moved to follow-up bit 2 and vice versa.
        let mapping = vec![2, 1, 0];
        let followup = btreemap! {"001".to_string() => 7, "110".to_string() => 3};
        let back = unpermute_counts(&followup, &mapping).unwrap();
        assert_eq!(
            back,
            btreemap! {"100".to_string() => 7, "011".to_string() => 3}
        );
    }

    #[test]
    fn test_unpermute_cycle_is_inverse_of_forward() {
        let mapping = vec![1, 2, 0];
        // Baseline "001" has bit 0 set; in the follow-up that bit lives at 1.
        let followup = btreemap! {"010".to_string() => 5};
        let back = unpermute_counts(&followup, &mapping).unwrap();
        assert_eq!(back, btreemap! {"001".to_string() => 5});
    }

    #[test]
    fn test_unpermute_rejects_non_bijection() {
        let map = btreemap! {"01".to_string() => 1};
        assert!(unpermute_counts(&map, &[0, 0]).is_err());
        assert!(unpermute_counts(&map, &[0, 1, 2]).is_err());
    }

    #[test]
    fn test_join_two_partitions() {
        // Partition 0 holds bits {0, 2}, partition 1 holds bit {1}.
        let p0 = btreemap! {"00".to_string() => 50, "11".to_string() => 50};
        let p1 = btreemap! {"1".to_string() => 100};
        let joint = join_partitions(&[p0, p1], &[vec![0, 2], vec![1]]).unwrap();
        assert_eq!(
            joint,
            btreemap! {"010".to_string() => 50, "111".to_string() => 50}
        );
    }

    #[test]
    fn test_join_sums_to_first_total() {
        let p0 = btreemap! {"0".to_string() => 1, "1".to_string() => 2};
        let p1 = btreemap! {"0".to_string() => 1, "1".to_string() => 1};
        let joint = join_partitions(&[p0, p1], &[vec![0], vec![1]]).unwrap();
        assert_eq!(joint.values().sum::<u64>(), 3);
        // Exact counts are 0.5, 0.5, 1, 1; the tie goes to the smaller key.
        assert_eq!(
            joint,
            btreemap! {"00".to_string() => 1, "01".to_string() => 1, "11".to_string() => 1}
        );
    }

    #[test]
    fn test_join_rejects_bad_tiling() {
        let p0 = btreemap! {"0".to_string() => 1};
        assert!(join_partitions(&[p0.clone(), p0.clone()], &[vec![0], vec![0]]).is_err());
        assert!(join_partitions(&[p0], &[vec![0], vec![1]]).is_err());
    }

    #[test]
    fn test_reconciliation_dispatch() {
        let single = RunResult::Single(btreemap! {"10".to_string() => 4});
        assert_eq!(
            Reconciliation::Identity.apply(&single).unwrap(),
            btreemap! {"10".to_string() => 4}
        );
        assert_eq!(
            Reconciliation::BitPermutation {
                mapping: vec![1, 0]
            }
            .apply(&single)
            .unwrap(),
            btreemap! {"01".to_string() => 4}
        );
        let parts = RunResult::Partitioned(vec![btreemap! {"1".to_string() => 4}]);
        assert!(Reconciliation::Identity.apply(&parts).is_err());
    }

    #[test]
    fn test_reconciliation_serde() {
        let r = Reconciliation::JoinPartitions {
            partitions: vec![vec![0, 1], vec![2]],
        };
        let text = serde_json::to_string(&r).unwrap();
        assert_eq!(text, r#"{"kind":"join_partitions","partitions":[[0,1],[2]]}"#);
        let back: Reconciliation = serde_json::from_str(&text).unwrap();
        assert_eq!(back, r);
    }
}
