// SPDX-License-Identifier: Apache-2.0

//! Properties every relation must keep on generated baselines.

use std::collections::BTreeSet;

use pretty_assertions::assert_eq;
use qmorph::gates;
use qmorph::generator::GeneratorConfig;
use qmorph::orchestrator::{derive_chain, ChainOutcome};
use qmorph::program;
use qmorph::reconcile::{check_bijection, Reconciliation};
use qmorph::relations::{get_all_relations, try_apply};
use qmorph::{CountMap, Detector, RunResult};
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use regex::Regex;

const PYTHON_KEYWORDS: &[&str] = &[
    "None", "True", "False", "and", "or", "not", "in", "is", "if", "else", "for", "from",
    "import", "as", "lambda",
];

/// Names a program binds through imports or top-level assignments.
fn bound_names(text: &str) -> BTreeSet<String> {
    let assign = Regex::new(r"^\s*([A-Za-z_]\w*)\s*=[^=]").unwrap();
    let from_import = Regex::new(r"^\s*from\s+\S+\s+import\s+(.+)$").unwrap();
    let plain_import = Regex::new(r"^\s*import\s+(.+)$").unwrap();
    let mut bound = BTreeSet::new();
    for line in text.lines() {
        if let Some(c) = assign.captures(line) {
            bound.insert(c[1].to_string());
        }
        let imported = from_import
            .captures(line)
            .or_else(|| plain_import.captures(line))
            .map(|c| c[1].to_string());
        for item in imported.iter().flat_map(|list| list.split(',')) {
            let name = item.split_whitespace().last().unwrap_or("");
            bound.insert(name.split('.').next().unwrap_or("").to_string());
        }
    }
    bound
}

/// Free names a program reads: no attributes, keyword arguments, or string
/// contents.
fn used_names(text: &str) -> BTreeSet<String> {
    let strings = Regex::new(r#"'[^']*'|"[^"]*""#).unwrap();
    let ident = Regex::new(r"[A-Za-z_]\w*").unwrap();
    let mut used = BTreeSet::new();
    for line in text.lines() {
        let line = strings.replace_all(line, "''");
        for m in ident.find_iter(&line) {
            let before = line[..m.start()].trim_end();
            let after = line[m.end()..].trim_start();
            let prev_char = line[..m.start()].chars().last();
            if before.ends_with('.')
                || prev_char.is_some_and(|c| c.is_ascii_alphanumeric())
                || (after.starts_with('=') && !after.starts_with("=="))
            {
                continue;
            }
            used.insert(m.as_str().to_string());
        }
    }
    used
}

fn baselines(count: u64) -> Vec<String> {
    let config = GeneratorConfig::default();
    let generator = config.build().unwrap();
    (0..count)
        .map(|seed| {
            let n_qubits = 2 + (seed as usize % 4);
            generator
                .generate(n_qubits, (4, 12), &config.gate_set, seed, "prop")
                .unwrap()
                .0
        })
        .collect()
}

#[test]
fn test_follow_ups_round_trip_through_text() {
    let _ = env_logger::builder().is_test(true).try_init();
    let relations = get_all_relations();
    let mut rng = Pcg64Mcg::seed_from_u64(17);
    for text in baselines(8) {
        let baseline = program::split(&text).unwrap();
        assert_eq!(program::reconstruct(&baseline), program::normalize(&text).unwrap());
        for relation in &relations {
            let Some(d) = try_apply(relation.as_ref(), &baseline, &mut rng).unwrap() else {
                continue;
            };
            let emitted = program::reconstruct(&d.program);
            let reparsed = program::split(&emitted).unwrap();
            assert_eq!(reparsed, d.program, "{}", relation.name());
            assert_eq!(program::normalize(&emitted).unwrap(), emitted);
        }
    }
}

#[test]
fn test_permutations_are_bijections() {
    let relations = get_all_relations();
    let relation = relations
        .iter()
        .find(|r| r.name() == "ChangeQubitOrder")
        .unwrap();
    let mut rng = Pcg64Mcg::seed_from_u64(3);
    for text in baselines(10) {
        let baseline = program::split(&text).unwrap();
        let d = try_apply(relation.as_ref(), &baseline, &mut rng)
            .unwrap()
            .expect("generated programs have a single register pair");
        let Reconciliation::BitPermutation { mapping } = &d.reconciliation else {
            panic!("expected a bit permutation, got {:?}", d.reconciliation);
        };
        check_bijection(mapping).unwrap();
    }
}

#[test]
fn test_equivalent_chains_keep_identity_reconciliation() {
    let relations: Vec<_> = get_all_relations()
        .into_iter()
        .filter(|r| r.is_semantically_equivalent())
        .collect();
    let detector = qmorph::build_detector("ks").unwrap();
    let mut rng = Pcg64Mcg::seed_from_u64(99);
    for text in baselines(6) {
        let baseline = program::split(&text).unwrap();
        let ChainOutcome::Derived {
            applied,
            derivation,
        } = derive_chain(&relations, 3, &baseline, &mut rng)
        else {
            panic!("some equivalent relation always applies");
        };
        assert!(!applied.is_empty() && applied.len() <= 3);
        assert_eq!(derivation.reconciliation, Reconciliation::Identity);

        // Identical outputs through an identity reconciliation never diverge.
        let counts: CountMap = [("00".to_string(), 30), ("11".to_string(), 70)]
            .into_iter()
            .collect();
        let followup = derivation
            .reconciliation
            .apply(&RunResult::Single(counts.clone()))
            .unwrap();
        assert_eq!(detector.verdict(&counts, &followup).p_value, 1.0);
    }
}

#[test]
fn test_follow_ups_bind_every_name_they_introduce() {
    let relations = get_all_relations();
    let mut rng = Pcg64Mcg::seed_from_u64(41);
    for text in baselines(10) {
        let baseline = program::split(&text).unwrap();
        let known = used_names(&text);
        for relation in &relations {
            let Some(d) = try_apply(relation.as_ref(), &baseline, &mut rng).unwrap() else {
                continue;
            };
            let emitted = program::reconstruct(&d.program);
            let bound = bound_names(&emitted);
            let unbound: Vec<String> = used_names(&emitted)
                .into_iter()
                .filter(|n| !known.contains(n))
                .filter(|n| !PYTHON_KEYWORDS.contains(&n.as_str()))
                .filter(|n| gates::lookup(n).is_none())
                .filter(|n| !bound.contains(n))
                .collect();
            assert!(
                unbound.is_empty(),
                "{} introduces unbound names {:?}:\n{}",
                relation.name(),
                unbound,
                emitted
            );
        }
    }
}
