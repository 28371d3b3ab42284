// SPDX-License-Identifier: Apache-2.0

use anyhow::{anyhow, Context};
use clap::ArgMatches;
use qmorph::program;
use qmorph::relations::{build_relation, try_apply, ALL_RELATION_KINDS};
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use serde_json::json;

fn read_program(matches: &ArgMatches) -> anyhow::Result<String> {
    let path = matches
        .get_one::<String>("program")
        .ok_or_else(|| anyhow!("missing program path"))?;
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path))
}

/// Prints the canonical form of a program.
pub fn handle_normalize(matches: &ArgMatches) -> anyhow::Result<()> {
    let text = read_program(matches)?;
    print!("{}", program::normalize(&text)?);
    Ok(())
}

/// Applies one relation to a program and prints the follow-up.
pub fn handle_derive(matches: &ArgMatches) -> anyhow::Result<()> {
    let text = read_program(matches)?;
    let name = matches
        .get_one::<String>("relation")
        .ok_or_else(|| anyhow!("--relation is required"))?;
    let seed: u64 = match matches.get_one::<String>("seed") {
        Some(s) => s.parse().context("parsing --seed")?,
        None => 0,
    };
    let relation = build_relation(name, None)?;
    let baseline = program::split(&text)?;
    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    let derivation = try_apply(relation.as_ref(), &baseline, &mut rng)?
        .ok_or_else(|| anyhow!("{} does not apply to this program", relation.name()))?;
    log::info!("derive: applied {}", relation.name());

    if let Some(path) = matches.get_one::<String>("metadata_out") {
        let metadata = json!({
            "relation": relation.name(),
            "config": relation.config_json(),
            "metadata": derivation.metadata,
            "reconciliation": derivation.reconciliation,
        });
        std::fs::write(path, serde_json::to_string_pretty(&metadata)?)
            .with_context(|| format!("writing {}", path))?;
    }
    print!("{}", program::reconstruct(&derivation.program));
    Ok(())
}

pub fn handle_relations() {
    for kind in ALL_RELATION_KINDS.iter() {
        println!("{}", kind);
    }
}
