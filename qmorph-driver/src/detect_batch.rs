// SPDX-License-Identifier: Apache-2.0

use std::path::Path;

use anyhow::{anyhow, Context};
use clap::ArgMatches;
use colored::Colorize;
use qmorph::batch;

pub fn handle_detect_batch(matches: &ArgMatches) -> anyhow::Result<()> {
    let input_dir = matches
        .get_one::<String>("input_dir")
        .ok_or_else(|| anyhow!("missing input directory"))?;
    let output_dir = matches
        .get_one::<String>("output_dir")
        .ok_or_else(|| anyhow!("--output_dir is required"))?;
    let detector = matches
        .get_one::<String>("detector")
        .map(String::as_str)
        .unwrap_or("ks");
    let threads: usize = match matches.get_one::<String>("threads") {
        Some(t) => t.parse().context("parsing --threads")?,
        None => std::thread::available_parallelism().map_or(1, |n| n.get()),
    };
    let alpha: f64 = match matches.get_one::<String>("alpha") {
        Some(a) => a.parse().context("parsing --alpha")?,
        None => 0.05,
    };

    let jobs = batch::discover_jobs(Path::new(input_dir))?;
    let verdicts = batch::run_batch(&jobs, detector, threads, Path::new(output_dir))?;
    for v in &verdicts {
        let line = format!(
            "{} {}={:.4} p={:.4}",
            v.id, v.verdict.test_name, v.verdict.statistic, v.verdict.p_value
        );
        if v.verdict.is_failure() {
            println!("{} {}", line, "detector-failure".yellow());
        } else if v.verdict.p_value < alpha {
            println!("{} {}", line, "divergent".red().bold());
        } else {
            println!("{}", line);
        }
    }
    Ok(())
}
