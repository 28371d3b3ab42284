// SPDX-License-Identifier: Apache-2.0

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::ArgMatches;
use qmorph::config::FuzzConfig;
use qmorph::differential::DifferentialExecutor;
use qmorph::orchestrator::Orchestrator;
use qmorph::retest;
use qmorph::store::Store;
use serde_json::json;

use crate::report_cli_error::report_cli_error_and_exit;

/// Loads the campaign config, applying command-line overrides.
fn load_config(matches: &ArgMatches, subcommand: &str) -> FuzzConfig {
    let Some(path) = matches.get_one::<String>("config") else {
        report_cli_error_and_exit("--config is required", Some(subcommand), &[]);
    };
    let mut config = match FuzzConfig::from_path(Path::new(path)) {
        Ok(config) => config,
        Err(e) => report_cli_error_and_exit(
            "invalid campaign config",
            Some(subcommand),
            &[("path", path.as_str()), ("error", &e.to_string())],
        ),
    };
    if let Some(iterations) = matches.get_one::<String>("iterations") {
        match iterations.parse::<u64>() {
            Ok(n) => config.budget.iterations = Some(n),
            Err(_) => report_cli_error_and_exit(
                "--iterations must be a non-negative integer",
                Some(subcommand),
                &[("value", iterations.as_str())],
            ),
        }
    }
    if let Some(output_dir) = matches.get_one::<String>("output_dir") {
        config.output_dir = output_dir.into();
    }
    config
}

pub fn handle_fuzz(matches: &ArgMatches) -> anyhow::Result<()> {
    let config = load_config(matches, "fuzz");
    let mut orchestrator = Orchestrator::new(config).context("setting up the campaign")?;

    let stop = Arc::new(AtomicBool::new(false));
    let s = stop.clone();
    ctrlc::set_handler(move || {
        s.store(true, Ordering::SeqCst);
        eprintln!("\nCtrl+C received, finishing the current iteration...");
    })
    .context("installing the Ctrl-C handler")?;
    orchestrator.set_stop_flag(stop);

    let report = orchestrator.run()?;
    let stats = &report.stats;
    let summary = json!({
        "iterations": stats.iterations,
        "completed": stats.completed,
        "divergent": stats.divergent,
        "detector_failures": stats.detector_failures,
        "timed_out": stats.timed_out,
        "no_applicable_relation": stats.no_applicable_relation,
        "derive_failures": stats.derive_failures,
        "generate_failures": stats.generate_failures,
        "completed_by_relation": stats.completed_by_relation,
        "divergent_by_relation": stats.divergent_by_relation,
        "retest_rounds": report.retests.len(),
        "elapsed_secs": report.elapsed.as_secs_f64(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

pub fn handle_retest(matches: &ArgMatches) -> anyhow::Result<()> {
    let config = load_config(matches, "retest");
    let store = Store::open(&config.output_dir)?;
    let mut differential = DifferentialExecutor::new(
        config.executor.build()?,
        config.followup_executor().build()?,
        config.detector.build()?,
        config.generator.shots,
    );
    let mut retest_config = config.retest.clone();
    if let Some(top_k) = matches.get_one::<String>("top_k") {
        retest_config.top_k = top_k.parse().context("parsing --top_k")?;
    }
    if let Some(attempts) = matches.get_one::<String>("attempts") {
        retest_config.attempts = attempts.parse().context("parsing --attempts")?;
    }
    let report = retest::run_retest(&store, &mut differential, &retest_config, config.alpha)?;
    let summary = json!({
        "programs": report.programs,
        "attempts": report.attempts,
        "reproduced": report.reproduced,
        "skipped": report.skipped,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
