// SPDX-License-Identifier: Apache-2.0

//! Command line driver for metamorphic differential testing campaigns.
//!
//! ```text
//! qmorph-driver <command> <command-args-and-options>
//! ```
//!
//! Commands are:
//!
//! - fuzz: Runs a campaign described by a TOML config.
//! - retest: Reruns the most suspicious programs of a finished campaign.
//! - derive: Applies one relation to a program file and prints the follow-up.
//! - normalize: Prints the canonical form of a program file.
//! - detect-batch: Runs the detector over stored result pairs.
//! - relations: Lists the relation names.
//!
//! Sample usage:
//!
//! ```shell
//! $ cargo run -- fuzz --config campaign.toml --iterations 50
//! $ cargo run -- derive program.py --relation ChangeQubitOrder --seed 3
//! ```

mod derive;
mod detect_batch;
mod fuzz;
mod report_cli_error;

use clap::{Arg, ArgAction};
use report_cli_error::report_cli_error_and_exit;

trait AppExt {
    fn add_config_args(self) -> Self;
    fn add_program_arg(self) -> Self;
}

impl AppExt for clap::Command {
    fn add_config_args(self) -> Self {
        (self as clap::Command)
            .arg(
                Arg::new("config")
                    .long("config")
                    .value_name("CONFIG_TOML")
                    .help("Path to the campaign config")
                    .required(true)
                    .action(ArgAction::Set),
            )
            .arg(
                Arg::new("output_dir")
                    .long("output_dir")
                    .value_name("DIR")
                    .help("Overrides output_dir from the config")
                    .action(ArgAction::Set),
            )
    }

    fn add_program_arg(self) -> Self {
        (self as clap::Command).arg(
            Arg::new("program")
                .help("The program file")
                .required(true)
                .index(1),
        )
    }
}

fn main() {
    let _ = env_logger::try_init();

    log::info!(
        "qmorph-driver starting; version: {}",
        env!("CARGO_PKG_VERSION")
    );

    let matches = clap::Command::new("qmorph-driver")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Metamorphic differential testing of quantum program pipelines")
        .subcommand(clap::Command::new("version").about("Prints the version of the driver"))
        .subcommand(
            clap::Command::new("fuzz")
                .about("Runs a fuzzing campaign")
                .add_config_args()
                .arg(
                    Arg::new("iterations")
                        .long("iterations")
                        .value_name("N")
                        .help("Overrides the iteration budget")
                        .action(ArgAction::Set),
                ),
        )
        .subcommand(
            clap::Command::new("retest")
                .about("Reruns the lowest p-value programs of a campaign")
                .add_config_args()
                .arg(
                    Arg::new("top_k")
                        .long("top_k")
                        .value_name("K")
                        .help("Number of programs to rerun")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("attempts")
                        .long("attempts")
                        .value_name("N")
                        .help("Reruns per program")
                        .action(ArgAction::Set),
                ),
        )
        .subcommand(
            clap::Command::new("derive")
                .about("Applies a relation to a program and prints the follow-up")
                .add_program_arg()
                .arg(
                    Arg::new("relation")
                        .long("relation")
                        .value_name("RELATION")
                        .help("Relation name, see `relations`")
                        .required(true)
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .value_name("SEED")
                        .help("Seed for the relation's random choices")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("metadata_out")
                        .long("metadata_out")
                        .value_name("PATH")
                        .help("Writes the derivation metadata as JSON")
                        .action(ArgAction::Set),
                ),
        )
        .subcommand(
            clap::Command::new("normalize")
                .about("Prints the canonical form of a program")
                .add_program_arg(),
        )
        .subcommand(
            clap::Command::new("detect-batch")
                .about("Runs the detector over <id>.a.json / <id>.b.json pairs")
                .arg(
                    Arg::new("input_dir")
                        .help("Directory holding the result pairs")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::new("output_dir")
                        .long("output_dir")
                        .value_name("DIR")
                        .help("Where <id>.verdict.json files are written")
                        .required(true)
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("detector")
                        .long("detector")
                        .value_name("NAME")
                        .help("Detector name")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("threads")
                        .long("threads")
                        .value_name("N")
                        .help("Worker threads")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("alpha")
                        .long("alpha")
                        .value_name("ALPHA")
                        .help("Significance level used to flag divergences")
                        .action(ArgAction::Set),
                ),
        )
        .subcommand(clap::Command::new("relations").about("Lists the relation names"))
        .get_matches();

    let (subcommand, result) = if let Some(matches) = matches.subcommand_matches("fuzz") {
        ("fuzz", fuzz::handle_fuzz(matches))
    } else if let Some(matches) = matches.subcommand_matches("retest") {
        ("retest", fuzz::handle_retest(matches))
    } else if let Some(matches) = matches.subcommand_matches("derive") {
        ("derive", derive::handle_derive(matches))
    } else if let Some(matches) = matches.subcommand_matches("normalize") {
        ("normalize", derive::handle_normalize(matches))
    } else if let Some(matches) = matches.subcommand_matches("detect-batch") {
        ("detect-batch", detect_batch::handle_detect_batch(matches))
    } else if let Some(_matches) = matches.subcommand_matches("relations") {
        derive::handle_relations();
        return;
    } else if let Some(_matches) = matches.subcommand_matches("version") {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return;
    } else {
        report_cli_error_and_exit("No valid subcommand provided.", None, &[]);
    };
    if let Err(e) = result {
        report_cli_error_and_exit(&format!("{:#}", e), Some(subcommand), &[]);
    }
}
