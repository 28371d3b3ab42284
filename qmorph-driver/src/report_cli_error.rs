// SPDX-License-Identifier: Apache-2.0

use colored::Colorize;

pub fn report_cli_error_and_exit(
    message: &str,
    subcommand: Option<&str>,
    details: &[(&str, &str)],
) -> ! {
    let prefix = match subcommand {
        Some(sub) => format!("{} {}", env!("CARGO_PKG_NAME"), sub),
        None => env!("CARGO_PKG_NAME").to_string(),
    };
    eprintln!("{}: {}", prefix, message.red().bold());
    let width = details.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    for (key, value) in details {
        eprintln!("  {}: {}", format!("{:>width$}", key, width = width).dimmed(), value);
    }
    std::process::exit(1);
}
