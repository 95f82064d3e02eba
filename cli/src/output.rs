// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Renders a finished dispatch run's summary to the terminal.

use clap::ValueEnum;
use colored::Colorize;

use agentv_core::dispatcher::DispatchSummary;

/// How [`print_summary`] renders a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable, colored summary line.
    Pretty,
    /// A single-line JSON object.
    Json,
    /// Indented JSON.
    JsonPretty,
}

/// Prints a [`DispatchSummary`] in the requested format.
pub fn print_summary(summary: &DispatchSummary, format: OutputFormat) {
    match format {
        OutputFormat::Pretty => print_pretty(summary),
        OutputFormat::Json => println!("{}", summary_json(summary)),
        OutputFormat::JsonPretty => println!("{}", serde_json::to_string_pretty(&summary_json(summary)).unwrap_or_default()),
    }
}

fn print_pretty(summary: &DispatchSummary) {
    let header = if summary.failed > 0 {
        "FAIL".red().bold()
    } else if summary.borderline > 0 {
        "BORDERLINE".yellow().bold()
    } else {
        "PASS".green().bold()
    };

    println!(
        "{header}  {} total, {} passed, {} borderline, {} failed",
        summary.total,
        summary.passed.to_string().green(),
        summary.borderline.to_string().yellow(),
        summary.failed.to_string().red(),
    );

    if summary.cancelled {
        println!("{}", "run was cancelled before every item completed".yellow());
    }
}

fn summary_json(summary: &DispatchSummary) -> serde_json::Value {
    serde_json::json!({
        "total": summary.total,
        "passed": summary.passed,
        "borderline": summary.borderline,
        "failed": summary.failed,
        "cancelled": summary.cancelled,
        "exit_code": summary.exit_code(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> DispatchSummary {
        DispatchSummary {
            total: 3,
            passed: 2,
            borderline: 0,
            failed: 1,
            cancelled: false,
        }
    }

    #[test]
    fn summary_json_carries_every_field() {
        let value = summary_json(&summary());
        assert_eq!(value["total"], 3);
        assert_eq!(value["passed"], 2);
        assert_eq!(value["failed"], 1);
        assert_eq!(value["exit_code"], 1);
    }

    #[test]
    fn print_summary_does_not_panic_for_any_format() {
        for format in [OutputFormat::Pretty, OutputFormat::Json, OutputFormat::JsonPretty] {
            print_summary(&summary(), format);
        }
    }
}
