// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use clap::{Parser, Subcommand};
use std::process;

mod commands;
mod error;
mod output;

use commands::{config, run};

/// AgentV - evaluates AI-agent outputs against declarative test suites
#[derive(Parser)]
#[command(name = "agentv")]
#[command(version)]
#[command(about = "Evaluates AI-agent outputs against declarative test suites", long_about = None)]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a suite's cases against a configured target
    #[command(visible_alias = "r")]
    Run(run::RunArgs),

    /// Configuration management commands
    #[command(subcommand)]
    Config(config::ConfigCommands),

    /// Generate shell completions
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    match cli.command {
        Commands::Run(args) => match run::execute(args, cli.verbose).await {
            Ok(code) => process::exit(code),
            Err(e) => fail(&e, cli.verbose),
        },
        Commands::Config(cmd) => {
            if let Err(e) = config::execute(cmd, cli.verbose).await {
                fail(&e, cli.verbose);
            }
        }
        Commands::Completions { shell } => generate_completions(shell),
    }
}

fn fail(e: &anyhow::Error, verbose: bool) -> ! {
    eprintln!("Error: {e}");
    if verbose {
        eprintln!("\nCaused by:");
        for cause in e.chain().skip(1) {
            eprintln!("  {cause}");
        }
    }
    process::exit(error::exit_codes::DISPATCHER_ERROR);
}

fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin_name, &mut io::stdout());
}
