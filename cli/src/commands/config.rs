// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Configuration management commands: `init`, `show`, `validate`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use inquire::{Confirm, Text};

use agentv_core::config::{init_config_file, Config, ConfigLoader, TargetConfig};

/// Configuration management subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Write a default config file to the standard location.
    Init {
        /// Run non-interactively, accepting the generated defaults as-is.
        #[arg(long)]
        non_interactive: bool,
    },

    /// Print the fully merged configuration (defaults, file, environment).
    Show {
        /// Print as TOML instead of the default pretty summary.
        #[arg(long)]
        toml: bool,
    },

    /// Validate a configuration file without installing it.
    Validate {
        /// Path to the config file to validate.
        config: PathBuf,
    },
}

/// Dispatches a [`ConfigCommands`] subcommand.
pub async fn execute(cmd: ConfigCommands, verbose: bool) -> Result<()> {
    match cmd {
        ConfigCommands::Init { non_interactive } => init(non_interactive, verbose),
        ConfigCommands::Show { toml } => show(toml),
        ConfigCommands::Validate { config } => validate(&config),
    }
}

fn init(non_interactive: bool, verbose: bool) -> Result<()> {
    if !non_interactive {
        let proceed = Confirm::new("Write a default AgentV config file?")
            .with_default(true)
            .prompt()
            .context("prompt failed")?;
        if !proceed {
            println!("{}", "aborted".yellow());
            return Ok(());
        }

        let path = init_config_file().context("failed to write config file")?;
        println!("{} {}", "wrote".green(), path.display());

        let add_target = Confirm::new("Add a target now?").with_default(false).prompt().unwrap_or(false);
        if add_target {
            let name = Text::new("Target name:").prompt().context("prompt failed")?;
            let base_url = Text::new("Base URL:").prompt().context("prompt failed")?;
            println!(
                "{} add a [targets.{name}] section to {} pointing at {base_url} (the interactive editor only scaffolds the file)",
                "next:".cyan(),
                path.display()
            );
        }
    } else {
        let path = init_config_file().context("failed to write config file")?;
        println!("{} {}", "wrote".green(), path.display());
    }

    if verbose {
        if let Some(path) = ConfigLoader::default_config_path() {
            tracing::debug!(path = %path.display(), "default config path");
        }
    }

    Ok(())
}

fn show(as_toml: bool) -> Result<()> {
    let config = ConfigLoader::new().load().context("failed to load configuration")?;

    if as_toml {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    println!("{}", "Targets".bold());
    let mut names: Vec<&String> = config.targets.keys().collect();
    names.sort();
    for name in names {
        print_target(name, &config.targets[name]);
    }

    println!("\n{}", "Dispatcher".bold());
    println!("  workers: {}", config.dispatcher.workers);
    println!("  attempt_timeout_ms: {}", config.dispatcher.attempt_timeout_ms);
    println!("  max_retries: {}", config.dispatcher.max_retries);
    println!("  fail_fast: {}", config.dispatcher.fail_fast);

    println!("\n{}", "Judge proxy".bold());
    println!("  max_calls: {}", config.judge_proxy.max_calls);

    if let Some(target) = &config.judge.target {
        println!("\n{}: {target}", "Judge target".bold());
    }

    Ok(())
}

fn print_target(name: &str, target: &TargetConfig) {
    println!("  {} ({})", name.cyan(), target.kind);
    if let Some(model) = &target.model {
        println!("    model: {model}");
    }
    if let Some(base_url) = &target.base_url {
        println!("    base_url: {base_url}");
    }
    println!("    timeout_seconds: {}", target.timeout_seconds);
}

fn validate(path: &PathBuf) -> Result<()> {
    let config: Config = ConfigLoader::new()
        .with_file(path)
        .skip_default_file()
        .skip_env()
        .load()
        .with_context(|| format!("{} failed validation", path.display()))?;

    println!(
        "{} {} ({} target{})",
        "valid:".green().bold(),
        path.display(),
        config.targets.len(),
        if config.targets.len() == 1 { "" } else { "s" }
    );
    Ok(())
}
