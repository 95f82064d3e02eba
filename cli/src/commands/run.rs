// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `agentv run`: loads a suite, resolves a target, and drives the
//! dispatcher to completion.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use agentv_core::config::{Config, ConfigLoader};
use agentv_core::dispatcher::pipeline::TargetProviderResolver;
use agentv_core::dispatcher::{Dispatcher, DispatcherConfig};
use agentv_core::providers::factory::ProviderConfig;
use agentv_core::providers::{Provider, ProviderFactory};
use agentv_core::target::{ResolvedTarget, TargetDescriptor, TargetResolver};
use agentv_core::writers::{build_writer_for_path, MultiplexWriter, ResultWriter};
use agentv_datasets::loader::SuiteLoader;

use crate::error::exit_codes;
use crate::output::{self, OutputFormat};

/// Runs a suite's cases against one configured target.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the suite file to run (`.json`, `.yaml`/`.yml`, or `.jsonl`).
    pub suite: PathBuf,

    /// Name of the configured target to run against.
    #[arg(long)]
    pub target: String,

    /// Number of trials to run per case.
    #[arg(long, default_value_t = 1)]
    pub trials: u32,

    /// Worker pool size override; falls back to the target's, then the
    /// dispatcher's, configured default.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Output destination(s), dispatched by extension. Repeatable: a run
    /// can write `.jsonl`, `.json`, `.yaml`, and `.xml` (JUnit) at once.
    #[arg(short = 'o', long = "output", required = true)]
    pub output: Vec<PathBuf>,

    /// Path to a config file, overriding the default search path.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Abort the run as soon as one case fails.
    #[arg(long)]
    pub fail_fast: bool,

    /// How to render the final summary line.
    #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
    pub format: OutputFormat,
}

/// Runs the suite and returns the process exit code: `0` if every result
/// passed, `1` if at least one failed, `2` if the dispatcher itself could
/// not complete the run.
pub async fn execute(args: RunArgs, verbose: bool) -> Result<i32> {
    let config = load_config(args.config.as_deref())?;

    let loader = args
        .suite
        .parent()
        .map(SuiteLoader::with_repo_root)
        .unwrap_or_default();
    let cases = loader
        .load(&args.suite)
        .with_context(|| format!("failed to load suite: {}", args.suite.display()))?;
    if cases.is_empty() {
        bail!("suite {} declared no cases", args.suite.display());
    }
    if verbose {
        tracing::info!(count = cases.len(), suite = %args.suite.display(), "loaded suite cases");
    }

    let resolver = build_resolver(&config);
    let resolved = resolver
        .resolve(&args.target)
        .with_context(|| format!("failed to resolve target: {}", args.target))?;

    let factory = ProviderFactory::new();
    let provider = build_provider(&factory, &args.target, &resolved)?;
    let judge_provider = match &resolved.judge_target {
        Some(judge_name) => {
            let judge_resolved = resolver
                .resolve(judge_name)
                .with_context(|| format!("failed to resolve judge target: {judge_name}"))?;
            Some(build_provider(&factory, judge_name, &judge_resolved)?)
        }
        None => None,
    };

    let writer = build_writer(&args.output).await?;

    let dispatcher_config = DispatcherConfig {
        workers: args.workers.or(resolved.workers).unwrap_or(config.dispatcher.workers),
        attempt_timeout: Duration::from_millis(config.dispatcher.attempt_timeout_ms),
        max_retries: config.dispatcher.max_retries,
        retry_base_delay: Duration::from_millis(config.dispatcher.retry_base_delay_ms),
        retry_max_delay: Duration::from_millis(config.dispatcher.retry_max_delay_ms),
        grace_period: Duration::from_millis(config.dispatcher.grace_period_ms),
        fail_fast: args.fail_fast || config.dispatcher.fail_fast,
    };

    let dispatcher = Dispatcher::new(args.target.clone(), provider, judge_provider, dispatcher_config)
        .with_target_resolver(Arc::new(ConfigTargetResolver { factory, resolver }));

    let cancellation = CancellationToken::new();
    let ctrl_c_token = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_token.cancel();
        }
    });

    match dispatcher.run(cases, args.trials, writer, cancellation).await {
        Ok(summary) => {
            output::print_summary(&summary, args.format);
            Ok(summary.exit_code())
        }
        Err(e) => {
            eprintln!("dispatcher run failed: {e}");
            Ok(exit_codes::DISPATCHER_ERROR)
        }
    }
}

fn load_config(custom: Option<&std::path::Path>) -> Result<Config> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = custom {
        loader = loader.with_file(path);
    }
    loader.load().context("failed to load configuration")
}

fn build_resolver(config: &Config) -> TargetResolver {
    let targets = config
        .targets
        .iter()
        .map(|(name, target)| (name.clone(), TargetDescriptor::from(target)))
        .collect();
    TargetResolver::new(targets)
}

/// Resolves a named target to its provider against the run's loaded config,
/// for a code-judge evaluator that calls back into an alternate target.
struct ConfigTargetResolver {
    factory: ProviderFactory,
    resolver: TargetResolver,
}

impl TargetProviderResolver for ConfigTargetResolver {
    fn resolve(&self, name: &str) -> Result<Arc<dyn Provider>, String> {
        let resolved = self.resolver.resolve(name).map_err(|e| e.to_string())?;
        build_provider(&self.factory, name, &resolved).map_err(|e| e.to_string())
    }
}

fn build_provider(factory: &ProviderFactory, name: &str, resolved: &ResolvedTarget) -> Result<Arc<dyn Provider>> {
    let provider_config = ProviderConfig {
        kind: resolved.kind.clone(),
        base_url: resolved.config.get("base_url").and_then(|v| v.as_str()).map(String::from),
        api_key_env: resolved.config.get("api_key_env").and_then(|v| v.as_str()).map(String::from),
        model: resolved.config.get("model").and_then(|v| v.as_str()).map(String::from),
        timeout_seconds: resolved.config.get("timeout_seconds").and_then(|v| v.as_u64()).unwrap_or(60),
        fixture_responses: resolved
            .config
            .get("fixture_responses")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default(),
    };
    factory
        .create_shared(name, &provider_config)
        .with_context(|| format!("failed to construct provider for target: {name}"))
}

async fn build_writer(outputs: &[PathBuf]) -> Result<Box<dyn ResultWriter>> {
    if outputs.len() == 1 {
        return build_writer_for_path(&outputs[0])
            .await
            .with_context(|| format!("failed to open output: {}", outputs[0].display()));
    }

    let mut writers = Vec::with_capacity(outputs.len());
    for path in outputs {
        writers.push(build_writer_for_path(path).await.with_context(|| format!("failed to open output: {}", path.display()))?);
    }
    Ok(Box::new(MultiplexWriter::new(writers)))
}
