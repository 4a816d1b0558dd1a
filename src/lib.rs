// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod errors;
pub mod exec;
pub mod job;
pub mod logging;
pub mod logmode;
pub mod node;
pub mod protocol;
pub mod supervisor;
pub mod transport;
pub mod types;
pub mod watchdog;

use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use crate::cli::CliArgs;
use crate::config::{
    ConnectionDefaults, WorkerConfig, fingerprint, format_duration, load_worker_config,
};
use crate::exec::FunctionRegistry;
use crate::supervisor::{
    CalcNodeWorkerBuilder, ConfigurationSource, EscalationPolicy, RetryPolicy, Supervisor,
    SupervisorSettings, source_for_url,
};

/// High-level entry point used by `main.rs`. Returns the process exit code.
///
/// This wires together:
/// - the configuration source for the URL's scheme
/// - the worker builder with the built-in functions
/// - the supervisor and its poll loop
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<i32> {
    let source: Arc<dyn ConfigurationSource> = Arc::from(source_for_url(&args.configuration_url)?);

    if args.dry_run {
        dry_run(&args, source.as_ref()).await?;
        return Ok(0);
    }

    let builder = Arc::new(CalcNodeWorkerBuilder::new(FunctionRegistry::with_builtins()));
    let settings = SupervisorSettings {
        poll_interval: args.poll_interval,
        retry: RetryPolicy {
            attempts: args.startup_retries,
            sleep: args.retry_sleep,
        },
        escalation: EscalationPolicy::shutdown_after(args.failures_before_shutdown),
    };

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let mut supervisor = Supervisor::new(args.configuration_url.clone(), source, builder, settings);
    let exit = supervisor.run(interrupt).await?;
    Ok(exit.exit_code())
}

/// Fetch once, substitute, validate and print the resolved configuration.
async fn dry_run(args: &CliArgs, source: &dyn ConfigurationSource) -> Result<()> {
    let defaults = ConnectionDefaults::from_url(&args.configuration_url)?;
    let document = source.fetch(&args.configuration_url).await?;
    let config = load_worker_config(&document, &defaults)?;
    print_dry_run(&args.configuration_url, &fingerprint(&document), &config);
    Ok(())
}

fn print_dry_run(url: &str, fingerprint: &str, config: &WorkerConfig) {
    println!("calcnode dry-run");
    println!("  url = {url}");
    println!("  fingerprint = {fingerprint}");
    println!();
    println!("[node]");
    println!("  id = {}", config.node.id);
    println!("  capacity = {}", config.node.capacity);
    println!(
        "  max_job_item_execution = {}",
        format_duration(config.node.max_job_item_execution)
    );
    println!(
        "  watchdog_check_interval = {}",
        format_duration(config.node.watchdog_check_interval)
    );
    println!(
        "  timeout_grace_period = {}",
        format_duration(config.node.timeout_grace_period)
    );
    println!(
        "  statistics_interval = {}",
        format_duration(config.node.statistics_interval)
    );
    println!();
    println!("[coordinator]");
    println!("  host = {}", config.coordinator.host);
    println!("  port = {}", config.coordinator.port);
    println!("  max_frame_bytes = {}", config.coordinator.max_frame_bytes);
}
