// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod tools;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::{ConfigFile, TaskConfig};
use crate::engine::{RunContext, Task, TaskRegistry, task_from_config};

/// How a run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Interrupted,
}

/// High-level entry point used by `main.rs`.
///
/// Loads the plan, applies command line overrides, builds the task tree and
/// runs the selected tasks. Ctrl-C interrupts every task; pressing it again
/// kills whatever is still running.
pub async fn run(args: CliArgs) -> Result<RunOutcome> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    if args.list {
        print_list(&cfg);
        return Ok(RunOutcome::Completed);
    }
    if args.dry_run {
        print_dry_run(&cfg, &args);
        return Ok(RunOutcome::Completed);
    }

    let registry = Arc::new(build_registry(&cfg, &args)?);
    let selected = registry.select(&args.tasks)?;
    info!(
        tasks = ?selected.iter().map(|t| t.name().to_string()).collect::<Vec<_>>(),
        "starting run"
    );

    let watcher = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("failed to listen for Ctrl+C: {e}");
                    return;
                }
                registry.interrupt_all();
            }
        })
    };

    let result = registry.run_tasks(&selected).await;
    watcher.abort();

    let outcome = match result {
        Ok(()) => {
            info!("all tasks done");
            Ok(RunOutcome::Completed)
        }
        Err(e) if e.is_interrupted() => {
            info!("bailing out");
            Ok(RunOutcome::Interrupted)
        }
        Err(e) => Err(e.into()),
    };
    logging::print_summary();
    outcome
}

/// Core configuration from the plan with command line overrides applied,
/// wrapped in a registry holding every top-level task.
pub fn build_registry(cfg: &ConfigFile, args: &CliArgs) -> Result<TaskRegistry> {
    let mut core = cfg.core_config();
    core.clean |= args.clean_flags();
    args.apply_phase_overrides(&mut core.phases);
    debug!(?core, "core configuration");

    let mut registry = TaskRegistry::new(RunContext::new(core));
    for task in &cfg.task {
        registry.add(task_from_config(task)?)?;
    }
    Ok(registry)
}

fn print_list(cfg: &ConfigFile) {
    fn walk(task: &TaskConfig, depth: usize) {
        let indent = "  ".repeat(depth);
        if task.aliases.is_empty() {
            println!("{indent}{}", task.name);
        } else {
            println!("{indent}{} ({})", task.name, task.aliases.join(", "));
        }
        for child in &task.children {
            walk(child, depth + 1);
        }
    }
    for task in &cfg.task {
        walk(task, 0);
    }
}

/// Print the plan tree with the effective switches, without running anything.
fn print_dry_run(cfg: &ConfigFile, args: &CliArgs) {
    let mut phases = cfg.phases.switches();
    args.apply_phase_overrides(&mut phases);
    let clean = cfg.clean.flags() | args.clean_flags();

    println!("buildorch dry-run");
    println!("  prefix = {}", cfg.global.prefix.display());
    println!("  max_jobs = {}", cfg.global.max_jobs);
    println!(
        "  phases: clean={} fetch={} build={}",
        phases.clean, phases.fetch, phases.build
    );
    println!("  clean = {clean:?}");
    println!();

    fn walk(task: &TaskConfig, depth: usize) {
        let indent = "  ".repeat(depth + 1);
        let kind = if task.is_group() { " [parallel]" } else { "" };
        let state = if task.enabled { "" } else { " (disabled)" };
        println!("{indent}- {}{kind}{state}", task.name);
        for (label, commands) in [
            ("fetch", &task.fetch),
            ("build", &task.build),
            ("pooled", &task.pooled),
            ("deferred", &task.deferred),
        ] {
            for command in commands {
                println!("{indent}    {label}: {}", command.display());
            }
        }
        for patch in &task.patches {
            println!("{indent}    patch: {}", patch.display());
        }
        if let Some(retries) = task.retries {
            println!("{indent}    retries: {retries}");
        }
        if let Some(fallback) = &task.fallback {
            println!("{indent}    fallback: {}", fallback.display());
        }
        for child in &task.children {
            walk(child, depth + 1);
        }
    }

    println!("tasks ({}):", cfg.task.len());
    for task in &cfg.task {
        walk(task, 0);
    }

    debug!("dry-run complete (no execution)");
}
