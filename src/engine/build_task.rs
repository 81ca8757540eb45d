// src/engine/build_task.rs

//! The leaf task built from a `[[task]]` entry: clean, fetch, patch, build.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tracing::{Instrument, debug, info};

use crate::config::{CommandConfig, TaskConfig};
use crate::engine::context::RunContext;
use crate::engine::parallel::ParallelTaskGroup;
use crate::engine::pool::WorkerPool;
use crate::engine::task::{Task, TaskCore, TaskState};
use crate::errors::{BuildError, Result};
use crate::exec::{ArgFlags, ChildProcess, Codepages, TextEncoding};
use crate::tools::{
    ArtifactGuard, BoxFuture, CommandSequenceTool, ProcessRunningTool, RemovePathsTool,
    RetryPolicy, RetryingTool, Tool,
};

/// Build a task tree from config. Entries with children become parallel
/// groups.
pub fn task_from_config(cfg: &TaskConfig) -> Result<Arc<dyn Task>> {
    if cfg.is_group() {
        let children = cfg
            .children
            .iter()
            .map(task_from_config)
            .collect::<Result<Vec<_>>>()?;
        return Ok(Arc::new(ParallelTaskGroup::new(cfg.all_names(), children)));
    }
    Ok(Arc::new(BuildTask::from_config(cfg)?))
}

/// Everything needed to start one configured command, any number of times.
#[derive(Debug, Clone)]
struct CommandTemplate {
    command: CommandConfig,
    cwd: PathBuf,
    encoding: TextEncoding,
    codepages: Codepages,
    poll_interval: Duration,
    error_patterns: Vec<Regex>,
}

impl CommandTemplate {
    fn instantiate(&self) -> ChildProcess {
        let mut process = match &self.command {
            CommandConfig::Shell(line) => ChildProcess::shell(line.clone()).cwd(&self.cwd),
            CommandConfig::Exec(exec) => {
                let mut p = ChildProcess::new(&exec.program);
                for (i, arg) in exec.args.iter().enumerate() {
                    let flags = if exec.secret_args.contains(&i) {
                        ArgFlags::secret()
                    } else {
                        ArgFlags::default()
                    };
                    p = p.arg_with(arg.clone(), flags);
                }
                for (key, value) in &exec.env {
                    p = p.env_var(key.clone(), value.clone());
                }
                let cwd = match &exec.cwd {
                    Some(dir) => self.cwd.join(dir),
                    None => self.cwd.clone(),
                };
                p.cwd(cwd)
                    .success_codes(exec.success_codes.iter().copied())
                    .allow_failure(exec.allow_failure)
                    .terminate_on_interrupt(exec.terminate_on_interrupt)
            }
        };
        process = process
            .encoding(self.encoding)
            .codepages(self.codepages)
            .poll_interval(self.poll_interval);
        for pattern in &self.error_patterns {
            process = process.error_pattern(pattern.clone());
        }
        process
    }
}

#[derive(Debug)]
pub struct BuildTask {
    core: TaskCore,
    config: TaskConfig,
    error_patterns: Vec<Regex>,
}

impl BuildTask {
    pub fn from_config(cfg: &TaskConfig) -> Result<Self> {
        let error_patterns = cfg
            .error_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    BuildError::ConfigError(format!(
                        "task '{}': invalid error pattern '{}': {}",
                        cfg.name, p, e
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            core: TaskCore::new(cfg.all_names(), cfg.enabled),
            config: cfg.clone(),
            error_patterns,
        })
    }

    fn resolve(&self, ctx: &RunContext, path: &Path) -> PathBuf {
        ctx.prefix().join(path)
    }

    fn work_dir(&self, ctx: &RunContext) -> PathBuf {
        match &self.config.cwd {
            Some(dir) => self.resolve(ctx, dir),
            None => ctx.prefix().to_path_buf(),
        }
    }

    fn template(&self, ctx: &RunContext, command: &CommandConfig) -> Result<CommandTemplate> {
        let encoding = match command {
            CommandConfig::Exec(exec) => match &exec.encoding {
                Some(label) => label.parse::<TextEncoding>().map_err(|e| {
                    BuildError::ConfigError(format!("task '{}': {}", self.name(), e))
                })?,
                None => TextEncoding::Utf8,
            },
            CommandConfig::Shell(_) => TextEncoding::Utf8,
        };
        Ok(CommandTemplate {
            command: command.clone(),
            cwd: self.work_dir(ctx),
            encoding,
            codepages: ctx.config().codepages,
            poll_interval: ctx.config().poll_interval,
            error_patterns: self.error_patterns.clone(),
        })
    }

    fn processes(
        &self,
        ctx: &RunContext,
        commands: &[CommandConfig],
    ) -> Result<Vec<ChildProcess>> {
        commands
            .iter()
            .map(|c| Ok(self.template(ctx, c)?.instantiate()))
            .collect()
    }

    async fn clean(&self, ctx: &RunContext) -> Result<()> {
        let flags = ctx.clean_flags();
        if !ctx.phases().clean || flags.is_empty() {
            return Ok(());
        }

        let paths: Vec<PathBuf> = flags
            .iter()
            .flat_map(|flag| self.config.clean.paths_for(flag))
            .map(|p| self.resolve(ctx, p))
            .collect();
        if paths.is_empty() {
            debug!(?flags, "nothing to clean");
            return Ok(());
        }

        self.core.enter(TaskState::Cleaning)?;
        info!(?flags, paths = paths.len(), "cleaning");
        let tool = RemovePathsTool::new(format!("{}: clean", self.name()), paths);
        self.core.run_tool(Arc::new(tool)).await?;
        Ok(())
    }

    async fn fetch_sources(&self, ctx: &RunContext) -> Result<()> {
        if !ctx.phases().fetch || self.config.fetch.is_empty() {
            return Ok(());
        }

        self.core.enter(TaskState::Fetching)?;
        info!("fetching");

        let guard = self
            .config
            .fetch_output
            .as_ref()
            .map(|p| ArtifactGuard::new(self.resolve(ctx, p)));

        let mut steps = self.processes(ctx, &self.config.fetch)?;
        let tool: Arc<dyn Tool> = if steps.len() == 1 {
            let mut tool = ProcessRunningTool::new(steps.remove(0));
            if let Some(guard) = &guard {
                tool = tool.producing(guard.path());
            }
            Arc::new(tool)
        } else {
            Arc::new(CommandSequenceTool::new(format!("{}: fetch", self.name()), steps))
        };
        let output = self.core.run_tool(tool).await?;

        if let Some(guard) = guard {
            let path = guard.commit();
            debug!(?output, "fetched {}", path.display());
        }
        Ok(())
    }

    async fn apply_patches(&self, ctx: &RunContext) -> Result<()> {
        let Some(source) = &self.config.source_path else {
            return Ok(());
        };
        if !ctx.phases().fetch || self.config.patches.is_empty() {
            return Ok(());
        }

        self.core.enter(TaskState::Patching)?;
        let source = self.resolve(ctx, source);
        let steps = self
            .config
            .patches
            .iter()
            .map(|patch| {
                let file = self.resolve(ctx, patch);
                info!("applying {}", file.display());
                // `--forward` exits with 1 for an already applied patch.
                ChildProcess::new("patch")
                    .args(["-p1", "--forward", "--batch", "-i"])
                    .arg(file.display().to_string())
                    .cwd(&source)
                    .success_codes([0, 1])
                    .poll_interval(ctx.config().poll_interval)
            })
            .collect();

        let tool = CommandSequenceTool::new(format!("{}: patch", self.name()), steps);
        self.core.run_tool(Arc::new(tool)).await?;
        Ok(())
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        let attempts = self.config.retries.unwrap_or(1).max(1);
        if attempts > 1 || self.config.fallback.is_some() {
            Some(RetryPolicy { attempts })
        } else {
            None
        }
    }

    async fn build_steps(&self, ctx: &RunContext) -> Result<()> {
        if self.config.build.is_empty() {
            return Ok(());
        }
        info!("building");

        let Some(policy) = self.retry_policy() else {
            let steps = self.processes(ctx, &self.config.build)?;
            let tool = CommandSequenceTool::new(format!("{}: build", self.name()), steps);
            self.core.run_tool(Arc::new(tool)).await?;
            return Ok(());
        };

        let fallback = self
            .config
            .fallback
            .as_ref()
            .map(|c| self.template(ctx, c))
            .transpose()?;

        for command in &self.config.build {
            let template = self.template(ctx, command)?;
            let mut tool = RetryingTool::new(
                format!("{}: {}", self.name(), command.display()),
                policy,
                move || template.instantiate(),
            );
            if let Some(fallback) = fallback.clone() {
                tool = tool.with_fallback(move || fallback.instantiate());
            }
            let tool: Arc<dyn Tool> = Arc::new(tool);
            self.core.run_tool(tool).await?;
        }
        Ok(())
    }

    async fn run_pooled(&self, ctx: &RunContext) -> Result<()> {
        if self.config.pooled.is_empty() {
            return Ok(());
        }

        let mut pool = WorkerPool::new(ctx.config().max_jobs);
        debug!(
            units = self.config.pooled.len(),
            capacity = pool.capacity(),
            "running pooled commands"
        );
        let processes = self
            .config
            .pooled
            .iter()
            .map(|command| {
                self.template(ctx, command)
                    .map(|t| t.instantiate().cancel_on(self.core.token()))
            })
            .collect::<Result<Vec<_>>>()?;

        for process in processes {
            if self.core.interrupted() {
                break;
            }
            pool.submit(async move {
                process.run()?;
                process.join().await.map(|_| ())
            })
            .await;
        }
        // Submitted work is always joined, even after an interrupt.
        pool.join().await?;
        self.core.check_interrupted()
    }

    fn queue_deferred(&self, ctx: &RunContext) -> Result<()> {
        for command in &self.config.deferred {
            let process = self
                .template(ctx, command)?
                .instantiate()
                .cancel_on(ctx.abort_token());
            let job = format!("{}: {}", self.name(), command.display());
            let span = self.core.span().clone();
            ctx.background().enqueue(
                job,
                async move {
                    process.run()?;
                    process.join().await.map(|_| ())
                }
                .instrument(span),
            )?;
        }
        Ok(())
    }
}

impl Task for BuildTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn fetch<'a>(&'a self, ctx: &'a RunContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(
            async move {
                if !self.enabled() {
                    debug!("disabled, skipping");
                    return Ok(());
                }
                self.clean(ctx).await?;
                self.fetch_sources(ctx).await?;
                self.apply_patches(ctx).await
            }
            .instrument(self.core.span().clone()),
        )
    }

    fn build_and_install<'a>(&'a self, ctx: &'a RunContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(
            async move {
                if !self.enabled() {
                    return Ok(());
                }
                if ctx.phases().build {
                    self.core.enter(TaskState::Building)?;
                    self.build_steps(ctx).await?;
                    self.run_pooled(ctx).await?;
                    self.queue_deferred(ctx)?;
                }
                self.core.finish();
                info!("done");
                Ok(())
            }
            .instrument(self.core.span().clone()),
        )
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::RawConfigFile;
    use crate::engine::context::CoreConfig;
    use crate::types::CleanFlags;

    fn task(toml_text: &str) -> TaskConfig {
        let raw: RawConfigFile = toml::from_str(toml_text).unwrap();
        raw.task.into_iter().next().unwrap()
    }

    fn context(prefix: &Path, clean: CleanFlags) -> RunContext {
        RunContext::new(CoreConfig {
            prefix: prefix.to_path_buf(),
            clean,
            poll_interval: Duration::from_millis(5),
            max_jobs: 2,
            ..CoreConfig::default()
        })
    }

    #[tokio::test]
    async fn phases_run_in_order_inside_the_prefix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stale"), "x").unwrap();

        let cfg = task(
            r#"
            [[task]]
            name = "demo"
            fetch = ["echo fetch >> log"]
            build = ["echo build >> log"]
            pooled = ["echo pooled >> log"]

            [task.clean]
            rebuild = ["stale"]
            "#,
        );
        let ctx = context(dir.path(), CleanFlags::REBUILD);
        let t = BuildTask::from_config(&cfg).unwrap();
        t.run(&ctx).await.unwrap();
        ctx.background().finish().await.unwrap();

        assert!(!dir.path().join("stale").exists());
        let log = std::fs::read_to_string(dir.path().join("log")).unwrap();
        assert_eq!(log, "fetch\nbuild\npooled\n");
        assert_eq!(t.core().state(), TaskState::Done);
    }

    #[tokio::test]
    async fn failed_fetch_removes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = task(
            r#"
            [[task]]
            name = "dl"
            fetch = ["echo partial > archive.tar && exit 3"]
            fetch_output = "archive.tar"
            "#,
        );
        let ctx = context(dir.path(), CleanFlags::NONE);
        let t = BuildTask::from_config(&cfg).unwrap();

        let err = t.fetch(&ctx).await.unwrap_err();
        assert!(matches!(err, BuildError::ToolFailed { exit_code: Some(3), .. }));
        assert!(!dir.path().join("archive.tar").exists());
    }

    #[tokio::test]
    async fn disabled_task_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = task(
            r#"
            [[task]]
            name = "off"
            enabled = false
            build = ["touch built"]
            "#,
        );
        let ctx = context(dir.path(), CleanFlags::ALL);
        BuildTask::from_config(&cfg).unwrap().run(&ctx).await.unwrap();
        assert!(!dir.path().join("built").exists());
    }

    #[tokio::test]
    async fn fallback_runs_after_retries_are_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = task(
            r#"
            [[task]]
            name = "flaky"
            build = ["echo try >> attempts; exit 1"]
            retries = 2
            fallback = "touch fallback"
            "#,
        );
        let ctx = context(dir.path(), CleanFlags::NONE);
        BuildTask::from_config(&cfg).unwrap().run(&ctx).await.unwrap();

        let attempts = std::fs::read_to_string(dir.path().join("attempts")).unwrap();
        assert_eq!(attempts.lines().count(), 2);
        assert!(dir.path().join("fallback").exists());
    }

    #[tokio::test]
    async fn deferred_commands_run_on_the_background_queue() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = task(
            r#"
            [[task]]
            name = "later"
            deferred = ["touch registered"]
            "#,
        );
        let ctx = context(dir.path(), CleanFlags::NONE);
        BuildTask::from_config(&cfg).unwrap().run(&ctx).await.unwrap();
        ctx.background().finish().await.unwrap();
        assert!(dir.path().join("registered").exists());
    }

    #[tokio::test]
    async fn bad_pooled_command_fails_before_any_work_starts() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = task(
            r#"
            [[task]]
            name = "pooled"
            pooled = [
                "sleep 0.2; touch late",
                { program = "true", encoding = "bogus" },
            ]
            "#,
        );
        let ctx = context(dir.path(), CleanFlags::NONE);
        let err = BuildTask::from_config(&cfg).unwrap().run(&ctx).await.unwrap_err();
        assert!(matches!(err, BuildError::ConfigError(_)), "{err}");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!dir.path().join("late").exists());
    }

    #[tokio::test]
    async fn pooled_work_is_joined_before_the_task_returns() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = task(
            r#"
            [[task]]
            name = "pooled"
            pooled = ["sleep 0.2; touch first", "exit 4", "sleep 0.2; touch third"]
            "#,
        );
        let ctx = RunContext::new(CoreConfig {
            prefix: dir.path().to_path_buf(),
            poll_interval: Duration::from_millis(5),
            max_jobs: 3,
            ..CoreConfig::default()
        });
        let err = BuildTask::from_config(&cfg).unwrap().run(&ctx).await.unwrap_err();
        assert!(matches!(err, BuildError::ToolFailed { exit_code: Some(4), .. }));
        assert!(dir.path().join("first").exists());
        assert!(dir.path().join("third").exists());
    }
}
