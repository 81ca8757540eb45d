// src/exec/child.rs

//! One OS process: spawn, poll-and-drain, interrupt, reap.
//!
//! `run` spawns the process in a fresh process group. `join` then polls on a
//! fixed interval, draining both redirected streams through a [`LineBuffer`],
//! feeding stdin, and watching the interrupt token. A `ChildProcess` spawns at
//! most one OS process in its lifetime.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use regex::Regex;
use tokio::process::{Child, Command};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{Level, debug, error, info, trace, warn};

use crate::errors::{BuildError, Result};
use crate::exec::args::{ArgFlags, ArgList, PairStyle};
use crate::exec::line_buffer::{Codepages, LineBuffer, TextEncoding};
use crate::exec::pipe::{AsyncProcessPipe, PipeRead, PipeStream};
use crate::exec::process_group::{self, ProcessGroup};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

const STDIN_CHUNK: usize = 4 * 1024;
/// Reads per stream per poll tick, so a chatty child can't starve the
/// interrupt check.
const MAX_READS_PER_TICK: usize = 16;

/// Where one output stream of the child goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Decode into lines and log them at the given level.
    Forward(Level),
    /// Decode into lines and keep them; see [`ChildProcess::captured_stdout`].
    Capture,
    Discard,
    /// Share the parent's stream.
    Inherit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Program {
    Binary(PathBuf),
    /// A literal command line run through the platform shell.
    Shell(String),
}

/// Exit-code and interrupt policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessFlags {
    /// A code outside the success set is returned instead of failing.
    pub allow_failure: bool,
    /// Kill the whole group as soon as an interrupt is observed.
    pub terminate_on_interrupt: bool,
    /// Hold forwarded output back and only log it if the process fails.
    pub quiet_on_success: bool,
}

struct StreamSink {
    stream: PipeStream,
    mode: StreamMode,
    pipe: Option<AsyncProcessPipe>,
    lines: LineBuffer,
    /// Lines kept for capture, or for the failure dump on stderr.
    kept: Vec<String>,
    held: Vec<(Level, String)>,
}

struct Running {
    child: Child,
    group: ProcessGroup,
    stdout: StreamSink,
    stderr: StreamSink,
    stdin: Option<AsyncProcessPipe>,
    stdin_offset: usize,
}

#[derive(Default)]
struct Outcome {
    exit_code: Option<i32>,
    stdout: Vec<String>,
    stderr: Vec<String>,
}

pub struct ChildProcess {
    program: Program,
    args: ArgList,
    cwd: Option<PathBuf>,
    env: Option<BTreeMap<String, String>>,
    env_overrides: BTreeMap<String, String>,
    stdout_mode: StreamMode,
    stderr_mode: StreamMode,
    encoding: TextEncoding,
    codepages: Codepages,
    success_codes: Vec<i32>,
    error_log: Option<PathBuf>,
    error_patterns: Vec<Regex>,
    stdin_data: Option<Vec<u8>>,
    flags: ProcessFlags,
    poll_interval: Duration,

    interrupt: CancellationToken,
    escalate: AtomicBool,
    spawned: AtomicBool,
    running: Mutex<Option<Running>>,
    outcome: Mutex<Outcome>,
}

impl std::fmt::Debug for ChildProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildProcess")
            .field("program", &self.program)
            .field("cwd", &self.cwd)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl ChildProcess {
    fn with_program(program: Program) -> Self {
        Self {
            program,
            args: ArgList::new(),
            cwd: None,
            env: None,
            env_overrides: BTreeMap::new(),
            stdout_mode: StreamMode::Forward(Level::TRACE),
            stderr_mode: StreamMode::Forward(Level::DEBUG),
            encoding: TextEncoding::Utf8,
            codepages: Codepages::default(),
            success_codes: vec![0],
            error_log: None,
            error_patterns: Vec::new(),
            stdin_data: None,
            flags: ProcessFlags::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            interrupt: CancellationToken::new(),
            escalate: AtomicBool::new(false),
            spawned: AtomicBool::new(false),
            running: Mutex::new(None),
            outcome: Mutex::new(Outcome::default()),
        }
    }

    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self::with_program(Program::Binary(binary.into()))
    }

    /// Run a literal command line through `sh -c` (`cmd /C` on Windows).
    pub fn shell(command_line: impl Into<String>) -> Self {
        Self::with_program(Program::Shell(command_line.into()))
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value, ArgFlags::default());
        self
    }

    pub fn arg_with(mut self, value: impl Into<String>, flags: ArgFlags) -> Self {
        self.args.push(value, flags);
        self
    }

    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for v in values {
            self.args.push(v, ArgFlags::default());
        }
        self
    }

    pub fn arg_pair(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        style: PairStyle,
        flags: ArgFlags,
    ) -> Self {
        self.args.push_pair(key, value, style, flags);
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Replace the inherited environment with a snapshot.
    pub fn env(mut self, snapshot: BTreeMap<String, String>) -> Self {
        self.env = Some(snapshot);
        self
    }

    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_overrides.insert(key.into(), value.into());
        self
    }

    pub fn stdout(mut self, mode: StreamMode) -> Self {
        self.stdout_mode = mode;
        self
    }

    pub fn stderr(mut self, mode: StreamMode) -> Self {
        self.stderr_mode = mode;
        self
    }

    pub fn encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn codepages(mut self, codepages: Codepages) -> Self {
        self.codepages = codepages;
        self
    }

    pub fn success_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.success_codes = codes.into_iter().collect();
        self
    }

    /// A log file the tool writes on its own; dumped when the process fails.
    pub fn error_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.error_log = Some(path.into());
        self
    }

    /// Output lines matching this pattern are logged as warnings, and a
    /// successful run that produced one is reported.
    pub fn error_pattern(mut self, pattern: Regex) -> Self {
        self.error_patterns.push(pattern);
        self
    }

    pub fn stdin_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin_data = Some(data.into());
        self
    }

    pub fn flags(mut self, flags: ProcessFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn allow_failure(mut self, allow: bool) -> Self {
        self.flags.allow_failure = allow;
        self
    }

    pub fn terminate_on_interrupt(mut self, terminate: bool) -> Self {
        self.flags.terminate_on_interrupt = terminate;
        self
    }

    pub fn quiet_on_success(mut self, quiet: bool) -> Self {
        self.flags.quiet_on_success = quiet;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Tie this process's interrupt flag to an outer token (task or run).
    pub fn cancel_on(mut self, parent: &CancellationToken) -> Self {
        self.interrupt = parent.child_token();
        self
    }

    /// Short name for log fields.
    pub fn name(&self) -> String {
        match &self.program {
            Program::Binary(path) => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            Program::Shell(line) => line.split_whitespace().next().unwrap_or("sh").to_string(),
        }
    }

    /// Command line as it should appear in logs at the current verbosity.
    pub fn command_line(&self) -> String {
        let head = match &self.program {
            Program::Binary(path) => path.display().to_string(),
            Program::Shell(line) => line.clone(),
        };
        if self.args.is_empty() {
            head
        } else {
            format!("{head} {}", self.args.render(LevelFilter::current()))
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_cancelled()
    }

    /// Request the process to stop. Safe from any thread; a second call
    /// escalates to killing the whole process group.
    pub fn interrupt(&self) {
        if self.interrupt.is_cancelled() {
            self.escalate.store(true, Ordering::SeqCst);
        }
        self.interrupt.cancel();
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.lock_outcome().exit_code
    }

    pub fn captured_stdout(&self) -> String {
        self.lock_outcome().stdout.join("\n")
    }

    pub fn captured_stderr(&self) -> String {
        self.lock_outcome().stderr.join("\n")
    }

    fn lock_outcome(&self) -> std::sync::MutexGuard<'_, Outcome> {
        self.outcome.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn build_command(&self) -> Command {
        let mut cmd = match &self.program {
            Program::Binary(path) => {
                let mut c = Command::new(path);
                c.args(self.args.values());
                c
            }
            Program::Shell(line) => {
                let full = if self.args.is_empty() {
                    line.clone()
                } else {
                    format!("{line} {}", self.args.shell_words())
                };
                if cfg!(windows) {
                    let mut c = Command::new("cmd");
                    c.arg("/C").arg(full);
                    c
                } else {
                    let mut c = Command::new("sh");
                    c.arg("-c").arg(full);
                    c
                }
            }
        };

        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        if let Some(snapshot) = &self.env {
            cmd.env_clear().envs(snapshot);
        }
        cmd.envs(&self.env_overrides);
        cmd.kill_on_drop(true);
        process_group::isolate(&mut cmd);
        cmd
    }

    fn sink(&self, stream: PipeStream, mode: StreamMode) -> (StreamSink, Stdio) {
        let (pipe, stdio) = match mode {
            StreamMode::Forward(_) | StreamMode::Capture => {
                let (pipe, stdio) = AsyncProcessPipe::open(stream);
                (Some(pipe), stdio)
            }
            StreamMode::Discard => (None, Stdio::null()),
            StreamMode::Inherit => (None, Stdio::inherit()),
        };
        let sink = StreamSink {
            stream,
            mode,
            pipe,
            lines: LineBuffer::with_codepages(self.encoding, self.codepages),
            kept: Vec::new(),
            held: Vec::new(),
        };
        (sink, stdio)
    }

    /// Spawn the OS process. Fails if this value already spawned one.
    pub fn run(&self) -> Result<()> {
        if self.spawned.swap(true, Ordering::SeqCst) {
            return Err(BuildError::ConfigError(format!(
                "process '{}' was already started",
                self.name()
            )));
        }
        if self.interrupt.is_cancelled() {
            return Err(BuildError::Interrupted);
        }

        let mut cmd = self.build_command();
        let (mut stdout, stdout_stdio) = self.sink(PipeStream::Stdout, self.stdout_mode);
        let (mut stderr, stderr_stdio) = self.sink(PipeStream::Stderr, self.stderr_mode);
        cmd.stdout(stdout_stdio).stderr(stderr_stdio);

        let mut stdin = None;
        if self.stdin_data.is_some() {
            let (pipe, stdio) = AsyncProcessPipe::open(PipeStream::Stdin);
            cmd.stdin(stdio);
            stdin = Some(pipe);
        } else {
            cmd.stdin(Stdio::null());
        }

        debug!(
            process = %self.name(),
            cwd = ?self.cwd,
            "running {}",
            self.command_line()
        );

        let mut child = cmd.spawn().map_err(|e| {
            BuildError::Other(anyhow::anyhow!(
                "failed to start '{}': {e}",
                self.command_line()
            ))
        })?;

        if let Some(pipe) = stdout.pipe.as_mut() {
            pipe.attach_reader(child.stdout.take());
        }
        if let Some(pipe) = stderr.pipe.as_mut() {
            pipe.attach_reader(child.stderr.take());
        }
        if let Some(pipe) = stdin.as_mut() {
            pipe.attach_writer(child.stdin.take());
        }

        let group = ProcessGroup::of(&child);
        trace!(process = %self.name(), pgid = ?group.leader(), "process spawned");

        let mut slot = self.running.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Running {
            child,
            group,
            stdout,
            stderr,
            stdin,
            stdin_offset: 0,
        });
        Ok(())
    }

    /// Poll until the process exits (or is interrupted and stopped), then
    /// apply the exit-code policy. Returns the exit code.
    pub async fn join(&self) -> Result<i32> {
        let taken = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(mut running) = taken else {
            return Err(BuildError::ConfigError(format!(
                "process '{}' is not running",
                self.name()
            )));
        };

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut interrupted = false;
        let mut killed = false;
        let mut saw_error_output = false;

        let status: ExitStatus = loop {
            saw_error_output |= self.drain_streams(&mut running, false).await?;
            self.feed_stdin(&mut running).await?;

            if self.interrupt.is_cancelled() {
                if !interrupted {
                    interrupted = true;
                    debug!(process = %self.name(), "interrupting process group");
                    if let Err(e) = running.group.interrupt() {
                        warn!(process = %self.name(), error = %e, "failed to signal process group");
                    }
                }
                let escalate = self.flags.terminate_on_interrupt
                    || self.escalate.load(Ordering::SeqCst)
                    || cfg!(not(unix));
                if escalate && !killed {
                    killed = true;
                    debug!(process = %self.name(), "terminating process group");
                    running.group.terminate(&mut running.child)?;
                }
            }

            if let Some(status) = running.child.try_wait()? {
                break status;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.interrupt.cancelled(), if !interrupted => {}
            }
        };

        // Descendants that ignore SIGINT can outlive the group leader.
        if interrupted && !killed {
            if let Err(e) = running.group.terminate(&mut running.child) {
                debug!(process = %self.name(), error = %e, "failed to kill leftover group members");
            }
        }

        // The process is gone; whatever it wrote is already in the pipes.
        saw_error_output |= self.drain_streams(&mut running, true).await?;

        let exit_code = status.code();
        self.record_outcome(&running, exit_code);

        if interrupted {
            debug!(process = %self.name(), ?exit_code, "process stopped after interrupt");
            return Err(BuildError::Interrupted);
        }

        let code = exit_code.unwrap_or(-1);
        if exit_code.is_some_and(|c| self.success_codes.contains(&c)) {
            if saw_error_output && !self.flags.quiet_on_success {
                warn!(
                    process = %self.name(),
                    "{} succeeded, but its output contained errors",
                    self.command_line()
                );
            }
            trace!(process = %self.name(), exit_code = code, "process finished");
            return Ok(code);
        }

        if self.flags.allow_failure {
            debug!(
                process = %self.name(),
                ?exit_code,
                "process failed, but failure is allowed"
            );
            return Ok(code);
        }

        self.report_failure(&mut running, exit_code);
        Err(BuildError::ToolFailed {
            command: self.command_line(),
            exit_code,
            stderr: running.stderr.kept.join("\n"),
        })
    }

    /// Read every open pipe and dispatch the decoded lines. With `last`, read
    /// until the pipes close (or stop producing) and flush partial lines.
    async fn drain_streams(&self, running: &mut Running, last: bool) -> Result<bool> {
        let mut saw_error = false;
        for sink in [&mut running.stdout, &mut running.stderr] {
            let Some(pipe) = sink.pipe.as_mut() else {
                continue;
            };

            let mut reads = 0;
            while last || reads < MAX_READS_PER_TICK {
                reads += 1;
                match pipe.read().await? {
                    PipeRead::Data(bytes) => sink.lines.append(&bytes),
                    PipeRead::Pending => break,
                    PipeRead::Closed => break,
                }
            }
            if last {
                pipe.close();
            }

            let lines: Vec<String> = sink.lines.next_lines(last).collect();
            for line in lines {
                saw_error |= self.dispatch_line(sink, line);
            }
        }
        Ok(saw_error)
    }

    fn dispatch_line(&self, sink: &mut StreamSink, line: String) -> bool {
        let is_error = self.error_patterns.iter().any(|re| re.is_match(&line));

        match sink.mode {
            StreamMode::Forward(level) => {
                let level = if is_error { Level::WARN } else { level };
                if self.flags.quiet_on_success {
                    sink.held.push((level, line.clone()));
                } else {
                    log_line(level, &self.name(), sink.stream, &line);
                }
                if sink.stream == PipeStream::Stderr {
                    sink.kept.push(line);
                }
            }
            StreamMode::Capture => sink.kept.push(line),
            StreamMode::Discard | StreamMode::Inherit => {}
        }
        is_error
    }

    async fn feed_stdin(&self, running: &mut Running) -> Result<()> {
        let (Some(pipe), Some(data)) = (running.stdin.as_mut(), self.stdin_data.as_ref()) else {
            return Ok(());
        };
        if pipe.is_closed() {
            return Ok(());
        }

        let end = (running.stdin_offset + STDIN_CHUNK).min(data.len());
        let written = pipe.write(&data[running.stdin_offset..end]).await?;
        running.stdin_offset += written;
        if running.stdin_offset >= data.len() {
            pipe.close();
        }
        Ok(())
    }

    fn record_outcome(&self, running: &Running, exit_code: Option<i32>) {
        let mut outcome = self.lock_outcome();
        outcome.exit_code = exit_code;
        if running.stdout.mode == StreamMode::Capture {
            outcome.stdout = running.stdout.kept.clone();
        }
        outcome.stderr = running.stderr.kept.clone();
    }

    fn report_failure(&self, running: &mut Running, exit_code: Option<i32>) {
        let name = self.name();

        for sink in [&mut running.stdout, &mut running.stderr] {
            for (level, line) in sink.held.drain(..) {
                log_line(level, &name, sink.stream, &line);
            }
        }

        if let Some(path) = &self.error_log {
            dump_error_log(&name, path);
        }

        // Forwarded stderr has been logged already at its own level; repeat it
        // at error level so it is visible without verbose logging.
        for line in &running.stderr.kept {
            error!(process = %name, "{line}");
        }

        error!(
            process = %name,
            ?exit_code,
            cwd = ?self.cwd,
            "command failed: {}",
            self.command_line()
        );
    }
}

fn dump_error_log(name: &str, path: &Path) {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            error!(process = %name, "content of {}:", path.display());
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                error!(process = %name, "{line}");
            }
        }
        Err(e) => {
            debug!(process = %name, error = %e, "no error log at {}", path.display());
        }
    }
}

fn log_line(level: Level, process: &str, stream: PipeStream, line: &str) {
    let stream = match stream {
        PipeStream::Stdout => "stdout",
        PipeStream::Stderr => "stderr",
        PipeStream::Stdin => "stdin",
    };
    match level {
        Level::ERROR => error!(process, stream, "{line}"),
        Level::WARN => warn!(process, stream, "{line}"),
        Level::INFO => info!(process, stream, "{line}"),
        Level::DEBUG => debug!(process, stream, "{line}"),
        _ => trace!(process, stream, "{line}"),
    }
}
