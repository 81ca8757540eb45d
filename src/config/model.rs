// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::CoreConfig;
use crate::exec::Codepages;
use crate::types::{CleanFlags, PhaseSwitches};

/// Build plan as read from a TOML file.
///
/// ```toml
/// [global]
/// prefix = "build"
/// max_jobs = 4
///
/// [phases]
/// fetch = true
/// build = true
///
/// [clean]
/// rebuild = true
///
/// [[task]]
/// name = "zlib"
/// fetch = ["git clone https://github.com/madler/zlib.git zlib"]
/// build = ["make -C zlib"]
/// ```
///
/// Tasks run in declaration order. A task with `children` is a parallel
/// group.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub global: GlobalSection,

    #[serde(default)]
    pub phases: PhasesSection,

    #[serde(default)]
    pub clean: CleanSection,

    #[serde(default)]
    pub task: Vec<TaskConfig>,
}

/// Validated build plan. Construct with `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub global: GlobalSection,
    pub phases: PhasesSection,
    pub clean: CleanSection,
    pub task: Vec<TaskConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            global: raw.global,
            phases: raw.phases,
            clean: raw.clean,
            task: raw.task,
        }
    }

    /// The read-only view the engine needs.
    pub fn core_config(&self) -> CoreConfig {
        let codepages =
            Codepages::from_labels(&self.global.ansi_codepage, &self.global.oem_codepage)
                .unwrap_or_default();
        CoreConfig {
            phases: self.phases.switches(),
            clean: self.clean.flags(),
            max_jobs: self.global.max_jobs,
            poll_interval: Duration::from_millis(self.global.poll_interval_ms),
            codepages,
            prefix: self.global.prefix.clone(),
        }
    }
}

/// `[global]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalSection {
    /// Base directory for relative paths in tasks.
    #[serde(default = "default_prefix")]
    pub prefix: PathBuf,

    /// Capacity of the worker pool used for `pooled` commands.
    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,

    /// How often a running process is polled.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_codepage")]
    pub ansi_codepage: String,

    #[serde(default = "default_codepage")]
    pub oem_codepage: String,
}

fn default_prefix() -> PathBuf {
    PathBuf::from(".")
}

fn default_max_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_codepage() -> String {
    "windows-1252".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for GlobalSection {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            max_jobs: default_max_jobs(),
            poll_interval_ms: default_poll_interval_ms(),
            ansi_codepage: default_codepage(),
            oem_codepage: default_codepage(),
        }
    }
}

/// `[phases]` section: global `run_clean` / `run_fetch` / `run_build`.
#[derive(Debug, Clone, Deserialize)]
pub struct PhasesSection {
    #[serde(default = "default_true")]
    pub clean: bool,
    #[serde(default = "default_true")]
    pub fetch: bool,
    #[serde(default = "default_true")]
    pub build: bool,
}

impl Default for PhasesSection {
    fn default() -> Self {
        Self {
            clean: true,
            fetch: true,
            build: true,
        }
    }
}

impl PhasesSection {
    pub fn switches(&self) -> PhaseSwitches {
        PhaseSwitches {
            clean: self.clean,
            fetch: self.fetch,
            build: self.build,
        }
    }
}

/// `[clean]` section. `new` ("start from scratch") implies every flag.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CleanSection {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub redownload: bool,
    #[serde(default)]
    pub reextract: bool,
    #[serde(default)]
    pub reconfigure: bool,
    #[serde(default)]
    pub rebuild: bool,
    #[serde(default)]
    pub reclone: bool,
}

impl CleanSection {
    pub fn flags(&self) -> CleanFlags {
        let mut flags = CleanFlags::NONE;
        let sources = [
            (self.new, CleanFlags::ALL),
            (self.redownload, CleanFlags::REDOWNLOAD),
            (self.reextract, CleanFlags::REEXTRACT),
            (self.reconfigure, CleanFlags::RECONFIGURE),
            (self.rebuild, CleanFlags::REBUILD),
            (self.reclone, CleanFlags::RECLONE),
        ];
        for (set, flag) in sources {
            if set {
                flags |= flag;
            }
        }
        flags
    }
}

/// One `[[task]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    pub name: String,

    #[serde(default)]
    pub aliases: Vec<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Source directory; when set, patches are applied after fetching.
    #[serde(default)]
    pub source_path: Option<PathBuf>,

    /// Working directory for this task's commands (default: the prefix).
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    #[serde(default)]
    pub fetch: Vec<CommandConfig>,

    /// Artifact created by `fetch`; removed again if fetching fails.
    #[serde(default)]
    pub fetch_output: Option<PathBuf>,

    #[serde(default)]
    pub patches: Vec<PathBuf>,

    #[serde(default)]
    pub build: Vec<CommandConfig>,

    /// Independent commands run through the worker pool after `build`.
    #[serde(default)]
    pub pooled: Vec<CommandConfig>,

    /// Commands handed to the background queue after the build phase.
    #[serde(default)]
    pub deferred: Vec<CommandConfig>,

    /// Attempts per build command.
    #[serde(default)]
    pub retries: Option<u32>,

    /// Run once for a build command that failed every attempt.
    #[serde(default)]
    pub fallback: Option<CommandConfig>,

    /// Output lines matching any of these regexes are treated as errors.
    #[serde(default)]
    pub error_patterns: Vec<String>,

    #[serde(default)]
    pub clean: TaskCleanPaths,

    /// Sub-tasks run in parallel; a task with children has no commands.
    #[serde(default)]
    pub children: Vec<TaskConfig>,
}

impl TaskConfig {
    /// An enabled task with nothing to do yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            enabled: true,
            source_path: None,
            cwd: None,
            fetch: Vec::new(),
            fetch_output: None,
            patches: Vec::new(),
            build: Vec::new(),
            pooled: Vec::new(),
            deferred: Vec::new(),
            retries: None,
            fallback: None,
            error_patterns: Vec::new(),
            clean: TaskCleanPaths::default(),
            children: Vec::new(),
        }
    }

    pub fn is_group(&self) -> bool {
        !self.children.is_empty()
    }

    /// Primary name followed by aliases.
    pub fn all_names(&self) -> Vec<String> {
        std::iter::once(self.name.clone())
            .chain(self.aliases.iter().cloned())
            .collect()
    }

    pub fn commands(&self) -> impl Iterator<Item = &CommandConfig> {
        self.fetch
            .iter()
            .chain(&self.build)
            .chain(&self.pooled)
            .chain(&self.deferred)
            .chain(&self.fallback)
    }
}

/// Paths a task deletes for each clean flag. Flags without paths are
/// ignored by that task.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TaskCleanPaths {
    #[serde(default)]
    pub redownload: Vec<PathBuf>,
    #[serde(default)]
    pub reextract: Vec<PathBuf>,
    #[serde(default)]
    pub reconfigure: Vec<PathBuf>,
    #[serde(default)]
    pub rebuild: Vec<PathBuf>,
    #[serde(default)]
    pub reclone: Vec<PathBuf>,
}

impl TaskCleanPaths {
    pub fn paths_for(&self, flag: CleanFlags) -> &[PathBuf] {
        match flag {
            CleanFlags::REDOWNLOAD => &self.redownload,
            CleanFlags::REEXTRACT => &self.reextract,
            CleanFlags::RECONFIGURE => &self.reconfigure,
            CleanFlags::REBUILD => &self.rebuild,
            CleanFlags::RECLONE => &self.reclone,
            _ => &[],
        }
    }
}

/// A command: either a shell line or a program with arguments.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CommandConfig {
    Shell(String),
    Exec(ExecCommand),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecCommand {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Indices into `args` that must never be logged.
    #[serde(default)]
    pub secret_args: Vec<usize>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub cwd: Option<PathBuf>,

    #[serde(default = "default_success_codes")]
    pub success_codes: Vec<i32>,

    #[serde(default)]
    pub allow_failure: bool,

    #[serde(default)]
    pub terminate_on_interrupt: bool,

    /// Output encoding: utf8, utf16, ansi, oem or unknown.
    #[serde(default)]
    pub encoding: Option<String>,
}

fn default_success_codes() -> Vec<i32> {
    vec![0]
}

impl CommandConfig {
    pub fn display(&self) -> String {
        match self {
            CommandConfig::Shell(line) => line.clone(),
            CommandConfig::Exec(exec) => {
                let mut parts = vec![exec.program.clone()];
                parts.extend(exec.args.iter().enumerate().map(|(i, a)| {
                    if exec.secret_args.contains(&i) {
                        "***".to_string()
                    } else {
                        a.clone()
                    }
                }));
                parts.join(" ")
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CommandConfig::Shell(line) => line.trim().is_empty(),
            CommandConfig::Exec(exec) => exec.program.trim().is_empty(),
        }
    }
}
