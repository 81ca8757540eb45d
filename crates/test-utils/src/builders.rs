#![allow(dead_code)]

use std::path::PathBuf;

use buildorch::config::{
    CleanSection, CommandConfig, ConfigFile, GlobalSection, PhasesSection, RawConfigFile,
    TaskConfig,
};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                global: GlobalSection {
                    max_jobs: 2,
                    poll_interval_ms: 5,
                    ..GlobalSection::default()
                },
                phases: PhasesSection::default(),
                clean: CleanSection::default(),
                task: Vec::new(),
            },
        }
    }

    pub fn with_task(mut self, task: TaskConfig) -> Self {
        self.config.task.push(task);
        self
    }

    pub fn prefix(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.global.prefix = dir.into();
        self
    }

    pub fn max_jobs(mut self, jobs: usize) -> Self {
        self.config.global.max_jobs = jobs;
        self
    }

    pub fn rebuild(mut self) -> Self {
        self.config.clean.rebuild = true;
        self
    }

    pub fn without_fetch(mut self) -> Self {
        self.config.phases.fetch = false;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            task: TaskConfig::new(name),
        }
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.task.aliases.push(alias.to_string());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.task.enabled = false;
        self
    }

    pub fn fetch(mut self, line: &str) -> Self {
        self.task.fetch.push(CommandConfig::Shell(line.to_string()));
        self
    }

    pub fn build_step(mut self, line: &str) -> Self {
        self.task.build.push(CommandConfig::Shell(line.to_string()));
        self
    }

    pub fn pooled(mut self, line: &str) -> Self {
        self.task.pooled.push(CommandConfig::Shell(line.to_string()));
        self
    }

    pub fn deferred(mut self, line: &str) -> Self {
        self.task.deferred.push(CommandConfig::Shell(line.to_string()));
        self
    }

    pub fn clean_on_rebuild(mut self, path: &str) -> Self {
        self.task.clean.rebuild.push(PathBuf::from(path));
        self
    }

    pub fn child(mut self, child: TaskConfig) -> Self {
        self.task.children.push(child);
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
