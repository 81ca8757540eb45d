// src/config/validate.rs

use std::collections::HashMap;

use regex::Regex;

use crate::config::model::{CommandConfig, ConfigFile, RawConfigFile, TaskConfig};
use crate::errors::{BuildError, Result};
use crate::exec::{Codepages, TextEncoding};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::BuildError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_global_config(cfg)?;
    validate_task_names(cfg)?;
    for task in &cfg.task {
        validate_task(task)?;
    }
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(BuildError::ConfigError(
            "config must contain at least one [[task]] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.global.max_jobs == 0 {
        return Err(BuildError::ConfigError(
            "[global].max_jobs must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.global.poll_interval_ms == 0 {
        return Err(BuildError::ConfigError(
            "[global].poll_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if Codepages::from_labels(&cfg.global.ansi_codepage, &cfg.global.oem_codepage).is_none() {
        return Err(BuildError::ConfigError(format!(
            "unknown code page in [global] (ansi_codepage = '{}', oem_codepage = '{}')",
            cfg.global.ansi_codepage, cfg.global.oem_codepage
        )));
    }
    Ok(())
}

/// Names and aliases are matched case-insensitively, so they must be unique
/// that way across the whole tree.
fn validate_task_names(cfg: &RawConfigFile) -> Result<()> {
    let mut seen: HashMap<String, String> = HashMap::new();
    let mut stack: Vec<&TaskConfig> = cfg.task.iter().collect();

    while let Some(task) = stack.pop() {
        if task.name.trim().is_empty() {
            return Err(BuildError::ConfigError(
                "every task needs a non-empty `name`".to_string(),
            ));
        }
        for name in task.all_names() {
            let key = name.to_lowercase();
            if let Some(owner) = seen.insert(key, task.name.clone()) {
                return Err(BuildError::ConfigError(format!(
                    "task name '{}' of task '{}' is already used by task '{}'",
                    name, task.name, owner
                )));
            }
        }
        stack.extend(task.children.iter());
    }
    Ok(())
}

fn validate_task(task: &TaskConfig) -> Result<()> {
    if task.is_group() {
        if task.commands().next().is_some() || !task.patches.is_empty() {
            return Err(BuildError::ConfigError(format!(
                "task '{}' has children and cannot have commands or patches of its own",
                task.name
            )));
        }
        for child in &task.children {
            validate_task(child)?;
        }
        return Ok(());
    }

    for command in task.commands() {
        validate_command(task, command)?;
    }

    if task.retries == Some(0) {
        return Err(BuildError::ConfigError(format!(
            "task '{}': retries must be >= 1 (got 0)",
            task.name
        )));
    }

    if !task.patches.is_empty() && task.source_path.is_none() {
        return Err(BuildError::ConfigError(format!(
            "task '{}' has patches but no `source_path` to apply them in",
            task.name
        )));
    }

    for pattern in &task.error_patterns {
        Regex::new(pattern).map_err(|e| {
            BuildError::ConfigError(format!(
                "task '{}': invalid error pattern '{}': {}",
                task.name, pattern, e
            ))
        })?;
    }
    Ok(())
}

fn validate_command(task: &TaskConfig, command: &CommandConfig) -> Result<()> {
    if command.is_empty() {
        return Err(BuildError::ConfigError(format!(
            "task '{}' has an empty command",
            task.name
        )));
    }
    if let CommandConfig::Exec(exec) = command {
        if exec.success_codes.is_empty() {
            return Err(BuildError::ConfigError(format!(
                "task '{}': `{}` needs at least one success code",
                task.name, exec.program
            )));
        }
        if let Some(label) = &exec.encoding {
            label.parse::<TextEncoding>().map_err(|e| {
                BuildError::ConfigError(format!("task '{}': {}", task.name, e))
            })?;
        }
        if let Some(index) = exec.secret_args.iter().find(|&&i| i >= exec.args.len()) {
            return Err(BuildError::ConfigError(format!(
                "task '{}': secret_args index {} is out of range for `{}`",
                task.name, index, exec.program
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<ConfigFile> {
        let raw: RawConfigFile = toml::from_str(text)?;
        ConfigFile::try_from(raw)
    }

    #[test]
    fn empty_plan_is_rejected() {
        let err = parse("[global]\nmax_jobs = 2\n").unwrap_err();
        assert!(err.to_string().contains("at least one [[task]]"));
    }

    #[test]
    fn zero_max_jobs_is_rejected() {
        let err = parse(
            r#"
            [global]
            max_jobs = 0

            [[task]]
            name = "a"
            build = ["true"]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_jobs"));
    }

    #[test]
    fn alias_clashing_with_child_name_is_rejected() {
        let err = parse(
            r#"
            [[task]]
            name = "group"

            [[task.children]]
            name = "zlib"
            build = ["true"]

            [[task]]
            name = "other"
            aliases = ["ZLIB"]
            build = ["true"]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("already used"), "{err}");
    }

    #[test]
    fn group_with_commands_is_rejected() {
        let err = parse(
            r#"
            [[task]]
            name = "group"
            build = ["make"]

            [[task.children]]
            name = "a"
            build = ["true"]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("has children"));
    }

    #[test]
    fn bad_encoding_and_empty_command_are_rejected() {
        let bad_encoding = parse(
            r#"
            [[task]]
            name = "a"
            build = [{ program = "cl", encoding = "ebcdic" }]
            "#,
        )
        .unwrap_err();
        assert!(bad_encoding.to_string().contains("unknown encoding"));

        let empty = parse(
            r#"
            [[task]]
            name = "a"
            build = ["   "]
            "#,
        )
        .unwrap_err();
        assert!(empty.to_string().contains("empty command"));
    }

    #[test]
    fn full_task_parses() {
        let cfg = parse(
            r#"
            [global]
            prefix = "/tmp/p"
            max_jobs = 3

            [clean]
            rebuild = true

            [[task]]
            name = "zlib"
            aliases = ["z"]
            source_path = "zlib"
            fetch = ["git clone repo zlib"]
            patches = ["fix.patch"]
            build = [
                "make",
                { program = "make", args = ["install", "TOKEN=x"], secret_args = [1], success_codes = [0, 2] },
            ]
            retries = 2
            fallback = "make -j1"

            [task.clean]
            rebuild = ["zlib/build"]
            "#,
        )
        .unwrap();
        let task = &cfg.task[0];
        assert_eq!(task.all_names(), vec!["zlib", "z"]);
        assert_eq!(task.build.len(), 2);
        assert_eq!(task.build[1].display(), "make install ***");
        assert_eq!(cfg.core_config().max_jobs, 3);
        assert!(cfg.core_config().clean.contains(crate::types::CleanFlags::REBUILD));
    }
}
