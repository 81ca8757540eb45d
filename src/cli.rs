// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::types::{CleanFlags, PhaseSwitches};

/// Command-line arguments for `buildorch`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "buildorch",
    version,
    about = "Fetch, patch and build a tree of third-party projects.",
    long_about = None
)]
pub struct CliArgs {
    /// Tasks to run, by name or alias. Glob patterns are allowed.
    ///
    /// Default: every top-level task, in declaration order.
    #[arg(value_name = "TASK")]
    pub tasks: Vec<String>,

    /// Path to the build plan (TOML).
    #[arg(long, value_name = "PATH", default_value = "buildorch.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `BUILDORCH_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse and validate, print the plan, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// List task names and aliases, then exit.
    #[arg(long)]
    pub list: bool,

    /// Skip the clean phase.
    #[arg(long)]
    pub no_clean: bool,

    /// Skip fetching and patching.
    #[arg(long)]
    pub no_fetch: bool,

    /// Skip building.
    #[arg(long)]
    pub no_build: bool,

    /// Start from scratch: implies every clean flag below.
    #[arg(long)]
    pub new: bool,

    #[arg(long)]
    pub redownload: bool,

    #[arg(long)]
    pub reextract: bool,

    #[arg(long)]
    pub reconfigure: bool,

    #[arg(long)]
    pub rebuild: bool,

    #[arg(long)]
    pub reclone: bool,
}

impl CliArgs {
    /// Clean flags requested on the command line, to be OR-ed with the
    /// config file's.
    pub fn clean_flags(&self) -> CleanFlags {
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

    /// Turn off the phases disabled on the command line.
    pub fn apply_phase_overrides(&self, phases: &mut PhaseSwitches) {
        phases.clean &= !self.no_clean;
        phases.fetch &= !self.no_fetch;
        phases.build &= !self.no_build;
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_and_patterns_parse() {
        let args = CliArgs::try_parse_from([
            "buildorch",
            "--rebuild",
            "--reclone",
            "--no-fetch",
            "zlib",
            "qt*",
        ])
        .unwrap();
        assert_eq!(args.tasks, vec!["zlib", "qt*"]);
        assert_eq!(args.clean_flags(), CleanFlags::REBUILD | CleanFlags::RECLONE);

        let mut phases = PhaseSwitches::default();
        args.apply_phase_overrides(&mut phases);
        assert!(phases.clean && !phases.fetch && phases.build);
    }

    #[test]
    fn new_implies_everything() {
        let args = CliArgs::try_parse_from(["buildorch", "--new"]).unwrap();
        assert_eq!(args.clean_flags(), CleanFlags::ALL);
        assert_eq!(args.config, "buildorch.toml");
    }
}
