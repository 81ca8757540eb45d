// src/config/mod.rs

//! Build plan loading and validation.
//!
//! - `model.rs`: the TOML-backed data model.
//! - `loader.rs`: reading a plan from disk.
//! - `validate.rs`: name uniqueness, command sanity and global limits.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    CleanSection, CommandConfig, ConfigFile, ExecCommand, GlobalSection, PhasesSection,
    RawConfigFile, TaskCleanPaths, TaskConfig,
};
