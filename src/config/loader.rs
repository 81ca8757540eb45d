// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{BuildError, Result};

/// Read and deserialize a build plan without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        BuildError::ConfigError(format!("cannot read {}: {}", path.display(), e))
    })?;

    let config: RawConfigFile = toml::from_str(&contents)?;
    debug!(path = %path.display(), tasks = config.task.len(), "loaded build plan");

    Ok(config)
}

/// Read, deserialize and validate a build plan.
///
/// A relative `[global].prefix` is resolved against the directory holding
/// the file, so a plan behaves the same wherever it is launched from.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let mut raw_config = load_from_path(path)?;

    if raw_config.global.prefix.is_relative() {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            raw_config.global.prefix = dir.join(&raw_config.global.prefix);
        }
    }

    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// `buildorch.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("buildorch.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_prefix_follows_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.toml");
        fs::write(
            &path,
            "[global]\nprefix = \"out\"\n\n[[task]]\nname = \"a\"\nbuild = [\"true\"]\n",
        )
        .unwrap();

        let cfg = load_and_validate(&path).unwrap();
        assert_eq!(cfg.global.prefix, dir.path().join("out"));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = load_and_validate("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, BuildError::ConfigError(_)));
    }
}
