//! File system paths for the exporter.

use crate::{ConfigError, ConfigResult};
use std::path::PathBuf;

/// Replay queue filename under the base directory.
const REPLAY_FILE_NAME: &str = "replay.jsonl";
/// Settings filename under the base directory.
const SETTINGS_FILE_NAME: &str = "settings.json";

/// Manages file system paths for the exporter.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for exporter files (~/.starlog)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.starlog`.
    pub fn new() -> ConfigResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| ConfigError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(".starlog"),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.starlog).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the replay queue file path (~/.starlog/replay.jsonl).
    pub fn replay_file(&self) -> PathBuf {
        self.base_dir.join(REPLAY_FILE_NAME)
    }

    /// Get the settings file path (~/.starlog/settings.json).
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join(SETTINGS_FILE_NAME)
    }

    /// Ensure the base directory exists.
    pub fn ensure_dirs(&self) -> ConfigResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new().expect("Failed to determine home directory")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn paths_with_base_dir() {
        let base = PathBuf::from("/tmp/test-starlog");
        let paths = Paths::with_base_dir(base.clone());

        assert_eq!(paths.base_dir(), &base);
        assert_eq!(paths.replay_file(), base.join("replay.jsonl"));
        assert_eq!(paths.settings_file(), base.join("settings.json"));
    }

    #[test]
    fn paths_default_under_home() {
        let paths = Paths::new().unwrap();
        let home = dirs::home_dir().unwrap();

        assert_eq!(paths.base_dir(), &home.join(".starlog"));
    }

    #[test]
    fn ensure_dirs_creates_base_directory() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("starlog");
        let paths = Paths::with_base_dir(base.clone());

        assert!(!base.exists());
        paths.ensure_dirs().unwrap();
        assert!(base.is_dir());
    }

    #[test]
    fn ensure_dirs_idempotent() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        paths.ensure_dirs().unwrap();
        paths.ensure_dirs().unwrap();

        assert!(paths.base_dir().exists());
    }
}
