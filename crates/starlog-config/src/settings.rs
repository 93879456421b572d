//! Persisted exporter settings.
//!
//! Settings cover the preferences surface (per-category export toggles,
//! anonymity, batch delay) plus the lazily minted opaque uploader identity.

use crate::{ConfigResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Persisted exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Replace the caller identity with a persisted random uploader id.
    #[serde(default)]
    pub anonymous: bool,
    /// Export journal events to the collector.
    #[serde(default = "default_true")]
    pub export_journal: bool,
    /// Export discovery scan events to the collector.
    #[serde(default = "default_true")]
    pub export_discoveries: bool,
    /// Batch queued entries instead of sending on every submit.
    #[serde(default = "default_true")]
    pub batch_delay: bool,
    /// Opaque uploader identity, minted on first anonymous send.
    #[serde(default)]
    pub uploader_id: Option<String>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            anonymous: false,
            export_journal: true,
            export_discoveries: true,
            batch_delay: true,
            uploader_id: None,
        }
    }
}

impl Settings {
    /// Load settings from the settings file, falling back to defaults.
    pub fn load(paths: &Paths) -> ConfigResult<Self> {
        let settings_path = paths.settings_file();

        if settings_path.exists() {
            Self::load_from_file(&settings_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load settings from a specific file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    /// Save settings to the settings file.
    pub fn save(&self, paths: &Paths) -> ConfigResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.settings_file(), content)?;
        Ok(())
    }
}

/// Shared handle for reading and mutating persisted settings.
pub struct SettingsStore {
    paths: Paths,
    settings: Mutex<Settings>,
}

impl SettingsStore {
    /// Open the store, loading existing settings or defaults.
    pub fn open(paths: Paths) -> ConfigResult<Self> {
        let settings = Settings::load(&paths)?;
        Ok(Self {
            paths,
            settings: Mutex::new(settings),
        })
    }

    /// Get a snapshot of the current settings.
    pub fn get(&self) -> Settings {
        self.settings.lock().expect("lock poisoned").clone()
    }

    /// Apply a mutation and persist the result.
    pub fn update(&self, apply: impl FnOnce(&mut Settings)) -> ConfigResult<()> {
        let mut guard = self.settings.lock().expect("lock poisoned");
        apply(&mut guard);
        guard.save(&self.paths)
    }

    /// Get the opaque uploader identity, minting and persisting one on
    /// first use. The id must stay stable across restarts.
    pub fn uploader_id(&self) -> ConfigResult<String> {
        let mut guard = self.settings.lock().expect("lock poisoned");
        if let Some(id) = &guard.uploader_id {
            return Ok(id.clone());
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        guard.uploader_id = Some(id.clone());
        guard.save(&self.paths)?;
        info!("Minted uploader identity");
        Ok(id)
    }
}
