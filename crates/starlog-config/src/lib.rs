//! Settings, filesystem paths, and logging for the Starlog exporter.

mod error;
mod logging;
mod paths;
mod settings;

pub use error::{ConfigError, ConfigResult};
pub use logging::init_logging;
pub use paths::Paths;
pub use settings::{Settings, SettingsStore, DEFAULT_LOG_LEVEL};
