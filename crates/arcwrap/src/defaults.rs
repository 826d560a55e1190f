//! Process-wide default configuration.
//!
//! Lifecycle: call [`init`] at most once, early in process start-up. Every
//! later [`get`] returns that value, or [`CoordinatorConfig::default`] when
//! nothing was installed. The value cannot change after initialization.

use once_cell::sync::OnceCell;

use crate::config::CoordinatorConfig;
use crate::error::ConfigError;

static DEFAULTS: OnceCell<CoordinatorConfig> = OnceCell::new();

/// Install the process-wide defaults.
pub fn init(config: CoordinatorConfig) -> Result<(), ConfigError> {
    config.validate()?;
    DEFAULTS.set(config).map_err(|_| ConfigError::AlreadyInitialized)
}

pub fn get() -> CoordinatorConfig {
    DEFAULTS.get().cloned().unwrap_or_default()
}

pub fn is_initialized() -> bool {
    DEFAULTS.get().is_some()
}
