use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;

/// Settings for a [`Coordinator`](crate::Coordinator).
///
/// # Examples
///
/// ```
/// use arcwrap::CoordinatorConfig;
/// use std::time::Duration;
///
/// let config = CoordinatorConfig::default()
///     .binary("/opt/7zip/7zz")
///     .max_concurrent(2)
///     .timeout(Some(Duration::from_secs(600)));
/// ```
///
/// The TOML form uses the same keys, with the timeout in milliseconds:
///
/// ```toml
/// binary = "/opt/7zip/7zz"
/// max_concurrent = 2
/// timeout_ms = 600000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Path or bare name of the archiving tool, resolved elsewhere.
    ///
    /// Default: `7zz`
    pub binary: String,

    /// Upper bound on concurrently running tool processes.
    ///
    /// Default: 4
    pub max_concurrent: usize,

    /// Default per-operation timeout. Operations may override it.
    ///
    /// Default: None
    #[serde(rename = "timeout_ms", deserialize_with = "timeout_from_millis")]
    pub timeout: Option<Duration>,

    /// Trailing stderr lines kept for error reports.
    ///
    /// Default: 20
    pub stderr_tail_lines: usize,

    /// Retry an extraction once with sanitized names when it fails on
    /// member names.
    ///
    /// Default: true
    pub naming_retry: bool,

    /// Answer yes to overwrite prompts (`-y`).
    ///
    /// Default: true
    pub overwrite: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            binary: "7zz".to_owned(),
            max_concurrent: 4,
            timeout: None,
            stderr_tail_lines: 20,
            naming_retry: true,
            overwrite: true,
        }
    }
}

impl CoordinatorConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::NoWorkers);
        }
        Ok(())
    }

    #[must_use]
    pub fn binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    #[must_use]
    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn stderr_tail_lines(mut self, lines: usize) -> Self {
        self.stderr_tail_lines = lines;
        self
    }

    #[must_use]
    pub fn naming_retry(mut self, enabled: bool) -> Self {
        self.naming_retry = enabled;
        self
    }

    #[must_use]
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

fn timeout_from_millis<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
}
