//! Configuration for incremental backup sessions

use serde::{Deserialize, Serialize};

use crate::{BackupError, Result};

/// Default granularity: 16 MiB per returned range.
pub const DEFAULT_GRANULARITY: u64 = 16 * 1024 * 1024;

/// File-name prefixes of the engine's own metadata files.
///
/// These files carry no per-checkpoint allocation lists and are always
/// copied whole.
pub const DEFAULT_METADATA_PREFIXES: &[&str] = &["__meta"];

/// Configuration for an incremental backup session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Maximum bytes returned per cursor step
    pub granularity: u64,

    /// Prefixes identifying metadata files that are always fully copied
    pub metadata_prefixes: Vec<String>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            granularity: DEFAULT_GRANULARITY,
            metadata_prefixes: DEFAULT_METADATA_PREFIXES
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl BackupConfig {
    /// Create a configuration with the given granularity
    pub fn new(granularity: u64) -> Self {
        Self {
            granularity,
            ..Default::default()
        }
    }

    /// Parse a configuration from JSON, filling missing fields with defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the granularity
    #[must_use]
    pub const fn with_granularity(mut self, granularity: u64) -> Self {
        self.granularity = granularity;
        self
    }

    /// Replace the metadata prefix allow-list
    #[must_use]
    pub fn with_metadata_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.granularity == 0 {
            return Err(BackupError::Config(
                "granularity must be at least one byte".to_string(),
            ));
        }
        if self.metadata_prefixes.iter().any(String::is_empty) {
            return Err(BackupError::Config(
                "empty metadata prefix would match every file".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether `file` is an engine metadata file that must be fully copied
    pub fn is_metadata_file(&self, file: &str) -> bool {
        self.metadata_prefixes
            .iter()
            .any(|prefix| file.starts_with(prefix.as_str()))
    }
}
