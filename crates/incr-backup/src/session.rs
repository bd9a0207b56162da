//! Full-backup session that hands out per-file incremental cursors.
//!
//! A session is opened once per backup with a start and stop identifier. It
//! validates the configuration and identifiers up front, then duplicates an
//! [`IncrementalCursor`] for each file the backup client walks.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::BackupConfig;
use crate::cursor::IncrementalCursor;
use crate::source::{CheckpointSource, FileStore};
use crate::{BackupError, Result};

/// A named incremental backup identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementalId {
    /// Identifier chosen by the backup client.
    pub id: String,
    /// Checkpoint this identifier is bound to.
    pub checkpoint: Option<String>,
    /// Every file must be copied whole for this identifier.
    #[serde(default)]
    pub force_full: bool,
}

impl IncrementalId {
    /// Identifier bound to `checkpoint`.
    pub fn new(id: impl Into<String>, checkpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            checkpoint: Some(checkpoint.into()),
            force_full: false,
        }
    }

    /// Identifier with no incremental basis; files are copied whole.
    pub fn full(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            checkpoint: None,
            force_full: true,
        }
    }

    /// Checkpoint name, or a configuration error naming the identifier.
    pub(crate) fn checkpoint_name(&self) -> Result<&str> {
        self.checkpoint.as_deref().ok_or_else(|| {
            BackupError::Config(format!(
                "incremental id {} is not bound to a checkpoint",
                self.id
            ))
        })
    }
}

/// Sibling full-backup session.
pub struct BackupSession {
    config: BackupConfig,
    start: Arc<IncrementalId>,
    stop: Arc<IncrementalId>,
    checkpoints: Arc<dyn CheckpointSource>,
    files: Arc<dyn FileStore>,
}

impl BackupSession {
    /// Open a backup session between `start` and `stop`.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Config`] if the configuration is invalid or an
    /// incremental start or stop identifier has no checkpoint.
    pub fn new(
        config: BackupConfig,
        start: IncrementalId,
        stop: IncrementalId,
        checkpoints: Arc<dyn CheckpointSource>,
        files: Arc<dyn FileStore>,
    ) -> Result<Self> {
        config.validate()?;

        if !start.force_full {
            start.checkpoint_name()?;
            stop.checkpoint_name()?;
        }

        debug!(
            "backup session from {} to {} (granularity {}, force_full {})",
            start.id, stop.id, config.granularity, start.force_full
        );

        Ok(Self {
            config,
            start: Arc::new(start),
            stop: Arc::new(stop),
            checkpoints,
            files,
        })
    }

    /// Duplicate an incremental cursor for `file`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened at the start checkpoint.
    pub fn open_incremental(&self, file: &str) -> Result<IncrementalCursor> {
        IncrementalCursor::open(self, file)
    }

    /// Session configuration.
    pub const fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Start identifier.
    pub fn start(&self) -> &Arc<IncrementalId> {
        &self.start
    }

    /// Stop identifier.
    pub fn stop(&self) -> &Arc<IncrementalId> {
        &self.stop
    }

    pub(crate) fn checkpoints(&self) -> &Arc<dyn CheckpointSource> {
        &self.checkpoints
    }

    pub(crate) fn files(&self) -> &Arc<dyn FileStore> {
        &self.files
    }
}

impl fmt::Debug for BackupSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupSession")
            .field("config", &self.config)
            .field("start", &self.start)
            .field("stop", &self.stop)
            .finish_non_exhaustive()
    }
}
