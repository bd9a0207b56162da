//! Dirty block range computation for checkpoint-based incremental backup.
//!
//! Given two named checkpoints of a storage file, this crate works out which
//! byte ranges changed between them so a backup client only copies modified
//! blocks. The pieces are:
//!
//! - **Merge engine** ([`merge`]): two-pointer union of sorted extent lists
//! - **Chain reducer** ([`reduce`]): folds per-checkpoint allocation lists
//!   between a start and stop checkpoint into one coalesced [`UnionList`]
//! - **Incremental cursor** ([`cursor`]): lazily computes the union and pages
//!   it out in granularity-sized [`BackupRange`] chunks, falling back to a
//!   whole-file copy when there is no incremental basis
//!
//! The checkpoint metadata store and the file store are collaborators reached
//! through the traits in [`source`].
//!
//! # Example
//!
//! ```rust,ignore
//! use incr_backup::{BackupConfig, BackupSession, IncrementalId};
//! use std::sync::Arc;
//!
//! # fn example(
//! #     checkpoints: Arc<dyn incr_backup::CheckpointSource>,
//! #     files: Arc<dyn incr_backup::FileStore>,
//! # ) -> incr_backup::Result<()> {
//! let session = BackupSession::new(
//!     BackupConfig::default(),
//!     IncrementalId::new("nightly-1", "ckpt.12"),
//!     IncrementalId::new("nightly-2", "ckpt.19"),
//!     checkpoints,
//!     files,
//! )?;
//!
//! let mut cursor = session.open_incremental("collection-7.tbl")?;
//! for range in &mut cursor {
//!     let range = range?;
//!     println!("copy {} bytes at {}", range.length, range.offset);
//! }
//! cursor.close();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]

use std::fmt;

use thiserror::Error;

// Range-list merge engine
pub mod merge;

// Checkpoint-chain reduction
pub mod reduce;

// Incremental cursor state machine
pub mod cursor;

// Checkpoint metadata and file store collaborators
pub mod source;

// Configuration
pub mod config;

// Sibling full-backup session
pub mod session;

mod range;

pub use config::BackupConfig;
pub use cursor::{CursorState, IncrementalCursor};
pub use range::{BackupRange, Extent, RangeKind};
pub use reduce::UnionList;
pub use session::{BackupSession, IncrementalId};
pub use source::{
    Checkpoint, CheckpointSource, DirFileStore, FileHandle, FileStore, MemoryCheckpointSource,
};

/// Result type for incremental backup operations.
pub type Result<T> = std::result::Result<T, BackupError>;

/// Which end of a checkpoint chain a marker refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointRole {
    /// Baseline checkpoint, already covered by an earlier backup.
    Start,
    /// Last checkpoint whose allocations are included.
    Stop,
}

impl fmt::Display for CheckpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str("start"),
            Self::Stop => f.write_str("stop"),
        }
    }
}

/// Errors that can occur while computing or serving backup ranges.
#[derive(Debug, Error)]
pub enum BackupError {
    /// A named start or stop checkpoint does not exist in the chain.
    #[error("incremental backup {role} checkpoint {name} not found")]
    CheckpointNotFound {
        /// Which marker was missing.
        role: CheckpointRole,
        /// The checkpoint name that was looked up.
        name: String,
    },

    /// Nothing (more) to copy for this file.
    ///
    /// Returned when the union of the chain is empty and when a cursor has
    /// been exhausted. This is an end-of-data signal rather than a fault.
    #[error("no data to copy")]
    NoDataToCopy,

    /// Scratch or result buffer reservation failed.
    #[error("allocation failed: {0}")]
    Allocation(String),

    /// The file size could not be determined for a full copy.
    #[error("failed to query size of {file}: {source}")]
    SizeQuery {
        /// File whose size was requested.
        file: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The metadata store has no checkpoint list for the file.
    #[error("checkpoint metadata not found: {0}")]
    MetadataNotFound(String),

    /// I/O error reported by a collaborator.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration or backup identifiers.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation not valid in the cursor's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The cursor was already closed.
    #[error("cursor is closed")]
    Closed,

    /// JSON parse failure for configuration or metadata.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BackupError {
    /// Check whether this is the end-of-data signal rather than a real error.
    ///
    /// Callers treat it as "skip this file" or "iteration finished".
    pub const fn is_no_data(&self) -> bool {
        matches!(self, Self::NoDataToCopy)
    }

    /// Check whether this reports something missing (a checkpoint, metadata
    /// or data).
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::CheckpointNotFound { .. } | Self::MetadataNotFound(_) | Self::NoDataToCopy
        )
    }
}

impl From<std::collections::TryReserveError> for BackupError {
    fn from(err: std::collections::TryReserveError) -> Self {
        Self::Allocation(err.to_string())
    }
}

/// Version information for the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
