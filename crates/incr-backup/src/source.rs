//! Collaborator interfaces: checkpoint metadata and file storage.
//!
//! The backup core never owns checkpoint metadata or file contents. It asks a
//! [`CheckpointSource`] for the checkpoint chain of a file and a
//! [`FileStore`] for sizes and checkpoint-pinned read handles.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::range::Extent;
use crate::{BackupError, Result};

/// One checkpoint of a file and the blocks it allocated since the previous
/// checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint name.
    pub name: String,
    /// Blocks newly allocated since the prior checkpoint, sorted by offset.
    #[serde(default)]
    pub alloc_list: Vec<Extent>,
}

impl Checkpoint {
    /// Create a checkpoint descriptor.
    pub fn new(name: impl Into<String>, alloc_list: Vec<Extent>) -> Self {
        Self {
            name: name.into(),
            alloc_list,
        }
    }

    /// Number of allocation list entries.
    pub fn alloc_entries(&self) -> usize {
        self.alloc_list.len()
    }
}

/// Source of per-file checkpoint metadata.
pub trait CheckpointSource: Send + Sync {
    /// Return the ordered checkpoint chain for `file`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::MetadataNotFound`] if the store has no entry
    /// for the file, or an I/O error if the store could not be read.
    fn checkpoints(&self, file: &str) -> Result<Vec<Checkpoint>>;
}

/// In-memory checkpoint metadata store.
#[derive(Debug, Default)]
pub struct MemoryCheckpointSource {
    files: DashMap<String, Vec<Checkpoint>>,
}

impl MemoryCheckpointSource {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store from JSON shaped as `{ "<file>": [checkpoint, ...] }`.
    pub fn from_json(json: &str) -> Result<Self> {
        let files: std::collections::HashMap<String, Vec<Checkpoint>> =
            serde_json::from_str(json)?;
        Ok(Self {
            files: files.into_iter().collect(),
        })
    }

    /// Replace the checkpoint chain for `file`.
    pub fn insert(&self, file: impl Into<String>, chain: Vec<Checkpoint>) {
        self.files.insert(file.into(), chain);
    }

    /// Append a checkpoint to the end of the chain for `file`.
    pub fn push_checkpoint(&self, file: &str, checkpoint: Checkpoint) {
        self.files
            .entry(file.to_string())
            .or_default()
            .push(checkpoint);
    }

    /// Number of files with metadata.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl CheckpointSource for MemoryCheckpointSource {
    fn checkpoints(&self, file: &str) -> Result<Vec<Checkpoint>> {
        self.files
            .get(file)
            .map(|chain| chain.value().clone())
            .ok_or_else(|| BackupError::MetadataNotFound(file.to_string()))
    }
}

/// Read handle on a file, pinned to a checkpoint view.
pub trait FileHandle: Send {
    /// URI the handle was opened with.
    fn uri(&self) -> &str;

    /// Checkpoint this handle is pinned to.
    fn checkpoint(&self) -> &str;

    /// Fill `buf` with bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the range cannot be read in full.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

/// File size and file-open collaborator.
pub trait FileStore: Send + Sync {
    /// Total byte size of `file`.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::SizeQuery`] if the file cannot be stat'ed.
    fn file_size(&self, file: &str) -> Result<u64>;

    /// Open a read handle on `file` pinned to `checkpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or checkpoint cannot be opened.
    fn open_at_checkpoint(&self, file: &str, checkpoint: &str) -> Result<Box<dyn FileHandle>>;
}

/// File store over a plain directory.
///
/// A directory holds a single version of each file, so checkpoint pinning
/// only records the checkpoint name on the handle.
#[derive(Debug, Clone)]
pub struct DirFileStore {
    root: PathBuf,
}

impl DirFileStore {
    /// Create a store rooted at `root`.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl FileStore for DirFileStore {
    fn file_size(&self, file: &str) -> Result<u64> {
        let path = self.root.join(file);
        std::fs::metadata(&path)
            .map(|m| m.len())
            .map_err(|source| BackupError::SizeQuery {
                file: file.to_string(),
                source,
            })
    }

    fn open_at_checkpoint(&self, file: &str, checkpoint: &str) -> Result<Box<dyn FileHandle>> {
        let path = self.root.join(file);
        let handle = File::open(&path)?;
        debug!("opened {} at checkpoint {checkpoint}", path.display());

        Ok(Box::new(DirFileHandle {
            uri: format!("file:{file}"),
            checkpoint: checkpoint.to_string(),
            file: Mutex::new(handle),
        }))
    }
}

/// Handle returned by [`DirFileStore`].
#[derive(Debug)]
struct DirFileHandle {
    uri: String,
    checkpoint: String,
    file: Mutex<File>,
}

impl FileHandle for DirFileHandle {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn checkpoint(&self) -> &str {
        &self.checkpoint
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }
}
