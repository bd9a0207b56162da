//! Incremental backup cursor.
//!
//! An [`IncrementalCursor`] serves the dirty ranges of one file. The union
//! list is computed lazily on the first [`advance`](IncrementalCursor::advance)
//! and then paged out in chunks of at most `granularity` bytes:
//!
//! ```text
//! Uninitialized ──► FullCopy ──────────┐
//!       │                              ▼
//!       └─────────► Ranges ──────► Exhausted
//!
//! any state ──close──► Closed
//! ```
//!
//! Files with no incremental basis (force-full identifiers, metadata files)
//! yield a single [`RangeKind::File`] directive covering the whole file.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::range::{BackupRange, Extent, RangeKind};
use crate::reduce::{UnionList, reduce_chain};
use crate::session::{BackupSession, IncrementalId};
use crate::source::{CheckpointSource, FileHandle, FileStore};
use crate::{BackupError, Result};

/// Observable cursor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Nothing computed yet.
    Uninitialized,
    /// The whole-file directive has been returned.
    FullCopy,
    /// Paging through the union list.
    Ranges,
    /// Every range has been returned.
    Exhausted,
    /// Resources released.
    Closed,
}

/// Read position within a union list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Position {
    /// Index of the current extent.
    pub index: usize,
    /// Bytes of the current extent already returned.
    pub consumed: u64,
}

/// Compute the chunk at `position` and the position after it.
///
/// Returns `None` once `position` is past the last extent, or when
/// `granularity` is zero. An extent longer than `granularity` is split into
/// `granularity`-sized pieces, the last one carrying the remainder. Extents
/// reaching past `u64::MAX` end there.
pub fn next_chunk(
    list: &[Extent],
    position: Position,
    granularity: u64,
) -> Option<(BackupRange, Position)> {
    if granularity == 0 {
        return None;
    }

    let entry = list.get(position.index)?;
    let offset = entry.offset.checked_add(position.consumed)?;
    let remaining = entry.end().saturating_sub(offset);

    if remaining <= granularity {
        Some((
            BackupRange::range(offset, remaining),
            Position {
                index: position.index + 1,
                consumed: 0,
            },
        ))
    } else {
        Some((
            BackupRange::range(offset, granularity),
            Position {
                index: position.index,
                consumed: position.consumed + granularity,
            },
        ))
    }
}

enum Progress {
    Uninitialized,
    FullCopy,
    Ranges(UnionList),
    Exhausted,
    Closed,
}

/// Cursor over the dirty ranges of one file.
pub struct IncrementalCursor {
    file: String,
    granularity: u64,
    start: Arc<IncrementalId>,
    stop: Arc<IncrementalId>,
    force_full: bool,
    checkpoints: Arc<dyn CheckpointSource>,
    files: Arc<dyn FileStore>,
    handle: Option<Box<dyn FileHandle>>,
    progress: Progress,
    position: Position,
    block: Vec<u8>,
}

impl IncrementalCursor {
    /// Open a cursor for `file`, inheriting granularity and identifiers from
    /// `session`.
    ///
    /// Unless the session forces full copies or `file` is a metadata file, a
    /// handle pinned to the start checkpoint is opened. The union list is
    /// not computed here.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle cannot be opened.
    pub fn open(session: &BackupSession, file: &str) -> Result<Self> {
        let start = Arc::clone(session.start());
        let stop = Arc::clone(session.stop());

        let force_full = start.force_full;
        if force_full {
            info!("forcing full file copies for id {}", start.id);
        }

        let handle = if !force_full && !session.config().is_metadata_file(file) {
            let checkpoint = start.checkpoint_name()?;
            Some(session.files().open_at_checkpoint(file, checkpoint)?)
        } else {
            None
        };

        debug!(
            "opened incremental cursor for {file} (handle {})",
            handle.as_ref().map_or("none", |h| h.uri())
        );

        Ok(Self {
            file: file.to_string(),
            granularity: session.config().granularity,
            start,
            stop,
            force_full,
            checkpoints: Arc::clone(session.checkpoints()),
            files: Arc::clone(session.files()),
            handle,
            progress: Progress::Uninitialized,
            position: Position::default(),
            block: Vec::new(),
        })
    }

    /// Return the next range to copy.
    ///
    /// # Errors
    ///
    /// - [`BackupError::NoDataToCopy`] when nothing is left, including when
    ///   the file changed nowhere between the two checkpoints
    /// - [`BackupError::Closed`] after [`close`](Self::close)
    /// - errors from the checkpoint metadata or file store on first use
    pub fn advance(&mut self) -> Result<BackupRange> {
        match self.state() {
            CursorState::Closed => return Err(BackupError::Closed),
            CursorState::Exhausted => return Err(BackupError::NoDataToCopy),
            CursorState::FullCopy => {
                self.progress = Progress::Exhausted;
                return Err(BackupError::NoDataToCopy);
            }
            CursorState::Uninitialized => {
                if self.force_full || self.handle.is_none() {
                    return self.init_full_copy();
                }
                self.init_ranges()?;
            }
            CursorState::Ranges => {}
        }

        self.step()
    }

    fn init_full_copy(&mut self) -> Result<BackupRange> {
        let size = self.files.file_size(&self.file)?;
        debug!("full copy of {} ({size} bytes)", self.file);

        self.progress = Progress::FullCopy;
        Ok(BackupRange::whole_file(size))
    }

    fn init_ranges(&mut self) -> Result<()> {
        let start = self.start.checkpoint_name()?;
        let stop = self.stop.checkpoint_name()?;

        let chain = self.checkpoints.checkpoints(&self.file)?;
        match reduce_chain(chain, start, stop)? {
            None => {
                debug!("{}: no blocks changed between {start} and {stop}", self.file);
                self.progress = Progress::Exhausted;
                Err(BackupError::NoDataToCopy)
            }
            Some(list) => {
                debug!(
                    "{}: {} dirty extents, {} bytes",
                    self.file,
                    list.len(),
                    list.total_bytes()
                );
                self.position = Position::default();
                self.progress = Progress::Ranges(list);
                Ok(())
            }
        }
    }

    fn step(&mut self) -> Result<BackupRange> {
        let Progress::Ranges(list) = &self.progress else {
            return Err(BackupError::InvalidState(
                "cursor has no range list".to_string(),
            ));
        };

        match next_chunk(list.extents(), self.position, self.granularity) {
            Some((range, next)) => {
                self.position = next;
                Ok(range)
            }
            None => {
                self.progress = Progress::Exhausted;
                Err(BackupError::NoDataToCopy)
            }
        }
    }

    /// Read the bytes of a dirty range through the pinned handle.
    ///
    /// The returned slice borrows the cursor's scratch buffer and is
    /// overwritten by the next read.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::InvalidState`] for whole-file directives and
    /// for cursors without a handle.
    pub fn read_range(&mut self, range: &BackupRange) -> Result<&[u8]> {
        if matches!(self.progress, Progress::Closed) {
            return Err(BackupError::Closed);
        }
        if range.kind == RangeKind::File {
            return Err(BackupError::InvalidState(
                "whole-file ranges are copied by the client".to_string(),
            ));
        }
        let Some(handle) = self.handle.as_ref() else {
            return Err(BackupError::InvalidState(format!(
                "{} has no incremental handle",
                self.file
            )));
        };

        let len = usize::try_from(range.length).map_err(|_| {
            BackupError::Allocation(format!("range of {} bytes", range.length))
        })?;
        if self.block.len() < len {
            self.block.try_reserve_exact(len - self.block.len())?;
            self.block.resize(len, 0);
        }

        handle.read_at(range.offset, &mut self.block[..len])?;
        Ok(&self.block[..len])
    }

    /// Release the union list, the file handle and the scratch buffer.
    ///
    /// Safe to call in any state, including before the first advance, and
    /// more than once.
    pub fn close(&mut self) {
        if matches!(self.progress, Progress::Closed) {
            return;
        }

        self.progress = Progress::Closed;
        self.handle = None;
        self.block = Vec::new();
        debug!("closed incremental cursor for {}", self.file);
    }

    /// Current state.
    pub fn state(&self) -> CursorState {
        match self.progress {
            Progress::Uninitialized => CursorState::Uninitialized,
            Progress::FullCopy => CursorState::FullCopy,
            Progress::Ranges(_) => CursorState::Ranges,
            Progress::Exhausted => CursorState::Exhausted,
            Progress::Closed => CursorState::Closed,
        }
    }

    /// File this cursor serves.
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Maximum bytes per returned range.
    pub const fn granularity(&self) -> u64 {
        self.granularity
    }

    /// Whether this cursor copies the whole file.
    pub const fn is_force_full(&self) -> bool {
        self.force_full
    }

    /// Union list, once computed.
    pub fn union_list(&self) -> Option<&UnionList> {
        match &self.progress {
            Progress::Ranges(list) => Some(list),
            _ => None,
        }
    }

    /// Current read position within the union list.
    pub const fn position(&self) -> Position {
        self.position
    }

    /// URI of the open file handle, if any.
    pub fn handle_uri(&self) -> Option<&str> {
        self.handle.as_deref().map(|h| h.uri())
    }
}

impl Iterator for IncrementalCursor {
    type Item = Result<BackupRange>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(range) => Some(Ok(range)),
            Err(e) if e.is_no_data() => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl fmt::Debug for IncrementalCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncrementalCursor")
            .field("file", &self.file)
            .field("granularity", &self.granularity)
            .field("force_full", &self.force_full)
            .field("state", &self.state())
            .field("position", &self.position)
            .field("handle", &self.handle_uri())
            .finish_non_exhaustive()
    }
}
