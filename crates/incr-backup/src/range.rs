//! Extent and backup range value types.

use serde::{Deserialize, Serialize};

/// A half-open byte interval `[offset, offset + length)` within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent {
    /// Byte offset within the file.
    pub offset: u64,
    /// Length in bytes.
    pub length: u64,
}

impl Extent {
    /// Create a new extent.
    pub const fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// End offset (exclusive), saturating at `u64::MAX`.
    pub const fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }

    /// Check if two extents share at least one byte.
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }

    /// Check if two extents overlap or are adjacent, i.e. would fuse in a
    /// union list.
    pub const fn touches(&self, other: &Self) -> bool {
        self.offset <= other.end() && other.offset <= self.end()
    }
}

impl From<(u64, u64)> for Extent {
    fn from((offset, length): (u64, u64)) -> Self {
        Self { offset, length }
    }
}

/// Kind tag on a range handed to the backup client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeKind {
    /// A dirty data interval.
    Range,
    /// Copy the whole file as one unit.
    File,
}

/// One unit of backup work: `(offset, length, kind)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackupRange {
    /// Byte offset within the file.
    pub offset: u64,
    /// Length in bytes.
    pub length: u64,
    /// Whether this is a dirty interval or a whole-file directive.
    pub kind: RangeKind,
}

impl BackupRange {
    /// A dirty data interval.
    pub const fn range(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length,
            kind: RangeKind::Range,
        }
    }

    /// A whole-file copy directive covering `size` bytes.
    pub const fn whole_file(size: u64) -> Self {
        Self {
            offset: 0,
            length: size,
            kind: RangeKind::File,
        }
    }

    /// The interval this range covers.
    pub const fn extent(&self) -> Extent {
        Extent::new(self.offset, self.length)
    }

    /// Components as the `(offset, length, kind)` triple.
    pub const fn as_tuple(&self) -> (u64, u64, RangeKind) {
        (self.offset, self.length, self.kind)
    }
}
