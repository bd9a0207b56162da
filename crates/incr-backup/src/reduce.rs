//! Checkpoint-chain reduction.
//!
//! Walks a file's checkpoint chain from the start checkpoint (exclusive) to
//! the stop checkpoint (inclusive) and folds every allocation list in
//! between into one coalesced union. The fold ping-pongs between two scratch
//! buffers sized once for the worst case, so no step reallocates.

use tracing::debug;

use crate::merge::{covered_bytes, merge_into};
use crate::range::Extent;
use crate::source::Checkpoint;
use crate::{BackupError, CheckpointRole, Result};

/// Sorted, coalesced list of dirty extents between two checkpoints.
///
/// Immutable once computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnionList {
    extents: Vec<Extent>,
}

impl UnionList {
    /// Dirty extents, sorted by offset.
    pub fn extents(&self) -> &[Extent] {
        &self.extents
    }

    /// Number of extents.
    pub fn len(&self) -> usize {
        self.extents.len()
    }

    /// Check if the list holds no extents.
    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }

    /// Total bytes covered.
    pub fn total_bytes(&self) -> u64 {
        covered_bytes(&self.extents)
    }

    /// Extent at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&Extent> {
        self.extents.get(index)
    }
}

/// Reduce a checkpoint chain to the union of allocations after
/// `start_name` up to and including `stop_name`.
///
/// The start checkpoint is the baseline of the backup and is not folded in.
/// Returns `Ok(None)` when no checkpoint in range allocated anything.
///
/// # Errors
///
/// - [`BackupError::CheckpointNotFound`] if the start checkpoint is missing,
///   or the stop checkpoint does not follow it in the chain
/// - [`BackupError::Allocation`] if the scratch buffers cannot be reserved
pub fn reduce_chain(
    checkpoints: Vec<Checkpoint>,
    start_name: &str,
    stop_name: &str,
) -> Result<Option<UnionList>> {
    let entries: usize = checkpoints.iter().map(Checkpoint::alloc_entries).sum();

    let mut current: Vec<Extent> = Vec::new();
    let mut next: Vec<Extent> = Vec::new();
    current.try_reserve_exact(entries)?;
    next.try_reserve_exact(entries)?;

    let mut start = false;
    let mut stop = false;
    let mut folded = 0usize;

    for ckpt in &checkpoints {
        if !start {
            start = ckpt.name == start_name;
            continue;
        }

        stop = ckpt.name == stop_name;
        merge_into(&current, &ckpt.alloc_list, &mut next);
        std::mem::swap(&mut current, &mut next);
        folded += 1;

        if stop {
            break;
        }
    }

    if !start {
        return Err(BackupError::CheckpointNotFound {
            role: CheckpointRole::Start,
            name: start_name.to_string(),
        });
    }
    if !stop {
        return Err(BackupError::CheckpointNotFound {
            role: CheckpointRole::Stop,
            name: stop_name.to_string(),
        });
    }

    debug!(
        "reduced {folded} checkpoints ({entries} allocation entries) from {start_name} to {stop_name} into {} extents",
        current.len()
    );

    if current.is_empty() {
        return Ok(None);
    }

    Ok(Some(UnionList { extents: current }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn ckpt(name: &str, pairs: &[(u64, u64)]) -> Checkpoint {
        Checkpoint::new(name, pairs.iter().copied().map(Extent::from).collect())
    }

    fn chain() -> Vec<Checkpoint> {
        vec![
            ckpt("c0", &[(0, 4096)]),
            ckpt("c1", &[]),
            ckpt("c2", &[(100, 50)]),
            ckpt("c3", &[(200, 50)]),
            ckpt("c4", &[(120, 100), (8192, 10)]),
        ]
    }

    #[test]
    fn test_reduce_disjoint() {
        let union = reduce_chain(chain(), "c1", "c3").expect("reduce").expect("data");
        assert_eq!(union.extents(), &[Extent::new(100, 50), Extent::new(200, 50)]);
        assert_eq!(union.total_bytes(), 100);
    }

    #[test]
    fn test_reduce_overlap_fusion() {
        let chain = vec![
            ckpt("start", &[]),
            ckpt("a", &[(100, 100)]),
            ckpt("b", &[(150, 100)]),
        ];
        let union = reduce_chain(chain, "start", "b").expect("reduce").expect("data");
        assert_eq!(union.extents(), &[Extent::new(100, 150)]);
    }

    #[test]
    fn test_reduce_excludes_start_and_after_stop() {
        // c0's allocation belongs to the baseline; c4 is after the stop
        let union = reduce_chain(chain(), "c0", "c2").expect("reduce").expect("data");
        assert_eq!(union.extents(), &[Extent::new(100, 50)]);
    }

    #[test]
    fn test_reduce_bridging_fold() {
        let union = reduce_chain(chain(), "c1", "c4").expect("reduce").expect("data");
        assert_eq!(
            union.extents(),
            &[Extent::new(100, 150), Extent::new(8192, 10)]
        );
    }

    #[test]
    fn test_reduce_nothing_to_copy() {
        let chain = vec![ckpt("c0", &[(0, 10)]), ckpt("c1", &[]), ckpt("c2", &[])];
        assert!(reduce_chain(chain, "c0", "c2").expect("reduce").is_none());
    }

    #[test]
    fn test_reduce_missing_start() {
        let err = reduce_chain(chain(), "zz", "c3").unwrap_err();
        assert!(matches!(
            err,
            BackupError::CheckpointNotFound { role: CheckpointRole::Start, ref name } if name == "zz"
        ));
    }

    #[test]
    fn test_reduce_missing_stop() {
        let err = reduce_chain(chain(), "c1", "zz").unwrap_err();
        assert_eq!(err.to_string(), "incremental backup stop checkpoint zz not found");
    }

    #[test]
    fn test_reduce_stop_before_start() {
        // The stop checkpoint must come after the start in the chain
        let err = reduce_chain(chain(), "c3", "c1").unwrap_err();
        assert!(matches!(
            err,
            BackupError::CheckpointNotFound { role: CheckpointRole::Stop, .. }
        ));
    }

    #[test]
    fn test_reduce_stop_equal_to_start() {
        let err = reduce_chain(chain(), "c2", "c2").unwrap_err();
        assert!(matches!(
            err,
            BackupError::CheckpointNotFound { role: CheckpointRole::Stop, .. }
        ));
    }

    #[test]
    fn test_reduce_is_deterministic() {
        let first = reduce_chain(chain(), "c0", "c4").expect("reduce");
        let second = reduce_chain(chain(), "c0", "c4").expect("reduce");
        assert_eq!(first, second);
    }
}
