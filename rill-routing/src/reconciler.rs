//! Range reconciliation.
//!
//! During a reshard the topology source reports parents and children
//! together, so the raw listing covers parts of the hash-key space more
//! than once. The reconciler collapses it into a disjoint cover whose
//! ranges never cross a boundary of any listed shard: the service may
//! transiently accept a record on either generation, and an aggregated
//! payload built from one cover range must be valid for whichever shard
//! ends up taking it.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rill_core::{HashKey, HashKeyRange, ShardId};

/// One routable range of the lookup index: every hash key above the
/// previous entry's end, up to and including `end_hash_key`, belongs to
/// `shard_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CoverEntry {
    /// Last hash key of the range (inclusive).
    pub end_hash_key: HashKey,
    /// Shard owning the range.
    pub shard_id: ShardId,
}

/// A candidate range awaiting commitment, ordered for the reconciler's
/// priority queue.
///
/// Pop order is decreasing `end`, ties broken by decreasing `start`, then
/// by increasing insertion sequence. Trimmed ranges re-enter the queue
/// with a fresh (higher) sequence number, so on a full tie the shard that
/// arrived with that exact range outranks one that was cut down to it;
/// for duplicate input ranges the first-listed shard wins.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    end: HashKey,
    start: HashKey,
    seq: u64,
    shard_id: ShardId,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.end
            .cmp(&other.end)
            .then(self.start.cmp(&other.start))
            .then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

/// Builds a minimal disjoint cover of the hash-key space from a possibly
/// overlapping shard listing.
///
/// Ranges are committed from the top of the key space downward. A shard
/// that pokes above the committed watermark is trimmed to the part below
/// it and requeued; a shard entirely inside the committed region is
/// shadowed and dropped. The result is ascending by ending hash key,
/// ready for binary search.
pub(crate) fn build_disjoint_cover(shards: &[(ShardId, HashKeyRange)]) -> Vec<CoverEntry> {
    let mut queue = BinaryHeap::with_capacity(shards.len());
    let mut next_seq: u64 = 0;
    for &(shard_id, range) in shards {
        queue.push(Candidate {
            end: range.end,
            start: range.start,
            seq: next_seq,
            shard_id,
        });
        next_seq += 1;
    }

    // Lowest hash key of the committed region; `None` until the first
    // range is committed.
    let mut committed_start: Option<HashKey> = None;
    let mut cover = Vec::new();

    while let Some(mut candidate) = queue.pop() {
        match committed_start {
            Some(watermark) if candidate.end >= watermark => {
                if candidate.start < watermark {
                    // Keep the part below the committed region.
                    candidate.end = watermark - 1;
                    candidate.seq = next_seq;
                    next_seq += 1;
                    queue.push(candidate);
                }
                // Fully shadowed otherwise.
            }
            _ => {
                cover.push(CoverEntry {
                    end_hash_key: candidate.end,
                    shard_id: candidate.shard_id,
                });
                committed_start = Some(candidate.start);
            }
        }
    }

    cover.reverse();
    cover
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shards(ranges: &[(u64, u128, u128)]) -> Vec<(ShardId, HashKeyRange)> {
        ranges
            .iter()
            .map(|&(id, start, end)| (ShardId::new(id), HashKeyRange::new(start, end)))
            .collect()
    }

    fn ends(cover: &[CoverEntry]) -> Vec<u128> {
        cover.iter().map(|entry| entry.end_hash_key).collect()
    }

    fn owners(cover: &[CoverEntry]) -> Vec<u64> {
        cover.iter().map(|entry| entry.shard_id.get()).collect()
    }

    #[test]
    fn test_empty_listing() {
        assert!(build_disjoint_cover(&[]).is_empty());
    }

    #[test]
    fn test_single_shard() {
        let cover = build_disjoint_cover(&shards(&[(1, 0, u128::MAX)]));
        assert_eq!(ends(&cover), vec![u128::MAX]);
        assert_eq!(owners(&cover), vec![1]);
    }

    #[test]
    fn test_disjoint_shards_pass_through() {
        let cover = build_disjoint_cover(&shards(&[(1, 0, 49), (2, 50, 99)]));
        assert_eq!(ends(&cover), vec![49, 99]);
        assert_eq!(owners(&cover), vec![1, 2]);
    }

    #[test]
    fn test_parent_with_children_mid_reshard() {
        // Parent 1 still listed alongside its freshly split children.
        let cover = build_disjoint_cover(&shards(&[(1, 0, 99), (2, 0, 49), (3, 50, 99)]));
        assert_eq!(ends(&cover), vec![49, 99]);
        assert_eq!(owners(&cover), vec![2, 3]);
    }

    #[test]
    fn test_three_generations() {
        // Two parents, their four children, and a grandchild re-merged
        // across the parent boundary. The cover must follow the children
        // and never the boundary-crossing grandchild.
        let cover = build_disjoint_cover(&shards(&[
            (1, 0, 5),
            (2, 6, 10),
            (3, 0, 2),
            (4, 3, 5),
            (5, 6, 8),
            (6, 9, 10),
            (7, 3, 8),
        ]));
        assert_eq!(ends(&cover), vec![2, 5, 8, 10]);
        assert_eq!(owners(&cover), vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_cover_is_disjoint_and_contiguous() {
        let input = shards(&[
            (1, 0, 5),
            (2, 6, 10),
            (3, 0, 2),
            (4, 3, 5),
            (5, 6, 8),
            (6, 9, 10),
            (7, 3, 8),
        ]);
        let cover = build_disjoint_cover(&input);

        // Strictly increasing ends, and each entry's range is contained
        // in the owning shard's own range.
        let mut previous_end: Option<u128> = None;
        for entry in &cover {
            if let Some(previous) = previous_end {
                assert!(entry.end_hash_key > previous);
            }
            let (_, owner_range) = input
                .iter()
                .find(|(id, _)| *id == entry.shard_id)
                .expect("cover references a listed shard");
            let range_start = previous_end.map_or(0, |previous| previous + 1);
            assert!(owner_range.contains(range_start));
            assert!(owner_range.contains(entry.end_hash_key));
            previous_end = Some(entry.end_hash_key);
        }
        assert_eq!(previous_end, Some(10));
    }

    #[test]
    fn test_duplicate_ranges_first_listed_wins() {
        let cover = build_disjoint_cover(&shards(&[(7, 0, 99), (3, 0, 99)]));
        assert_eq!(owners(&cover), vec![7]);

        let cover = build_disjoint_cover(&shards(&[(3, 0, 99), (7, 0, 99)]));
        assert_eq!(owners(&cover), vec![3]);
    }

    #[test]
    fn test_interior_child_shadowed_by_parent() {
        // A shard covering a strict interior slice of a wider one: the
        // wider range is committed first and reaches all the way down, so
        // the slice is shadowed entirely.
        let cover = build_disjoint_cover(&shards(&[(1, 0, 99), (2, 40, 59)]));
        assert_eq!(ends(&cover), vec![99]);
        assert_eq!(owners(&cover), vec![1]);
    }

    #[test]
    fn test_full_key_space_split() {
        let half = u128::MAX / 2;
        let cover = build_disjoint_cover(&shards(&[
            (10, 0, half),
            (11, half + 1, u128::MAX),
        ]));
        assert_eq!(ends(&cover), vec![half, u128::MAX]);
        assert_eq!(owners(&cover), vec![10, 11]);
    }
}
