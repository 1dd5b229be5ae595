//! Shard identifiers and the hash-key space.
//!
//! The streaming service partitions a 128-bit hash-key space into
//! contiguous shards. Records are routed by hashing their partition key
//! into this space and finding the shard whose range contains the result.

use std::fmt;
use std::str::FromStr;

use crate::error::ParseShardIdError;

/// A point in the stream's hash-key space.
///
/// Derived from a record's partition key; determines the owning shard.
pub type HashKey = u128;

/// The largest representable hash key. The hash-key space is
/// `[0, HASH_KEY_MAX]`.
pub const HASH_KEY_MAX: HashKey = u128::MAX;

/// Prefix of the external shard-id form.
const SHARD_ID_PREFIX: &str = "shardId-";

/// Number of decimal digits the external form is zero-padded to.
const SHARD_ID_DIGITS: usize = 12;

/// Unique identifier for a shard of a stream.
///
/// The service represents shards as strings of the form
/// `"shardId-000000000001"`; internally Rill keeps only the decimal value.
/// [`FromStr`] and [`fmt::Display`] convert between the two forms exactly:
/// parsing the displayed form always yields the original id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct ShardId(u64);

impl ShardId {
    /// Creates a shard id from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard({})", self.0)
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SHARD_ID_PREFIX}{:0width$}", self.0, width = SHARD_ID_DIGITS)
    }
}

impl FromStr for ShardId {
    type Err = ParseShardIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix(SHARD_ID_PREFIX)
            .ok_or_else(|| ParseShardIdError::MissingPrefix {
                value: s.to_string(),
            })?;

        // `u64::from_str` would also accept a leading `+`; the external
        // form is decimal digits only.
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseShardIdError::InvalidNumber {
                value: s.to_string(),
            });
        }

        digits
            .parse::<u64>()
            .map(Self)
            .map_err(|_| ParseShardIdError::InvalidNumber {
                value: s.to_string(),
            })
    }
}

impl From<u64> for ShardId {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl From<ShardId> for u64 {
    fn from(id: ShardId) -> Self {
        id.get()
    }
}

/// A contiguous range of hash keys, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashKeyRange {
    /// First hash key in the range (inclusive).
    pub start: HashKey,
    /// Last hash key in the range (inclusive).
    pub end: HashKey,
}

impl HashKeyRange {
    /// Creates a new hash-key range.
    ///
    /// # Panics
    ///
    /// Panics if `start > end`.
    #[must_use]
    pub fn new(start: HashKey, end: HashKey) -> Self {
        assert!(start <= end, "hash-key range start must be <= end");
        Self { start, end }
    }

    /// The range covering the entire hash-key space.
    #[must_use]
    pub const fn full() -> Self {
        Self {
            start: 0,
            end: HASH_KEY_MAX,
        }
    }

    /// Returns true if this range contains the given hash key.
    #[must_use]
    pub const fn contains(&self, key: HashKey) -> bool {
        key >= self.start && key <= self.end
    }
}
