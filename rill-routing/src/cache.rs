//! Shard descriptor cache.
//!
//! Secondary mapping from shard id to the full descriptor, used by the
//! retry path to classify mis-routes. Entries outlive the refresh that
//! produced them: a shard that just closed must stay resolvable while
//! records routed to it are still in flight, so eviction is deferred to
//! the janitor once the grace period has passed.

use std::collections::{HashMap, HashSet};

use rill_core::ShardId;

use crate::topology::ShardDescriptor;

/// Cache of shard descriptors keyed by shard id.
#[derive(Debug, Default)]
pub(crate) struct ShardCache {
    entries: HashMap<ShardId, ShardDescriptor>,
    /// Set when a refresh may have orphaned entries; cleared by eviction.
    needs_cleanup: bool,
}

impl ShardCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the descriptor for the given shard, if cached.
    pub fn get(&self, shard_id: ShardId) -> Option<&ShardDescriptor> {
        self.entries.get(&shard_id)
    }

    /// Absorbs the descriptors of a successful refresh.
    ///
    /// Existing entries for other shards are kept; they become eviction
    /// candidates, so the cache is flagged for a cleanup pass.
    pub fn store_refresh(
        &mut self,
        shards: impl IntoIterator<Item = (ShardId, ShardDescriptor)>,
    ) {
        for (shard_id, descriptor) in shards {
            self.entries.insert(shard_id, descriptor);
        }
        self.needs_cleanup = true;
    }

    /// Returns true if a refresh has flagged the cache for cleanup.
    pub const fn needs_cleanup(&self) -> bool {
        self.needs_cleanup
    }

    /// Removes every entry whose shard is not in the open set and clears
    /// the cleanup flag. Returns the number of evicted entries.
    pub fn evict_not_open(&mut self, open: &HashSet<ShardId>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|shard_id, _| open.contains(shard_id));
        self.needs_cleanup = false;
        before - self.entries.len()
    }

    /// Number of cached descriptors.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
