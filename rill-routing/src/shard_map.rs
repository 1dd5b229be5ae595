//! Shard map - a self-repairing view of the stream's shard topology.
//!
//! The map answers "which shard owns this hash key?" for every record the
//! producer enqueues, from a sorted index of disjoint hash-key ranges.
//! Topology refreshes run on a dedicated driver task fed by a trigger
//! channel: the constructor, the invalidation path, and the retry timer
//! all request a refresh through the same guarded transition, so at most
//! one pagination chain is ever in flight. A janitor task retires cache
//! entries for shards that have left the open set.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info};

use rill_core::{HashKey, HashKeyRange, ParseShardIdError, ShardId};

use crate::cache::ShardCache;
use crate::config::{ConfigError, ShardMapConfig};
use crate::metrics::MetricsSink;
use crate::reconciler::{build_disjoint_cover, CoverEntry};
use crate::scheduler::ScheduledTask;
use crate::topology::{ListShardsRequest, ShardDescriptor, TopologyClient, TopologyError};

/// Refresh lifecycle of the shard view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// No usable view; a refresh is needed or already scheduled.
    Invalid,
    /// A pagination chain is in flight.
    Updating,
    /// The lookup index is current and serving queries.
    Ready,
}

/// The lookup index together with the refresh state it was committed
/// under. Guarded as one unit so readers never observe a half-updated
/// view.
#[derive(Debug)]
struct RoutingTable {
    state: State,
    /// Disjoint ranges, ascending by ending hash key.
    entries: Vec<CoverEntry>,
    /// Shard ids returned by the most recent successful refresh.
    open: HashSet<ShardId>,
    /// When the current view was committed.
    updated_at: Instant,
}

/// Shared state behind the public handle. Background tasks hold weak
/// references, so dropping the last [`ShardMap`] shuts them down.
struct Inner {
    config: ShardMapConfig,
    metrics: Arc<dyn MetricsSink>,
    routing: RwLock<RoutingTable>,
    cache: RwLock<ShardCache>,
    refresh_tx: mpsc::UnboundedSender<()>,
}

/// A consistent, self-repairing map from hash keys to open shards.
///
/// Constructing the map immediately starts the first topology refresh;
/// lookups return `None` until it completes. The map never surfaces
/// refresh failures to callers: it retries with exponential backoff and
/// callers simply keep getting `None` until a refresh lands.
pub struct ShardMap {
    inner: Arc<Inner>,
}

impl ShardMap {
    /// Creates the map and triggers the initial refresh.
    ///
    /// Must be called from within a tokio runtime; the refresh driver and
    /// the cache janitor are spawned onto it.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn new(
        client: Arc<dyn TopologyClient>,
        config: ShardMapConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            routing: RwLock::new(RoutingTable {
                state: State::Invalid,
                entries: Vec::new(),
                open: HashSet::new(),
                updated_at: Instant::now(),
            }),
            cache: RwLock::new(ShardCache::new()),
            config,
            metrics,
            refresh_tx,
        });

        let driver = RefreshDriver::new(Arc::downgrade(&inner), client, refresh_rx);
        tokio::spawn(driver.run());
        tokio::spawn(janitor(
            Arc::downgrade(&inner),
            inner.config.closed_shard_ttl / 2,
        ));

        inner.request_refresh();
        Ok(Self { inner })
    }

    /// Returns the shard owning `hash_key`, or `None` when the view is
    /// not ready or the index is momentarily held by a writer.
    ///
    /// This is the enqueue hot path: it never waits on a lock and never
    /// allocates. Callers fall back to their own routing policy on `None`.
    #[must_use]
    pub fn shard_id(&self, hash_key: HashKey) -> Option<ShardId> {
        let Ok(table) = self.inner.routing.try_read() else {
            return None;
        };
        if table.state != State::Ready {
            return None;
        }

        let at = table
            .entries
            .partition_point(|entry| entry.end_hash_key < hash_key);
        if let Some(entry) = table.entries.get(at) {
            Some(entry.shard_id)
        } else {
            error!(
                hash_key = %hash_key,
                "no index entry covers hash key; shard map is inconsistent"
            );
            None
        }
    }

    /// Returns the full descriptor for a shard, if still cached.
    ///
    /// Used by the retry path to decide whether a record that landed on
    /// an unexpected shard was actually within that shard's range. Takes
    /// a short read lock on the cache; this is off the enqueue path.
    #[must_use]
    pub fn get_shard(&self, shard_id: ShardId) -> Option<ShardDescriptor> {
        read_lock(&self.inner.cache).get(shard_id).cloned()
    }

    /// Reports that a record landed on a different shard than the lookup
    /// predicted, possibly scheduling a refresh.
    ///
    /// The refresh is only triggered when the observation post-dates the
    /// current view, the map is ready, and the predicted shard (when
    /// given) is still in the open set; otherwise the mis-route is already
    /// explained by a refresh that happened in between, and piling on
    /// another one would let in-flight retries stampede the topology
    /// source.
    pub fn invalidate(&self, seen_at: Instant, predicted_shard: Option<ShardId>) {
        let mut table = write_lock(&self.inner.routing);
        if table.state != State::Ready || seen_at <= table.updated_at {
            return;
        }
        if let Some(predicted) = predicted_shard {
            // The predicted shard already left our view: the view has
            // moved past the observation and a refresh won't add anything.
            if !table.open.contains(&predicted) {
                return;
            }
        }

        let gap = seen_at - table.updated_at;
        info!(
            stream = %self.inner.config.stream_name,
            gap_ms = gap.as_millis() as u64,
            predicted = ?predicted_shard,
            "routing contradicted by observed delivery; refreshing shard map"
        );

        table.state = State::Updating;
        drop(table);
        let _ = self.inner.refresh_tx.send(());
    }
}

impl Inner {
    /// Transitions to UPDATING and wakes the driver, unless a refresh is
    /// already in flight.
    fn request_refresh(&self) {
        let mut table = write_lock(&self.routing);
        if table.state == State::Updating {
            return;
        }
        table.state = State::Updating;
        drop(table);
        let _ = self.refresh_tx.send(());
    }

    /// One janitor pass: evicts descriptors for shards outside the open
    /// set, once the current view has been stable for the full retention
    /// window.
    fn sweep_cache(&self) {
        let open = {
            let table = read_lock(&self.routing);
            if table.state != State::Ready
                || table.updated_at.elapsed() <= self.config.closed_shard_ttl
            {
                return;
            }
            table.open.clone()
        };

        let mut cache = write_lock(&self.cache);
        if !cache.needs_cleanup() {
            return;
        }
        let evicted = cache.evict_not_open(&open);
        drop(cache);

        if evicted > 0 {
            info!(
                stream = %self.config.stream_name,
                evicted,
                "evicted descriptors for closed shards"
            );
        } else {
            debug!(stream = %self.config.stream_name, "cache sweep found nothing to evict");
        }
    }
}

/// Why a refresh attempt was abandoned.
#[derive(Debug, Error)]
enum RefreshError {
    /// The topology source failed to serve a page.
    #[error(transparent)]
    Topology(#[from] TopologyError),
    /// A page carried a shard id the core cannot parse.
    #[error(transparent)]
    ShardId(#[from] ParseShardIdError),
}

/// Serializes topology refreshes and owns the retry/backoff state.
///
/// The driver is the only writer of the lookup index. It runs until every
/// trigger sender is gone, which happens when the owning [`ShardMap`] is
/// dropped.
struct RefreshDriver {
    inner: Weak<Inner>,
    client: Arc<dyn TopologyClient>,
    triggers: mpsc::UnboundedReceiver<()>,
    backoff: Duration,
    retry: Option<ScheduledTask>,
}

impl RefreshDriver {
    fn new(
        inner: Weak<Inner>,
        client: Arc<dyn TopologyClient>,
        triggers: mpsc::UnboundedReceiver<()>,
    ) -> Self {
        let backoff = inner
            .upgrade()
            .map_or(Duration::ZERO, |inner| inner.config.min_backoff);
        Self {
            inner,
            client,
            triggers,
            backoff,
            retry: None,
        }
    }

    async fn run(mut self) {
        while self.triggers.recv().await.is_some() {
            let Some(inner) = self.inner.upgrade() else {
                break;
            };
            // A trigger supersedes any retry still pending from an
            // earlier failure.
            if let Some(retry) = &self.retry {
                retry.cancel();
            }

            inner.metrics.refresh_started();
            match self.refresh_once(&inner).await {
                Ok(shard_count) => {
                    self.backoff = inner.config.min_backoff;
                    inner.metrics.refresh_succeeded(shard_count);
                }
                Err(err) => self.handle_failure(&inner, &err),
            }
        }
    }

    /// Runs one full refresh: paginate, reconcile, commit.
    ///
    /// The staging buffer is local to the attempt, so a failed refresh
    /// leaves no trace and the previous view keeps serving (or stays
    /// invalid) untouched.
    async fn refresh_once(&self, inner: &Inner) -> Result<usize, RefreshError> {
        info!(stream = %inner.config.stream_name, "refreshing shard map");

        let mut staging: Vec<ShardDescriptor> = Vec::new();
        let mut request = ListShardsRequest::initial(
            &inner.config.stream_name,
            inner.config.stream_arn.as_deref(),
        );
        loop {
            let listing = self.client.list_shards(request).await?;
            staging.extend(listing.shards);
            match listing.next_token {
                Some(token) => request = ListShardsRequest::continuation(token),
                None => break,
            }
        }

        let mut shards = Vec::with_capacity(staging.len());
        for descriptor in staging {
            let shard_id: ShardId = descriptor.shard_id.parse()?;
            shards.push((shard_id, descriptor));
        }

        let ranges: Vec<(ShardId, HashKeyRange)> = shards
            .iter()
            .map(|&(shard_id, ref descriptor)| (shard_id, descriptor.hash_key_range))
            .collect();
        let entries = build_disjoint_cover(&ranges);
        let open: HashSet<ShardId> = shards.iter().map(|&(shard_id, _)| shard_id).collect();
        let shard_count = entries.len();

        // Descriptors land in the cache before the index goes live, so a
        // reader that sees READY can always resolve the ids it is handed.
        write_lock(&inner.cache).store_refresh(shards);

        let mut table = write_lock(&inner.routing);
        table.entries = entries;
        table.open = open;
        table.state = State::Ready;
        table.updated_at = Instant::now();
        drop(table);

        match &inner.config.stream_arn {
            Some(arn) => info!(
                stream = %inner.config.stream_name,
                arn = %arn,
                shards = shard_count,
                "shard map refreshed"
            ),
            None => info!(
                stream = %inner.config.stream_name,
                shards = shard_count,
                "shard map refreshed"
            ),
        }
        Ok(shard_count)
    }

    fn handle_failure(&mut self, inner: &Arc<Inner>, err: &RefreshError) {
        let delay = self.backoff;
        error!(
            stream = %inner.config.stream_name,
            error = %err,
            retry_in_ms = delay.as_millis() as u64,
            "shard map refresh failed"
        );

        write_lock(&inner.routing).state = State::Invalid;
        inner.metrics.refresh_failed();

        match &self.retry {
            Some(retry) => retry.reschedule(delay),
            None => {
                let weak = Weak::clone(&self.inner);
                self.retry = Some(ScheduledTask::schedule(delay, move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.request_refresh();
                    }
                }));
            }
        }

        self.backoff = next_backoff(delay, inner.config.min_backoff, inner.config.max_backoff);
    }
}

/// Multiplies the delay by 1.5, clamped to the configured window.
fn next_backoff(current: Duration, min: Duration, max: Duration) -> Duration {
    (current.saturating_mul(3) / 2).clamp(min, max)
}

/// Periodic cache sweeper. Exits once the owning map is gone.
async fn janitor(inner: Weak<Inner>, period: Duration) {
    loop {
        tokio::time::sleep(period).await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.sweep_cache();
    }
}

/// Acquires a read lock, absorbing poisoning from a panicked writer.
fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

/// Acquires a write lock, absorbing poisoning from a panicked writer.
fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
