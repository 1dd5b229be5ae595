//! Rill Routing - the producer's shard-topology view.
//!
//! This crate maintains a consistent, self-repairing map of a stream's
//! shard layout and answers, for every record the producer enqueues,
//! "which shard owns this hash key right now?". The enclosing pipeline
//! aggregates records per shard, so a wrong answer costs a service-side
//! rejection and a retry; a slow answer stalls the hot path.
//!
//! # Design
//!
//! - **Lock-light lookups**: the hot path takes a try-read on the index
//!   and degrades to "unknown" instead of ever waiting
//! - **Asynchronous refresh**: topology pages stream in through
//!   [`TopologyClient`] with exponential backoff; no caller blocks on a
//!   refresh
//! - **Reshard-safe ranges**: overlapping parent and child shards are
//!   collapsed so an aggregated payload never spans a shard boundary
//! - **Bounded retention**: descriptors for shards that left the open set
//!   stay queryable for a grace period, then a janitor retires them

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod cache;
mod config;
mod metrics;
mod reconciler;
mod scheduler;
mod shard_map;
mod topology;

pub use config::{
    ConfigError, ShardMapConfig, CLOSED_SHARD_TTL_DEFAULT, MAX_BACKOFF_DEFAULT,
    MIN_BACKOFF_DEFAULT,
};
pub use metrics::{MetricsSink, NullMetrics};
pub use shard_map::ShardMap;
pub use topology::{
    ListShardsRequest, SequenceNumberRange, ShardDescriptor, ShardFilter, ShardListing,
    TopologyClient, TopologyError, TOPOLOGY_PAGE_SIZE_MAX,
};
