//! Rill Core - Strongly-typed identifiers and data model for the Rill
//! producer client.
//!
//! This crate holds the primitive vocabulary shared by the producer
//! pipeline: shard identifiers with their exact external string form, the
//! 128-bit hash-key space, and hash-key ranges. It deliberately contains no
//! I/O; topology discovery and routing live in `rill-routing`.
//!
//! # Design Principles
//!
//! - **Strongly-typed IDs**: a `ShardId` cannot be confused with a raw
//!   integer or a hash key
//! - **Exact external forms**: shard-id conversion round-trips without loss
//! - **No unsafe code**

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod types;

pub use error::ParseShardIdError;
pub use types::{HashKey, HashKeyRange, ShardId, HASH_KEY_MAX};
