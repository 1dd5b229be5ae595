//! Topology discovery interface.
//!
//! The shard map learns the stream's layout through [`TopologyClient`], a
//! paginated listing of shard descriptors. The transport behind the trait
//! (HTTP, RPC, an in-memory fake) is the caller's concern; the shard map
//! only drives the pagination and interprets the descriptors.

use async_trait::async_trait;
use thiserror::Error;

use rill_core::HashKeyRange;

/// Cap on the number of shards requested per topology page.
pub const TOPOLOGY_PAGE_SIZE_MAX: u32 = 1000;

/// Server-side filter applied to the first page of a shard listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardFilter {
    /// Only shards currently open for writes.
    AtLatest,
}

/// One page of a paginated shard-listing request.
///
/// The first page targets the stream by name (and ARN when known) with a
/// server-side filter; follow-up pages carry only the continuation token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListShardsRequest {
    /// Stream to list. Set on the first page only.
    pub stream_name: Option<String>,
    /// Stream ARN. Set on the first page, when configured.
    pub stream_arn: Option<String>,
    /// Server-side shard filter. Set on the first page only.
    pub filter: Option<ShardFilter>,
    /// Continuation token from the previous page. Follow-up pages only.
    pub next_token: Option<String>,
    /// Page size cap.
    pub max_results: u32,
}

impl ListShardsRequest {
    /// Builds the first page of a listing for the given stream, filtered
    /// to shards that are open at latest.
    #[must_use]
    pub fn initial(stream_name: &str, stream_arn: Option<&str>) -> Self {
        Self {
            stream_name: Some(stream_name.to_string()),
            stream_arn: stream_arn.map(ToString::to_string),
            filter: Some(ShardFilter::AtLatest),
            next_token: None,
            max_results: TOPOLOGY_PAGE_SIZE_MAX,
        }
    }

    /// Builds a follow-up page carrying a continuation token.
    #[must_use]
    pub const fn continuation(token: String) -> Self {
        Self {
            stream_name: None,
            stream_arn: None,
            filter: None,
            next_token: Some(token),
            max_results: TOPOLOGY_PAGE_SIZE_MAX,
        }
    }
}

/// The sequence-number window a shard has accepted writes under.
///
/// A present ending sequence number means the shard is closed: it no
/// longer accepts writes, though in-flight records may still reference it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceNumberRange {
    /// Sequence number of the first record the shard accepted.
    pub starting_sequence_number: String,
    /// Sequence number of the last record, once the shard is closed.
    pub ending_sequence_number: Option<String>,
}

/// A shard as reported by the topology source.
///
/// The shard map interprets the id, the hash-key range, and the
/// open/closed flag; everything else about a shard is opaque to routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDescriptor {
    /// External shard id, e.g. `"shardId-000000000001"`.
    pub shard_id: String,
    /// The hash keys this shard owns.
    pub hash_key_range: HashKeyRange,
    /// The shard's write window.
    pub sequence_number_range: SequenceNumberRange,
}

impl ShardDescriptor {
    /// Returns true if the shard has stopped accepting writes.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.sequence_number_range.ending_sequence_number.is_some()
    }
}

/// One page of shard descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardListing {
    /// Shards on this page, in service order.
    pub shards: Vec<ShardDescriptor>,
    /// Token for the next page; absent on the last page.
    pub next_token: Option<String>,
}

/// Asynchronous, paginated source of the stream's shard layout.
///
/// Implementations must be safe to call from the refresh driver task;
/// pages of one listing are requested sequentially, never concurrently.
#[async_trait]
pub trait TopologyClient: Send + Sync + 'static {
    /// Fetches one page of the shard listing.
    ///
    /// # Errors
    ///
    /// Returns an error when the page cannot be served; the shard map
    /// abandons the whole refresh and retries with backoff.
    async fn list_shards(&self, request: ListShardsRequest)
        -> Result<ShardListing, TopologyError>;
}

/// Errors from the topology source.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// The service answered with an error.
    #[error("service error {code}: {message}")]
    Service {
        /// Service error code, e.g. a throttling or access code.
        code: String,
        /// Human-readable detail.
        message: String,
    },

    /// The request never reached the service.
    #[error("transport failure: {message}")]
    Transport {
        /// What went wrong on the wire.
        message: String,
    },

    /// The request timed out.
    #[error("request timed out after {waited_ms}ms")]
    Timeout {
        /// How long the transport waited.
        waited_ms: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_request_shape() {
        let request = ListShardsRequest::initial("ticks", Some("arn:ticks"));
        assert_eq!(request.stream_name.as_deref(), Some("ticks"));
        assert_eq!(request.stream_arn.as_deref(), Some("arn:ticks"));
        assert_eq!(request.filter, Some(ShardFilter::AtLatest));
        assert!(request.next_token.is_none());
        assert_eq!(request.max_results, TOPOLOGY_PAGE_SIZE_MAX);
    }

    #[test]
    fn test_initial_request_without_arn() {
        let request = ListShardsRequest::initial("ticks", None);
        assert!(request.stream_arn.is_none());
    }

    #[test]
    fn test_continuation_request_shape() {
        let request = ListShardsRequest::continuation("token-1".to_string());
        assert!(request.stream_name.is_none());
        assert!(request.stream_arn.is_none());
        assert!(request.filter.is_none());
        assert_eq!(request.next_token.as_deref(), Some("token-1"));
        assert_eq!(request.max_results, TOPOLOGY_PAGE_SIZE_MAX);
    }

    #[test]
    fn test_descriptor_closed_flag() {
        let mut descriptor = ShardDescriptor {
            shard_id: "shardId-000000000001".to_string(),
            hash_key_range: HashKeyRange::new(0, 100),
            sequence_number_range: SequenceNumberRange {
                starting_sequence_number: "495903382714902566".to_string(),
                ending_sequence_number: None,
            },
        };
        assert!(!descriptor.is_closed());

        descriptor.sequence_number_range.ending_sequence_number =
            Some("495903382714902599".to_string());
        assert!(descriptor.is_closed());
    }

    #[test]
    fn test_error_display() {
        let err = TopologyError::Service {
            code: "LimitExceededException".to_string(),
            message: "rate exceeded".to_string(),
        };
        assert_eq!(
            format!("{err}"),
            "service error LimitExceededException: rate exceeded"
        );
    }
}
