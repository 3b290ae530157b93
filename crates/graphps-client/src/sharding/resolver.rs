//! Shard resolution for node IDs.
//!
//! Maps nodes to shards by modulo, and shards to servers by contiguous range.

use crate::config::ConfigError;
use graphps_core::NodeId;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Unique identifier for a shard.
pub type ShardId = u32;

/// Index of a server in the cluster's server list.
pub type ServerIndex = usize;

/// Immutable shard topology: how many shards exist and how many servers host them.
///
/// Shards are assigned to servers as contiguous ranges of `shard_per_server`
/// shards each. When `shard_count` is not a multiple of `server_count` the
/// last server owns a shorter range, which may even be empty.
///
/// # Example
///
/// ```
/// use graphps_client::sharding::ShardMap;
/// use graphps_core::NodeId;
///
/// let map = ShardMap::new(4, 2).unwrap();
/// assert_eq!(map.shard_per_server(), 2);
/// assert_eq!(map.server_for_node(NodeId::new(5)), 0);
/// assert_eq!(map.server_for_node(NodeId::new(7)), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardMap {
    shard_count: u32,
    server_count: u32,
}

impl ShardMap {
    /// Creates a shard map, rejecting zero shards or zero servers.
    pub fn new(shard_count: u32, server_count: u32) -> Result<Self, ConfigError> {
        if shard_count == 0 || server_count == 0 {
            return Err(ConfigError::InvalidTopology {
                shard_count,
                server_count,
            });
        }
        Ok(Self {
            shard_count,
            server_count,
        })
    }

    /// Returns the total number of shards.
    #[inline]
    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    /// Returns the number of servers.
    #[inline]
    pub fn server_count(&self) -> u32 {
        self.server_count
    }

    /// Number of shards per server, rounded up.
    #[inline]
    pub fn shard_per_server(&self) -> u32 {
        self.shard_count.div_ceil(self.server_count)
    }

    /// Returns the shard owning a node.
    #[inline]
    pub fn shard_for_node(&self, node_id: NodeId) -> ShardId {
        (node_id.as_u64() % self.shard_count as u64) as ShardId
    }

    /// Returns the server hosting a shard.
    #[inline]
    pub fn server_for_shard(&self, shard: ShardId) -> ServerIndex {
        (shard / self.shard_per_server()) as ServerIndex
    }

    /// Returns the server owning a node.
    #[inline]
    pub fn server_for_node(&self, node_id: NodeId) -> ServerIndex {
        self.server_for_shard(self.shard_for_node(node_id))
    }

    /// Returns the range of shards hosted by a server.
    ///
    /// Empty for servers past the end of an over-provisioned cluster.
    pub fn shards_for_server(&self, server: ServerIndex) -> Range<ShardId> {
        let per_server = self.shard_per_server() as u64;
        let start = (server as u64 * per_server).min(self.shard_count as u64);
        let end = (start + per_server).min(self.shard_count as u64);
        start as ShardId..end as ShardId
    }

    /// Returns a description of the topology for debugging.
    pub fn describe(&self) -> String {
        format!(
            "ShardMap(shards={}, servers={}, per_server={})",
            self.shard_count,
            self.server_count,
            self.shard_per_server()
        )
    }
}
