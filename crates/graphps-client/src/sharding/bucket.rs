//! Request bucketing for batched lookups.
//!
//! Groups the node IDs of one logical call by destination server while
//! remembering each ID's position in the caller's input.

use super::resolver::{ServerIndex, ShardMap};
use graphps_core::NodeId;
use std::collections::HashMap;

/// The node IDs of one logical call routed to a single server.
///
/// Entries keep the order in which they appeared in the caller's input.
/// One bucket is sent as exactly one RPC, and the server answers
/// positionally in the same node order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBucket {
    /// Destination server.
    pub server: ServerIndex,
    /// `(original_query_index, node_id)` pairs in first-seen order.
    pub entries: Vec<(usize, NodeId)>,
}

impl RequestBucket {
    /// Creates an empty bucket for a server.
    pub fn new(server: ServerIndex) -> Self {
        Self {
            server,
            entries: Vec::new(),
        }
    }

    /// Returns the node IDs in wire order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.entries.iter().map(|(_, id)| *id).collect()
    }

    /// Returns the caller positions in wire order.
    pub fn query_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.iter().map(|(idx, _)| *idx)
    }

    /// Number of nodes routed to this server.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no node was routed here.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Dispatch plan for one logical call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketPlan {
    /// Buckets in dispatch order (first occurrence of each server).
    pub buckets: Vec<RequestBucket>,
    /// Number of node IDs in the caller's input.
    pub query_count: usize,
}

impl BucketPlan {
    /// Servers in the order their calls are issued.
    pub fn dispatch_order(&self) -> Vec<ServerIndex> {
        self.buckets.iter().map(|b| b.server).collect()
    }

    /// Number of RPCs this plan issues.
    pub fn call_count(&self) -> usize {
        self.buckets.len()
    }

    /// Returns the bucket headed for a server, if any.
    pub fn bucket_for(&self, server: ServerIndex) -> Option<&RequestBucket> {
        self.buckets.iter().find(|b| b.server == server)
    }
}

/// Groups node IDs by owning server.
///
/// Servers appear in the plan in the order they are first touched by the
/// input, not in numeric order, and every input position lands in exactly
/// one bucket.
pub fn bucketize(node_ids: &[NodeId], shard_map: &ShardMap) -> BucketPlan {
    let mut slot_of_server: HashMap<ServerIndex, usize> = HashMap::new();
    let mut buckets: Vec<RequestBucket> = Vec::new();

    for (query_idx, &node_id) in node_ids.iter().enumerate() {
        let server = shard_map.server_for_node(node_id);
        let slot = *slot_of_server.entry(server).or_insert_with(|| {
            buckets.push(RequestBucket::new(server));
            buckets.len() - 1
        });
        buckets[slot].entries.push((query_idx, node_id));
    }

    BucketPlan {
        buckets,
        query_count: node_ids.len(),
    }
}
