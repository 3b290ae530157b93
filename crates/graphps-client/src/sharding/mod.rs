//! Shard topology and request routing.
//!
//! A graph table is split into `shard_count` shards by `node_id % shard_count`,
//! and the shards are laid out over the servers as contiguous ranges.
//!
//! ```text
//!  node ids ──► shard = id % shard_count ──► server = shard / shard_per_server
//!
//!  ┌──────────── server 0 ───────────┐  ┌──────────── server 1 ───────────┐
//!  │ shard 0 │ shard 1 │ ...         │  │ shard k │ shard k+1 │ ...       │
//!  └─────────────────────────────────┘  └─────────────────────────────────┘
//! ```
//!
//! Batched lookups are grouped into one [`RequestBucket`] per destination
//! server so that each server receives exactly one call.

mod bucket;
mod resolver;

pub use bucket::{bucketize, BucketPlan, RequestBucket};
pub use resolver::{ServerIndex, ShardId, ShardMap};
