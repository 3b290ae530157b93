//! Client for sampling graph tables sharded across parameter servers.
//!
//! Node ids are assigned to shards by `id % shard_count`, and shards to
//! servers in contiguous ranges. A batched lookup is split into one call per
//! owning server; the calls run concurrently and their results are written
//! back in the order the caller asked for them.
//!
//! # Modules
//!
//! - [`sharding`]: node to shard to server routing and request bucketing
//! - [`protocol`]: request encoders and bounds-checked response decoders
//! - [`transport`]: the [`PsTransport`] trait the client calls through
//! - [`coordinator`]: parallel calls with a single completion signal
//! - [`aggregator`]: scattering results back into caller order
//! - [`client`]: the [`GraphPsClient`] facade
//! - [`config`], [`logging`], [`metrics`]: ambient setup

pub mod aggregator;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod logging;
pub mod metrics;
pub mod protocol;
pub mod sharding;
pub mod transport;

pub use client::{ClientError, GraphPsClient};
pub use config::{ClientConfig, ConfigError};
pub use coordinator::{CallOutcome, CallReport, CallStatus};
pub use protocol::{DecodeError, EncodeError, PsCommand, PsRequest};
pub use sharding::{ServerIndex, ShardMap};
pub use transport::{PsTransport, TransportError};

pub use graphps_core::{Edge, GraphNode, NodeId, SampleBatch};
