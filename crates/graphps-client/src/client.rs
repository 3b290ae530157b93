//! Graph sampling client.
//!
//! [`GraphPsClient`] is the public entry point. It routes node ids to the
//! servers that own them, fans batched lookups out as one call per server and
//! reassembles the answers in the caller's order.
//!
//! # Example
//!
//! ```ignore
//! let client = GraphPsClient::from_config(transport, ClientConfig::load(Some("graphps.toml"))?)?;
//! let neighbors = client.batch_sample(0, &[NodeId::new(5), NodeId::new(7)], 10).await?;
//! ```

use crate::aggregator::{absorb_response, single_result, SampleOutput, ScatterError};
use crate::config::{ClientConfig, ConfigError};
use crate::coordinator::{CallCoordinator, CallOutcome, CallReport, CallStatus, OutboundCall, ServerCallStats};
use crate::metrics::{ClientMetrics, MetricsError};
use crate::protocol::codec::{decode_graph_list, decode_sample_response, encode_pull_request, encode_sample_request};
use crate::sharding::{bucketize, ServerIndex, ShardMap};
use crate::transport::{PsTransport, TransportError};
use graphps_core::{GraphNode, NodeId, SampleBatch};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors returned by client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// A single-call operation failed in the transport.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A single-call operation received a malformed response.
    #[error("Decode error: {0}")]
    Decode(#[from] ScatterError),

    /// Every call of a fan-out failed.
    #[error("All {} calls failed", .0.len())]
    AllCallsFailed(Vec<CallOutcome>),

    /// The client is not usable with the requested arguments.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Metrics could not be registered.
    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    /// The operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// The completion signal was lost before every call reported.
    #[error("Operation aborted")]
    Aborted,
}

impl ClientError {
    /// Returns true for response decoding failures.
    pub fn is_decode(&self) -> bool {
        matches!(self, ClientError::Decode(_))
    }

    /// Unwraps an aggregate failure of exactly one call into that call's error.
    fn into_single(self) -> Self {
        match self {
            ClientError::AllCallsFailed(mut outcomes) if outcomes.len() == 1 => {
                match outcomes.pop().map(|o| o.status) {
                    Some(CallStatus::TransportFailed(e)) => ClientError::Transport(e),
                    Some(CallStatus::DecodeFailed(e)) => ClientError::Decode(e),
                    Some(CallStatus::Cancelled) => ClientError::Cancelled,
                    _ => ClientError::Aborted,
                }
            }
            other => other,
        }
    }
}

/// Client for the graph tables of a sharded parameter-server cluster.
pub struct GraphPsClient {
    transport: Arc<dyn PsTransport>,
    config: ClientConfig,
    shard_map: OnceLock<ShardMap>,
    coordinator: CallCoordinator,
    metrics: Arc<ClientMetrics>,
}

impl GraphPsClient {
    /// Creates an uninitialized client. Call [`GraphPsClient::initialize`]
    /// before sampling.
    pub fn new(transport: Arc<dyn PsTransport>, config: ClientConfig) -> Result<Self, ClientError> {
        let metrics = Arc::new(ClientMetrics::new()?);
        Ok(Self::with_metrics(transport, config, metrics))
    }

    /// Creates an uninitialized client that records into `metrics`.
    pub fn with_metrics(transport: Arc<dyn PsTransport>, config: ClientConfig, metrics: Arc<ClientMetrics>) -> Self {
        let servers = &config.cluster.servers;
        if !servers.is_empty() && servers.len() != transport.server_count() {
            tracing::warn!(
                configured = servers.len(),
                transport = transport.server_count(),
                "Configured server list does not match transport"
            );
        }

        let coordinator = CallCoordinator::new(Arc::clone(&transport), config.rpc.call_timeout(), Arc::clone(&metrics));
        Self {
            transport,
            config,
            shard_map: OnceLock::new(),
            coordinator,
            metrics,
        }
    }

    /// Creates a client and initializes it if the configuration names a shard count.
    pub fn from_config(transport: Arc<dyn PsTransport>, config: ClientConfig) -> Result<Self, ClientError> {
        let shard_count = config.cluster.shard_count;
        let client = Self::new(transport, config)?;
        if let Some(shard_count) = shard_count {
            client.initialize(shard_count)?;
        }
        Ok(client)
    }

    /// Fixes the topology: `shard_count` shards over the transport's servers.
    ///
    /// Can be called once; a second call fails with `AlreadyInitialized`.
    pub fn initialize(&self, shard_count: u32) -> Result<(), ClientError> {
        let servers = self.transport.server_count();
        let server_count = u32::try_from(servers).map_err(|_| ConfigError::InvalidTopology {
            shard_count,
            server_count: u32::MAX,
        })?;

        let map = ShardMap::new(shard_count, server_count)?;
        self.shard_map
            .set(map)
            .map_err(|_| ConfigError::AlreadyInitialized)?;

        tracing::info!(
            shard_count = shard_count,
            server_count = server_count,
            client_id = self.config.cluster.client_id,
            "Graph client initialized"
        );
        Ok(())
    }

    /// Returns the shard map, or `NotInitialized`.
    pub fn shard_map(&self) -> Result<&ShardMap, ConfigError> {
        self.shard_map.get().ok_or(ConfigError::NotInitialized)
    }

    /// Returns true once [`GraphPsClient::initialize`] succeeded.
    pub fn is_initialized(&self) -> bool {
        self.shard_map.get().is_some()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the metrics registry.
    pub fn metrics(&self) -> &Arc<ClientMetrics> {
        &self.metrics
    }

    /// Number of servers reachable through the transport.
    pub fn server_count(&self) -> usize {
        self.transport.server_count()
    }

    /// Accumulated call statistics for one server.
    pub fn server_stats(&self, server: ServerIndex) -> ServerCallStats {
        self.coordinator.server_stats(server)
    }

    // =========================================================================
    // Sampling
    // =========================================================================

    /// Samples up to `sample_size` neighbors of one node.
    pub async fn sample(&self, table_id: u32, node_id: NodeId, sample_size: i32) -> Result<SampleBatch, ClientError> {
        self.metrics.record_operation("sample");
        let server = self.shard_map()?.server_for_node(node_id);
        let request = encode_sample_request(table_id, self.config.cluster.client_id, &[node_id], sample_size);

        let slot: Arc<OnceLock<SampleBatch>> = Arc::new(OnceLock::new());
        let sink = Arc::clone(&slot);

        self.coordinator
            .dispatch(
                vec![OutboundCall { server, request }],
                move |_, bytes| {
                    let batch = single_result(decode_sample_response(&bytes)?)?;
                    sink.set(batch).map_err(|_| ScatterError::SlotConflict(0))
                },
                CancellationToken::new(),
            )
            .await
            .map_err(ClientError::into_single)?;

        take_slot(slot).ok_or(ClientError::Aborted)
    }

    /// Samples neighbors of many nodes; results are in input order.
    ///
    /// Buckets whose call failed yield empty batches. The operation fails
    /// only if every call failed.
    pub async fn batch_sample(
        &self,
        table_id: u32,
        node_ids: &[NodeId],
        sample_size: i32,
    ) -> Result<Vec<SampleBatch>, ClientError> {
        let (batches, _) = self
            .batch_sample_with_cancel(table_id, node_ids, sample_size, CancellationToken::new())
            .await?;
        Ok(batches)
    }

    /// Like [`GraphPsClient::batch_sample`], also returning the status of each call.
    pub async fn batch_sample_with_report(
        &self,
        table_id: u32,
        node_ids: &[NodeId],
        sample_size: i32,
    ) -> Result<(Vec<SampleBatch>, CallReport), ClientError> {
        self.batch_sample_with_cancel(table_id, node_ids, sample_size, CancellationToken::new())
            .await
    }

    /// Batched sampling that stops handling responses once `cancel` fires.
    ///
    /// In-flight calls are drained before the operation resolves as `Cancelled`.
    pub async fn batch_sample_with_cancel(
        &self,
        table_id: u32,
        node_ids: &[NodeId],
        sample_size: i32,
        cancel: CancellationToken,
    ) -> Result<(Vec<SampleBatch>, CallReport), ClientError> {
        self.metrics.record_operation("batch_sample");
        let map = self.shard_map()?;
        if node_ids.is_empty() {
            return Ok((Vec::new(), CallReport::default()));
        }

        let plan = bucketize(node_ids, map);
        let client_id = self.config.cluster.client_id;
        let calls: Vec<OutboundCall> = plan
            .buckets
            .iter()
            .map(|bucket| OutboundCall {
                server: bucket.server,
                request: encode_sample_request(table_id, client_id, &bucket.node_ids(), sample_size),
            })
            .collect();

        tracing::debug!(
            table_id = table_id,
            nodes = plan.query_count,
            calls = plan.call_count(),
            "Batch sample"
        );

        let output = Arc::new(SampleOutput::new(plan.query_count));
        let buckets = Arc::new(plan.buckets);
        let sink = Arc::clone(&output);

        let report = self
            .coordinator
            .dispatch(
                calls,
                move |index, bytes| {
                    let bucket = buckets.get(index).ok_or(ScatterError::UnknownCall(index))?;
                    absorb_response(bucket, &bytes, &sink)
                },
                cancel,
            )
            .await?;

        let batches = Arc::try_unwrap(output)
            .map(SampleOutput::into_batches)
            .unwrap_or_else(|shared| shared.snapshot());
        Ok((batches, report))
    }

    // =========================================================================
    // Graph list
    // =========================================================================

    /// Pulls `size` nodes starting at `start` from one server's slice of a table.
    pub async fn pull_graph_list(
        &self,
        table_id: u32,
        server_index: ServerIndex,
        start: i32,
        size: i32,
    ) -> Result<Vec<GraphNode>, ClientError> {
        self.metrics.record_operation("pull_graph_list");
        let server_count = self.transport.server_count();
        if server_index >= server_count {
            return Err(ConfigError::ServerOutOfRange {
                server: server_index,
                server_count,
            }
            .into());
        }

        let request = encode_pull_request(table_id, self.config.cluster.client_id, start, size);
        let slot: Arc<OnceLock<Vec<GraphNode>>> = Arc::new(OnceLock::new());
        let sink = Arc::clone(&slot);

        self.coordinator
            .dispatch(
                vec![OutboundCall {
                    server: server_index,
                    request,
                }],
                move |_, bytes| {
                    let nodes = decode_graph_list(&bytes)?;
                    sink.set(nodes).map_err(|_| ScatterError::SlotConflict(0))
                },
                CancellationToken::new(),
            )
            .await
            .map_err(ClientError::into_single)?;

        let nodes = take_slot(slot).ok_or(ClientError::Aborted)?;
        tracing::debug!(
            table_id = table_id,
            server = server_index,
            start = start,
            returned = nodes.len(),
            "Pulled graph list"
        );
        Ok(nodes)
    }
}

impl std::fmt::Debug for GraphPsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphPsClient")
            .field("shard_map", &self.shard_map.get())
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

fn take_slot<T: Clone>(slot: Arc<OnceLock<T>>) -> Option<T> {
    match Arc::try_unwrap(slot) {
        Ok(slot) => slot.into_inner(),
        Err(shared) => shared.get().cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::{decode_sample_request, encode_graph_list, encode_sample_response};
    use crate::protocol::{PsCommand, PsRequest};
    use async_trait::async_trait;
    use bytes::Bytes;
    use graphps_core::Edge;

    /// Answers every sampled node `n` with a single edge to `n + 1000`.
    struct FixedTransport {
        servers: usize,
    }

    fn status(server: ServerIndex, err: impl std::fmt::Display) -> TransportError {
        TransportError::ServerStatus {
            server,
            status: -1,
            message: err.to_string(),
        }
    }

    #[async_trait]
    impl PsTransport for FixedTransport {
        fn server_count(&self) -> usize {
            self.servers
        }

        async fn call(&self, server: ServerIndex, request: PsRequest) -> Result<Bytes, TransportError> {
            match request.cmd {
                PsCommand::GraphSample => {
                    let (ids, _) = decode_sample_request(&request).map_err(|e| status(server, e))?;
                    let batches: Vec<SampleBatch> = ids
                        .iter()
                        .map(|id| vec![Edge::new(id.as_u64() + 1000, 1.0)])
                        .collect();
                    encode_sample_response(&batches).map_err(|e| status(server, e))
                }
                PsCommand::PullGraphList => {
                    encode_graph_list(&[GraphNode::new(server as u64)]).map_err(|e| status(server, e))
                }
            }
        }
    }

    fn client(servers: usize) -> GraphPsClient {
        GraphPsClient::new(Arc::new(FixedTransport { servers }), ClientConfig::default()).unwrap()
    }

    #[test]
    fn test_initialize_once() {
        let client = client(2);
        assert!(!client.is_initialized());
        client.initialize(4).unwrap();
        assert_eq!(client.shard_map().unwrap().shard_per_server(), 2);

        let err = client.initialize(8).unwrap_err();
        assert!(matches!(err, ClientError::Configuration(ConfigError::AlreadyInitialized)));
    }

    #[test]
    fn test_from_config_initializes() {
        let mut config = ClientConfig::default();
        config.cluster.shard_count = Some(10);
        let client = GraphPsClient::from_config(Arc::new(FixedTransport { servers: 3 }), config).unwrap();
        assert_eq!(client.shard_map().unwrap().shard_count(), 10);
    }

    #[test]
    fn test_zero_shards_rejected() {
        let err = client(2).initialize(0).unwrap_err();
        assert!(matches!(
            err,
            ClientError::Configuration(ConfigError::InvalidTopology { shard_count: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_sample_before_initialize() {
        let err = client(2).sample(0, NodeId::new(1), 5).await.unwrap_err();
        assert!(matches!(err, ClientError::Configuration(ConfigError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_sample_single_node() {
        let client = client(2);
        client.initialize(4).unwrap();
        let batch = client.sample(0, NodeId::new(7), 5).await.unwrap();
        assert_eq!(batch, vec![Edge::new(1007u64, 1.0)]);
        assert_eq!(client.server_stats(1).successes, 1);
    }

    #[tokio::test]
    async fn test_batch_sample_empty_input() {
        let client = client(2);
        client.initialize(4).unwrap();
        let (batches, report) = client.batch_sample_with_report(0, &[], 5).await.unwrap();
        assert!(batches.is_empty());
        assert!(report.calls.is_empty());
    }

    #[tokio::test]
    async fn test_pull_graph_list_out_of_range() {
        let err = client(2).pull_graph_list(0, 2, 0, 10).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Configuration(ConfigError::ServerOutOfRange { server: 2, server_count: 2 })
        ));
    }

    #[tokio::test]
    async fn test_pull_graph_list() {
        let nodes = client(3).pull_graph_list(0, 1, 0, 10).await.unwrap();
        assert_eq!(nodes, vec![GraphNode::new(1u64)]);
    }

    #[test]
    fn test_into_single_unwraps_one_outcome() {
        let err = ClientError::AllCallsFailed(vec![CallOutcome {
            server: 0,
            status: CallStatus::TransportFailed(TransportError::Timeout { timeout_ms: 10 }),
        }])
        .into_single();
        assert!(matches!(err, ClientError::Transport(TransportError::Timeout { timeout_ms: 10 })));

        let err = ClientError::AllCallsFailed(vec![
            CallOutcome {
                server: 0,
                status: CallStatus::Aborted,
            },
            CallOutcome {
                server: 1,
                status: CallStatus::Aborted,
            },
        ])
        .into_single();
        assert_eq!(err.to_string(), "All 2 calls failed");
    }
}
