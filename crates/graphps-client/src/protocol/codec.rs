//! Encoders and decoders for graph table requests and responses.
//!
//! The client side uses the request encoders and response decoders. The
//! server-side halves (request decoders, response encoders) produce the same
//! layouts and back test fixtures and embedded servers.

use super::{ByteCursor, DecodeError, EncodeError, PsCommand, PsRequest};
use bytes::{BufMut, Bytes, BytesMut};
use graphps_core::{Edge, GraphNode, NodeId, SampleBatch};

// =============================================================================
// Requests
// =============================================================================

/// Builds a `GraphSample` request for a list of nodes.
pub fn encode_sample_request(
    table_id: u32,
    client_id: u32,
    node_ids: &[NodeId],
    sample_size: i32,
) -> PsRequest {
    let mut ids = BytesMut::with_capacity(node_ids.len() * 8);
    for id in node_ids {
        ids.put_u64_le(id.as_u64());
    }

    PsRequest {
        cmd: PsCommand::GraphSample,
        table_id,
        client_id,
        params: vec![ids.freeze(), encode_i32(sample_size)],
    }
}

/// Builds a `PullGraphList` request for `size` nodes starting at `start`.
pub fn encode_pull_request(table_id: u32, client_id: u32, start: i32, size: i32) -> PsRequest {
    PsRequest {
        cmd: PsCommand::PullGraphList,
        table_id,
        client_id,
        params: vec![encode_i32(start), encode_i32(size)],
    }
}

fn encode_i32(value: i32) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_i32_le(value);
    buf.freeze()
}

fn param<'a>(request: &'a PsRequest, index: usize) -> Result<&'a [u8], DecodeError> {
    request
        .params
        .get(index)
        .map(|p| &p[..])
        .ok_or_else(|| DecodeError::BadParam {
            index,
            reason: "missing".to_string(),
        })
}

fn param_i32(request: &PsRequest, index: usize) -> Result<i32, DecodeError> {
    let block = param(request, index)?;
    if block.len() != 4 {
        return Err(DecodeError::BadParam {
            index,
            reason: format!("expected 4 bytes, got {}", block.len()),
        });
    }
    ByteCursor::new(block).read_i32_le()
}

/// Parses a `GraphSample` request into its node ids and sample size.
pub fn decode_sample_request(request: &PsRequest) -> Result<(Vec<NodeId>, i32), DecodeError> {
    let block = param(request, 0)?;
    if block.len() % 8 != 0 {
        return Err(DecodeError::BadParam {
            index: 0,
            reason: format!("{} bytes is not a whole number of node ids", block.len()),
        });
    }

    let mut cursor = ByteCursor::new(block);
    let mut node_ids = Vec::with_capacity(block.len() / 8);
    while !cursor.is_exhausted() {
        node_ids.push(NodeId::new(cursor.read_u64_le()?));
    }

    Ok((node_ids, param_i32(request, 1)?))
}

/// Parses a `PullGraphList` request into `(start, size)`.
pub fn decode_pull_request(request: &PsRequest) -> Result<(i32, i32), DecodeError> {
    Ok((param_i32(request, 0)?, param_i32(request, 1)?))
}

// =============================================================================
// Sample responses
// =============================================================================

/// Converts a record length to its `i32` size field.
pub(crate) fn size_field(index: usize, bytes: usize) -> Result<i32, EncodeError> {
    i32::try_from(bytes).map_err(|_| EncodeError::SpanTooLarge { index, bytes })
}

/// Encodes per-node samples in the sample response layout.
///
/// Fails if a node's edge records exceed `i32::MAX` bytes.
pub fn encode_sample_response(batches: &[SampleBatch]) -> Result<Bytes, EncodeError> {
    let edge_total: usize = batches.iter().map(Vec::len).sum();
    let mut buf = BytesMut::with_capacity(8 + batches.len() * 4 + edge_total * Edge::WIRE_SIZE);

    buf.put_u64_le(batches.len() as u64);
    for (index, batch) in batches.iter().enumerate() {
        let bytes = batch.len().saturating_mul(Edge::WIRE_SIZE);
        buf.put_i32_le(size_field(index, bytes)?);
    }
    for edge in batches.iter().flatten() {
        buf.put_u64_le(edge.neighbor.as_u64());
        buf.put_f32_le(edge.weight);
    }

    Ok(buf.freeze())
}

/// Decodes a sample response into one [`SampleBatch`] per requested node.
///
/// The whole header is validated against the buffer length before any edge
/// is read, so a malformed buffer yields an error and no partial output.
pub fn decode_sample_response(buf: &[u8]) -> Result<Vec<SampleBatch>, DecodeError> {
    let mut cursor = ByteCursor::new(buf);
    let node_count = cursor.read_u64_le()?;

    let too_large = DecodeError::NodeCountTooLarge {
        node_count,
        buffer_len: buf.len(),
    };
    let node_count = usize::try_from(node_count).map_err(|_| too_large.clone())?;
    match node_count.checked_mul(4) {
        Some(table_len) if table_len <= cursor.remaining() => {}
        _ => return Err(too_large),
    }

    let mut sizes = Vec::with_capacity(node_count);
    let mut declared = 0usize;
    for node in 0..node_count {
        let raw = cursor.read_i32_le()?;
        let size = usize::try_from(raw).map_err(|_| DecodeError::NegativeSize { node, size: raw })?;
        if size % Edge::WIRE_SIZE != 0 {
            return Err(DecodeError::MisalignedSpan { node, size });
        }
        declared = declared.saturating_add(size);
        sizes.push(size);
    }

    if declared != cursor.remaining() {
        return Err(DecodeError::PayloadMismatch {
            declared,
            actual: cursor.remaining(),
        });
    }

    let mut batches = Vec::with_capacity(node_count);
    for size in sizes {
        let mut span = cursor.sub_cursor(size)?;
        let mut batch = Vec::with_capacity(size / Edge::WIRE_SIZE);
        while !span.is_exhausted() {
            let neighbor = span.read_u64_le()?;
            let weight = span.read_f32_le()?;
            batch.push(Edge::new(neighbor, weight));
        }
        batches.push(batch);
    }

    Ok(batches)
}

// =============================================================================
// Graph list responses
// =============================================================================

/// Encodes nodes as a graph list record stream.
///
/// Fails if a feature exceeds `i32::MAX` bytes.
pub fn encode_graph_list(nodes: &[GraphNode]) -> Result<Bytes, EncodeError> {
    let total: usize = nodes.iter().map(GraphNode::wire_size).sum();
    let mut buf = BytesMut::with_capacity(total);
    for (index, node) in nodes.iter().enumerate() {
        buf.put_u64_le(node.id.as_u64());
        buf.put_i32_le(size_field(index, node.feature.len())?);
        buf.put_slice(&node.feature);
    }
    Ok(buf.freeze())
}

/// Decodes a graph list record stream until the buffer is exhausted.
pub fn decode_graph_list(buf: &[u8]) -> Result<Vec<GraphNode>, DecodeError> {
    let mut cursor = ByteCursor::new(buf);
    let mut nodes = Vec::new();

    while !cursor.is_exhausted() {
        let id = cursor.read_u64_le()?;
        let raw = cursor.read_i32_le()?;
        let len = usize::try_from(raw).map_err(|_| DecodeError::NegativeSize {
            node: nodes.len(),
            size: raw,
        })?;
        let feature = cursor.read_slice(len)?.to_vec();
        nodes.push(GraphNode::with_feature(id, feature));
    }

    Ok(nodes)
}

// =============================================================================
// Tests
// =============================================================================
