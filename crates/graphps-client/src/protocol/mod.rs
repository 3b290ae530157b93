//! Wire protocol between the sampling client and graph table servers.
//!
//! # Requests
//!
//! A request carries a command id, the table and client ids, and a list of
//! opaque parameter blocks. Each block is length-tagged by the transport and
//! holds raw little-endian values with no padding:
//!
//! | Command | Block 0 | Block 1 |
//! |---------|---------|---------|
//! | `GraphSample` | node ids, `u64` each | sample size, `i32` |
//! | `PullGraphList` | start, `i32` | size, `i32` |
//!
//! # Sample responses
//!
//! ```text
//! ┌──────────────┬──────────────────────────┬─────────────────────────────┐
//! │ node_count   │ sizes[node_count]        │ payload                     │
//! │ u64          │ i32 each, bytes per node │ (u64 id, f32 weight) * ...  │
//! └──────────────┴──────────────────────────┴─────────────────────────────┘
//! ```
//!
//! `sizes[i]` is the byte length of node `i`'s edge records, always a
//! multiple of 12, and the sizes add up to the payload length.
//!
//! Responses do not echo node ids. The server answers in exactly the order
//! the request listed the nodes, and the client maps results back to callers
//! by that position alone. A response with a different node count than the
//! request is rejected.
//!
//! # Graph list responses
//!
//! A header-less stream of records, each `u64 id`, `i32 feature_len`, then
//! `feature_len` bytes of feature data.

pub mod codec;
mod cursor;

pub use cursor::ByteCursor;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Commands understood by graph table servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PsCommand {
    /// Sample neighbors for a list of nodes.
    GraphSample,
    /// Pull a slice of a server's node list.
    PullGraphList,
}

impl PsCommand {
    /// Stable numeric code sent on the wire.
    pub const fn code(self) -> i32 {
        match self {
            PsCommand::GraphSample => 101,
            PsCommand::PullGraphList => 102,
        }
    }

    /// Parses a numeric command code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            101 => Some(PsCommand::GraphSample),
            102 => Some(PsCommand::PullGraphList),
            _ => None,
        }
    }
}

impl fmt::Display for PsCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PsCommand::GraphSample => write!(f, "GRAPH_SAMPLE"),
            PsCommand::PullGraphList => write!(f, "PULL_GRAPH_LIST"),
        }
    }
}

/// One outbound call to a graph table server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsRequest {
    /// Command to execute.
    pub cmd: PsCommand,
    /// Target table.
    pub table_id: u32,
    /// Id of the issuing client.
    pub client_id: u32,
    /// Opaque parameter blocks, in command-defined order.
    pub params: Vec<Bytes>,
}

/// Errors raised while decoding a request or response buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// A read would run past the end of the buffer.
    #[error("Truncated buffer at offset {offset}: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    /// The declared node count cannot fit in the buffer.
    #[error("Node count {node_count} exceeds buffer of {buffer_len} bytes")]
    NodeCountTooLarge { node_count: u64, buffer_len: usize },

    /// A per-node size is negative.
    #[error("Negative size {size} for node {node}")]
    NegativeSize { node: usize, size: i32 },

    /// A per-node span is not a whole number of edge records.
    #[error("Size {size} for node {node} is not a multiple of the 12-byte edge record")]
    MisalignedSpan { node: usize, size: usize },

    /// The sizes table disagrees with the payload length.
    #[error("Declared payload of {declared} bytes, found {actual}")]
    PayloadMismatch { declared: usize, actual: usize },

    /// The response answered a different number of nodes than were requested.
    #[error("Expected {expected} nodes in response, got {actual}")]
    NodeCountMismatch { expected: usize, actual: usize },

    /// A request is missing a parameter block or has one of the wrong size.
    #[error("Malformed parameter block {index}: {reason}")]
    BadParam { index: usize, reason: String },
}

/// Errors raised while encoding a response buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// A record's byte length does not fit the `i32` size field.
    #[error("Record {index} spans {bytes} bytes, more than an i32 size field holds")]
    SpanTooLarge { index: usize, bytes: usize },
}
