//! # GraphPS Core
//!
//! Core types shared by the GraphPS sampling client and anything that speaks
//! its wire format.
//!
//! This crate provides the fundamental building blocks:
//! - [`NodeId`] - Type-safe vertex identifier
//! - [`Edge`] and [`SampleBatch`] - Sampled neighborhoods
//! - [`GraphNode`] - Records returned by graph list pulls

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Identifiers (Newtypes for type safety)
// =============================================================================

/// A unique identifier for a node in the graph.
///
/// Uses a newtype pattern to prevent mixing up node IDs with other integer types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Creates a new NodeId from a u64.
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl From<u64> for NodeId {
    #[inline]
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// =============================================================================
// Sampled Edges
// =============================================================================

/// One sampled outgoing edge: the neighbor reached and the edge weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Neighbor node at the far end of the edge
    pub neighbor: NodeId,
    /// Edge weight as stored by the server
    pub weight: f32,
}

impl Edge {
    /// Size in bytes of one edge record on the wire (u64 id + f32 weight).
    pub const WIRE_SIZE: usize = 12;

    /// Creates a new edge to `neighbor` with the given weight.
    pub fn new(neighbor: impl Into<NodeId>, weight: f32) -> Self {
        Self {
            neighbor: neighbor.into(),
            weight,
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "->{}({})", self.neighbor, self.weight)
    }
}

/// Sampled neighborhood of a single queried node, in server order.
///
/// May be empty: the node had no edges, or its server failed.
pub type SampleBatch = Vec<Edge>;

// =============================================================================
// Graph List Records
// =============================================================================

/// A node record returned when pulling a slice of a server's node list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphNode {
    /// Node identifier
    pub id: NodeId,
    /// Opaque feature payload attached to the node
    pub feature: Vec<u8>,
}

impl GraphNode {
    /// Size of the fixed record header on the wire (u64 id + i32 length).
    pub const HEADER_SIZE: usize = 12;

    /// Creates a node without features.
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            feature: Vec::new(),
        }
    }

    /// Creates a node carrying a feature payload.
    pub fn with_feature(id: impl Into<NodeId>, feature: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            feature: feature.into(),
        }
    }

    /// Returns the encoded size of this record in bytes.
    #[inline]
    pub fn wire_size(&self) -> usize {
        Self::HEADER_SIZE + self.feature.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
