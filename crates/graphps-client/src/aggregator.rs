//! Scatters per-server results back into caller order.
//!
//! Each bucket owns a disjoint set of output positions, so concurrent
//! completions never touch the same slot. Slots are write-once; a second
//! write means two buckets claimed the same position and is reported
//! instead of silently overwriting.

use crate::protocol::codec::decode_sample_response;
use crate::protocol::DecodeError;
use crate::sharding::RequestBucket;
use graphps_core::SampleBatch;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors raised while folding one server's response into the output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScatterError {
    /// The response could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A position was written by more than one bucket.
    #[error("Output slot {0} already written")]
    SlotConflict(usize),

    /// A bucket referenced a position outside the output.
    #[error("Output slot {index} out of range for {len} queries")]
    SlotOutOfRange { index: usize, len: usize },

    /// A response arrived for a call that has no bucket.
    #[error("No bucket for call {0}")]
    UnknownCall(usize),
}

/// Caller-ordered output of a batched sample, one slot per queried node.
#[derive(Debug)]
pub struct SampleOutput {
    slots: Vec<OnceLock<SampleBatch>>,
}

impl SampleOutput {
    /// Creates an output with `len` empty slots.
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| OnceLock::new()).collect(),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the output has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots that received a result.
    pub fn written(&self) -> usize {
        self.slots.iter().filter(|s| s.get().is_some()).count()
    }

    /// Stores the result for one caller position.
    pub fn write(&self, index: usize, batch: SampleBatch) -> Result<(), ScatterError> {
        let slot = self.slots.get(index).ok_or(ScatterError::SlotOutOfRange {
            index,
            len: self.slots.len(),
        })?;
        slot.set(batch).map_err(|_| ScatterError::SlotConflict(index))
    }

    /// Returns a copy of the current contents; unwritten slots are empty.
    pub fn snapshot(&self) -> Vec<SampleBatch> {
        self.slots
            .iter()
            .map(|s| s.get().cloned().unwrap_or_default())
            .collect()
    }

    /// Consumes the output; unwritten slots become empty batches.
    pub fn into_batches(self) -> Vec<SampleBatch> {
        self.slots
            .into_iter()
            .map(|s| s.into_inner().unwrap_or_default())
            .collect()
    }
}

/// Writes decoded results for one bucket into the output.
///
/// `decoded` is positional: entry `i` answers the bucket's `i`-th node.
/// A length mismatch is rejected before anything is written.
pub fn scatter(
    bucket: &RequestBucket,
    decoded: Vec<SampleBatch>,
    output: &SampleOutput,
) -> Result<(), ScatterError> {
    if decoded.len() != bucket.len() {
        return Err(DecodeError::NodeCountMismatch {
            expected: bucket.len(),
            actual: decoded.len(),
        }
        .into());
    }

    for (query_idx, batch) in bucket.query_indices().zip(decoded) {
        output.write(query_idx, batch)?;
    }
    Ok(())
}

/// Decodes one server's sample response and scatters it.
pub fn absorb_response(
    bucket: &RequestBucket,
    response: &[u8],
    output: &SampleOutput,
) -> Result<(), ScatterError> {
    let decoded = decode_sample_response(response)?;
    scatter(bucket, decoded, output)
}

/// Extracts the only result of a single-node call.
pub fn single_result(decoded: Vec<SampleBatch>) -> Result<SampleBatch, ScatterError> {
    let actual = decoded.len();
    let mut iter = decoded.into_iter();
    match (iter.next(), actual) {
        (Some(batch), 1) => Ok(batch),
        _ => Err(DecodeError::NodeCountMismatch {
            expected: 1,
            actual,
        }
        .into()),
    }
}
