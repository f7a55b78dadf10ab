//! Topology-aware collective algorithms and the optimizer that picks
//! among them. Algorithms move raw bytes through an injected
//! `Communicator` and read routing hints from a `NetworkModel`.

use thiserror::Error;

use litecomm::CommError;

pub mod allgather;
pub mod allreduce;
pub mod argument;
pub mod broadcast;
pub mod experiment;
pub mod optimizer;
pub mod order;
pub mod reduce;
pub mod reference;
pub mod report;

pub use optimizer::{Algorithm, CollectiveOptimizer, OpKind};

#[derive(Debug, Error)]
pub enum CollectiveError {
    #[error("count {count} of {dtsize}-byte elements overflows the buffer size")]
    CountOverflow { count: usize, dtsize: usize },
    #[error("buffer holds {got} bytes, the call implies {want}")]
    SizeMismatch { want: usize, got: usize },
    #[error("root {root} out of range for group of {size}")]
    InvalidRoot { root: usize, size: usize },
    #[error("model describes {model} hosts, communicator has {comm} ranks")]
    ModelMismatch { model: usize, comm: usize },
    // substrate failures pass through unwrapped so callers can inspect them
    #[error(transparent)]
    Substrate(#[from] CommError),
}

// Tag blocks per algorithm phase. Rounds within a phase add their index,
// so no two in-flight rounds of one collective share a tag.
pub(crate) mod tags {
    use litecomm::Tag;

    pub const BCAST_BINOMIAL: Tag = 0x1000;
    pub const BCAST_SCATTER: Tag = 0x2000;
    pub const BCAST_RING_AG: Tag = 0x3000;
    pub const BCAST_PIPELINE: Tag = 0x4000;
    pub const REDUCE_TREE: Tag = 0x5000;
    pub const REDUCE_RS: Tag = 0x6000;
    pub const REDUCE_GATHER: Tag = 0x7000;
    pub const ALLREDUCE_RD: Tag = 0x8000;
    pub const ALLREDUCE_FOLD: Tag = 0x9000;
    pub const ALLREDUCE_HD: Tag = 0xa000;
    pub const ALLREDUCE_HD_AG: Tag = 0xb000;
    pub const ALLREDUCE_UNFOLD: Tag = 0xc000;
    pub const ALLREDUCE_RING_RS: Tag = 0xd000;
    pub const ALLREDUCE_RING_AG: Tag = 0xe000;
    pub const ALLGATHER_RING: Tag = 0xf000;
    pub const ALLGATHER_RD: Tag = 0x10000;
    pub const REF_BCAST: Tag = 0x20000;
    pub const REF_REDUCE: Tag = 0x21000;
    pub const REF_GATHER: Tag = 0x22000;
}

#[inline]
pub(crate) fn ceil_log2(n: usize) -> usize {
    n.next_power_of_two().trailing_zeros() as usize
}

/// Split `count` elements into `parts` near-equal chunks, the remainder
/// spread over the low chunks.
pub(crate) fn chunk_counts(count: usize, parts: usize) -> Vec<usize> {
    let base = count / parts;
    let extra = count % parts;
    (0..parts)
        .map(|i| base + if i < extra { 1 } else { 0 })
        .collect()
}

/// Byte offsets of each chunk boundary; `parts + 1` entries.
pub(crate) fn chunk_offsets(counts: &[usize], dtsize: usize) -> Vec<usize> {
    let mut offs = Vec::with_capacity(counts.len() + 1);
    let mut acc = 0;
    offs.push(0);
    for &c in counts {
        acc += c * dtsize;
        offs.push(acc);
    }
    offs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceil_log2_values() {
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(3), 2);
        assert_eq!(ceil_log2(8), 3);
        assert_eq!(ceil_log2(9), 4);
    }

    #[test]
    fn chunking_covers_everything() {
        let counts = chunk_counts(10, 4);
        assert_eq!(counts, vec![3, 3, 2, 2]);
        let offs = chunk_offsets(&counts, 8);
        assert_eq!(offs, vec![0, 24, 48, 64, 80]);

        assert_eq!(chunk_counts(2, 4), vec![1, 1, 0, 0]);
        assert_eq!(chunk_counts(0, 3), vec![0, 0, 0]);
    }
}
