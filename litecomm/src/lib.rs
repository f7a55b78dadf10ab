//! The message-passing substrate surface consumed by the collective
//! optimizer. The substrate itself (transport, process management) is an
//! external collaborator; this crate pins down the minimum contract and
//! ships an in-process software switch for tests and benchmarks.

use std::convert::TryInto;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod switch;

/// Message tag. Each algorithm round uses a distinct tag so messages of
/// different rounds cannot alias within one communicator.
pub type Tag = u32;

#[derive(Debug, Error)]
pub enum CommError {
    #[error("peer {0} disconnected")]
    Disconnected(usize),
    #[error("rank {rank} out of range for communicator of size {size}")]
    RankOutOfRange { rank: usize, size: usize },
    #[error("posted receive of {want} bytes, matching message has {got}")]
    TruncatedMessage { want: usize, got: usize },
}

/// Reduction operator, a closed variant applied elementwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
    Prod,
}

impl ReduceOp {
    /// Whether the operator commutes. The shipped set is entirely
    /// commutative-associative; ring and halving-doubling dispatch still
    /// checks this before relying on out-of-rank-order accumulation.
    #[inline]
    pub fn commutative(self) -> bool {
        match self {
            ReduceOp::Sum | ReduceOp::Max | ReduceOp::Min | ReduceOp::Prod => true,
        }
    }
}

impl std::fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReduceOp::Sum => write!(f, "sum"),
            ReduceOp::Max => write!(f, "max"),
            ReduceOp::Min => write!(f, "min"),
            ReduceOp::Prod => write!(f, "prod"),
        }
    }
}

/// Element type carried by a buffer. Buffers cross the wire as raw bytes;
/// the datatype only matters to `reduce_local` and to size accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Double,
    Float,
    Int32,
    Byte,
}

impl DataType {
    #[inline]
    pub fn size(self) -> usize {
        match self {
            DataType::Double => 8,
            DataType::Float => 4,
            DataType::Int32 => 4,
            DataType::Byte => 1,
        }
    }
}

macro_rules! impl_reduce_for {
    ($($fname:ident => $ty:ty),+ $(,)?) => (
        $(fn $fname(op: ReduceOp, src: &[u8], dst: &mut [u8], count: usize) {
            const W: usize = std::mem::size_of::<$ty>();
            for i in 0..count {
                let a = <$ty>::from_ne_bytes(src[i * W..(i + 1) * W].try_into().unwrap());
                let b = <$ty>::from_ne_bytes(dst[i * W..(i + 1) * W].try_into().unwrap());
                let c = match op {
                    ReduceOp::Sum => b + a,
                    ReduceOp::Max => if a > b { a } else { b },
                    ReduceOp::Min => if a < b { a } else { b },
                    ReduceOp::Prod => b * a,
                };
                dst[i * W..(i + 1) * W].copy_from_slice(&c.to_ne_bytes());
            }
        })+
    )
}

impl_reduce_for! {
    reduce_f64 => f64,
    reduce_f32 => f32,
    reduce_i32 => i32,
    reduce_u8 => u8,
}

impl ReduceOp {
    /// dst[i] = op(dst[i], src[i]) for the first `count` elements.
    pub fn apply(self, dt: DataType, src: &[u8], dst: &mut [u8], count: usize) {
        debug_assert!(src.len() >= count * dt.size());
        debug_assert!(dst.len() >= count * dt.size());
        match dt {
            DataType::Double => reduce_f64(self, src, dst, count),
            DataType::Float => reduce_f32(self, src, dst, count),
            DataType::Int32 => reduce_i32(self, src, dst, count),
            DataType::Byte => reduce_u8(self, src, dst, count),
        }
    }
}

/// The contract required of the message-passing layer. `send` and `recv`
/// are blocking and match on (peer, tag); messages between a fixed
/// (src, dst, tag) pair are FIFO. Implementations are injected at
/// construction so tests can swap in the software switch.
pub trait Communicator {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn send(&self, buf: &[u8], dst: usize, tag: Tag) -> Result<(), CommError>;
    fn recv(&self, buf: &mut [u8], src: usize, tag: Tag) -> Result<(), CommError>;
    fn barrier(&self);
    /// Wall clock in seconds, at least microsecond resolution.
    fn wtime(&self) -> f64;

    /// Elementwise local reduction, dst = op(dst, src).
    fn reduce_local(&self, op: ReduceOp, src: &[u8], dst: &mut [u8], count: usize, dt: DataType) {
        op.apply(dt, src, dst, count);
    }
}

/// View a slice of doubles as the byte buffer the substrate carries.
pub fn pack_f64(vals: &[f64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vals.len() * 8);
    for v in vals {
        out.extend_from_slice(&v.to_ne_bytes());
    }
    out
}

/// Reassemble doubles from a substrate byte buffer.
pub fn unpack_f64(bytes: &[u8]) -> Vec<f64> {
    assert_eq!(bytes.len() % 8, 0);
    bytes
        .chunks_exact(8)
        .map(|c| f64::from_ne_bytes(c.try_into().unwrap()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduce_ops_on_doubles() {
        let a = pack_f64(&[1.0, 5.0, -2.0]);
        let mut b = pack_f64(&[4.0, 2.0, -3.0]);

        let mut sum = b.clone();
        ReduceOp::Sum.apply(DataType::Double, &a, &mut sum, 3);
        assert_eq!(unpack_f64(&sum), vec![5.0, 7.0, -5.0]);

        let mut max = b.clone();
        ReduceOp::Max.apply(DataType::Double, &a, &mut max, 3);
        assert_eq!(unpack_f64(&max), vec![4.0, 5.0, -2.0]);

        let mut min = b.clone();
        ReduceOp::Min.apply(DataType::Double, &a, &mut min, 3);
        assert_eq!(unpack_f64(&min), vec![1.0, 2.0, -3.0]);

        ReduceOp::Prod.apply(DataType::Double, &a, &mut b, 3);
        assert_eq!(unpack_f64(&b), vec![4.0, 10.0, 6.0]);
    }

    #[test]
    fn reduce_partial_count() {
        let a = pack_f64(&[1.0, 1.0]);
        let mut b = pack_f64(&[1.0, 1.0]);
        ReduceOp::Sum.apply(DataType::Double, &a, &mut b, 1);
        assert_eq!(unpack_f64(&b), vec![2.0, 1.0]);
    }

    #[test]
    fn pack_round_trip() {
        let vals = vec![0.0, -1.5, std::f64::consts::PI];
        assert_eq!(unpack_f64(&pack_f64(&vals)), vals);
    }

    #[test]
    fn all_ops_commutative() {
        for op in &[ReduceOp::Sum, ReduceOp::Max, ReduceOp::Min, ReduceOp::Prod] {
            assert!(op.commutative());
        }
    }
}
