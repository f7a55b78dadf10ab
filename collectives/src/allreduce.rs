//! Allreduce algorithms: recursive doubling for small messages on
//! power-of-two groups, recursive halving/doubling with fold/unfold for
//! arbitrary group sizes, and the bandwidth-optimal topology-aware ring.

use litecomm::{Communicator, DataType, ReduceOp, Tag};
use netchar::NetworkModel;

use crate::{chunk_counts, chunk_offsets, order, tags, CollectiveError};

/// Recursive doubling: log2(N) rounds of pairwise full-vector exchange
/// and local reduce. The group size must be a power of two.
pub fn recursive_doubling(
    comm: &dyn Communicator,
    buf: &mut [u8],
    count: usize,
    dt: DataType,
    op: ReduceOp,
) -> Result<(), CollectiveError> {
    let n = comm.size();
    if n == 1 || count == 0 {
        return Ok(());
    }
    debug_assert!(n.is_power_of_two());
    let rank = comm.rank();

    let mut tmp = vec![0u8; buf.len()];
    let mut mask = 1;
    let mut round: u32 = 0;
    while mask < n {
        let peer = rank ^ mask;
        let tag = tags::ALLREDUCE_RD + round;
        if rank < peer {
            comm.send(buf, peer, tag)?;
            comm.recv(&mut tmp, peer, tag)?;
        } else {
            comm.recv(&mut tmp, peer, tag)?;
            comm.send(buf, peer, tag)?;
        }
        comm.reduce_local(op, &tmp, buf, count, dt);
        mask <<= 1;
        round += 1;
    }
    Ok(())
}

/// Recursive-halving reduce-scatter followed by a recursive-doubling
/// allgather. Groups whose size is not a power of two first fold the
/// excess ranks into partners, run the power-of-two core, then unfold.
pub fn halving_doubling(
    comm: &dyn Communicator,
    buf: &mut [u8],
    count: usize,
    dt: DataType,
    op: ReduceOp,
) -> Result<(), CollectiveError> {
    let n = comm.size();
    if n == 1 || count == 0 {
        return Ok(());
    }
    let w = dt.size();
    let rank = comm.rank();
    let pof2 = if n.is_power_of_two() {
        n
    } else {
        n.next_power_of_two() >> 1
    };
    let rem = n - pof2;

    // fold: excess ranks hand their vector to a partner and wait for the
    // finished result
    if rank >= pof2 {
        let partner = rank - pof2;
        comm.send(buf, partner, tags::ALLREDUCE_FOLD)?;
        comm.recv(buf, partner, tags::ALLREDUCE_UNFOLD)?;
        return Ok(());
    }
    if rank < rem {
        let mut tmp = vec![0u8; buf.len()];
        comm.recv(&mut tmp, pof2 + rank, tags::ALLREDUCE_FOLD)?;
        comm.reduce_local(op, &tmp, buf, count, dt);
    }

    struct Step {
        peer: usize,
        lo: usize,
        hi: usize,
        mid: usize,
        keep_low: bool,
    }

    // recursive-halving reduce-scatter over element ranges
    let mut steps = Vec::new();
    let (mut lo, mut hi) = (0usize, count);
    let mut mask = pof2 >> 1;
    let mut round: u32 = 0;
    while mask > 0 {
        let peer = rank ^ mask;
        let mid = lo + (hi - lo) / 2;
        let keep_low = rank & mask == 0;
        let (s_lo, s_hi, k_lo, k_hi) = if keep_low {
            (mid, hi, lo, mid)
        } else {
            (lo, mid, mid, hi)
        };
        let tag = tags::ALLREDUCE_HD + round;
        let mut tmp = vec![0u8; (k_hi - k_lo) * w];
        if rank < peer {
            comm.send(&buf[s_lo * w..s_hi * w], peer, tag)?;
            comm.recv(&mut tmp, peer, tag)?;
        } else {
            comm.recv(&mut tmp, peer, tag)?;
            comm.send(&buf[s_lo * w..s_hi * w], peer, tag)?;
        }
        comm.reduce_local(op, &tmp, &mut buf[k_lo * w..k_hi * w], k_hi - k_lo, dt);
        steps.push(Step {
            peer,
            lo,
            hi,
            mid,
            keep_low,
        });
        if keep_low {
            hi = mid;
        } else {
            lo = mid;
        }
        mask >>= 1;
        round += 1;
    }

    // allgather by unwinding the halving steps in reverse
    for (i, step) in steps.iter().enumerate().rev() {
        let tag = tags::ALLREDUCE_HD_AG + i as u32;
        let (own_lo, own_hi, other_lo, other_hi) = if step.keep_low {
            (step.lo, step.mid, step.mid, step.hi)
        } else {
            (step.mid, step.hi, step.lo, step.mid)
        };
        if rank < step.peer {
            comm.send(&buf[own_lo * w..own_hi * w], step.peer, tag)?;
            comm.recv(&mut buf[other_lo * w..other_hi * w], step.peer, tag)?;
        } else {
            comm.recv(&mut buf[other_lo * w..other_hi * w], step.peer, tag)?;
            comm.send(&buf[own_lo * w..own_hi * w], step.peer, tag)?;
        }
    }

    // unfold the result to the folded ranks
    if rank < rem {
        comm.send(buf, pof2 + rank, tags::ALLREDUCE_UNFOLD)?;
    }
    Ok(())
}

/// Topology-aware ring allreduce: N-1 reduce-scatter steps followed by
/// N-1 allgather steps over near-equal chunks. Consecutive ring members
/// are topology-adjacent where the model allows.
pub fn ring(
    comm: &dyn Communicator,
    buf: &mut [u8],
    count: usize,
    dt: DataType,
    op: ReduceOp,
    model: &NetworkModel,
) -> Result<(), CollectiveError> {
    let n = comm.size();
    if n == 1 || count == 0 {
        return Ok(());
    }
    debug_assert_eq!(model.world_size(), n);

    let ring = order::ring(model);
    let counts = chunk_counts(count, n);
    let offs = chunk_offsets(&counts, dt.size());
    ring_reduce_scatter(
        comm,
        buf,
        dt,
        op,
        &ring,
        &counts,
        &offs,
        tags::ALLREDUCE_RING_RS,
    )?;

    // circulate the finalized chunks around the same ring
    let pos = order::position(&ring, comm.rank());
    let right = ring[(pos + 1) % n];
    let left = ring[(pos + n - 1) % n];
    for s in 0..n - 1 {
        let tag = tags::ALLREDUCE_RING_AG + s as u32;
        let send_idx = (pos + 1 + n - s) % n;
        let recv_idx = (pos + n - s) % n;
        if pos == 0 {
            comm.recv(&mut buf[offs[recv_idx]..offs[recv_idx + 1]], left, tag)?;
            comm.send(&buf[offs[send_idx]..offs[send_idx + 1]], right, tag)?;
        } else {
            comm.send(&buf[offs[send_idx]..offs[send_idx + 1]], right, tag)?;
            comm.recv(&mut buf[offs[recv_idx]..offs[recv_idx + 1]], left, tag)?;
        }
    }
    Ok(())
}

// Shared by ring allreduce and reduce-scatter+gather: after N-1 steps,
// ring position p holds the fully reduced chunk (p + 1) % N.
pub(crate) fn ring_reduce_scatter(
    comm: &dyn Communicator,
    buf: &mut [u8],
    dt: DataType,
    op: ReduceOp,
    ring: &[usize],
    counts: &[usize],
    offs: &[usize],
    tag_base: Tag,
) -> Result<(), CollectiveError> {
    let n = ring.len();
    let pos = order::position(ring, comm.rank());
    let right = ring[(pos + 1) % n];
    let left = ring[(pos + n - 1) % n];

    let max_chunk = counts.iter().cloned().max().unwrap_or(0) * dt.size();
    let mut tmp = vec![0u8; max_chunk];

    for s in 0..n - 1 {
        let tag = tag_base + s as u32;
        let send_idx = (pos + n - s) % n;
        let recv_idx = (pos + 2 * n - s - 1) % n;
        let recv_len = offs[recv_idx + 1] - offs[recv_idx];
        if pos == 0 {
            comm.recv(&mut tmp[..recv_len], left, tag)?;
            comm.send(&buf[offs[send_idx]..offs[send_idx + 1]], right, tag)?;
        } else {
            comm.send(&buf[offs[send_idx]..offs[send_idx + 1]], right, tag)?;
            comm.recv(&mut tmp[..recv_len], left, tag)?;
        }
        comm.reduce_local(
            op,
            &tmp[..recv_len],
            &mut buf[offs[recv_idx]..offs[recv_idx + 1]],
            counts[recv_idx],
            dt,
        );
    }
    Ok(())
}
