//! Broadcast algorithms: binomial tree for the latency regime,
//! scatter-allgather for the bandwidth regime, pipeline for long linear
//! paths.

use log::trace;

use litecomm::{Communicator, DataType};
use netchar::NetworkModel;

use crate::{ceil_log2, chunk_counts, chunk_offsets, order, tags, CollectiveError};

/// Binomial tree broadcast. Round i doubles the set of ranks holding the
/// data: every root-relative rank r < 2^i sends to r + 2^i.
pub fn binomial_tree(
    comm: &dyn Communicator,
    buf: &mut [u8],
    root: usize,
) -> Result<(), CollectiveError> {
    let n = comm.size();
    if n == 1 || buf.is_empty() {
        return Ok(());
    }
    let vrank = (comm.rank() + n - root) % n;

    let mut mask = 1;
    for round in 0..ceil_log2(n) {
        let tag = tags::BCAST_BINOMIAL + round as u32;
        if vrank < mask {
            let peer = vrank + mask;
            if peer < n {
                comm.send(buf, (peer + root) % n, tag)?;
            }
        } else if vrank < mask << 1 {
            let peer = vrank - mask;
            comm.recv(buf, (peer + root) % n, tag)?;
        }
        mask <<= 1;
    }
    Ok(())
}

/// Scatter-allgather broadcast. The root scatters near-equal chunks down a
/// binomial tree of rank ranges, then a ring allgather reassembles the
/// full message on every rank.
pub fn scatter_allgather(
    comm: &dyn Communicator,
    buf: &mut [u8],
    count: usize,
    dt: DataType,
    root: usize,
) -> Result<(), CollectiveError> {
    let n = comm.size();
    if n == 1 || count == 0 {
        return Ok(());
    }
    let vrank = (comm.rank() + n - root) % n;
    let phys = |v: usize| (v + root) % n;

    let counts = chunk_counts(count, n);
    let offs = chunk_offsets(&counts, dt.size());

    // scatter by halves over the root-relative range [lo, hi); the owner
    // of a range is its lowest vrank
    let (mut lo, mut hi) = (0usize, n);
    let mut round = 0;
    while hi - lo > 1 {
        let mid = (lo + hi) / 2;
        let tag = tags::BCAST_SCATTER + round;
        round += 1;
        if vrank >= mid {
            if vrank == mid {
                comm.recv(&mut buf[offs[mid]..offs[hi]], phys(lo), tag)?;
            }
            lo = mid;
        } else {
            if vrank == lo {
                comm.send(&buf[offs[mid]..offs[hi]], phys(mid), tag)?;
            }
            hi = mid;
        }
    }
    trace!("scatter done, rank {} owns chunk {}", comm.rank(), vrank);

    // ring allgather over the vrank ring: in step s everyone forwards the
    // chunk it received in step s-1
    for s in 0..n - 1 {
        let tag = tags::BCAST_RING_AG + s as u32;
        let send_idx = (vrank + n - s) % n;
        let recv_idx = (vrank + n - s - 1) % n;
        let right = phys((vrank + 1) % n);
        let left = phys((vrank + n - 1) % n);
        if vrank == 0 {
            comm.recv(&mut buf[offs[recv_idx]..offs[recv_idx + 1]], left, tag)?;
            comm.send(&buf[offs[send_idx]..offs[send_idx + 1]], right, tag)?;
        } else {
            comm.send(&buf[offs[send_idx]..offs[send_idx + 1]], right, tag)?;
            comm.recv(&mut buf[offs[recv_idx]..offs[recv_idx + 1]], left, tag)?;
        }
    }
    Ok(())
}

/// Pipeline broadcast along a topology-aware chain. The message is cut
/// into `segments` pieces; every chain member forwards a segment as soon
/// as it has it.
pub fn pipeline(
    comm: &dyn Communicator,
    buf: &mut [u8],
    count: usize,
    dt: DataType,
    root: usize,
    model: &NetworkModel,
    segments: usize,
) -> Result<(), CollectiveError> {
    let n = comm.size();
    if n == 1 || count == 0 {
        return Ok(());
    }
    debug_assert_eq!(model.world_size(), n);

    let chain = order::chain_from(model, root);
    let pos = order::position(&chain, comm.rank());
    let pred = if pos > 0 { Some(chain[pos - 1]) } else { None };
    let succ = if pos + 1 < n { Some(chain[pos + 1]) } else { None };

    let segments = segments.max(1).min(count);
    let counts = chunk_counts(count, segments);
    let offs = chunk_offsets(&counts, dt.size());

    for s in 0..segments {
        let tag = tags::BCAST_PIPELINE + s as u32;
        let region = offs[s]..offs[s + 1];
        if let Some(p) = pred {
            comm.recv(&mut buf[region.clone()], p, tag)?;
        }
        if let Some(q) = succ {
            comm.send(&buf[region], q, tag)?;
        }
    }
    Ok(())
}
