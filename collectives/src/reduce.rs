//! Reduce-to-root algorithms. In-place: every rank enters with its
//! contribution in `buf`; the root leaves with the reduced vector.

use litecomm::{Communicator, DataType, ReduceOp};
use netchar::NetworkModel;

use crate::{allreduce, chunk_counts, chunk_offsets, order, tags, CollectiveError};

/// Binomial tree reduce toward `root`, applying the operator at every
/// interior node.
pub fn binomial_tree(
    comm: &dyn Communicator,
    buf: &mut [u8],
    count: usize,
    dt: DataType,
    op: ReduceOp,
    root: usize,
) -> Result<(), CollectiveError> {
    let n = comm.size();
    if n == 1 || count == 0 {
        return Ok(());
    }
    let vrank = (comm.rank() + n - root) % n;
    let phys = |v: usize| (v + root) % n;

    let mut tmp = vec![0u8; buf.len()];
    let mut mask = 1;
    let mut round: u32 = 0;
    while mask < n {
        let tag = tags::REDUCE_TREE + round;
        if vrank & mask != 0 {
            // hand the partial sum up and drop out
            comm.send(buf, phys(vrank - mask), tag)?;
            return Ok(());
        }
        let src = vrank + mask;
        if src < n {
            comm.recv(&mut tmp, phys(src), tag)?;
            comm.reduce_local(op, &tmp, buf, count, dt);
        }
        mask <<= 1;
        round += 1;
    }
    Ok(())
}

/// Bandwidth-regime reduce: ring reduce-scatter followed by a gather of
/// the finalized chunks to the root.
pub fn reduce_scatter_gather(
    comm: &dyn Communicator,
    buf: &mut [u8],
    count: usize,
    dt: DataType,
    op: ReduceOp,
    root: usize,
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
    allreduce::ring_reduce_scatter(comm, buf, dt, op, &ring, &counts, &offs, tags::REDUCE_RS)?;

    // after the reduce-scatter, ring position p holds finalized chunk p+1
    let pos = order::position(&ring, comm.rank());
    let root_pos = order::position(&ring, root);
    if comm.rank() == root {
        for q in 0..n {
            if q == root_pos {
                continue;
            }
            let c = (q + 1) % n;
            comm.recv(
                &mut buf[offs[c]..offs[c + 1]],
                ring[q],
                tags::REDUCE_GATHER + c as u32,
            )?;
        }
    } else {
        let owned = (pos + 1) % n;
        comm.send(
            &buf[offs[owned]..offs[owned + 1]],
            root,
            tags::REDUCE_GATHER + owned as u32,
        )?;
    }
    Ok(())
}
