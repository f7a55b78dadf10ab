//! Substrate-native reference collectives. Linear, obviously-correct
//! implementations the correctness oracle runs on separate buffers and
//! compares against; also usable as the last-resort fallback path.

use litecomm::{Communicator, DataType, ReduceOp};

use crate::{tags, CollectiveError};

pub fn broadcast(
    comm: &dyn Communicator,
    buf: &mut [u8],
    root: usize,
) -> Result<(), CollectiveError> {
    let n = comm.size();
    if n == 1 || buf.is_empty() {
        return Ok(());
    }
    let rank = comm.rank();
    if rank == root {
        for dst in 0..n {
            if dst != root {
                comm.send(buf, dst, tags::REF_BCAST + dst as u32)?;
            }
        }
    } else {
        comm.recv(buf, root, tags::REF_BCAST + rank as u32)?;
    }
    Ok(())
}

pub fn reduce(
    comm: &dyn Communicator,
    sendbuf: &[u8],
    recvbuf: &mut [u8],
    count: usize,
    dt: DataType,
    op: ReduceOp,
    root: usize,
) -> Result<(), CollectiveError> {
    let n = comm.size();
    let rank = comm.rank();
    if rank == root {
        recvbuf.copy_from_slice(sendbuf);
        let mut tmp = vec![0u8; sendbuf.len()];
        for src in 0..n {
            if src == root {
                continue;
            }
            comm.recv(&mut tmp, src, tags::REF_REDUCE + src as u32)?;
            comm.reduce_local(op, &tmp, recvbuf, count, dt);
        }
    } else {
        comm.send(sendbuf, root, tags::REF_REDUCE + rank as u32)?;
    }
    Ok(())
}

pub fn allreduce(
    comm: &dyn Communicator,
    sendbuf: &[u8],
    recvbuf: &mut [u8],
    count: usize,
    dt: DataType,
    op: ReduceOp,
) -> Result<(), CollectiveError> {
    reduce(comm, sendbuf, recvbuf, count, dt, op, 0)?;
    broadcast(comm, recvbuf, 0)
}

pub fn allgather(
    comm: &dyn Communicator,
    sendbuf: &[u8],
    recvbuf: &mut [u8],
) -> Result<(), CollectiveError> {
    let n = comm.size();
    let rank = comm.rank();
    let chunk = sendbuf.len();
    debug_assert_eq!(recvbuf.len(), chunk * n);

    recvbuf[rank * chunk..(rank + 1) * chunk].copy_from_slice(sendbuf);
    if n == 1 || chunk == 0 {
        return Ok(());
    }
    if rank == 0 {
        for src in 1..n {
            comm.recv(
                &mut recvbuf[src * chunk..(src + 1) * chunk],
                src,
                tags::REF_GATHER + src as u32,
            )?;
        }
    } else {
        comm.send(sendbuf, 0, tags::REF_GATHER + rank as u32)?;
    }
    broadcast(comm, recvbuf, 0)
}

/// The seed pattern of the correctness suite: element i on rank r is
/// i + r + 1.
pub fn initialize_sequential(buf: &mut [f64], rank: usize) {
    for (i, v) in buf.iter_mut().enumerate() {
        *v = (i + rank + 1) as f64;
    }
}

/// Check a buffer against the root's seed pattern.
pub fn verify_sequential(buf: &[f64], root: usize) -> bool {
    buf.iter()
        .enumerate()
        .all(|(i, &v)| (v - (i + root + 1) as f64).abs() <= 1e-9)
}

/// Largest elementwise deviation between two vectors.
pub fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}
