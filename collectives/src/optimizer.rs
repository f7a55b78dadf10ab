//! The collective optimizer: one decision surface per collective kind,
//! parameterized by group size, message size and the network model, with a
//! bounded LRU cache over discretized call descriptors.

use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use log::debug;

use litecomm::{Communicator, DataType, ReduceOp};
use netchar::NetworkModel;

use crate::report::{PerfRecord, PerfReport};
use crate::{allgather, allreduce, broadcast, reduce, CollectiveError};

/// Which collective a decision is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Broadcast,
    Reduce,
    AllReduce,
    AllGather,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Broadcast => write!(f, "broadcast"),
            OpKind::Reduce => write!(f, "reduce"),
            OpKind::AllReduce => write!(f, "allreduce"),
            OpKind::AllGather => write!(f, "allgather"),
        }
    }
}

/// A concrete algorithm choice with its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    BinomialTree,
    ScatterAllgather,
    Pipeline { segments: usize },
    RecursiveDoubling,
    HalvingDoubling,
    Ring,
    ReduceScatterGather,
    TreeReduceBroadcast,
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Algorithm::BinomialTree => write!(f, "binomial_tree"),
            Algorithm::ScatterAllgather => write!(f, "scatter_allgather"),
            Algorithm::Pipeline { .. } => write!(f, "pipeline"),
            Algorithm::RecursiveDoubling => write!(f, "recursive_doubling"),
            Algorithm::HalvingDoubling => write!(f, "halving_doubling"),
            Algorithm::Ring => write!(f, "ring"),
            Algorithm::ReduceScatterGather => write!(f, "reduce_scatter_gather"),
            Algorithm::TreeReduceBroadcast => write!(f, "tree_reduce_broadcast"),
        }
    }
}

const CACHE_CAP: usize = 256;

type CacheKey = (OpKind, usize, u32);

#[derive(Debug, Default)]
struct DecisionCache {
    map: IndexMap<CacheKey, Algorithm>,
}

impl DecisionCache {
    fn get(&mut self, key: &CacheKey) -> Option<Algorithm> {
        // move the entry to the back so eviction drops the coldest one
        let algo = self.map.shift_remove(key)?;
        self.map.insert(*key, algo);
        Some(algo)
    }

    fn put(&mut self, key: CacheKey, algo: Algorithm) {
        if self.map.len() >= CACHE_CAP {
            self.map.shift_remove_index(0);
        }
        self.map.insert(key, algo);
    }

    fn clear(&mut self) {
        self.map.clear();
    }
}

// log2-sized bucket the message size is discretized into
#[inline]
fn size_bucket(bytes: usize) -> u32 {
    if bytes <= 1 {
        0
    } else {
        64 - (bytes - 1).leading_zeros()
    }
}

/// The decision engine. Owns the (read-only) network model, the derived
/// size thresholds and the decision cache; everything else is per-call.
pub struct CollectiveOptimizer {
    model: Arc<NetworkModel>,
    t_small: usize,
    t_large: usize,
    cache: Mutex<DecisionCache>,
    report: Option<Mutex<PerfReport>>,
}

impl CollectiveOptimizer {
    pub fn new(model: Arc<NetworkModel>) -> Self {
        let (t_small, t_large) = derive_thresholds(&model);
        debug!(
            "optimizer thresholds for {}: small={} large={}",
            model.spec(),
            t_small,
            t_large
        );
        CollectiveOptimizer {
            model,
            t_small,
            t_large,
            cache: Mutex::new(Default::default()),
            report: None,
        }
    }

    /// Enable the per-invocation performance report.
    pub fn with_reporting(mut self) -> Self {
        self.report = Some(Mutex::new(PerfReport::new()));
        self
    }

    /// Swap in a re-probed model; the decision cache starts over.
    pub fn reconfigure(&mut self, model: Arc<NetworkModel>) {
        let (t_small, t_large) = derive_thresholds(&model);
        self.model = model;
        self.t_small = t_small;
        self.t_large = t_large;
        self.cache.lock().unwrap().clear();
    }

    /// Read-only handle on the network characteristics.
    pub fn network_characteristics(&self) -> &NetworkModel {
        &self.model
    }

    /// Drain the accumulated performance report, if reporting is on.
    pub fn take_report(&self) -> Option<PerfReport> {
        self.report
            .as_ref()
            .map(|r| std::mem::take(&mut *r.lock().unwrap()))
    }

    #[inline]
    pub fn t_small(&self) -> usize {
        self.t_small
    }

    #[inline]
    pub fn t_large(&self) -> usize {
        self.t_large
    }

    pub fn optimize_broadcast(
        &self,
        comm: &dyn Communicator,
        buf: &mut [u8],
        count: usize,
        dt: DataType,
        root: usize,
    ) -> Result<(), CollectiveError> {
        let n = comm.size();
        let nbytes = self.validate(n, count, dt, root, buf.len())?;
        if n == 1 || count == 0 {
            return Ok(());
        }

        let start = comm.wtime();
        let algo = self.decide(OpKind::Broadcast, n, nbytes, true);
        debug!(
            "broadcast n={} bytes={} root={}: {}",
            n, nbytes, root, algo
        );
        match algo {
            Algorithm::BinomialTree => broadcast::binomial_tree(comm, buf, root)?,
            Algorithm::ScatterAllgather => {
                broadcast::scatter_allgather(comm, buf, count, dt, root)?
            }
            Algorithm::Pipeline { segments } => {
                broadcast::pipeline(comm, buf, count, dt, root, &self.model, segments)?
            }
            _ => unreachable!("not a broadcast algorithm: {}", algo),
        }
        self.record(comm, OpKind::Broadcast, Some(root), nbytes, n, algo, start);
        Ok(())
    }

    pub fn optimize_reduce(
        &self,
        comm: &dyn Communicator,
        sendbuf: &[u8],
        recvbuf: &mut [u8],
        count: usize,
        dt: DataType,
        op: ReduceOp,
        root: usize,
    ) -> Result<(), CollectiveError> {
        let n = comm.size();
        let nbytes = self.validate(n, count, dt, root, sendbuf.len())?;
        if recvbuf.len() != nbytes {
            return Err(CollectiveError::SizeMismatch {
                want: nbytes,
                got: recvbuf.len(),
            });
        }
        if n == 1 {
            recvbuf.copy_from_slice(sendbuf);
            return Ok(());
        }
        if count == 0 {
            return Ok(());
        }

        let start = comm.wtime();
        let algo = self.decide(OpKind::Reduce, n, nbytes, op.commutative());
        debug!("reduce n={} bytes={} root={}: {}", n, nbytes, root, algo);
        let mut work = sendbuf.to_vec();
        match algo {
            Algorithm::BinomialTree => {
                reduce::binomial_tree(comm, &mut work, count, dt, op, root)?
            }
            Algorithm::ReduceScatterGather => {
                reduce::reduce_scatter_gather(comm, &mut work, count, dt, op, root, &self.model)?
            }
            _ => unreachable!("not a reduce algorithm: {}", algo),
        }
        if comm.rank() == root {
            recvbuf.copy_from_slice(&work);
        }
        self.record(comm, OpKind::Reduce, Some(root), nbytes, n, algo, start);
        Ok(())
    }

    pub fn optimize_allreduce(
        &self,
        comm: &dyn Communicator,
        sendbuf: &[u8],
        recvbuf: &mut [u8],
        count: usize,
        dt: DataType,
        op: ReduceOp,
    ) -> Result<(), CollectiveError> {
        let n = comm.size();
        let nbytes = self.validate(n, count, dt, 0, sendbuf.len())?;
        if recvbuf.len() != nbytes {
            return Err(CollectiveError::SizeMismatch {
                want: nbytes,
                got: recvbuf.len(),
            });
        }
        recvbuf.copy_from_slice(sendbuf);
        if n == 1 || count == 0 {
            return Ok(());
        }

        let start = comm.wtime();
        let algo = self.decide(OpKind::AllReduce, n, nbytes, op.commutative());
        debug!("allreduce n={} bytes={}: {}", n, nbytes, algo);
        match algo {
            Algorithm::RecursiveDoubling => {
                allreduce::recursive_doubling(comm, recvbuf, count, dt, op)?
            }
            Algorithm::HalvingDoubling => {
                allreduce::halving_doubling(comm, recvbuf, count, dt, op)?
            }
            Algorithm::Ring => allreduce::ring(comm, recvbuf, count, dt, op, &self.model)?,
            Algorithm::TreeReduceBroadcast => {
                reduce::binomial_tree(comm, recvbuf, count, dt, op, 0)?;
                broadcast::binomial_tree(comm, recvbuf, 0)?;
            }
            _ => unreachable!("not an allreduce algorithm: {}", algo),
        }
        self.record(comm, OpKind::AllReduce, None, nbytes, n, algo, start);
        Ok(())
    }

    pub fn optimize_allgather(
        &self,
        comm: &dyn Communicator,
        sendbuf: &[u8],
        recvbuf: &mut [u8],
        count: usize,
        dt: DataType,
    ) -> Result<(), CollectiveError> {
        let n = comm.size();
        let nbytes = self.validate(n, count, dt, 0, sendbuf.len())?;
        let total = nbytes
            .checked_mul(n)
            .ok_or(CollectiveError::CountOverflow {
                count,
                dtsize: dt.size(),
            })?;
        if recvbuf.len() != total {
            return Err(CollectiveError::SizeMismatch {
                want: total,
                got: recvbuf.len(),
            });
        }
        if n == 1 {
            recvbuf.copy_from_slice(sendbuf);
            return Ok(());
        }
        if count == 0 {
            return Ok(());
        }

        let start = comm.wtime();
        let algo = self.decide(OpKind::AllGather, n, nbytes, true);
        debug!("allgather n={} chunk_bytes={}: {}", n, nbytes, algo);
        match algo {
            Algorithm::RecursiveDoubling => {
                allgather::recursive_doubling(comm, sendbuf, recvbuf)?
            }
            Algorithm::Ring => allgather::ring(comm, sendbuf, recvbuf, &self.model)?,
            _ => unreachable!("not an allgather algorithm: {}", algo),
        }
        self.record(comm, OpKind::AllGather, None, nbytes, n, algo, start);
        Ok(())
    }

    fn validate(
        &self,
        n: usize,
        count: usize,
        dt: DataType,
        root: usize,
        buf_len: usize,
    ) -> Result<usize, CollectiveError> {
        if self.model.world_size() != n {
            return Err(CollectiveError::ModelMismatch {
                model: self.model.world_size(),
                comm: n,
            });
        }
        if root >= n {
            return Err(CollectiveError::InvalidRoot { root, size: n });
        }
        let nbytes = count
            .checked_mul(dt.size())
            .ok_or(CollectiveError::CountOverflow {
                count,
                dtsize: dt.size(),
            })?;
        if buf_len != nbytes {
            return Err(CollectiveError::SizeMismatch {
                want: nbytes,
                got: buf_len,
            });
        }
        Ok(nbytes)
    }

    /// Pick the algorithm for a call. Commutativity is part of the
    /// decision, not the cache key: non-commutative reductions bypass the
    /// cache and fall back to the tree.
    fn decide(&self, op: OpKind, n: usize, nbytes: usize, commutative: bool) -> Algorithm {
        if !commutative {
            // the scatter-based paths reduce chunks out of rank order
            match op {
                OpKind::AllReduce => return Algorithm::TreeReduceBroadcast,
                OpKind::Reduce => return Algorithm::BinomialTree,
                _ => {}
            }
        }
        let key = (op, n, size_bucket(nbytes));
        if let Some(algo) = self.cache.lock().unwrap().get(&key) {
            return algo;
        }
        let algo = self.select(op, n, nbytes);
        self.cache.lock().unwrap().put(key, algo);
        algo
    }

    fn select(&self, op: OpKind, n: usize, nbytes: usize) -> Algorithm {
        match op {
            OpKind::Broadcast => {
                if nbytes <= self.t_small {
                    Algorithm::BinomialTree
                } else if nbytes >= self.t_large && n >= 8 {
                    Algorithm::ScatterAllgather
                } else if self.model.has_linear_structure() {
                    Algorithm::Pipeline {
                        segments: self.pick_segments(n, nbytes),
                    }
                } else {
                    Algorithm::BinomialTree
                }
            }
            OpKind::AllReduce => {
                if n.is_power_of_two() && nbytes <= self.t_small {
                    Algorithm::RecursiveDoubling
                } else if n.is_power_of_two() && nbytes < self.t_large {
                    Algorithm::HalvingDoubling
                } else {
                    Algorithm::Ring
                }
            }
            OpKind::Reduce => {
                if nbytes < self.t_large {
                    Algorithm::BinomialTree
                } else {
                    Algorithm::ReduceScatterGather
                }
            }
            OpKind::AllGather => {
                if n.is_power_of_two() && nbytes <= self.t_small {
                    Algorithm::RecursiveDoubling
                } else {
                    Algorithm::Ring
                }
            }
        }
    }

    // closed-form segment count minimizing (alpha + m/S*beta)(N-1+S-1)
    fn pick_segments(&self, n: usize, nbytes: usize) -> usize {
        let alpha = self.model.alpha_secs();
        let beta = self.model.beta_secs_per_byte();
        let s = (nbytes as f64 * beta * (n as f64 - 1.0) / alpha).sqrt();
        (s.ceil() as usize).max(1).min(1024)
    }

    fn record(
        &self,
        comm: &dyn Communicator,
        op: OpKind,
        root: Option<usize>,
        bytes: usize,
        participants: usize,
        algorithm: Algorithm,
        start: f64,
    ) {
        if let Some(report) = &self.report {
            let elapsed_us = (comm.wtime() - start) * 1e6;
            report.lock().unwrap().record(PerfRecord {
                timestamp: start,
                op,
                root,
                bytes,
                participants,
                algorithm,
                elapsed_us,
            });
        }
    }
}

fn derive_thresholds(model: &NetworkModel) -> (usize, usize) {
    // message size where the latency and bandwidth terms of the alpha/beta
    // model break even; defaults land on 4 KiB / 256 KiB
    let crossover = 2.0 * model.alpha_secs() / model.beta_secs_per_byte();
    let t_small = (crossover as usize).max(1024).min(16384).next_power_of_two();
    (t_small, t_small * 64)
}
