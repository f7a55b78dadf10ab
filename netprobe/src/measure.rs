//! Point-to-point probes and the tier characterization pass. Probes are
//! group-collective: every rank enters, ranks outside the measured pair
//! only join the synchronization barriers and report 0.

use log::{debug, info};

use litecomm::{Communicator, Tag};
use netchar::model::ALL_TIERS;
use netchar::{BandwidthTrait, NetworkModel, Tier};

use crate::stats::SampleSet;

pub const DEFAULT_LATENCY_ITERS: usize = 1000;
pub const DEFAULT_LATENCY_WARMUP: usize = 100;
pub const DEFAULT_BANDWIDTH_ITERS: usize = 10;
pub const DEFAULT_BANDWIDTH_WARMUP: usize = 5;

const LATENCY_TAG: Tag = 0x0101;
const BANDWIDTH_TAG: Tag = 0x0102;
const SHARE_TAG: Tag = 0x0110;

/// One-way point-to-point latency between two ranks in microseconds,
/// averaged over `iters` ping-pong rounds after warmup. Ranks outside the
/// pair return 0.
pub fn measure_point_to_point_latency(
    comm: &dyn Communicator,
    ra: usize,
    rb: usize,
    iters: usize,
) -> f64 {
    latency_samples(comm, ra, rb, iters, DEFAULT_LATENCY_WARMUP).mean()
}

/// Per-iteration one-way latencies in microseconds, for callers that want
/// to run outlier trimming before averaging.
pub fn latency_samples(
    comm: &dyn Communicator,
    ra: usize,
    rb: usize,
    iters: usize,
    warmup: usize,
) -> SampleSet {
    let rank = comm.rank();
    let mut samples = SampleSet::new();
    if ra == rb {
        return samples;
    }

    let mut buf = 42i32.to_ne_bytes();

    for _ in 0..warmup {
        if rank == ra {
            let _ = comm.send(&buf, rb, LATENCY_TAG);
            let _ = comm.recv(&mut buf, rb, LATENCY_TAG);
        } else if rank == rb {
            let _ = comm.recv(&mut buf, ra, LATENCY_TAG);
            let _ = comm.send(&buf, ra, LATENCY_TAG);
        }
    }

    // a group-wide barrier before every timed round gives both endpoints a
    // known starting point
    for _ in 0..iters {
        comm.barrier();
        if rank == ra {
            let start = comm.wtime();
            let _ = comm.send(&buf, rb, LATENCY_TAG);
            let _ = comm.recv(&mut buf, rb, LATENCY_TAG);
            samples.add((comm.wtime() - start) * 1e6 / 2.0);
        } else if rank == rb {
            let start = comm.wtime();
            let _ = comm.recv(&mut buf, ra, LATENCY_TAG);
            let _ = comm.send(&buf, ra, LATENCY_TAG);
            samples.add((comm.wtime() - start) * 1e6 / 2.0);
        }
    }

    samples
}

/// Point-to-point bandwidth in Mbps over `iters` one-way transfers of
/// `bytes` after warmup. Ranks outside the pair return 0. The receiver's
/// figure is the meaningful one; the sender only times its injection.
pub fn measure_point_to_point_bandwidth(
    comm: &dyn Communicator,
    src: usize,
    dst: usize,
    bytes: usize,
    iters: usize,
) -> f64 {
    let rank = comm.rank();
    if src == dst || iters == 0 {
        return 0.0;
    }

    let mut buf = vec![0u8; bytes];

    for _ in 0..DEFAULT_BANDWIDTH_WARMUP {
        if rank == src {
            let _ = comm.send(&buf, dst, BANDWIDTH_TAG);
        } else if rank == dst {
            let _ = comm.recv(&mut buf, src, BANDWIDTH_TAG);
        }
    }

    let mut total = 0.0;
    for _ in 0..iters {
        comm.barrier();
        if rank == src || rank == dst {
            let start = comm.wtime();
            if rank == src {
                let _ = comm.send(&buf, dst, BANDWIDTH_TAG);
            } else {
                let _ = comm.recv(&mut buf, src, BANDWIDTH_TAG);
            }
            let elapsed = (comm.wtime() - start).max(1e-9);
            total += (bytes as f64 * 8.0) / (elapsed * 1e6);
        }
    }

    if rank == src || rank == dst {
        total / iters as f64
    } else {
        0.0
    }
}

/// Bandwidth between every unordered pair, mirrored into a symmetric N x N
/// matrix with a zero diagonal. Entries for pairs this rank did not take
/// part in stay 0.
pub fn measure_all_to_all_bandwidth(comm: &dyn Communicator, bytes: usize) -> Vec<Vec<f64>> {
    let n = comm.size();
    let mut matrix = vec![vec![0.0; n]; n];
    for src in 0..n {
        for dst in src + 1..n {
            let bw =
                measure_point_to_point_bandwidth(comm, src, dst, bytes, DEFAULT_BANDWIDTH_ITERS);
            matrix[src][dst] = bw;
            matrix[dst][src] = bw;
        }
    }
    matrix
}

/// Measured characteristics of one link tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierEstimate {
    pub bandwidth_mbps: f64,
    pub latency_us: f64,
    pub low_confidence: bool,
}

/// Result of a characterization pass, one estimate per tier the topology
/// actually exposes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TierEstimates {
    per_tier: [Option<TierEstimate>; 3],
}

impl TierEstimates {
    #[inline]
    pub fn get(&self, tier: Tier) -> Option<TierEstimate> {
        self.per_tier[tier as usize]
    }

    /// Fold the measured values into the model. Monotonicity violations
    /// are flagged by the model itself.
    pub fn apply_to(&self, model: &mut NetworkModel) {
        for &tier in ALL_TIERS.iter() {
            if let Some(est) = self.get(tier) {
                model.record_tier_measurement(
                    tier,
                    Some(est.bandwidth_mbps.mbps()),
                    Some(est.latency_us),
                    est.low_confidence,
                );
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterizeConfig {
    pub latency_iters: usize,
    pub latency_warmup: usize,
    pub bandwidth_iters: usize,
    pub bytes: usize,
    /// Tukey fence multiplier for trimming latency samples.
    pub outlier_k: f64,
}

impl Default for CharacterizeConfig {
    fn default() -> Self {
        CharacterizeConfig {
            latency_iters: 50,
            latency_warmup: 10,
            bandwidth_iters: DEFAULT_BANDWIDTH_ITERS,
            bytes: 1 << 16,
            outlier_k: 1.5,
        }
    }
}

/// Probe one representative pair per tier and distribute the estimates to
/// every rank. Collective over the whole group; all ranks return the same
/// estimates. Measurement anomalies mark the tier low-confidence, never
/// fail the pass.
pub fn characterize(
    comm: &dyn Communicator,
    model: &NetworkModel,
    cfg: CharacterizeConfig,
) -> TierEstimates {
    let n = comm.size();
    let rank = comm.rank();
    let mut est = TierEstimates::default();
    if n == 1 {
        return est;
    }

    for &tier in ALL_TIERS.iter() {
        // the first peer whose path from rank 0 tops out at this tier
        let peer = (1..n).find(|&p| model.path_tier(0, p) == Some(tier));
        let peer = match peer {
            Some(p) => p,
            None => continue,
        };

        let mut samples = latency_samples(comm, 0, peer, cfg.latency_iters, cfg.latency_warmup);
        // rank 0 receives so that the measured drain rate is real
        let bw = measure_point_to_point_bandwidth(comm, peer, 0, cfg.bytes, cfg.bandwidth_iters);

        if rank == 0 {
            let before = samples.len();
            samples.remove_outliers(cfg.outlier_k);
            let trimmed = before - samples.len();
            let low_confidence =
                (samples.len() > 1 && samples.stddev() == 0.0) || trimmed * 2 > before;
            if low_confidence {
                debug!(
                    "tier {:?}: anomalous samples (n={}, trimmed={}), marking low confidence",
                    tier,
                    samples.len(),
                    trimmed
                );
            }
            est.per_tier[tier as usize] = Some(TierEstimate {
                bandwidth_mbps: bw,
                latency_us: samples.mean(),
                low_confidence,
            });
        }
    }

    share_estimates(comm, &mut est);
    if rank == 0 {
        info!("network characterization: {:?}", est);
    }
    est
}

// Rank 0 holds every estimate; push them out with plain sends.
fn share_estimates(comm: &dyn Communicator, est: &mut TierEstimates) {
    let n = comm.size();
    if comm.rank() == 0 {
        let mut wire = Vec::with_capacity(12 * 8);
        for slot in est.per_tier.iter() {
            let (present, bw, lat, flag) = match slot {
                Some(e) => (
                    1.0,
                    e.bandwidth_mbps,
                    e.latency_us,
                    if e.low_confidence { 1.0 } else { 0.0 },
                ),
                None => (0.0, 0.0, 0.0, 0.0),
            };
            wire.extend_from_slice(&litecomm::pack_f64(&[present, bw, lat, flag]));
        }
        for dst in 1..n {
            let _ = comm.send(&wire, dst, SHARE_TAG);
        }
    } else {
        let mut wire = vec![0u8; 12 * 8];
        if comm.recv(&mut wire, 0, SHARE_TAG).is_ok() {
            let vals = litecomm::unpack_f64(&wire);
            for (i, chunk) in vals.chunks_exact(4).enumerate() {
                est.per_tier[i] = if chunk[0] != 0.0 {
                    Some(TierEstimate {
                        bandwidth_mbps: chunk[1],
                        latency_us: chunk[2],
                        low_confidence: chunk[3] != 0.0,
                    })
                } else {
                    None
                };
            }
        }
    }
}
