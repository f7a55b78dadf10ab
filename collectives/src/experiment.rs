//! The benchmark experiment: one thread per rank over the software
//! switch, every optimized collective checked against its reference twin.

use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use litecomm::switch::{SoftSwitch, SwitchComm};
use litecomm::{pack_f64, unpack_f64, Communicator, DataType, ReduceOp};
use netchar::{NetworkModel, TopoSpec};
use netprobe::{characterize, CharacterizeConfig, SectionTimer};

use crate::argument::Opt;
use crate::reference;
use crate::CollectiveOptimizer;

const ORACLE_TOLERANCE: f64 = 1e-9;
const MAX_RANK_THREADS: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentConfig {
    /// Topology of the process group
    pub topo: TopoSpec,

    /// Message sizes in doubles
    pub sizes: Vec<usize>,

    /// Iterations per collective and size
    pub iters: usize,

    /// Global seed
    pub seed: u64,

    /// Whether to run the measurement pass first
    #[serde(default)]
    pub probe: bool,

    /// Output path of the performance report CSV
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl ExperimentConfig {
    pub fn from_opt(opt: &Opt) -> anyhow::Result<Self> {
        let topo = opt
            .topo
            .clone()
            .ok_or_else(|| anyhow::anyhow!("either a topology or a config file is required"))?;
        Ok(ExperimentConfig {
            topo,
            sizes: opt.sizes.clone(),
            iters: opt.iters,
            seed: opt.seed,
            probe: opt.probe,
            output: opt.output.clone(),
        })
    }
}

pub fn read_config<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<ExperimentConfig> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

pub fn run(config: &ExperimentConfig) -> anyhow::Result<()> {
    let model = NetworkModel::new(config.topo.clone())?;
    let n = model.world_size();
    anyhow::ensure!(
        n <= MAX_RANK_THREADS,
        "{} hosts exceed the single-machine thread budget of {}",
        n,
        MAX_RANK_THREADS
    );
    info!("running {} ranks on {}", n, config.topo);

    let handles: Vec<_> = SoftSwitch::endpoints(n)
        .into_iter()
        .map(|comm| {
            let config = config.clone();
            std::thread::spawn(move || run_rank(comm, &config))
        })
        .collect();

    for h in handles {
        h.join().expect("rank thread panicked")?;
    }
    Ok(())
}

fn run_rank(comm: SwitchComm, config: &ExperimentConfig) -> anyhow::Result<()> {
    let rank = comm.rank();
    let mut model = NetworkModel::new(config.topo.clone())?;
    let mut timer = SectionTimer::new();

    if config.probe {
        timer.start("probe");
        let est = characterize(&comm, &model, CharacterizeConfig::default());
        est.apply_to(&mut model);
        timer.stop();
    }

    let optimizer = if rank == 0 {
        CollectiveOptimizer::new(Arc::new(model)).with_reporting()
    } else {
        CollectiveOptimizer::new(Arc::new(model))
    };

    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(rank as u64));

    for &size in &config.sizes {
        for _ in 0..config.iters {
            bench_broadcast(&comm, &optimizer, &mut timer, size, &mut rng)?;
            bench_reduce(&comm, &optimizer, &mut timer, size, &mut rng)?;
            bench_allreduce(&comm, &optimizer, &mut timer, size, &mut rng)?;
            bench_allgather(&comm, &optimizer, &mut timer, size, &mut rng)?;
        }
    }

    if rank == 0 {
        info!("per-section timings:\n{}", timer);
        if let Some(report) = optimizer.take_report() {
            info!("{} collective invocations recorded", report.len());
            if let Some(path) = &config.output {
                let file = std::fs::File::create(path)?;
                report.write_csv(file)?;
                info!("performance report written to {:?}", path);
            }
        }
    }
    Ok(())
}

fn bench_broadcast(
    comm: &SwitchComm,
    optimizer: &CollectiveOptimizer,
    timer: &mut SectionTimer,
    size: usize,
    rng: &mut StdRng,
) -> anyhow::Result<()> {
    let root = 0;
    let payload: Vec<f64> = (0..size).map(|_| rng.gen_range(0.0..100.0)).collect();
    let mut opt_buf = if comm.rank() == root {
        pack_f64(&payload)
    } else {
        vec![0u8; size * 8]
    };
    let mut ref_buf = opt_buf.clone();

    timer.start("broadcast");
    optimizer.optimize_broadcast(comm, &mut opt_buf, size, DataType::Double, root)?;
    timer.stop();
    reference::broadcast(comm, &mut ref_buf, root)?;

    anyhow::ensure!(opt_buf == ref_buf, "broadcast mismatch on rank {}", comm.rank());
    Ok(())
}

fn bench_reduce(
    comm: &SwitchComm,
    optimizer: &CollectiveOptimizer,
    timer: &mut SectionTimer,
    size: usize,
    rng: &mut StdRng,
) -> anyhow::Result<()> {
    let root = comm.size() - 1;
    let contrib: Vec<f64> = (0..size).map(|_| rng.gen_range(0.0..1.0)).collect();
    let sendbuf = pack_f64(&contrib);
    let mut opt_recv = vec![0u8; sendbuf.len()];
    let mut ref_recv = vec![0u8; sendbuf.len()];

    timer.start("reduce");
    optimizer.optimize_reduce(
        comm,
        &sendbuf,
        &mut opt_recv,
        size,
        DataType::Double,
        ReduceOp::Sum,
        root,
    )?;
    timer.stop();
    reference::reduce(
        comm,
        &sendbuf,
        &mut ref_recv,
        size,
        DataType::Double,
        ReduceOp::Sum,
        root,
    )?;

    if comm.rank() == root {
        let diff = reference::max_abs_diff(&unpack_f64(&opt_recv), &unpack_f64(&ref_recv));
        if diff > ORACLE_TOLERANCE {
            warn!("reduce deviation {} at size {}", diff, size);
            anyhow::bail!("reduce oracle failed: deviation {}", diff);
        }
    }
    Ok(())
}

fn bench_allreduce(
    comm: &SwitchComm,
    optimizer: &CollectiveOptimizer,
    timer: &mut SectionTimer,
    size: usize,
    rng: &mut StdRng,
) -> anyhow::Result<()> {
    let contrib: Vec<f64> = (0..size).map(|_| rng.gen_range(0.0..1.0)).collect();
    let sendbuf = pack_f64(&contrib);
    let mut opt_recv = vec![0u8; sendbuf.len()];
    let mut ref_recv = vec![0u8; sendbuf.len()];

    timer.start("allreduce");
    optimizer.optimize_allreduce(
        comm,
        &sendbuf,
        &mut opt_recv,
        size,
        DataType::Double,
        ReduceOp::Sum,
    )?;
    timer.stop();
    reference::allreduce(
        comm,
        &sendbuf,
        &mut ref_recv,
        size,
        DataType::Double,
        ReduceOp::Sum,
    )?;

    let diff = reference::max_abs_diff(&unpack_f64(&opt_recv), &unpack_f64(&ref_recv));
    anyhow::ensure!(
        diff <= ORACLE_TOLERANCE,
        "allreduce oracle failed on rank {}: deviation {}",
        comm.rank(),
        diff
    );
    Ok(())
}

fn bench_allgather(
    comm: &SwitchComm,
    optimizer: &CollectiveOptimizer,
    timer: &mut SectionTimer,
    size: usize,
    rng: &mut StdRng,
) -> anyhow::Result<()> {
    let n = comm.size();
    let contrib: Vec<f64> = (0..size).map(|_| rng.gen_range(0.0..1.0)).collect();
    let sendbuf = pack_f64(&contrib);
    let mut opt_recv = vec![0u8; sendbuf.len() * n];
    let mut ref_recv = vec![0u8; sendbuf.len() * n];

    timer.start("allgather");
    optimizer.optimize_allgather(comm, &sendbuf, &mut opt_recv, size, DataType::Double)?;
    timer.stop();
    reference::allgather(comm, &sendbuf, &mut ref_recv)?;

    anyhow::ensure!(
        opt_recv == ref_recv,
        "allgather mismatch on rank {}",
        comm.rank()
    );
    Ok(())
}
