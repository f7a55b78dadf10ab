use structopt::StructOpt;

use netchar::TopoSpec;

#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "collbench", about = "Topology-Aware Collective Benchmark")]
pub struct Opt {
    /// The configure file; when given, the remaining options are ignored
    #[structopt(short = "c", long = "config")]
    pub config: Option<std::path::PathBuf>,

    /// Specify the topology of the process group
    #[structopt(subcommand)]
    pub topo: Option<TopoSpec>,

    /// Message sizes in doubles, comma separated
    #[structopt(
        short = "s",
        long = "sizes",
        default_value = "16,4096",
        use_delimiter = true
    )]
    pub sizes: Vec<usize>,

    /// Number of iterations per collective and size
    #[structopt(short = "i", long = "iters", default_value = "5")]
    pub iters: usize,

    /// Global seed for payload generation
    #[structopt(long = "seed", default_value = "0")]
    pub seed: u64,

    /// Run the measurement pass and feed the model before benchmarking
    #[structopt(long = "probe")]
    pub probe: bool,

    /// Output path of the performance report CSV
    #[structopt(short = "o", long = "output")]
    pub output: Option<std::path::PathBuf>,
}
