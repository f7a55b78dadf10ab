use log::info;
use structopt::StructOpt;

use collectives::argument::Opt;
use collectives::experiment::{self, ExperimentConfig};

fn main() -> anyhow::Result<()> {
    logging::init_log();

    let opt = Opt::from_args();
    info!("Opts: {:#?}", opt);

    let config = if let Some(path) = &opt.config {
        info!("parsing experiment configuration from file: {:?}", path);
        experiment::read_config(path)?
    } else {
        ExperimentConfig::from_opt(&opt)?
    };
    info!("config: {:#?}", config);

    experiment::run(&config)
}
