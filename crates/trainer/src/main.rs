use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use tch::Device;

use losses::make_loss;
use reid_core::Config;
use reid_data::get_data_bunch;
use trainer::{setup_logger, Trainer};

#[derive(Parser, Debug)]
#[command(about = "ReID Baseline Training", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short = 'c', long = "config_file", alias = "cfg")]
    config_file: Option<PathBuf>,

    /// Modify config options using the command-line (KEY VALUE pairs)
    #[arg(trailing_var_arg = true)]
    opts: Vec<String>,
}

fn train(cfg: &Config, device: Device) -> Result<()> {
    // prepare dataset
    let (data_bunch, test_labels, num_query) = get_data_bunch(cfg, device)?;

    // prepare model and loss
    let loss_fn = make_loss(cfg, data_bunch.num_classes());
    let mut trainer = Trainer::new(cfg, data_bunch.num_classes(), device)?;

    trainer.train(&data_bunch, &test_labels, &loss_fn, num_query)
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let num_gpus = match std::env::var("WORLD_SIZE") {
        Ok(v) => v
            .parse::<i64>()
            .context("WORLD_SIZE is not an integer")?,
        Err(_) => 1,
    };

    let mut cfg = Config::default();
    if let Some(path) = &args.config_file {
        cfg.merge_from_file(path)?;
    }
    cfg.merge_from_list(&args.opts)?;
    let cfg = cfg;

    if !Path::new(&cfg.output_dir).exists() {
        fs::create_dir_all(&cfg.output_dir)?;
    }

    setup_logger("reid_baseline", Path::new(&cfg.output_dir))?;
    info!("Using {} GPUs.", num_gpus);
    info!("{:?}", args);

    if let Some(path) = &args.config_file {
        info!("Loaded configuration file {}", path.display());
    }
    info!("Running with config:\n{}", serde_yaml::to_string(&cfg)?);

    tch::Cuda::cudnn_set_benchmark(true);
    let device = Device::cuda_if_available();

    train(&cfg, device)
}
