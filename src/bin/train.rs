use anyhow::{Context, Result};
use bdcn::config::{sample_config, select_device, DatasetRegistry, TrainConfig};
use bdcn::data::{Cycle, EdgeLoader};
use bdcn::nn::LossWeights;
use bdcn::train::{load_initial_weights, Trainer};
use bdcn::vision::dataset::read_pair_list;
use bdcn::ScriptedModel;
use clap::Parser;
use std::path::PathBuf;

#[derive(clap::Parser, Debug, Clone)]
#[command(author, version, about = "Train BDCN for edge detection", long_about = None)]
struct Args {
    /// The training dataset, e.g. bsds500, nyudv2, nyudv2_hha or multicue.
    #[arg(long, default_value = "bsds500")]
    dataset: String,

    /// A json file adding or replacing dataset entries.
    #[arg(long)]
    dataset_config: Option<PathBuf>,

    /// Where snapshots are written.
    #[arg(long, default_value = "params")]
    param_dir: PathBuf,

    /// The base learning rate.
    #[arg(long, default_value_t = 1e-6)]
    lr: f64,

    #[arg(long, default_value_t = 0.9)]
    momentum: f64,

    /// Run on a cuda device.
    #[arg(long)]
    cuda: bool,

    /// The cuda device index.
    #[arg(long, default_value_t = 0)]
    gpu: usize,

    #[arg(long, default_value_t = 2e-4)]
    weight_decay: f64,

    /// A training state record (.pth.tar) to resume from.
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Weights covering part of the network, e.g. the vgg16 backbone.
    #[arg(long)]
    pretrain: Option<PathBuf>,

    /// Weights covering the whole network.
    #[arg(long)]
    complete_pretrain: Option<PathBuf>,

    /// The network, as a TorchScript module.
    #[arg(long)]
    model: PathBuf,

    #[arg(long, default_value_t = 40000)]
    max_iter: i64,

    /// Minibatches accumulated per optimizer step.
    #[arg(long, default_value_t = 10)]
    iter_size: i64,

    /// Number of steps the reported loss is averaged over.
    #[arg(long, default_value_t = 50)]
    average_loss: usize,

    /// Snapshot interval in steps.
    #[arg(long, default_value_t = 1000)]
    snapshots: i64,

    /// Learning-rate decay interval in steps.
    #[arg(long, default_value_t = 10000)]
    step_size: i64,

    /// Report interval in steps.
    #[arg(long, default_value_t = 20)]
    display: i64,

    /// Weight of the negative pixels in the loss.
    #[arg(long, default_value_t = 1.1)]
    balance: f64,

    #[arg(long, default_value = "log.txt")]
    log: PathBuf,

    /// The multicue split.
    #[arg(short = 'k', default_value_t = 1)]
    k: usize,

    #[arg(long, default_value_t = 1)]
    batch_size: i64,

    /// Train on random square crops of this size.
    #[arg(long)]
    crop_size: Option<i64>,

    #[arg(long, default_value_t = 10)]
    crop_padding: i64,

    /// Label threshold, defaults to the dataset value.
    #[arg(long)]
    yita: Option<f64>,

    #[arg(long, default_value_t = 0.5)]
    side_weight: f64,

    #[arg(long, default_value_t = 1.1)]
    fuse_weight: f64,

    /// Learning-rate decay factor.
    #[arg(long, default_value_t = 0.1)]
    gamma: f64,

    /// Random seed, defaults to the current time.
    #[arg(long)]
    seed: Option<i64>,
}

fn time_seed() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

fn main() -> Result<()> {
    let args = Args::parse();
    bdcn::logging::init(Some(args.log.as_path()))?;
    let seed = args.seed.unwrap_or_else(time_seed);
    tch::manual_seed(seed);
    tracing::info!("{args:?}");
    tracing::info!("seed: {seed}");

    let registry = DatasetRegistry::load(args.dataset_config.as_deref())?;
    let dataset = registry.train(&args.dataset)?;
    let device = select_device(args.cuda, args.gpu)?;
    tracing::info!("training on {:?}", device);

    let cfg = TrainConfig {
        param_dir: args.param_dir.clone(),
        base_lr: args.lr,
        momentum: args.momentum,
        weight_decay: args.weight_decay,
        max_iter: args.max_iter,
        iter_size: args.iter_size,
        batch_size: args.batch_size,
        average_loss: args.average_loss,
        snapshots: args.snapshots,
        step_size: args.step_size,
        gamma: args.gamma,
        display: args.display,
        loss: LossWeights {
            side: args.side_weight,
            fuse: args.fuse_weight,
            balance: args.balance,
        },
        resume: args.resume.clone(),
        device,
    };
    cfg.validate()?;
    let sample_cfg = sample_config(dataset, args.yita, args.crop_size, args.crop_padding)?;

    let mut model = ScriptedModel::load(&args.model, device)
        .with_context(|| format!("loading model {}", args.model.display()))?;
    load_initial_weights(&model, args.pretrain.as_deref(), args.complete_pretrain.as_deref())?;

    let list_name = dataset.list_name(args.k);
    let entries = read_pair_list(&dataset.data_root, &list_name)
        .with_context(|| format!("reading {}", dataset.data_root.join(&list_name).display()))?;
    tracing::info!("{} training pairs", entries.len());
    let loader = EdgeLoader::new(entries, sample_cfg, cfg.batch_size as usize, true)?;
    let mut data = Cycle::new(loader, device);

    let mut trainer = Trainer::new(&mut model, cfg)?;
    let summary = trainer.run(&mut data)?;
    tracing::info!(
        "done after step {} ({} epochs), mean loss {:.6}",
        summary.last_step,
        data.epoch(),
        summary.mean_loss
    );
    Ok(())
}
