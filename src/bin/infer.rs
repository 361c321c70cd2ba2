use anyhow::{Context, Result};
use bdcn::config::{select_device, DatasetRegistry, InferConfig};
use bdcn::infer::forward_all;
use bdcn::model::load_weights;
use bdcn::ScriptedModel;
use clap::Parser;
use std::path::PathBuf;

#[derive(clap::Parser, Debug, Clone)]
#[command(author, version, about = "Run BDCN on every image of a directory", long_about = None)]
struct Args {
    /// The dataset the model was trained on, used for the input normalization.
    #[arg(long, default_value = "bsds500")]
    dataset: String,

    /// A json file adding or replacing dataset entries.
    #[arg(long)]
    dataset_config: Option<PathBuf>,

    /// The directory holding the images to process.
    #[arg(long, default_value = "images/ToScan")]
    input_dir: PathBuf,

    /// Run on a cuda device.
    #[arg(long)]
    cuda: bool,

    /// The cuda device index.
    #[arg(long, default_value_t = 0)]
    gpu: usize,

    /// The network, as a TorchScript module.
    #[arg(long)]
    arch: PathBuf,

    /// Trained weights, as written by the training snapshots.
    #[arg(long, default_value = "models/bdcn_pretrained_on_nyudv2_depth.pth")]
    model: PathBuf,

    /// Output subdirectory of the input directory.
    #[arg(long, default_value = "bdcn")]
    res_dir: String,

    /// The multicue split.
    #[arg(short = 'k', default_value_t = 1)]
    k: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();
    bdcn::logging::init(None)?;
    tracing::info!("{args:?}");

    let registry = DatasetRegistry::load(args.dataset_config.as_deref())?;
    let dataset = registry.test(&args.dataset)?;
    tracing::info!("normalizing with {} ({})", args.dataset, dataset.list_name(args.k));
    let device = select_device(args.cuda, args.gpu)?;

    let mut model = ScriptedModel::load(&args.arch, device)
        .with_context(|| format!("loading model {}", args.arch.display()))?;
    load_weights(&model, &args.model, false)
        .with_context(|| format!("loading weights {}", args.model.display()))?;

    let mut cfg = InferConfig::new(&args.input_dir, dataset, device);
    cfg.res_dir = args.res_dir.clone();
    let summary = forward_all(&mut model, &cfg)?;
    println!("{} edge maps written to {}", summary.processed.len(), summary.res_dir.display());
    Ok(())
}
