//! Batch inference over a directory of images.
use crate::config::InferConfig;
use crate::error::{BdcnError, Result};
use crate::metrics::TimingLog;
use crate::model::EdgeModel;
use crate::vision::image::{load_bgr, probability_to_u8, save_gray};
use crate::vision::manifest::create_data_list;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tch::{no_grad, Device};

/// What a run produced.
#[derive(Debug, Clone)]
pub struct InferSummary {
    /// Input file names in processing order, each with an edge map of the same
    /// name in `res_dir`.
    pub processed: Vec<String>,
    pub res_dir: PathBuf,
    pub forward_time: Duration,
    pub total_time: Duration,
}

/// Writes the manifest of `cfg.input_dir`, then one edge map per listed image
/// into `<input_dir>/<res_dir>` along with a `timeRecords.txt` file.
///
/// Images are processed one at a time; the first failure aborts the run.
pub fn forward_all<M: EdgeModel + ?Sized>(
    model: &mut M,
    cfg: &InferConfig,
) -> Result<InferSummary> {
    let start = Instant::now();
    let extensions: Vec<&str> = cfg.extensions.iter().map(String::as_str).collect();
    let names = create_data_list(&cfg.input_dir, &cfg.list_name, &extensions)?;
    let list_path = cfg.input_dir.join(&cfg.list_name);
    tracing::info!("{} images listed in {}", names.len(), list_path.display());

    let res_dir = cfg.input_dir.join(&cfg.res_dir);
    std::fs::create_dir_all(&res_dir)?;
    let mut timings = TimingLog::create(res_dir.join(TimingLog::FILE_NAME))?;
    model.set_eval();

    let mut forward_time = Duration::ZERO;
    for name in names.iter() {
        let img =
            load_bgr(cfg.input_dir.join(name), cfg.mean_bgr)?.unsqueeze(0).to_device(cfg.device);
        let forward_start = Instant::now();
        let fused = no_grad(|| model.fused(&img))?;
        let edges = fused.sigmoid().to_device(Device::Cpu);
        let elapsed = forward_start.elapsed();
        forward_time += elapsed;
        let edges = match edges.size().as_slice() {
            [1, 1, _, _] => edges.squeeze_dim(0),
            size => {
                return Err(BdcnError::ModelOutput(format!(
                    "{name}: expected a 1x1xHxW fused output, got {size:?}"
                )))
            }
        };
        save_gray(&probability_to_u8(&edges), res_dir.join(name))?;
        timings.record(name, elapsed)?;
        tracing::debug!("{name}: {:.3}ms", elapsed.as_secs_f64() * 1000.);
    }
    timings.finish()?;

    let total_time = start.elapsed();
    tracing::info!("forward time for {} images: {:.3}s", names.len(), forward_time.as_secs_f64());
    tracing::info!("overall time: {:.3}s", total_time.as_secs_f64());
    Ok(InferSummary { processed: names, res_dir, forward_time, total_time })
}
