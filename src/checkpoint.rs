//! Training snapshots.
//!
//! Two files are written at each snapshot step:
//! - `<prefix>_<step>.pth` holds the model parameters only, keyed by parameter name,
//!   and can be loaded by the inference driver.
//! - `<prefix>_<step>.pth.tar` holds a full training state record: schema version,
//!   step, parameters, and per-group learning rate and momentum buffer.
//!
//! Both use the named-tensor archive format of libtorch.
use crate::error::{BdcnError, Result};
use crate::model::{copy_weights, save_weights, EdgeModel};
use crate::nn::GroupedSgd;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tch::{Device, Kind, Tensor};

/// Version of the training state record layout.
pub const STATE_VERSION: i64 = 1;

const VERSION_KEY: &str = "meta.version";
const STEP_KEY: &str = "meta.step";
const PARAM_PREFIX: &str = "param.";
const LR_PREFIX: &str = "lr.";
const MOMENTUM_PREFIX: &str = "momentum.";

/// File names used for the snapshots of a training run.
#[derive(Debug, Clone)]
pub struct SnapshotPaths {
    dir: PathBuf,
    prefix: String,
}

impl SnapshotPaths {
    pub fn new<T: AsRef<Path>>(dir: T, prefix: &str) -> Self {
        SnapshotPaths { dir: dir.as_ref().to_path_buf(), prefix: prefix.to_string() }
    }

    pub fn weights(&self, step: i64) -> PathBuf {
        self.dir.join(format!("{}_{}.pth", self.prefix, step))
    }

    pub fn state(&self, step: i64) -> PathBuf {
        self.dir.join(format!("{}_{}.pth.tar", self.prefix, step))
    }
}

fn scalar_i64(v: i64) -> Tensor {
    Tensor::from_slice(&[v])
}

fn scalar_f64(v: f64) -> Tensor {
    Tensor::from_slice(&[v])
}

/// Writes the training state record for the last completed `step`.
pub fn save_state<M: EdgeModel + ?Sized, T: AsRef<Path>>(
    path: T,
    step: i64,
    model: &M,
    opt: &GroupedSgd,
) -> Result<()> {
    let mut named: Vec<(String, Tensor)> = vec![
        (VERSION_KEY.to_string(), scalar_i64(STATE_VERSION)),
        (STEP_KEY.to_string(), scalar_i64(step)),
    ];
    for (name, param) in model.named_parameters() {
        named.push((format!("{PARAM_PREFIX}{name}"), param));
    }
    for (group, buf) in opt.groups().iter().zip(opt.buffers()) {
        named.push((format!("{LR_PREFIX}{}", group.name), scalar_f64(group.lr)));
        named.push((format!("{MOMENTUM_PREFIX}{}", group.name), buf.shallow_clone()));
    }
    Tensor::save_multi(named.as_slice(), path)?;
    Ok(())
}

/// A training state record read back from disk.
#[derive(Debug)]
pub struct TrainingState {
    /// Last completed step, training resumes at `step + 1`.
    pub step: i64,
    pub params: Vec<(String, Tensor)>,
    pub lrs: HashMap<String, f64>,
    pub momentum: HashMap<String, Tensor>,
}

impl TrainingState {
    pub fn load<T: AsRef<Path>>(path: T, device: Device) -> Result<TrainingState> {
        let path = path.as_ref();
        let mut version = None;
        let mut step = None;
        let mut params = vec![];
        let mut lrs = HashMap::new();
        let mut momentum = HashMap::new();
        for (name, tensor) in Tensor::load_multi_with_device(path, device)? {
            if name == VERSION_KEY {
                version = Some(i64::try_from(&tensor.to_kind(Kind::Int64))?);
            } else if name == STEP_KEY {
                step = Some(i64::try_from(&tensor.to_kind(Kind::Int64))?);
            } else if let Some(p) = name.strip_prefix(PARAM_PREFIX) {
                params.push((p.to_string(), tensor));
            } else if let Some(p) = name.strip_prefix(LR_PREFIX) {
                lrs.insert(p.to_string(), f64::try_from(&tensor.to_kind(Kind::Double))?);
            } else if let Some(p) = name.strip_prefix(MOMENTUM_PREFIX) {
                momentum.insert(p.to_string(), tensor);
            } else {
                tracing::warn!("{}: ignoring unknown entry {name}", path.display());
            }
        }
        match version {
            Some(STATE_VERSION) => {}
            Some(v) => {
                return Err(BdcnError::checkpoint(path, format!("unsupported version {v}")))
            }
            None => return Err(BdcnError::checkpoint(path, "no version entry")),
        }
        let step = step.ok_or_else(|| BdcnError::checkpoint(path, "no step entry"))?;
        Ok(TrainingState { step, params, lrs, momentum })
    }

    /// Restores the model parameters and the optimizer state, returns the step
    /// training should resume from.
    pub fn restore<M: EdgeModel + ?Sized>(self, model: &M, opt: &mut GroupedSgd) -> Result<i64> {
        let TrainingState { step, params, lrs, momentum } = self;
        copy_weights(model, params, false)?;
        opt.restore(|name| Some((*lrs.get(name)?, momentum.get(name)?)))?;
        Ok(step + 1)
    }
}

/// Writes both snapshot files for `step`.
pub fn snapshot<M: EdgeModel + ?Sized>(
    paths: &SnapshotPaths,
    step: i64,
    model: &M,
    opt: &GroupedSgd,
) -> Result<()> {
    save_weights(model, paths.weights(step))?;
    save_state(paths.state(step), step, model, opt)?;
    tracing::info!("saved snapshot {}", paths.state(step).display());
    Ok(())
}
