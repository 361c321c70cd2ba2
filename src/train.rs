//! The training loop.
//!
//! Each step accumulates gradients over `iter_size` minibatches and applies a
//! single optimizer update. Learning-rate decay, snapshots and progress reports
//! happen on fixed step intervals.
use crate::checkpoint::{snapshot, SnapshotPaths, TrainingState};
use crate::config::TrainConfig;
use crate::data::{BatchSource, Cycle};
use crate::error::{BdcnError, Result};
use crate::metrics::RunningLoss;
use crate::model::{load_weights, EdgeModel};
use crate::nn::{bdcn_loss, build_param_groups, GroupedSgd, Sgd};
use std::path::Path;
use std::time::Instant;

/// Prefix of the snapshot file names.
pub const SNAPSHOT_PREFIX: &str = "bdcn";

/// Loads initial weights before training: `pretrain` may cover only part of the
/// network, `complete_pretrain` must cover all of it and is applied last.
pub fn load_initial_weights<M: EdgeModel + ?Sized>(
    model: &M,
    pretrain: Option<&Path>,
    complete_pretrain: Option<&Path>,
) -> Result<()> {
    if let Some(path) = pretrain {
        tracing::info!("init from pretrained weights {}", path.display());
        load_weights(model, path, true)?;
    }
    if let Some(path) = complete_pretrain {
        tracing::info!("finetune from {}", path.display());
        load_weights(model, path, false)?;
    }
    Ok(())
}

/// Outcome of a training run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainSummary {
    pub last_step: i64,
    pub mean_loss: f64,
}

pub struct Trainer<'a, M: EdgeModel + ?Sized> {
    model: &'a mut M,
    opt: GroupedSgd,
    cfg: TrainConfig,
    paths: SnapshotPaths,
    losses: RunningLoss,
    next_step: i64,
}

impl<'a, M: EdgeModel + ?Sized> Trainer<'a, M> {
    /// Builds the parameter groups and the optimizer, then restores the training
    /// state when `cfg.resume` is set.
    pub fn new(model: &'a mut M, cfg: TrainConfig) -> Result<Self> {
        cfg.validate()?;
        std::fs::create_dir_all(&cfg.param_dir)?;
        let groups = build_param_groups(&model.named_parameters(), cfg.base_lr, cfg.weight_decay);
        if groups.is_empty() {
            return Err(BdcnError::Config("the model has no weight or bias to train".to_string()));
        }
        for group in groups.iter() {
            tracing::info!("{}: {}", group.name, group.lr);
        }
        let opt = GroupedSgd::new(groups, Sgd { momentum: cfg.momentum });
        let paths = SnapshotPaths::new(&cfg.param_dir, SNAPSHOT_PREFIX);
        let losses = RunningLoss::new(cfg.average_loss);
        let mut trainer = Trainer { model, opt, cfg, paths, losses, next_step: 1 };
        if let Some(path) = trainer.cfg.resume.clone() {
            trainer.resume(&path)?;
        }
        trainer.model.set_train();
        Ok(trainer)
    }

    fn resume(&mut self, path: &Path) -> Result<()> {
        tracing::info!("resume from {}", path.display());
        let state = TrainingState::load(path, self.cfg.device)?;
        self.next_step = state.restore(&*self.model, &mut self.opt)?;
        tracing::info!("resuming at step {}", self.next_step);
        Ok(())
    }

    pub fn optimizer(&self) -> &GroupedSgd {
        &self.opt
    }

    /// The step the next call to [`Trainer::step`] will run.
    pub fn next_step(&self) -> i64 {
        self.next_step
    }

    pub fn mean_loss(&self) -> f64 {
        self.losses.mean()
    }

    /// Runs one optimization step and its periodic actions, returns the
    /// accumulated loss of the step.
    pub fn step<S: BatchSource>(&mut self, data: &mut Cycle<S>) -> Result<f64> {
        let step = self.next_step;
        let normalizer = (self.cfg.iter_size * self.cfg.batch_size) as f64;
        self.opt.zero_grad();
        let mut batch_loss = 0.;
        for _ in 0..self.cfg.iter_size {
            let (images, labels) = data.next_batch()?;
            let outputs = self.model.forward_t(&images, true)?;
            let loss = bdcn_loss(&outputs, &labels, self.cfg.loss, normalizer)?;
            loss.backward();
            batch_loss += f64::try_from(&loss)?;
        }
        self.opt.step()?;
        self.losses.push(batch_loss);

        if step % self.cfg.step_size == 0 {
            self.opt.scale_lr(self.cfg.gamma);
            tracing::info!("step {step}: learning rates scaled by {}", self.cfg.gamma);
        }
        if step % self.cfg.snapshots == 0 {
            snapshot(&self.paths, step, &*self.model, &self.opt)?;
        }
        self.next_step = step + 1;
        Ok(batch_loss)
    }

    /// Steps until `max_iter`, reporting every `display` steps.
    pub fn run<S: BatchSource>(&mut self, data: &mut Cycle<S>) -> Result<TrainSummary> {
        tracing::info!("{} batches per epoch", data.batches_per_epoch());
        let mut last_report = Instant::now();
        while self.next_step <= self.cfg.max_iter {
            let step = self.next_step;
            self.step(data)?;
            if step % self.cfg.display == 0 {
                let elapsed = last_report.elapsed().as_secs_f64();
                tracing::info!(
                    "iter: {}, lr: {:e}, loss: {:.6}, time using: {:.3}({:.3}s/iter)",
                    step,
                    self.opt.first_lr().unwrap_or(f64::NAN),
                    self.losses.mean(),
                    elapsed,
                    elapsed / self.cfg.display as f64,
                );
                last_report = Instant::now();
            }
        }
        Ok(TrainSummary { last_step: self.next_step - 1, mean_loss: self.losses.mean() })
    }
}
