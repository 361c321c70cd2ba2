//! Stochastic gradient descent with one learning rate and weight decay per parameter.
//!
//! The update follows the usual momentum formulation:
//! `d = grad + wd * p`, `buf = momentum * buf + d`, `p -= lr * buf`.
//! Momentum buffers are kept alongside the groups so that they can be saved in
//! and restored from a training state record.
use super::param_groups::ParamGroup;
use crate::error::{BdcnError, Result};
use tch::{no_grad, Tensor};

/// Parameters for the grouped SGD optimizer.
#[derive(Debug, Copy, Clone)]
pub struct Sgd {
    pub momentum: f64,
}

impl Default for Sgd {
    fn default() -> Self {
        Sgd { momentum: 0.9 }
    }
}

#[derive(Debug)]
pub struct GroupedSgd {
    groups: Vec<ParamGroup>,
    buffers: Vec<Tensor>,
    momentum: f64,
}

impl GroupedSgd {
    pub fn new(groups: Vec<ParamGroup>, s: Sgd) -> GroupedSgd {
        let buffers = no_grad(|| groups.iter().map(|g| g.param.zeros_like()).collect());
        GroupedSgd { groups, buffers, momentum: s.momentum }
    }

    pub fn groups(&self) -> &[ParamGroup] {
        &self.groups
    }

    pub fn momentum(&self) -> f64 {
        self.momentum
    }

    /// The momentum buffer associated with each group, in group order.
    pub fn buffers(&self) -> &[Tensor] {
        &self.buffers
    }

    pub fn zero_grad(&mut self) {
        for group in self.groups.iter_mut() {
            group.param.zero_grad();
        }
    }

    /// Applies one update to every parameter that received a gradient.
    pub fn step(&mut self) -> Result<()> {
        no_grad(|| self.step_())
    }

    fn step_(&mut self) -> Result<()> {
        for (group, buf) in self.groups.iter_mut().zip(self.buffers.iter_mut()) {
            let grad = group.param.grad();
            if !grad.defined() {
                continue;
            }
            let mut d_p = if group.weight_decay != 0. {
                grad + &group.param * group.weight_decay
            } else {
                grad
            };
            if self.momentum != 0. {
                *buf *= self.momentum;
                *buf += &d_p;
                d_p = buf.shallow_clone();
            }
            let _ = group.param.f_sub_(&(d_p * group.lr))?;
        }
        Ok(())
    }

    /// Multiplies the learning rate of every group by `gamma`.
    pub fn scale_lr(&mut self, gamma: f64) {
        for group in self.groups.iter_mut() {
            group.lr *= gamma;
            tracing::debug!("{}: {}", group.name, group.lr);
        }
    }

    /// Learning rate of the first group, used for reporting.
    pub fn first_lr(&self) -> Option<f64> {
        self.groups.first().map(|g| g.lr)
    }

    /// Restores learning rates and momentum buffers saved by name.
    ///
    /// Every group must be present in `state`, the group structure itself is left
    /// untouched.
    pub fn restore<'a, F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<(f64, &'a Tensor)>,
    {
        for (group, buf) in self.groups.iter_mut().zip(self.buffers.iter_mut()) {
            let (lr, saved) =
                lookup(&group.name).ok_or_else(|| BdcnError::MissingParameter(group.name.clone()))?;
            if saved.size() != buf.size() {
                return Err(BdcnError::Shape(format!(
                    "momentum buffer for {}: expected {:?}, got {:?}",
                    group.name,
                    buf.size(),
                    saved.size()
                )));
            }
            group.lr = lr;
            no_grad(|| buf.f_copy_(saved))?;
        }
        Ok(())
    }
}
