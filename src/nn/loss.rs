//! Class-balanced binary cross-entropy for edge maps.
use crate::error::{BdcnError, Result};
use tch::{Kind, Reduction, Tensor};

/// Default up-weighting of negative pixels.
pub const DEFAULT_BALANCE: f64 = 1.1;

fn check_nchw(t: &Tensor, what: &str) -> Result<(i64, i64, i64, i64)> {
    match t.size().as_slice() {
        &[n, c, h, w] => Ok((n, c, h, w)),
        size => Err(BdcnError::Shape(format!("{what} should be NxCxHxW, got {size:?}"))),
    }
}

/// Computes the per-pixel weights of a batch of ground-truth masks.
///
/// For each sample, pixels labeled 1 get `neg / valid`, pixels labeled 0 get
/// `balance * pos / valid` and every other label gets 0. A sample with no positive
/// or no negative pixel cannot be balanced, it is reported and gets zero weight.
pub fn edge_weights(targets: &Tensor, balance: f64) -> Result<Tensor> {
    let (n, _, _, _) = check_nchw(targets, "targets")?;
    let mut weights = Vec::with_capacity(n as usize);
    for i in 0..n {
        let t = targets.get(i);
        let pos_mask = t.eq(1.).to_kind(Kind::Float);
        let neg_mask = t.eq(0.).to_kind(Kind::Float);
        let pos = f64::try_from(&pos_mask.sum(Kind::Float))?;
        let neg = f64::try_from(&neg_mask.sum(Kind::Float))?;
        let valid = pos + neg;
        if pos == 0. || neg == 0. {
            tracing::warn!(sample = i, pos, neg, "degenerate edge mask, ignoring sample");
            weights.push(t.zeros_like().to_kind(Kind::Float));
            continue;
        }
        weights.push(pos_mask * (neg / valid) + neg_mask * (balance * pos / valid));
    }
    Ok(Tensor::stack(&weights, 0))
}

/// Weighted binary cross-entropy between the sigmoid of `inputs` and `targets`,
/// summed over every element.
pub fn cross_entropy_loss2d(inputs: &Tensor, targets: &Tensor, balance: f64) -> Result<Tensor> {
    let in_size = check_nchw(inputs, "inputs")?;
    let target_size = check_nchw(targets, "targets")?;
    if in_size != target_size {
        return Err(BdcnError::Shape(format!(
            "inputs {in_size:?} and targets {target_size:?} differ"
        )));
    }
    let weights = edge_weights(targets, balance)?.to_device(inputs.device());
    let targets = targets.to_kind(Kind::Float);
    Ok(inputs.sigmoid().binary_cross_entropy(&targets, Some(&weights), Reduction::Sum))
}

/// Loss weights for a multi-output network.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LossWeights {
    pub side: f64,
    pub fuse: f64,
    pub balance: f64,
}

impl Default for LossWeights {
    fn default() -> Self {
        LossWeights { side: 0.5, fuse: 1.1, balance: DEFAULT_BALANCE }
    }
}

/// Combines the losses of every side output and of the fused output, the last
/// element of `outputs`, each divided by `normalizer`.
pub fn bdcn_loss(
    outputs: &[Tensor],
    targets: &Tensor,
    weights: LossWeights,
    normalizer: f64,
) -> Result<Tensor> {
    let (fused, sides) = outputs
        .split_last()
        .ok_or_else(|| BdcnError::ModelOutput("no output tensor".to_string()))?;
    let mut loss =
        cross_entropy_loss2d(fused, targets, weights.balance)? * (weights.fuse / normalizer);
    for side in sides {
        loss += cross_entropy_loss2d(side, targets, weights.balance)? * (weights.side / normalizer);
    }
    Ok(loss)
}
