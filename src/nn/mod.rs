//! Optimization pieces: parameter groups, the edge loss and the optimizer.
pub mod param_groups;
pub use param_groups::{build_param_groups, classify, multipliers, ParamGroup, Role, Rule};

mod loss;
pub use loss::{bdcn_loss, cross_entropy_loss2d, edge_weights, LossWeights, DEFAULT_BALANCE};

mod optimizer;
pub use optimizer::{GroupedSgd, Sgd};
