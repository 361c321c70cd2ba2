//! Training and inference drivers for BDCN, a bi-directional cascade network
//! for edge detection, on top of libtorch.
//!
//! The network is loaded as a TorchScript module. This crate provides what
//! surrounds it: per-parameter learning rates, the class-balanced edge loss,
//! the training loop with snapshots and resume, and batch inference over a
//! directory of images.
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod infer;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod nn;
pub mod train;
pub mod vision;

pub use error::{BdcnError, Result};
pub use model::{EdgeModel, ScriptedModel};
