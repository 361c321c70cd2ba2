//! Image decoding, training pairs and inference listings.
pub mod dataset;

pub mod image;

pub mod manifest;
