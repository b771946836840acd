//! Sampling strategies for hybrid RANSAC.
//!
//! Samplers implement [`HybridSampler`](crate::core::HybridSampler) and draw
//! an independent set of indices from each data pool.

pub mod uniform;

pub use uniform::UniformRandomSampler;
