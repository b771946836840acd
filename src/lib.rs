//! # Hybrid Pose - relative pose, depth scale and focal length with hybrid RANSAC
//!
//! `hybrid_pose` estimates the relative pose between two views together with
//! an affine correction of their depth maps (a scale on view 1 and an offset
//! per view) and, optionally, the focal length(s). Every correspondence is
//! scored twice: as a depth-anchored 3D point through its reprojection error,
//! and as a plain image match through its Sampson error. Two minimal solvers
//! compete inside one RANSAC loop, one per residual family.
//!
//! ## Quick Start
//!
//! ```rust
//! use hybrid_pose::{estimate_pose_scale_offset_shared_focal, HybridRansacOptions};
//! use nalgebra::{Vector2, Vector3};
//!
//! let (focal, pp) = (500.0, Vector2::new(320.0, 240.0));
//! let t = Vector3::new(-0.5, 0.05, 0.0);
//! let (mut x0, mut x1, mut d0, mut d1) = (vec![], vec![], vec![], vec![]);
//! for k in 0..60 {
//!     let k = k as f64;
//!     let p0 = Vector3::new((k * 0.37).sin(), (k * 0.71).cos(), 4.0 + (k * 0.13).sin());
//!     let p1 = p0 + t;
//!     x0.push(pp + focal * Vector2::new(p0.x / p0.z, p0.y / p0.z));
//!     x1.push(pp + focal * Vector2::new(p1.x / p1.z, p1.y / p1.z));
//!     d0.push(p0.z);
//!     d1.push(p1.z);
//! }
//!
//! let mut options = HybridRansacOptions::default();
//! options.ransac.random_seed = Some(1);
//! let result = estimate_pose_scale_offset_shared_focal(
//!     &x0, &x1, &d0, &d1, Vector2::new(3.0, 3.0), pp, pp, &options, None,
//! )
//! .unwrap();
//! if let Some(model) = result.model {
//!     println!("focal {:.1}, scale {:.3}", model.focal0(), model.scale());
//! }
//! println!("inliers per pool: {:?}", result.statistics.num_inliers);
//! ```
//!
//! ## Extending the Library
//!
//! The RANSAC driver in [`core`](crate::core) is generic over a few traits:
//!
//! - **[`HybridEstimator`](crate::core::HybridEstimator)**: pools, minimal and non-minimal solvers, residuals, refinement
//! - **[`HybridSampler`](crate::core::HybridSampler)**: per-pool index sampling
//! - **[`HybridScoring<E>`](crate::core::HybridScoring)**: model quality and inlier sets
//! - **[`LocalOptimizer<E, Sc>`](optimisers::LocalOptimizer)**: improvement of the best model
//! - **[`TerminationCriterion`](crate::core::TerminationCriterion)**: adaptive iteration budget
//!
//! ## Modules
//!
//! - **[`api`](api)**: Entry points for the calibrated, shared-focal and two-focal variants
//! - **[`core`](crate::core)**: Core traits and the `HybridRansac` pipeline
//! - **[`estimators`](estimators)**: Minimal and non-minimal solvers, residuals
//! - **[`optimisers`](optimisers)**: Local optimisation and nonlinear refinement
//! - **[`samplers`](samplers)**: Sampling strategies
//! - **[`scoring`](scoring)**: MSAC scoring over several pools
//! - **[`models`](models)**: Model types
//! - **[`settings`](settings)**: Configuration types
//! - **[`types`](types)**: Validated input container

pub mod api;
pub mod core;
pub mod error;
pub mod estimators;
pub mod geometry;
pub mod models;
pub mod optimisers;
pub mod samplers;
pub mod scoring;
pub mod settings;
pub mod types;
pub mod utils;

#[cfg(test)]
mod testing;

// Re-export high-level API
pub use api::{
    EstimationResult, estimate_pose_scale_offset, estimate_pose_scale_offset_shared_focal,
    estimate_pose_scale_offset_two_focal,
};

// Re-export core traits for easy access
pub use crate::core::{HybridEstimator, HybridSampler, HybridScoring, TerminationCriterion};
pub use optimisers::LocalOptimizer;

pub use error::{HybridPoseError, Result};
pub use models::{Focal, FocalVariant, PoseScaleOffset};
pub use settings::{
    EstimatorSettings, HybridRansacOptions, LocalOptimizationSettings, LossFunction, PoolLayout,
    RansacSettings, RefinerConfig, SolverOptions,
};
pub use types::CorrespondenceSet;
