//! High-level entry points.
//!
//! Each function validates its inputs and options, normalises pixel
//! coordinates, runs hybrid RANSAC with local optimisation and a final
//! nonlinear refinement, and reports focal lengths back in pixels.

use log::{debug, info, warn};
use nalgebra::Vector2;
use serde::Serialize;

use crate::core::{HybridRansac, HybridRansacStatistics, RansacTerminationCriterion};
use crate::error::Result;
use crate::estimators::HybridPoseEstimator;
use crate::models::{FocalVariant, PoseScaleOffset};
use crate::optimisers::HybridLocalOptimizer;
use crate::samplers::UniformRandomSampler;
use crate::scoring::{HybridMsacScoring, HybridScore};
use crate::settings::HybridRansacOptions;
use crate::types::CorrespondenceSet;

/// Result of an estimation.
#[derive(Debug, Clone, Serialize)]
pub struct EstimationResult {
    /// Refined model, or `None` when no sample produced a usable model.
    pub model: Option<PoseScaleOffset>,
    pub statistics: HybridRansacStatistics<HybridScore>,
}

/// Estimate pose, depth scale and offsets from calibrated correspondences.
///
/// # Arguments
/// * `x0`, `x1` - Coordinates already normalised by the intrinsics
/// * `depth0`, `depth1` - Depth of every correspondence in each view
/// * `min_depth` - Smallest depth of each depth map; offsets are bounded by it
/// * `options` - Configuration
/// * `weights` - Optional per-correspondence confidence
///
/// The coordinates are used as given. Thresholds are divided by
/// `norm_scale^2` when [`EstimatorSettings::norm_scale`] is set, so pixel
/// thresholds work with `norm_scale` set to the focal length in pixels.
/// Without it the thresholds are read in normalised units.
///
/// [`EstimatorSettings::norm_scale`]: crate::settings::EstimatorSettings::norm_scale
pub fn estimate_pose_scale_offset(
    x0: &[Vector2<f64>],
    x1: &[Vector2<f64>],
    depth0: &[f64],
    depth1: &[f64],
    min_depth: Vector2<f64>,
    options: &HybridRansacOptions,
    weights: Option<&[f64]>,
) -> Result<EstimationResult> {
    options.validate()?;
    let data = CorrespondenceSet::new(
        x0.to_vec(),
        x1.to_vec(),
        depth0.to_vec(),
        depth1.to_vec(),
        min_depth,
        weights.map(<[f64]>::to_vec),
    )?;
    let scale = options.estimator.norm_scale.unwrap_or(1.0);
    if options.estimator.norm_scale.is_none()
        && options.ransac.squared_inlier_thresholds
            == options.estimator.layout.default_squared_thresholds()
    {
        warn!("calibrated estimate with pixel default thresholds and no norm_scale; thresholds are read in normalised units");
    }
    Ok(run(data, FocalVariant::Calibrated, scale, options))
}

/// Estimate pose, depth scale, offsets and one focal length shared by both
/// views from pixel correspondences.
///
/// `pp0` and `pp1` are the principal points of the two images. Thresholds
/// are squared pixel distances.
#[allow(clippy::too_many_arguments)]
pub fn estimate_pose_scale_offset_shared_focal(
    x0: &[Vector2<f64>],
    x1: &[Vector2<f64>],
    depth0: &[f64],
    depth1: &[f64],
    min_depth: Vector2<f64>,
    pp0: Vector2<f64>,
    pp1: Vector2<f64>,
    options: &HybridRansacOptions,
    weights: Option<&[f64]>,
) -> Result<EstimationResult> {
    estimate_with_focal(
        FocalVariant::Shared,
        x0,
        x1,
        depth0,
        depth1,
        min_depth,
        (pp0, pp1),
        options,
        weights,
    )
}

/// Estimate pose, depth scale, offsets and one focal length per view from
/// pixel correspondences.
#[allow(clippy::too_many_arguments)]
pub fn estimate_pose_scale_offset_two_focal(
    x0: &[Vector2<f64>],
    x1: &[Vector2<f64>],
    depth0: &[f64],
    depth1: &[f64],
    min_depth: Vector2<f64>,
    pp0: Vector2<f64>,
    pp1: Vector2<f64>,
    options: &HybridRansacOptions,
    weights: Option<&[f64]>,
) -> Result<EstimationResult> {
    estimate_with_focal(
        FocalVariant::Two,
        x0,
        x1,
        depth0,
        depth1,
        min_depth,
        (pp0, pp1),
        options,
        weights,
    )
}

/// Normalisation scale: the override if given, else the larger principal
/// point norm, else one.
pub fn normalization_scale(
    pp0: &Vector2<f64>,
    pp1: &Vector2<f64>,
    options: &HybridRansacOptions,
) -> f64 {
    if let Some(scale) = options.estimator.norm_scale {
        return scale;
    }
    let scale = pp0.norm().max(pp1.norm());
    if scale > 0.0 && scale.is_finite() {
        scale
    } else {
        1.0
    }
}

#[allow(clippy::too_many_arguments)]
fn estimate_with_focal(
    variant: FocalVariant,
    x0: &[Vector2<f64>],
    x1: &[Vector2<f64>],
    depth0: &[f64],
    depth1: &[f64],
    min_depth: Vector2<f64>,
    (pp0, pp1): (Vector2<f64>, Vector2<f64>),
    options: &HybridRansacOptions,
    weights: Option<&[f64]>,
) -> Result<EstimationResult> {
    options.validate()?;
    let scale = normalization_scale(&pp0, &pp1, options);
    debug!("normalising {variant:?} correspondences by {scale}");

    let normalise = |points: &[Vector2<f64>], pp: &Vector2<f64>| -> Vec<Vector2<f64>> {
        points.iter().map(|p| (p - pp) / scale).collect()
    };
    let data = CorrespondenceSet::new(
        normalise(x0, &pp0),
        normalise(x1, &pp1),
        depth0.to_vec(),
        depth1.to_vec(),
        min_depth,
        weights.map(<[f64]>::to_vec),
    )?;
    Ok(run(data, variant, scale, options))
}

/// Run the full pipeline on normalised data.
fn run(
    data: CorrespondenceSet,
    variant: FocalVariant,
    scale: f64,
    options: &HybridRansacOptions,
) -> EstimationResult {
    let num_points = data.len();
    let mut settings = options.ransac.clone();
    let squared_scale = scale * scale;
    for threshold in &mut settings.squared_inlier_thresholds {
        *threshold /= squared_scale;
    }

    let scoring = HybridMsacScoring::new(
        settings.squared_inlier_thresholds.clone(),
        settings.data_type_weights.clone(),
    );
    let lo_settings = settings.local_optimization;
    let (sampler, local_optimizer) = match settings.random_seed {
        Some(seed) => (
            UniformRandomSampler::from_seed(seed),
            HybridLocalOptimizer::from_seed(lo_settings, seed.wrapping_add(1)),
        ),
        None => (
            UniformRandomSampler::new(),
            HybridLocalOptimizer::new(lo_settings),
        ),
    };
    let estimator = HybridPoseEstimator::new(
        data,
        variant,
        &options.estimator,
        lo_settings.non_minimal_sample_size,
    );
    let termination = RansacTerminationCriterion::from_settings(&settings);

    let mut ransac = HybridRansac::new(
        settings,
        estimator,
        sampler,
        scoring,
        lo_settings.enabled.then_some(local_optimizer),
        termination,
    );
    ransac.run();

    let model = ransac
        .best_model
        .take()
        .map(|model| model.with_focal_scaled(scale));
    match &model {
        Some(model) => info!(
            "{variant:?} estimate on {num_points} correspondences: scale {:.4}, offsets ({:.4}, {:.4}), focal ({:.2}, {:.2})",
            model.scale(),
            model.offset0(),
            model.offset1(),
            model.focal0(),
            model.focal1()
        ),
        None => info!("{variant:?} estimate on {num_points} correspondences found no model"),
    }

    EstimationResult {
        model,
        statistics: std::mem::take(&mut ransac.statistics),
    }
}
