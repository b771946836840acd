//! Per-point residuals of a model.
//!
//! Two residual families are scored. Depth reprojection lifts a point with
//! its corrected depth, moves it into the other view and measures the squared
//! image distance to the observed correspondence. The Sampson family measures
//! the squared first-order distance to the epipolar line.

use crate::geometry;
use crate::models::PoseScaleOffset;
use crate::settings::PoolLayout;
use crate::types::CorrespondenceSet;

/// Squared residual reported for points that end up behind a camera.
pub const BEHIND_CAMERA: f64 = f64::MAX;

/// Squared distance in view 1 between `x1` and the projection of the lifted
/// view-0 point.
pub fn reprojection0(data: &CorrespondenceSet, model: &PoseScaleOffset, i: usize, gradcut: bool) -> f64 {
    let corrected = data.depth0(i) + model.offset0();
    if gradcut && corrected <= 0.0 {
        return BEHIND_CAMERA;
    }
    let x0 = data.x0(i);
    let p = model.rotation() * model.lift0(&x0, data.depth0(i)) + model.translation();
    if p.z <= 0.0 {
        return BEHIND_CAMERA;
    }
    let f1 = model.focal1();
    let x1 = data.x1(i);
    let du = f1 * p.x / p.z - x1.x;
    let dv = f1 * p.y / p.z - x1.y;
    du * du + dv * dv
}

/// Squared distance in view 0 between `x0` and the projection of the lifted
/// view-1 point.
pub fn reprojection1(data: &CorrespondenceSet, model: &PoseScaleOffset, i: usize, gradcut: bool) -> f64 {
    let corrected = model.scale() * (data.depth1(i) + model.offset1());
    if gradcut && corrected <= 0.0 {
        return BEHIND_CAMERA;
    }
    let x1 = data.x1(i);
    let p = model.rotation().transpose() * (model.lift1(&x1, data.depth1(i)) - model.translation());
    if p.z <= 0.0 {
        return BEHIND_CAMERA;
    }
    let f0 = model.focal0();
    let x0 = data.x0(i);
    let du = f0 * p.x / p.z - x0.x;
    let dv = f0 * p.y / p.z - x0.y;
    du * du + dv * dv
}

/// Squared Sampson error of correspondence `i`.
pub fn sampson(data: &CorrespondenceSet, model: &PoseScaleOffset, i: usize) -> f64 {
    geometry::sampson_error(
        &model.fundamental(),
        &data.x0_homogeneous(i),
        &data.x1_homogeneous(i),
    )
}

/// Maps a pool index of a layout to its residual.
#[derive(Debug, Clone, Copy)]
pub struct ModelEvaluator {
    layout: PoolLayout,
}

impl ModelEvaluator {
    pub fn new(layout: PoolLayout) -> Self {
        Self { layout }
    }

    /// Squared residual of point `i` in pool `data_type`.
    pub fn evaluate(
        &self,
        data: &CorrespondenceSet,
        model: &PoseScaleOffset,
        data_type: usize,
        i: usize,
    ) -> f64 {
        match (self.layout, data_type) {
            (PoolLayout::TwoPool, 0) => {
                reprojection0(data, model, i, false).max(reprojection1(data, model, i, false))
            }
            (PoolLayout::TwoPool, _) => sampson(data, model, i),
            (PoolLayout::ThreePool { gradcut }, 0) => reprojection0(data, model, i, gradcut),
            (PoolLayout::ThreePool { gradcut }, 1) => reprojection1(data, model, i, gradcut),
            (PoolLayout::ThreePool { .. }, _) => sampson(data, model, i),
        }
    }

    /// Inlier decision against a pre-squared threshold.
    pub fn is_inlier(
        &self,
        data: &CorrespondenceSet,
        model: &PoseScaleOffset,
        data_type: usize,
        i: usize,
        squared_threshold: f64,
    ) -> bool {
        self.evaluate(data, model, data_type, i) <= squared_threshold
    }
}
