//! Synthetic scenes shared by the unit tests.

use nalgebra::{Rotation3, Unit, Vector2, Vector3};

use crate::models::{Focal, PoseScaleOffset};
use crate::types::CorrespondenceSet;

pub(crate) fn ground_truth(focal: Focal) -> PoseScaleOffset {
    let axis = Unit::new_normalize(Vector3::new(0.3, 1.0, 0.2));
    PoseScaleOffset::new(
        *Rotation3::from_axis_angle(&axis, 0.25).matrix(),
        Vector3::new(-1.0, 0.15, 0.1),
        1.7,
        0.4,
        -0.3,
        focal,
    )
}

/// Low-discrepancy points in front of view 0.
pub(crate) fn points(n: usize) -> Vec<Vector3<f64>> {
    let frac = |v: f64| v - v.floor();
    (0..n)
        .map(|k| {
            let k = k as f64 + 1.0;
            Vector3::new(
                -2.0 + 4.0 * frac(k * 0.618_033_988_7),
                -1.5 + 3.0 * frac(k * 0.414_213_562_4),
                3.0 + 4.0 * frac(k * 0.732_050_807_6),
            )
        })
        .collect()
}

/// Project `points` through `model` into both views.
pub(crate) fn observe(model: &PoseScaleOffset, points: &[Vector3<f64>]) -> CorrespondenceSet {
    let (f0, f1) = (model.focal0(), model.focal1());
    let mut x0 = Vec::with_capacity(points.len());
    let mut x1 = Vec::with_capacity(points.len());
    let mut d0 = Vec::with_capacity(points.len());
    let mut d1 = Vec::with_capacity(points.len());
    for p0 in points {
        let p1 = model.rotation() * p0 + model.translation();
        x0.push(Vector2::new(f0 * p0.x / p0.z, f0 * p0.y / p0.z));
        x1.push(Vector2::new(f1 * p1.x / p1.z, f1 * p1.y / p1.z));
        d0.push(p0.z - model.offset0());
        d1.push(p1.z / model.scale() - model.offset1());
    }
    CorrespondenceSet::new(x0, x1, d0, d1, Vector2::new(0.5, 0.5), None)
        .expect("synthetic scene is valid")
}

/// Whether `model` matches `truth` up to `tol` in every parameter.
pub(crate) fn close_to(model: &PoseScaleOffset, truth: &PoseScaleOffset, tol: f64) -> bool {
    (model.rotation() - truth.rotation()).norm() < tol
        && (model.translation() - truth.translation()).norm() < tol
        && (model.scale() - truth.scale()).abs() < tol
        && (model.offset0() - truth.offset0()).abs() < tol
        && (model.offset1() - truth.offset1()).abs() < tol
        && (model.focal0() - truth.focal0()).abs() < tol
        && (model.focal1() - truth.focal1()).abs() < tol
}
