//! Relative pose with depth scale, depth offsets and focal lengths.
//!
//! The motion maps view 0 into view 1, `X1 = R X0 + t`, where the two 3D
//! points are lifted from their observations as
//!
//! ```text
//! X0 = (d0 + offset0) * (u0 / f0, v0 / f0, 1)
//! X1 = scale * (d1 + offset1) * (u1 / f1, v1 / f1, 1)
//! ```
//!
//! The calibrated variant uses `f0 = f1 = 1`.

use nalgebra::{Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::geometry;

/// Which focal parameters a model carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FocalVariant {
    /// Coordinates are already normalised by the intrinsics.
    Calibrated,
    /// One unknown focal length shared by both views.
    Shared,
    /// One unknown focal length per view.
    Two,
}

impl FocalVariant {
    /// Number of free focal parameters.
    pub fn num_focal_params(self) -> usize {
        match self {
            FocalVariant::Calibrated => 0,
            FocalVariant::Shared => 1,
            FocalVariant::Two => 2,
        }
    }

    /// Size of the minimal depth-anchored sample.
    pub fn depth_sample_size(self) -> usize {
        match self {
            FocalVariant::Calibrated => 3,
            FocalVariant::Shared | FocalVariant::Two => 4,
        }
    }
}

/// Focal length(s) of a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Focal {
    Calibrated,
    Shared(f64),
    Two { focal0: f64, focal1: f64 },
}

impl Focal {
    pub fn variant(&self) -> FocalVariant {
        match self {
            Focal::Calibrated => FocalVariant::Calibrated,
            Focal::Shared(_) => FocalVariant::Shared,
            Focal::Two { .. } => FocalVariant::Two,
        }
    }

    /// Focal length of view 0 (`1` when calibrated).
    pub fn focal0(&self) -> f64 {
        match *self {
            Focal::Calibrated => 1.0,
            Focal::Shared(f) => f,
            Focal::Two { focal0, .. } => focal0,
        }
    }

    /// Focal length of view 1 (`1` when calibrated).
    pub fn focal1(&self) -> f64 {
        match *self {
            Focal::Calibrated => 1.0,
            Focal::Shared(f) => f,
            Focal::Two { focal1, .. } => focal1,
        }
    }

    /// Free focal parameters in refiner order.
    pub fn params(&self) -> Vec<f64> {
        match *self {
            Focal::Calibrated => Vec::new(),
            Focal::Shared(f) => vec![f],
            Focal::Two { focal0, focal1 } => vec![focal0, focal1],
        }
    }

    /// Rebuild from parameters in the order produced by [`Focal::params`].
    pub fn from_params(variant: FocalVariant, params: &[f64]) -> Self {
        match variant {
            FocalVariant::Calibrated => Focal::Calibrated,
            FocalVariant::Shared => Focal::Shared(params[0]),
            FocalVariant::Two => Focal::Two {
                focal0: params[0],
                focal1: params[1],
            },
        }
    }

    /// Multiply every focal length by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        match *self {
            Focal::Calibrated => Focal::Calibrated,
            Focal::Shared(f) => Focal::Shared(f * factor),
            Focal::Two { focal0, focal1 } => Focal::Two {
                focal0: focal0 * factor,
                focal1: focal1 * factor,
            },
        }
    }

    fn is_valid(&self) -> bool {
        self.params().iter().all(|f| f.is_finite() && *f > 0.0)
    }
}

/// Relative pose, depth scale/offsets and focal length(s).
///
/// The value is immutable once built; every estimation stage produces a new
/// one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseScaleOffset {
    rotation: Matrix3<f64>,
    translation: Vector3<f64>,
    scale: f64,
    offset0: f64,
    offset1: f64,
    focal: Focal,
}

impl PoseScaleOffset {
    pub fn new(
        rotation: Matrix3<f64>,
        translation: Vector3<f64>,
        scale: f64,
        offset0: f64,
        offset1: f64,
        focal: Focal,
    ) -> Self {
        Self {
            rotation,
            translation,
            scale,
            offset0,
            offset1,
            focal,
        }
    }

    pub fn rotation(&self) -> &Matrix3<f64> {
        &self.rotation
    }

    pub fn translation(&self) -> &Vector3<f64> {
        &self.translation
    }

    /// Multiplicative depth scale applied to view 1.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn offset0(&self) -> f64 {
        self.offset0
    }

    pub fn offset1(&self) -> f64 {
        self.offset1
    }

    pub fn offsets(&self) -> Vector2<f64> {
        Vector2::new(self.offset0, self.offset1)
    }

    pub fn focal(&self) -> Focal {
        self.focal
    }

    pub fn focal0(&self) -> f64 {
        self.focal.focal0()
    }

    pub fn focal1(&self) -> f64 {
        self.focal.focal1()
    }

    /// Rotation as an `[x, y, z, w]` unit quaternion.
    pub fn quaternion(&self) -> [f64; 4] {
        geometry::rotation_matrix_to_quaternion(&self.rotation)
    }

    /// Viewing ray `(u / f0, v / f0, 1)` of a view-0 observation.
    pub fn ray0(&self, x: &Vector2<f64>) -> Vector3<f64> {
        let f = self.focal0();
        Vector3::new(x.x / f, x.y / f, 1.0)
    }

    pub fn ray1(&self, x: &Vector2<f64>) -> Vector3<f64> {
        let f = self.focal1();
        Vector3::new(x.x / f, x.y / f, 1.0)
    }

    /// 3D point of a view-0 observation in the view-0 frame.
    pub fn lift0(&self, x: &Vector2<f64>, depth: f64) -> Vector3<f64> {
        (depth + self.offset0) * self.ray0(x)
    }

    /// 3D point of a view-1 observation in the view-1 frame.
    pub fn lift1(&self, x: &Vector2<f64>, depth: f64) -> Vector3<f64> {
        self.scale * (depth + self.offset1) * self.ray1(x)
    }

    pub fn essential(&self) -> Matrix3<f64> {
        geometry::essential_from_pose(&self.rotation, &self.translation)
    }

    /// Fundamental matrix in the normalised coordinate frame.
    pub fn fundamental(&self) -> Matrix3<f64> {
        geometry::fundamental_from_pose(
            &self.rotation,
            &self.translation,
            self.focal0(),
            self.focal1(),
        )
    }

    /// Same model with every focal length multiplied by `factor`.
    pub fn with_focal_scaled(&self, factor: f64) -> Self {
        Self {
            focal: self.focal.scaled(factor),
            ..self.clone()
        }
    }

    /// Check the model invariants: finite values, positive scale and focal
    /// lengths, offsets keeping corrected depths above zero, and an
    /// orthonormal rotation.
    pub fn is_valid(&self, min_depth: &Vector2<f64>) -> bool {
        let finite = self.rotation.iter().all(|v| v.is_finite())
            && self.translation.iter().all(|v| v.is_finite())
            && self.scale.is_finite()
            && self.offset0.is_finite()
            && self.offset1.is_finite();
        if !finite || self.scale <= 0.0 || !self.focal.is_valid() {
            return false;
        }
        if self.offset0 < -min_depth.x - OFFSET_TOLERANCE
            || self.offset1 < -min_depth.y - OFFSET_TOLERANCE
        {
            return false;
        }
        let orthogonality = (self.rotation.transpose() * self.rotation - Matrix3::identity()).norm();
        orthogonality < 1e-6 && self.rotation.determinant() > 0.0
    }
}

/// Slack allowed on the offset lower bound.
pub const OFFSET_TOLERANCE: f64 = 1e-6;
