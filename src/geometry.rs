//! Two-view geometry helpers.
//!
//! The rotation helpers are generic over [`RealField`] so the same code runs on
//! plain `f64` values and on the dual numbers used by the refiner's automatic
//! differentiation. Quaternions are stored as `[x, y, z, w]`, the layout of
//! the refiner's rotation block.

use nalgebra::{Matrix3, RealField, Rotation3, UnitQuaternion, Vector3};

/// Cross-product matrix `[v]x`, so that `skew(v) * w == v.cross(w)`.
pub fn skew<T: RealField>(v: &Vector3<T>) -> Matrix3<T> {
    Matrix3::new(
        T::zero(),
        -v.z.clone(),
        v.y.clone(),
        v.z.clone(),
        T::zero(),
        -v.x.clone(),
        -v.y.clone(),
        v.x.clone(),
        T::zero(),
    )
}

/// Normalise an `[x, y, z, w]` quaternion.
///
/// A zero quaternion maps to `(x, y, z, 1)`, which is the identity when the
/// vector part is zero as well.
pub fn normalize_quaternion<T: RealField>(q: &[T]) -> [T; 4] {
    debug_assert_eq!(q.len(), 4, "quaternion must have 4 coordinates");
    let norm_sq = q[0].clone() * q[0].clone()
        + q[1].clone() * q[1].clone()
        + q[2].clone() * q[2].clone()
        + q[3].clone() * q[3].clone();
    if norm_sq <= T::zero() {
        return [q[0].clone(), q[1].clone(), q[2].clone(), T::one()];
    }
    let inv = T::one() / norm_sq.sqrt();
    [
        q[0].clone() * inv.clone(),
        q[1].clone() * inv.clone(),
        q[2].clone() * inv.clone(),
        q[3].clone() * inv,
    ]
}

/// Rotation matrix of an `[x, y, z, w]` quaternion, normalised first.
pub fn quaternion_to_rotation_matrix<T: RealField>(q: &[T]) -> Matrix3<T> {
    let [x, y, z, w] = normalize_quaternion(q);
    let one = T::one();
    let two = one.clone() + one.clone();

    let xx = x.clone() * x.clone();
    let yy = y.clone() * y.clone();
    let zz = z.clone() * z.clone();
    let xy = x.clone() * y.clone();
    let xz = x.clone() * z.clone();
    let yz = y.clone() * z.clone();
    let wx = w.clone() * x;
    let wy = w.clone() * y;
    let wz = w * z;

    Matrix3::new(
        one.clone() - two.clone() * (yy.clone() + zz.clone()),
        two.clone() * (xy.clone() - wz.clone()),
        two.clone() * (xz.clone() + wy.clone()),
        two.clone() * (xy + wz),
        one.clone() - two.clone() * (xx.clone() + zz),
        two.clone() * (yz.clone() - wx.clone()),
        two.clone() * (xz - wy),
        two.clone() * (yz + wx),
        one - two * (xx + yy),
    )
}

/// `[x, y, z, w]` quaternion of a rotation matrix.
pub fn rotation_matrix_to_quaternion(r: &Matrix3<f64>) -> [f64; 4] {
    let q = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(*r));
    let c = q.coords;
    [c.x, c.y, c.z, c.w]
}

/// Essential matrix `[t]x R` of the motion `X1 = R X0 + t`.
pub fn essential_from_pose<T: RealField>(r: &Matrix3<T>, t: &Vector3<T>) -> Matrix3<T> {
    skew(t) * r
}

/// Fundamental matrix of the motion for focal-only intrinsics
/// `K = diag(f, f, 1)` and principal points at the origin.
pub fn fundamental_from_pose<T: RealField>(
    r: &Matrix3<T>,
    t: &Vector3<T>,
    focal0: T,
    focal1: T,
) -> Matrix3<T> {
    let mut f = essential_from_pose(r, t);
    let inv0 = T::one() / focal0;
    let inv1 = T::one() / focal1;
    for k in 0..3 {
        f[(0, k)] *= inv1.clone();
        f[(1, k)] *= inv1.clone();
        f[(k, 0)] *= inv0.clone();
        f[(k, 1)] *= inv0.clone();
    }
    f
}

/// Signed Sampson distance `x1^T F x0 / |J|` for homogeneous points.
///
/// `J` stacks the first two coordinates of `F x0` and `F^T x1`. A tiny
/// constant keeps the square root differentiable when `J` vanishes.
pub fn signed_sampson<T: RealField>(f: &Matrix3<T>, x0: &Vector3<T>, x1: &Vector3<T>) -> T {
    let fx0 = f * x0;
    let ftx1 = f.transpose() * x1;
    let c = x1.dot(&fx0);
    let denom = fx0[0].clone() * fx0[0].clone()
        + fx0[1].clone() * fx0[1].clone()
        + ftx1[0].clone() * ftx1[0].clone()
        + ftx1[1].clone() * ftx1[1].clone();
    c / (denom + T::from_f64(1e-300).unwrap_or_else(T::zero)).sqrt()
}

/// Squared Sampson error used for scoring.
pub fn sampson_error(f: &Matrix3<f64>, x0: &Vector3<f64>, x1: &Vector3<f64>) -> f64 {
    let fx0 = f * x0;
    let ftx1 = f.transpose() * x1;
    let c = x1.dot(&fx0);
    let denom = fx0[0] * fx0[0] + fx0[1] * fx0[1] + ftx1[0] * ftx1[0] + ftx1[1] * ftx1[1];
    if denom <= f64::EPSILON * f64::EPSILON {
        return if c == 0.0 { 0.0 } else { f64::MAX };
    }
    c * c / denom
}
