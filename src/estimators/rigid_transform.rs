//! Weighted rigid alignment of 3D point sets (Procrustes analysis).

use nalgebra::{Matrix3, Vector3};

/// Find `(R, t)` minimising `sum_i w_i |R p0_i + t - p1_i|^2`.
///
/// Returns `None` for fewer than three points, non-positive total weight or
/// when the centred points are (nearly) collinear, in which case the rotation
/// about their common line is not determined.
pub fn estimate_rigid_transform(
    p0: &[Vector3<f64>],
    p1: &[Vector3<f64>],
    weights: Option<&[f64]>,
) -> Option<(Matrix3<f64>, Vector3<f64>)> {
    let n = p0.len();
    if n < 3 || p1.len() != n {
        return None;
    }
    let weight = |i: usize| weights.map_or(1.0, |w| w[i]);

    let total: f64 = (0..n).map(weight).sum();
    if !(total > 0.0) {
        return None;
    }

    let mut c0 = Vector3::<f64>::zeros();
    let mut c1 = Vector3::<f64>::zeros();
    for i in 0..n {
        c0 += weight(i) * p0[i];
        c1 += weight(i) * p1[i];
    }
    c0 /= total;
    c1 /= total;

    let mut avg_dist0 = 0.0;
    let mut avg_dist1 = 0.0;
    let mut h = Matrix3::<f64>::zeros();
    for i in 0..n {
        let q0 = p0[i] - c0;
        let q1 = p1[i] - c1;
        avg_dist0 += q0.norm();
        avg_dist1 += q1.norm();
        h += weight(i) * q0 * q1.transpose();
    }
    avg_dist0 /= n as f64;
    avg_dist1 /= n as f64;
    if avg_dist0 < 1e-10 || avg_dist1 < 1e-10 {
        return None;
    }
    if h.iter().any(|v| !v.is_finite()) {
        return None;
    }

    // H = U S V^T, R = V U^T
    let svd = h.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let mut sv = svd.singular_values;
    sv.as_mut_slice()
        .sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    if sv[1] <= 1e-10 * sv[0] {
        return None;
    }

    let v = v_t.transpose();
    let mut r = v * u.transpose();
    if r.determinant() < 0.0 {
        let mut v_neg = v;
        v_neg.column_mut(2).neg_mut();
        r = v_neg * u.transpose();
    }

    let t = c1 - r * c0;
    Some((r, t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;

    #[test]
    fn recovers_known_motion() {
        let r = *Rotation3::from_euler_angles(0.3, -0.1, 0.7).matrix();
        let t = Vector3::new(1.0, -2.0, 0.5);
        let p0 = vec![
            Vector3::new(0.0, 0.0, 4.0),
            Vector3::new(1.0, 0.2, 5.0),
            Vector3::new(-0.5, 1.0, 3.5),
            Vector3::new(0.3, -0.8, 6.0),
        ];
        let p1: Vec<_> = p0.iter().map(|p| r * p + t).collect();

        let (r_est, t_est) = estimate_rigid_transform(&p0, &p1, None).unwrap();
        assert_relative_eq!(r_est, r, epsilon = 1e-10);
        assert_relative_eq!(t_est, t, epsilon = 1e-10);

        let w = [1.0, 2.0, 0.5, 3.0];
        let (r_w, _) = estimate_rigid_transform(&p0, &p1, Some(&w)).unwrap();
        assert_relative_eq!(r_w, r, epsilon = 1e-10);
    }

    #[test]
    fn collinear_points_are_rejected() {
        let p0 = vec![
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(1.0, 1.0, 2.0),
            Vector3::new(2.0, 2.0, 3.0),
        ];
        assert!(estimate_rigid_transform(&p0, &p0, None).is_none());
    }
}
