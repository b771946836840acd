//! Seven-point epipolar solver with focal recovery and depth alignment.
//!
//! The solver ignores depths while fitting the epipolar geometry, which makes
//! it usable on samples whose depth maps are unreliable. Depths only enter at
//! the end, to fix the translation length together with scale and offsets.

use nalgebra::{DMatrix, DVector, Matrix3, SMatrix, Vector3};

use crate::geometry::skew;
use crate::models::{Focal, FocalVariant, PoseScaleOffset};
use crate::types::CorrespondenceSet;
use crate::utils::{solve_cubic_real, solve_quadratic_real};

/// Correspondences needed by [`solve`].
pub const SAMPLE_SIZE: usize = 7;

/// Fit fundamental matrices to seven correspondences and turn each one into
/// full models of the requested variant.
pub fn solve(
    data: &CorrespondenceSet,
    sample: &[usize],
    variant: FocalVariant,
) -> Vec<PoseScaleOffset> {
    if sample.len() < SAMPLE_SIZE {
        return Vec::new();
    }
    let sample = &sample[..SAMPLE_SIZE];

    let mut models = Vec::new();
    for f in seven_point(data, sample) {
        let Some(focal) = focal_from_fundamental(&f, variant) else {
            continue;
        };
        let k0 = Matrix3::from_diagonal(&Vector3::new(focal.focal0(), focal.focal0(), 1.0));
        let k1 = Matrix3::from_diagonal(&Vector3::new(focal.focal1(), focal.focal1(), 1.0));
        let essential = k1 * f * k0;
        if let Some(model) = align_depths(data, sample, &essential, focal) {
            models.push(model);
        }
    }
    models
}

/// Fundamental matrices with `x1^T F x0 = 0` on seven correspondences.
pub fn seven_point(data: &CorrespondenceSet, sample: &[usize]) -> Vec<Matrix3<f64>> {
    // Zero rows pad the system to square so the SVD returns a full V.
    let mut a = SMatrix::<f64, 9, 9>::zeros();
    for (row, &i) in sample.iter().take(SAMPLE_SIZE).enumerate() {
        let (x0, x1) = (data.x0(i), data.x1(i));
        let coeffs = [
            x1.x * x0.x,
            x1.x * x0.y,
            x1.x,
            x1.y * x0.x,
            x1.y * x0.y,
            x1.y,
            x0.x,
            x0.y,
            1.0,
        ];
        for (col, c) in coeffs.into_iter().enumerate() {
            a[(row, col)] = c;
        }
    }

    let svd = a.svd(false, true);
    let Some(v_t) = svd.v_t else {
        return Vec::new();
    };
    let sv = svd.singular_values;
    let mut order: Vec<usize> = (0..9).collect();
    order.sort_by(|&x, &y| sv[x].partial_cmp(&sv[y]).unwrap_or(std::cmp::Ordering::Equal));
    // The two padded rows give two zero singular values; a third one means
    // the sample does not constrain F to a pencil.
    if sv[order[2]] <= 1e-10 * sv[order[8]] {
        return Vec::new();
    }

    let as_matrix = |k: usize| Matrix3::from_row_slice(v_t.row(k).transpose().as_slice());
    let f1 = as_matrix(order[0]);
    let f2 = as_matrix(order[1]);

    // det(a F1 + F2) is a cubic in a; recover it from four evaluations.
    let det_at = |x: f64| (f1 * x + f2).determinant();
    let c3 = f1.determinant();
    let c0 = f2.determinant();
    let (p_plus, p_minus) = (det_at(1.0), det_at(-1.0));
    let c2 = 0.5 * (p_plus + p_minus) - c0;
    let c1 = 0.5 * (p_plus - p_minus) - c3;

    let scale = c3.abs().max(c2.abs()).max(c1.abs()).max(c0.abs());
    if scale == 0.0 || !scale.is_finite() {
        return Vec::new();
    }
    let roots = if c3.abs() <= 1e-12 * scale {
        solve_quadratic_real(c2, c1, c0)
    } else {
        let mut buf = [0.0; 3];
        let n = solve_cubic_real(c2 / c3, c1 / c3, c0 / c3, &mut buf);
        buf[..n].to_vec()
    };

    roots
        .into_iter()
        .filter_map(|x| {
            let f = f1 * x + f2;
            let norm = f.norm();
            (norm > 1e-12 && norm.is_finite()).then(|| f / norm)
        })
        .collect()
}

/// Bougnoux's closed form for the squared focal lengths `(f0^2, f1^2)` of a
/// fundamental matrix whose principal points sit at the origin.
pub fn bougnoux_squared_focals(f: &Matrix3<f64>) -> Option<(f64, f64)> {
    let svd = f.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let sv = svd.singular_values;
    let smallest = sv.imin();
    // F e = 0 and F^T e' = 0.
    let e_right: Vector3<f64> = v_t.row(smallest).transpose();
    let e_left: Vector3<f64> = u.column(smallest).into_owned();

    let p = Vector3::new(0.0, 0.0, 1.0);
    let ii = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, 0.0));
    let squared = |g: &Matrix3<f64>, e: &Vector3<f64>| -> Option<f64> {
        let lhs = p.transpose() * skew(e) * ii;
        let num = (lhs * g * p)[0] * g[(2, 2)];
        let den = (lhs * g * ii * g.transpose() * p)[0];
        if den.abs() <= f64::EPSILON * num.abs().max(1e-300) {
            return None;
        }
        Some(-num / den)
    };
    let f0_sq = squared(f, &e_left)?;
    let f1_sq = squared(&f.transpose(), &e_right)?;
    Some((f0_sq, f1_sq))
}

fn focal_from_fundamental(f: &Matrix3<f64>, variant: FocalVariant) -> Option<Focal> {
    if variant == FocalVariant::Calibrated {
        return Some(Focal::Calibrated);
    }
    let (f0_sq, f1_sq) = bougnoux_squared_focals(f)?;
    if !(f0_sq > 0.0 && f1_sq > 0.0 && f0_sq.is_finite() && f1_sq.is_finite()) {
        return None;
    }
    Some(match variant {
        FocalVariant::Shared => Focal::Shared((f0_sq * f1_sq).sqrt().sqrt()),
        _ => Focal::Two {
            focal0: f0_sq.sqrt(),
            focal1: f1_sq.sqrt(),
        },
    })
}

/// The two rotations and the translation direction encoded by `E`.
pub fn decompose_essential(e: &Matrix3<f64>) -> Option<([Matrix3<f64>; 2], Vector3<f64>)> {
    let svd = e.svd(true, true);
    let (mut u, mut v_t) = (svd.u?, svd.v_t?);
    // Keep the largest singular directions first.
    let sv = svd.singular_values;
    let smallest = sv.imin();
    if smallest != 2 {
        u.swap_columns(smallest, 2);
        v_t.swap_rows(smallest, 2);
    }
    if u.determinant() < 0.0 {
        u.column_mut(2).neg_mut();
    }
    if v_t.determinant() < 0.0 {
        v_t.row_mut(2).neg_mut();
    }
    let w = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
    let r1 = u * w * v_t;
    let r2 = u * w.transpose() * v_t;
    let t = u.column(2).into_owned();
    Some(([r1, r2], t))
}

/// Solve for `(offset0, scale, scale * offset1, |t|)` by linear least squares
/// on `X1 = R X0 + t` for both rotations of `E`, keeping the better fit with
/// a positive scale.
fn align_depths(
    data: &CorrespondenceSet,
    sample: &[usize],
    essential: &Matrix3<f64>,
    focal: Focal,
) -> Option<PoseScaleOffset> {
    let (rotations, t_dir) = decompose_essential(essential)?;
    let (f0, f1) = (focal.focal0(), focal.focal1());

    let mut best: Option<(f64, PoseScaleOffset)> = None;
    for r in rotations {
        let rows = 3 * sample.len();
        let mut a = DMatrix::<f64>::zeros(rows, 4);
        let mut b = DVector::<f64>::zeros(rows);
        for (k, &i) in sample.iter().enumerate() {
            let (x0, x1) = (data.x0(i), data.x1(i));
            let ray0 = r * Vector3::new(x0.x / f0, x0.y / f0, 1.0);
            let ray1 = Vector3::new(x1.x / f1, x1.y / f1, 1.0);
            let d1 = data.depth1(i);
            for c in 0..3 {
                let row = 3 * k + c;
                a[(row, 0)] = -ray0[c];
                a[(row, 1)] = d1 * ray1[c];
                a[(row, 2)] = ray1[c];
                a[(row, 3)] = -t_dir[c];
                b[row] = data.depth0(i) * ray0[c];
            }
        }
        let svd = a.clone().svd(true, true);
        let Ok(x) = svd.solve(&b, 1e-12) else {
            continue;
        };
        let (offset0, scale, w, lambda) = (x[0], x[1], x[2], x[3]);
        if !(scale > 0.0) || x.iter().any(|v| !v.is_finite()) {
            continue;
        }
        let residual = (&a * &x - &b).norm_squared();
        let model = PoseScaleOffset::new(r, lambda * t_dir, scale, offset0, w / scale, focal);
        if best.as_ref().map_or(true, |(cost, _)| residual < *cost) {
            best = Some((residual, model));
        }
    }
    best.map(|(_, model)| model)
}
