//! Minimal solvers for depth-anchored correspondences.
//!
//! A rigid motion preserves distances, so every pair of lifted points gives
//! `|X0_i - X0_j|^2 = |X1_i - X1_j|^2`. With unknown offsets, scale and focal
//! lengths these equations are polynomial in a handful of monomials. The
//! solvers below linearise them in those monomials, pin the remaining freedom
//! with the consistency of the monomials and finish with a rigid alignment of
//! the lifted points.

use nalgebra::{Matrix3, SMatrix, SVector, Vector2, Vector3};

use crate::estimators::rigid_transform::estimate_rigid_transform;
use crate::models::{Focal, FocalVariant, PoseScaleOffset};
use crate::types::CorrespondenceSet;
use crate::utils::{solve_quadratic_real, solve_quartic_real};

/// Pairs of a three- or four-point sample.
const PAIRS_3: [(usize, usize); 3] = [(0, 1), (0, 2), (1, 2)];
const PAIRS_4: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

/// Run the depth-anchored solver of `variant` on `sample`.
///
/// Returns every real candidate; the caller filters invalid models.
pub fn solve(
    data: &CorrespondenceSet,
    sample: &[usize],
    variant: FocalVariant,
) -> Vec<PoseScaleOffset> {
    let needed = variant.depth_sample_size();
    if sample.len() < needed {
        return Vec::new();
    }
    let sample = &sample[..needed];
    if is_degenerate_sample(data, sample) {
        return Vec::new();
    }
    match variant {
        FocalVariant::Calibrated => solve_calibrated(data, sample),
        FocalVariant::Shared | FocalVariant::Two => solve_focal(data, sample, variant),
    }
}

/// Non-positive depth, or image points that are (nearly) collinear in either
/// view.
pub fn is_degenerate_sample(data: &CorrespondenceSet, sample: &[usize]) -> bool {
    let bad_depth = sample.iter().any(|&i| {
        let (d0, d1) = (data.depth0(i), data.depth1(i));
        !(d0 > 0.0 && d1 > 0.0 && d0.is_finite() && d1.is_finite())
    });
    if bad_depth {
        return true;
    }
    let pts0: Vec<_> = sample.iter().map(|&i| data.x0(i)).collect();
    let pts1: Vec<_> = sample.iter().map(|&i| data.x1(i)).collect();
    is_collinear(&pts0) || is_collinear(&pts1)
}

/// Ratio test on the eigenvalues of the 2x2 scatter matrix.
pub(crate) fn is_collinear(points: &[Vector2<f64>]) -> bool {
    let n = points.len() as f64;
    let mean = points.iter().sum::<Vector2<f64>>() / n;
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for p in points {
        let d = p - mean;
        sxx += d.x * d.x;
        sxy += d.x * d.y;
        syy += d.y * d.y;
    }
    let trace = sxx + syy;
    if trace <= f64::EPSILON {
        return true;
    }
    let det = sxx * syy - sxy * sxy;
    let disc = (0.25 * (sxx - syy) * (sxx - syy) + sxy * sxy).sqrt();
    let largest = 0.5 * trace + disc;
    let smallest = det / largest;
    smallest <= 1e-10 * largest
}

/// Three points, known intrinsics.
///
/// With `v = scale * offset1` each pair equation reads
/// `|D1|^2 s^2 + 2 D1.E1 sv + |E1|^2 v^2 = |E0|^2 o0^2 + 2 D0.E0 o0 + |D0|^2`,
/// where `D = d_i x_i - d_j x_j` and `E = x_i - x_j` in homogeneous
/// coordinates. Inverting the 3x3 system expresses `(s^2, sv, v^2)` as
/// quadratics in `o0`; `(sv)^2 = s^2 v^2` is then a quartic.
fn solve_calibrated(data: &CorrespondenceSet, sample: &[usize]) -> Vec<PoseScaleOffset> {
    let mut m = Matrix3::<f64>::zeros();
    // Columns hold the o0^2, o0 and constant coefficients of the right side.
    let mut a = Matrix3::<f64>::zeros();

    for (row, &(pi, pj)) in PAIRS_3.iter().enumerate() {
        let (i, j) = (sample[pi], sample[pj]);
        let (x0i, x0j) = (data.x0_homogeneous(i), data.x0_homogeneous(j));
        let (x1i, x1j) = (data.x1_homogeneous(i), data.x1_homogeneous(j));

        let d0 = data.depth0(i) * x0i - data.depth0(j) * x0j;
        let e0 = x0i - x0j;
        let d1 = data.depth1(i) * x1i - data.depth1(j) * x1j;
        let e1 = x1i - x1j;

        m[(row, 0)] = d1.norm_squared();
        m[(row, 1)] = 2.0 * d1.dot(&e1);
        m[(row, 2)] = e1.norm_squared();

        a[(row, 0)] = e0.norm_squared();
        a[(row, 1)] = 2.0 * d0.dot(&e0);
        a[(row, 2)] = d0.norm_squared();
    }

    let Some(m_inv) = m.try_inverse() else {
        return Vec::new();
    };
    // Row k: coefficients (o0^2, o0, 1) of monomial k.
    let p = m_inv * a;
    if p.iter().any(|v| !v.is_finite()) {
        return Vec::new();
    }

    let q0 = [p[(0, 0)], p[(0, 1)], p[(0, 2)]];
    let q1 = [p[(1, 0)], p[(1, 1)], p[(1, 2)]];
    let q2 = [p[(2, 0)], p[(2, 1)], p[(2, 2)]];
    let sq = mul_quadratics(&q1, &q1);
    let cross = mul_quadratics(&q0, &q2);
    let quartic = [
        sq[0] - cross[0],
        sq[1] - cross[1],
        sq[2] - cross[2],
        sq[3] - cross[3],
        sq[4] - cross[4],
    ];

    let mut models = Vec::new();
    for o0 in solve_quartic_real(quartic) {
        let s2 = eval_quadratic(&q0, o0);
        let sv = eval_quadratic(&q1, o0);
        if !(s2 > 0.0) {
            continue;
        }
        let scale = s2.sqrt();
        let o1 = sv / s2;
        if let Some(model) = align(data, sample, scale, o0, o1, Focal::Calibrated) {
            models.push(model);
        }
    }
    models
}

/// Four points, unknown shared or per-view focal length.
///
/// Multiplying each pair equation by `f0^2` makes it linear in
/// `y = (o0^2, o0, f0^2, sigma^2, sigma*w, w^2, h)` with
/// `sigma = f0 * scale / f1`, `w = sigma * offset1` and `h = f0^2 * scale^2`.
/// Six pairs leave a one-parameter family `y = y_p + lambda * n`, fixed by
/// the quadratic relations between the monomials.
fn solve_focal(
    data: &CorrespondenceSet,
    sample: &[usize],
    variant: FocalVariant,
) -> Vec<PoseScaleOffset> {
    // Padded with a zero row so the SVD exposes the full null space.
    let mut a = SMatrix::<f64, 7, 7>::zeros();
    let mut b = SVector::<f64, 7>::zeros();

    for (row, &(pi, pj)) in PAIRS_4.iter().enumerate() {
        let (i, j) = (sample[pi], sample[pj]);
        let (x0i, x0j) = (data.x0(i), data.x0(j));
        let (x1i, x1j) = (data.x1(i), data.x1(j));

        let d0 = data.depth0(i) * x0i - data.depth0(j) * x0j;
        let e0 = x0i - x0j;
        let d1 = data.depth1(i) * x1i - data.depth1(j) * x1j;
        let e1 = x1i - x1j;
        let delta0 = data.depth0(i) - data.depth0(j);
        let delta1 = data.depth1(i) - data.depth1(j);

        a[(row, 0)] = e0.norm_squared();
        a[(row, 1)] = 2.0 * d0.dot(&e0);
        a[(row, 2)] = delta0 * delta0;
        a[(row, 3)] = -d1.norm_squared();
        a[(row, 4)] = -2.0 * d1.dot(&e1);
        a[(row, 5)] = -e1.norm_squared();
        a[(row, 6)] = -delta1 * delta1;
        b[row] = -d0.norm_squared();
    }

    let svd = a.svd(true, true);
    let Some(v_t) = svd.v_t.as_ref() else {
        return Vec::new();
    };
    let sv = &svd.singular_values;
    let mut order: Vec<usize> = (0..7).collect();
    order.sort_by(|&x, &y| sv[x].partial_cmp(&sv[y]).unwrap_or(std::cmp::Ordering::Equal));
    // The padded row accounts for one zero singular value; a second one means
    // the solution family is not one-dimensional.
    if sv[order[1]] <= 1e-10 * sv[order[6]] {
        return Vec::new();
    }
    let n: SVector<f64, 7> = v_t.row(order[0]).transpose();
    let Ok(y_p) = svd.solve(&b, 1e-12 * sv[order[6]]) else {
        return Vec::new();
    };
    let p = y_p;

    // Each relation is a quadratic in lambda, coefficients highest degree first.
    let mut relations = vec![
        // o0^2 = o0 * o0
        [n[1] * n[1], 2.0 * p[1] * n[1] - n[0], p[1] * p[1] - p[0]],
        // (sigma w)^2 = sigma^2 w^2
        [
            n[4] * n[4] - n[3] * n[5],
            2.0 * p[4] * n[4] - p[3] * n[5] - p[5] * n[3],
            p[4] * p[4] - p[3] * p[5],
        ],
    ];
    if variant == FocalVariant::Shared {
        // h = f^2 * sigma^2 when both views share the focal length
        relations.push([
            -n[2] * n[3],
            n[6] - p[2] * n[3] - p[3] * n[2],
            p[6] - p[2] * p[3],
        ]);
    }
    let lambdas = consistent_roots(&relations);
    let mut models = Vec::new();
    for lambda in lambdas {
        let y = p + lambda * n;
        if !(y[2] > 0.0 && y[3] > 0.0) {
            continue;
        }
        let o0 = y[1];
        let o1 = y[4] / y[3];
        let focal0 = y[2].sqrt();
        let (scale, focal) = match variant {
            FocalVariant::Shared => (y[3].sqrt(), Focal::Shared(focal0)),
            _ => {
                if !(y[6] > 0.0) {
                    continue;
                }
                let sigma = y[3].sqrt();
                let scale = y[6].sqrt() / focal0;
                let focal1 = focal0 * scale / sigma;
                (scale, Focal::Two { focal0, focal1 })
            }
        };
        if let Some(model) = align(data, sample, scale, o0, o1, focal) {
            models.push(model);
        }
    }
    models
}

/// Lift the sample with the recovered depth parameters and align the two
/// point sets rigidly.
fn align(
    data: &CorrespondenceSet,
    sample: &[usize],
    scale: f64,
    offset0: f64,
    offset1: f64,
    focal: Focal,
) -> Option<PoseScaleOffset> {
    if !(scale.is_finite() && offset0.is_finite() && offset1.is_finite()) {
        return None;
    }
    let partial = PoseScaleOffset::new(
        Matrix3::identity(),
        Vector3::zeros(),
        scale,
        offset0,
        offset1,
        focal,
    );
    let p0: Vec<_> = sample
        .iter()
        .map(|&i| partial.lift0(&data.x0(i), data.depth0(i)))
        .collect();
    let p1: Vec<_> = sample
        .iter()
        .map(|&i| partial.lift1(&data.x1(i), data.depth1(i)))
        .collect();
    let (r, t) = estimate_rigid_transform(&p0, &p1, None)?;
    Some(PoseScaleOffset::new(r, t, scale, offset0, offset1, focal))
}

/// Relative residual below which a root satisfies a relation.
const CONSISTENCY_TOLERANCE: f64 = 1e-8;

/// Roots of any relation that satisfy all of them.
///
/// Every relation is solved on its own and each root is checked against the
/// others with a scale-free residual. On exact data only the common roots
/// survive. Noise leaves no common root, in which case the single most
/// consistent one is kept.
fn consistent_roots(relations: &[[f64; 3]]) -> Vec<f64> {
    let mut scored: Vec<(f64, f64)> = relations
        .iter()
        .flat_map(|q| solve_quadratic_real(q[0], q[1], q[2]))
        .map(|lambda| {
            let worst = relations
                .iter()
                .map(|q| relative_residual(q, lambda))
                .fold(0.0, f64::max);
            (lambda, worst)
        })
        .filter(|(_, worst)| worst.is_finite())
        .collect();
    scored.sort_by(|x, y| x.1.partial_cmp(&y.1).unwrap_or(std::cmp::Ordering::Equal));

    let Some(&(best, best_residual)) = scored.first() else {
        return Vec::new();
    };
    if best_residual > CONSISTENCY_TOLERANCE {
        return vec![best];
    }
    let mut roots: Vec<f64> = scored
        .iter()
        .take_while(|(_, worst)| *worst <= CONSISTENCY_TOLERANCE)
        .map(|&(lambda, _)| lambda)
        .collect();
    roots.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));
    roots.dedup_by(|x, y| (*x - *y).abs() <= 1e-6 * x.abs().max(1.0));
    roots
}

/// `|q(x)|` over the sum of the magnitudes of its terms.
fn relative_residual(q: &[f64; 3], x: f64) -> f64 {
    let terms = (q[0] * x * x).abs() + (q[1] * x).abs() + q[2].abs();
    if terms <= f64::MIN_POSITIVE {
        return 0.0;
    }
    eval_quadratic(q, x).abs() / terms
}

/// Product of two quadratics given highest degree first.
fn mul_quadratics(a: &[f64; 3], b: &[f64; 3]) -> [f64; 5] {
    [
        a[0] * b[0],
        a[0] * b[1] + a[1] * b[0],
        a[0] * b[2] + a[1] * b[1] + a[2] * b[0],
        a[1] * b[2] + a[2] * b[1],
        a[2] * b[2],
    ]
}

fn eval_quadratic(q: &[f64; 3], x: f64) -> f64 {
    (q[0] * x + q[1]) * x + q[2]
}
