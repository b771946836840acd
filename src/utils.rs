//! Random sampling and polynomial root finding shared by the solvers.

use nalgebra::{DMatrix, Schur};
use rand::distributions::uniform::SampleUniform;
use rand::distributions::Uniform;
use rand::prelude::*;

/// Uniform integer generator used for drawing samples.
///
/// Randomly seeded by default; a fixed seed makes whole estimation runs
/// reproducible.
pub struct UniformRandomGenerator<T>
where
    T: Copy + SampleUniform + PartialOrd,
{
    rng: StdRng,
    _marker: std::marker::PhantomData<T>,
}

impl<T> Default for UniformRandomGenerator<T>
where
    T: Copy + SampleUniform + PartialOrd,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> UniformRandomGenerator<T>
where
    T: Copy + SampleUniform + PartialOrd,
{
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            _marker: std::marker::PhantomData,
        }
    }

    /// Fill `out` with distinct values drawn uniformly from `[min, max]`.
    ///
    /// Rejection based, so `out.len()` must not exceed the range size.
    pub fn gen_unique(&mut self, out: &mut [T], min: T, max: T)
    where
        T: Eq,
    {
        let dist = Uniform::new_inclusive(min, max);
        for i in 0..out.len() {
            loop {
                let candidate = self.rng.sample(&dist);
                if out[..i].iter().all(|&v| v != candidate) {
                    out[i] = candidate;
                    break;
                }
            }
        }
    }
}

/// Real roots of `a x^2 + b x + c = 0`, falling back to the linear case.
pub fn solve_quadratic_real(a: f64, b: f64, c: f64) -> Vec<f64> {
    let scale = a.abs().max(b.abs()).max(c.abs());
    if scale == 0.0 || !scale.is_finite() {
        return Vec::new();
    }
    let (a, b, c) = (a / scale, b / scale, c / scale);

    if a.abs() < 1e-12 {
        if b.abs() < 1e-12 {
            return Vec::new();
        }
        return vec![-c / b];
    }

    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return Vec::new();
    }
    // Cancellation-free form.
    let q = -0.5 * (b + b.signum() * disc.sqrt());
    if q == 0.0 {
        return vec![0.0];
    }
    let r0 = q / a;
    let r1 = c / q;
    if (r0 - r1).abs() < 1e-14 * r0.abs().max(1.0) {
        vec![r0]
    } else {
        vec![r0, r1]
    }
}

/// Solve a cubic equation: x^3 + c2*x^2 + c1*x + c0 = 0
///
/// Writes the real roots into `roots` and returns how many there are (1 or 3).
pub fn solve_cubic_real(c2: f64, c1: f64, c0: f64, roots: &mut [f64; 3]) -> usize {
    let a = c1 - c2 * c2 / 3.0;
    let b = (2.0 * c2 * c2 * c2 - 9.0 * c2 * c1) / 27.0 + c0;
    let mut c = b * b / 4.0 + a * a * a / 27.0;

    let n_roots = if c > 0.0 || a == 0.0 {
        c = c.max(0.0).sqrt();
        let b_neg = -0.5 * b;
        roots[0] = (b_neg + c).cbrt() + (b_neg - c).cbrt() - c2 / 3.0;
        1
    } else {
        c = (3.0 * b / (2.0 * a) * (-3.0 / a).sqrt()).clamp(-1.0, 1.0);
        let d = 2.0 * (-a / 3.0).sqrt();
        let acos_c = c.acos();
        roots[0] = d * (acos_c / 3.0).cos() - c2 / 3.0;
        roots[1] = d * (acos_c / 3.0 - 2.0 * std::f64::consts::FRAC_PI_3).cos() - c2 / 3.0;
        roots[2] = d * (acos_c / 3.0 - 4.0 * std::f64::consts::FRAC_PI_3).cos() - c2 / 3.0;
        3
    };

    // One Newton step.
    for root in roots.iter_mut().take(n_roots) {
        let x = *root;
        let x2 = x * x;
        let x3 = x * x2;
        let deriv = 3.0 * x2 + 2.0 * c2 * x + c1;
        if deriv.abs() > f64::EPSILON {
            *root -= (x3 + c2 * x2 + c1 * x + c0) / deriv;
        }
    }

    n_roots
}

/// Real roots of `c[0] x^4 + c[1] x^3 + c[2] x^2 + c[3] x + c[4] = 0`.
///
/// Eigenvalues of the companion matrix, polished by a few Newton steps.
/// Degrades to the cubic case when the leading coefficient vanishes.
pub fn solve_quartic_real(c: [f64; 5]) -> Vec<f64> {
    let scale = c.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    if scale == 0.0 || !scale.is_finite() {
        return Vec::new();
    }
    let c = c.map(|v| v / scale);

    if c[0].abs() < 1e-12 {
        if c[1].abs() < 1e-12 {
            return solve_quadratic_real(c[2], c[3], c[4]);
        }
        let mut roots = [0.0; 3];
        let n = solve_cubic_real(c[2] / c[1], c[3] / c[1], c[4] / c[1], &mut roots);
        return roots[..n].to_vec();
    }

    let mut comp = DMatrix::<f64>::zeros(4, 4);
    for k in 0..4 {
        comp[(0, k)] = -c[k + 1] / c[0];
    }
    comp[(1, 0)] = 1.0;
    comp[(2, 1)] = 1.0;
    comp[(3, 2)] = 1.0;

    let eigvals = Schur::new(comp).complex_eigenvalues();
    let poly = |x: f64| (((c[0] * x + c[1]) * x + c[2]) * x + c[3]) * x + c[4];
    let deriv = |x: f64| ((4.0 * c[0] * x + 3.0 * c[1]) * x + 2.0 * c[2]) * x + c[3];

    let mut roots = Vec::with_capacity(4);
    for val in eigvals.iter() {
        if val.im.abs() > 1e-8 * val.re.abs().max(1.0) {
            continue;
        }
        let mut x = val.re;
        for _ in 0..3 {
            let d = deriv(x);
            if d.abs() < f64::EPSILON {
                break;
            }
            x -= poly(x) / d;
        }
        roots.push(x);
    }

    roots.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    roots.dedup_by(|a, b| (*a - *b).abs() < 1e-10 * a.abs().max(1.0));
    roots
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn unique_samples_within_bounds() {
        let mut rng = UniformRandomGenerator::<usize>::from_seed(1234);
        let mut buf = [0usize; 5];
        rng.gen_unique(&mut buf, 0, 10);

        assert!(buf.iter().all(|&v| v <= 10));
        for i in 0..buf.len() {
            for j in (i + 1)..buf.len() {
                assert_ne!(buf[i], buf[j]);
            }
        }
    }

    #[test]
    fn deterministic_with_same_seed() {
        let mut rng1 = UniformRandomGenerator::<usize>::from_seed(42);
        let mut rng2 = UniformRandomGenerator::<usize>::from_seed(42);
        let mut a1 = [0usize; 6];
        let mut a2 = [0usize; 6];
        rng1.gen_unique(&mut a1, 0, 100);
        rng2.gen_unique(&mut a2, 0, 100);
        assert_eq!(a1, a2);
    }

    #[test]
    fn quadratic_roots() {
        let mut r = solve_quadratic_real(2.0, -6.0, 4.0);
        r.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(r.len(), 2);
        assert_abs_diff_eq!(r[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r[1], 2.0, epsilon = 1e-12);

        assert!(solve_quadratic_real(1.0, 0.0, 1.0).is_empty());
        assert_eq!(solve_quadratic_real(0.0, 2.0, -1.0), vec![0.5]);
    }

    #[test]
    fn cubic_three_real_roots() {
        // (x - 1)(x - 2)(x + 3) = x^3 - 7x + 6
        let mut roots = [0.0; 3];
        let n = solve_cubic_real(0.0, -7.0, 6.0, &mut roots);
        assert_eq!(n, 3);
        let mut r = roots.to_vec();
        r.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_abs_diff_eq!(r[0], -3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(r[1], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(r[2], 2.0, epsilon = 1e-9);
    }

    #[test]
    fn quartic_real_roots() {
        // (x^2 - 1)(x^2 - 4)
        let roots = solve_quartic_real([1.0, 0.0, -5.0, 0.0, 4.0]);
        assert_eq!(roots.len(), 4);
        for (r, e) in roots.iter().zip([-2.0, -1.0, 1.0, 2.0]) {
            assert_abs_diff_eq!(*r, e, epsilon = 1e-9);
        }

        // (x^2 + 1)(x - 3)(x + 0.5) has two real roots
        let roots = solve_quartic_real([1.0, -2.5, -0.5, -2.5, -1.5]);
        assert_eq!(roots.len(), 2);
        assert_abs_diff_eq!(roots[0], -0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(roots[1], 3.0, epsilon = 1e-9);
    }
}
