//! Least-squares fit of depth parameters and focal lengths on many points.
//!
//! Rotation and translation stay at the warm start. The depth equations
//! `s d1 ray1 + w ray1 = (d0 + o0) R ray0 + t`, with `w = s * o1`, are linear
//! in `(o0, s, w)` once the focal lengths are fixed, so a single Gauss-Newton
//! step over all parameters solves them exactly when the focal lengths are
//! already right and improves them otherwise.

use nalgebra::{DMatrix, DVector, Vector3};

use crate::estimators::depth_anchored;
use crate::geometry::{fundamental_from_pose, signed_sampson};
use crate::models::{Focal, FocalVariant, PoseScaleOffset};
use crate::types::CorrespondenceSet;

/// Step used for the numeric focal derivative of the Sampson rows.
const FOCAL_STEP: f64 = 1e-6;

/// Inputs of one non-minimal fit.
#[derive(Debug, Clone, Copy)]
pub struct NonMinimalProblem<'a> {
    pub data: &'a CorrespondenceSet,
    pub variant: FocalVariant,
    /// Points whose depth equations are used.
    pub depth_rows: &'a [usize],
    /// Points contributing Sampson rows on the final pass.
    pub sampson_rows: &'a [usize],
    pub sampson_weight: f64,
}

impl NonMinimalProblem<'_> {
    /// Fit a model. Without a warm start the leading depth rows seed it
    /// through the minimal solver. `final_pass` adds Sampson rows.
    ///
    /// With the pose held at the seed, the Sampson residual only depends on
    /// the focal lengths. The calibrated variant has none, so its rows would
    /// be all zero in the Jacobian and `final_pass` leaves its fit unchanged.
    pub fn solve(
        &self,
        warm_start: Option<&PoseScaleOffset>,
        final_pass: bool,
    ) -> Option<PoseScaleOffset> {
        let seed = match warm_start {
            Some(model) => model.clone(),
            None => self.seed()?,
        };
        let refined = self.gauss_newton_step(&seed, final_pass)?;
        refined.is_valid(&self.data.min_depth()).then_some(refined)
    }

    /// Best minimal-solver candidate on the leading depth rows.
    fn seed(&self) -> Option<PoseScaleOffset> {
        let m = self.variant.depth_sample_size();
        if self.depth_rows.len() < m {
            return None;
        }
        let min_depth = self.data.min_depth();
        depth_anchored::solve(self.data, &self.depth_rows[..m], self.variant)
            .into_iter()
            .filter(|model| model.is_valid(&min_depth))
            .map(|model| (self.depth_cost(&model), model))
            .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(_, model)| model)
    }

    fn depth_cost(&self, model: &PoseScaleOffset) -> f64 {
        self.depth_rows
            .iter()
            .map(|&i| {
                let w = self.data.weight(i);
                let diff = model.lift1(&self.data.x1(i), self.data.depth1(i))
                    - model.rotation() * model.lift0(&self.data.x0(i), self.data.depth0(i))
                    - model.translation();
                w * diff.norm_squared()
            })
            .sum()
    }

    /// Whether Sampson rows constrain any of the fitted parameters.
    fn sampson_informative(&self) -> bool {
        self.variant.num_focal_params() > 0 && self.sampson_weight > 0.0 && !self.sampson_rows.is_empty()
    }

    fn gauss_newton_step(
        &self,
        start: &PoseScaleOffset,
        final_pass: bool,
    ) -> Option<PoseScaleOffset> {
        let n_focal = self.variant.num_focal_params();
        let n_params = 3 + n_focal;
        let use_sampson = final_pass && self.sampson_informative();
        let n_rows =
            3 * self.depth_rows.len() + if use_sampson { self.sampson_rows.len() } else { 0 };
        if n_rows < n_params {
            return None;
        }

        let r = *start.rotation();
        let t = *start.translation();
        let (s, o0) = (start.scale(), start.offset0());
        let w = s * start.offset1();
        let focal = start.focal();
        let (f0, f1) = (focal.focal0(), focal.focal1());

        let mut jac = DMatrix::<f64>::zeros(n_rows, n_params);
        let mut res = DVector::<f64>::zeros(n_rows);

        for (k, &i) in self.depth_rows.iter().enumerate() {
            let sw = self.data.weight(i).sqrt();
            let (x0, x1) = (self.data.x0(i), self.data.x1(i));
            let (d0, d1) = (self.data.depth0(i), self.data.depth1(i));
            let ray0 = Vector3::new(x0.x / f0, x0.y / f0, 1.0);
            let ray1 = Vector3::new(x1.x / f1, x1.y / f1, 1.0);
            let r_ray0 = r * ray0;
            let e = (s * d1 + w) * ray1 - (d0 + o0) * r_ray0 - t;

            // d ray / d f = (-u / f^2, -v / f^2, 0)
            let d_f0 = -(d0 + o0) * (r * Vector3::new(-x0.x / (f0 * f0), -x0.y / (f0 * f0), 0.0));
            let d_f1 = (s * d1 + w) * Vector3::new(-x1.x / (f1 * f1), -x1.y / (f1 * f1), 0.0);

            for c in 0..3 {
                let row = 3 * k + c;
                res[row] = sw * e[c];
                jac[(row, 0)] = -sw * r_ray0[c];
                jac[(row, 1)] = sw * d1 * ray1[c];
                jac[(row, 2)] = sw * ray1[c];
                match self.variant {
                    FocalVariant::Calibrated => {}
                    FocalVariant::Shared => jac[(row, 3)] = sw * (d_f0[c] + d_f1[c]),
                    FocalVariant::Two => {
                        jac[(row, 3)] = sw * d_f0[c];
                        jac[(row, 4)] = sw * d_f1[c];
                    }
                }
            }
        }

        if use_sampson {
            let offset = 3 * self.depth_rows.len();
            let params = focal.params();
            for (k, &i) in self.sampson_rows.iter().enumerate() {
                let sw = (self.sampson_weight * self.data.weight(i)).sqrt();
                let (x0, x1) = (self.data.x0_homogeneous(i), self.data.x1_homogeneous(i));
                let sampson_at = |p: &[f64]| {
                    let fc = Focal::from_params(self.variant, p);
                    signed_sampson(&fundamental_from_pose(&r, &t, fc.focal0(), fc.focal1()), &x0, &x1)
                };
                res[offset + k] = sw * sampson_at(&params);
                for j in 0..n_focal {
                    let mut plus = params.clone();
                    let mut minus = params.clone();
                    let h = FOCAL_STEP * params[j].abs().max(1.0);
                    plus[j] += h;
                    minus[j] -= h;
                    jac[(offset + k, 3 + j)] = sw * (sampson_at(&plus) - sampson_at(&minus)) / (2.0 * h);
                }
            }
        }

        if res.iter().chain(jac.iter()).any(|v| !v.is_finite()) {
            return None;
        }

        let svd = jac.svd(true, true);
        let max_sv = svd.singular_values.max();
        if !(max_sv > 0.0) || svd.singular_values.min() <= 1e-12 * max_sv {
            return None;
        }
        let delta = svd.solve(&(-res), 0.0).ok()?;

        let new_s = s + delta[1];
        let new_o0 = o0 + delta[0];
        let new_w = w + delta[2];
        if !(new_s > 0.0) {
            return None;
        }
        let mut focal_params = focal.params();
        for (j, p) in focal_params.iter_mut().enumerate() {
            *p += delta[3 + j];
        }
        if focal_params.iter().any(|f| !(*f > 0.0)) {
            return None;
        }
        Some(PoseScaleOffset::new(
            r,
            t,
            new_s,
            new_o0,
            new_w / new_s,
            Focal::from_params(self.variant, &focal_params),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{close_to, ground_truth, observe, points};

    fn perturbed(model: &PoseScaleOffset) -> PoseScaleOffset {
        PoseScaleOffset::new(
            *model.rotation(),
            *model.translation(),
            model.scale() * 1.1,
            model.offset0() + 0.2,
            model.offset1() - 0.1,
            model.focal(),
        )
    }

    #[test]
    fn warm_start_recovers_depth_parameters() {
        for focal in [
            Focal::Calibrated,
            Focal::Shared(1.2),
            Focal::Two {
                focal0: 1.2,
                focal1: 0.8,
            },
        ] {
            let truth = ground_truth(focal);
            let data = observe(&truth, &points(20));
            let rows: Vec<usize> = (0..20).collect();
            let problem = NonMinimalProblem {
                data: &data,
                variant: focal.variant(),
                depth_rows: &rows,
                sampson_rows: &rows,
                sampson_weight: 1.0,
            };
            for final_pass in [false, true] {
                let fit = problem.solve(Some(&perturbed(&truth)), final_pass).unwrap();
                assert!(close_to(&fit, &truth, 1e-8), "{focal:?}: {fit:?}");
            }
        }
    }

    #[test]
    fn cold_start_uses_minimal_seed() {
        let truth = ground_truth(Focal::Shared(1.2));
        let data = observe(&truth, &points(15));
        let rows: Vec<usize> = (0..15).collect();
        let problem = NonMinimalProblem {
            data: &data,
            variant: FocalVariant::Shared,
            depth_rows: &rows,
            sampson_rows: &[],
            sampson_weight: 1.0,
        };
        let fit = problem.solve(None, false).unwrap();
        assert!(close_to(&fit, &truth, 1e-6));
    }

    #[test]
    fn final_pass_only_matters_with_free_focals() {
        let truth = ground_truth(Focal::Calibrated);
        let data = observe(&truth, &points(20));
        let rows: Vec<usize> = (0..20).collect();
        let problem = NonMinimalProblem {
            data: &data,
            variant: FocalVariant::Calibrated,
            depth_rows: &rows,
            sampson_rows: &rows,
            sampson_weight: 1.0,
        };
        assert!(!problem.sampson_informative());
        let start = perturbed(&truth);
        assert_eq!(problem.solve(Some(&start), true), problem.solve(Some(&start), false));

        // Sampson rows pull a shared focal fit that the depth rows alone leave
        // slightly off.
        let truth = ground_truth(Focal::Shared(1.2));
        let data = observe(&truth, &points(20));
        let problem = NonMinimalProblem {
            data: &data,
            variant: FocalVariant::Shared,
            depth_rows: &rows[..5],
            sampson_rows: &rows,
            sampson_weight: 1.0,
        };
        assert!(problem.sampson_informative());
        let start = PoseScaleOffset::new(
            *truth.rotation(),
            *truth.translation(),
            truth.scale(),
            truth.offset0(),
            truth.offset1(),
            truth.focal().scaled(1.05),
        );
        let without = problem.solve(Some(&start), false).unwrap();
        let with = problem.solve(Some(&start), true).unwrap();
        assert_ne!(with, without);
    }

    #[test]
    fn too_few_rows_fail() {
        let truth = ground_truth(Focal::Two {
            focal0: 1.2,
            focal1: 0.8,
        });
        let data = observe(&truth, &points(4));
        let problem = NonMinimalProblem {
            data: &data,
            variant: FocalVariant::Two,
            depth_rows: &[0],
            sampson_rows: &[],
            sampson_weight: 1.0,
        };
        assert!(problem.solve(Some(&truth), false).is_none());
        assert!(problem.solve(None, false).is_none());
    }
}
