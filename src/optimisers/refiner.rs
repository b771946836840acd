//! Nonlinear refinement of a model over its inliers with tiny-solver.
//!
//! Each refinement call owns one problem and walks it through
//! [`RefinementProblem`] -> [`AssembledRefinement`] -> [`SolvedRefinement`]
//! -> `(model, status)`. Every step consumes the previous one, so a problem
//! can be neither shared nor solved twice.
//!
//! Parameter blocks:
//! - `rotation`: quaternion `[x, y, z, w]` on the quaternion manifold
//! - `translation`: 3 values
//! - `scale`, `offset0`, `offset1`: 1 value each, bounded below
//! - `focal` (shared) or `focal0` / `focal1` (two focal)
//!
//! Only blocks referenced by a residual are registered. With a constant pose
//! the rotation and translation are folded into the factors instead of being
//! registered and frozen.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use nalgebra::{DVector, Matrix3, RealField, Vector3};
use serde::{Deserialize, Serialize};
use tiny_solver::factors::Factor;
use tiny_solver::loss_functions::{ArctanLoss, CauchyLoss, HuberLoss, Loss};
use tiny_solver::manifold::so3::QuaternionManifold;
use tiny_solver::optimizer::{Optimizer, OptimizerOptions};
use tiny_solver::problem::Problem;
use tiny_solver::{linear::sparse::LinearSolverType, LevenbergMarquardtOptimizer};

use crate::estimators::evaluator::{reprojection0, reprojection1, sampson};
use crate::geometry::{fundamental_from_pose, quaternion_to_rotation_matrix, signed_sampson};
use crate::models::{Focal, FocalVariant, PoseScaleOffset};
use crate::settings::{LossFunction, RefinerConfig, SolverOptions};
use crate::types::CorrespondenceSet;

/// Margin kept between the lower bounds and the degenerate values.
const BOUND_MARGIN: f64 = 1e-2;

/// Rounding allowance when comparing costs before and after a solve.
const COST_SLACK: f64 = 1e-12;

const ROTATION: &str = "rotation";
const TRANSLATION: &str = "translation";
const SCALE: &str = "scale";
const OFFSET0: &str = "offset0";
const OFFSET1: &str = "offset1";
const FOCAL: &str = "focal";
const FOCAL0: &str = "focal0";
const FOCAL1: &str = "focal1";

/// Outcome of a refinement call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinementStatus {
    /// The optimiser returned a solution that does not raise the cost.
    Converged,
    /// No residual blocks; the input model was kept.
    NotPerformed,
    /// The optimiser gave up, or its solution raised the cost or was
    /// invalid; the input model was kept.
    Failed,
}

/// Inlier indices per residual family.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefinementPools<'a> {
    pub reprojection0: &'a [usize],
    pub reprojection1: &'a [usize],
    pub sampson: &'a [usize],
}

/// A refinement problem before assembly.
#[derive(Debug, Clone)]
pub struct RefinementProblem<'a> {
    data: &'a CorrespondenceSet,
    model: PoseScaleOffset,
    config: RefinerConfig,
    pools: RefinementPools<'a>,
}

impl<'a> RefinementProblem<'a> {
    pub fn new(
        data: &'a CorrespondenceSet,
        model: &PoseScaleOffset,
        config: &RefinerConfig,
        pools: RefinementPools<'a>,
    ) -> Self {
        Self {
            data,
            model: model.clone(),
            config: *config,
            pools,
        }
    }

    fn focal_names(&self) -> &'static [&'static str] {
        match self.model.focal().variant() {
            FocalVariant::Calibrated => &[],
            FocalVariant::Shared => &[FOCAL],
            FocalVariant::Two => &[FOCAL0, FOCAL1],
        }
    }

    fn pose_names(&self) -> &'static [&'static str] {
        if self.config.constant_pose {
            &[]
        } else {
            &[ROTATION, TRANSLATION]
        }
    }

    fn fixed_pose(&self) -> Option<FixedPose> {
        self.config.constant_pose.then(|| FixedPose {
            rotation: *self.model.rotation(),
            translation: *self.model.translation(),
        })
    }

    /// Build the tiny-solver problem and the initial parameter values.
    pub fn assemble(self) -> AssembledRefinement<'a> {
        let variant = self.model.focal().variant();
        let focal_names = self.focal_names();
        let pose_names = self.pose_names();
        let pose = self.fixed_pose();
        let mut problem = Problem::new();
        let mut used: Vec<&'static str> = Vec::new();
        let mut num_blocks = 0;

        if self.config.use_reprojection {
            for &i in self.pools.reprojection0 {
                let factor = Reprojection0Factor {
                    x0: [self.data.x0(i).x, self.data.x0(i).y],
                    x1: [self.data.x1(i).x, self.data.x1(i).y],
                    depth0: self.data.depth0(i),
                    sqrt_weight: self.data.weight(i).sqrt(),
                    variant,
                    pose,
                };
                let mut names = vec![OFFSET0];
                names.extend_from_slice(pose_names);
                names.extend_from_slice(focal_names);
                register(&names, &mut used);
                problem.add_residual_block(
                    2,
                    &names,
                    Box::new(factor),
                    compile_loss(self.config.reprojection_loss),
                );
                num_blocks += 1;
            }
            for &i in self.pools.reprojection1 {
                let factor = Reprojection1Factor {
                    x0: [self.data.x0(i).x, self.data.x0(i).y],
                    x1: [self.data.x1(i).x, self.data.x1(i).y],
                    depth1: self.data.depth1(i),
                    sqrt_weight: self.data.weight(i).sqrt(),
                    variant,
                    pose,
                };
                let mut names = vec![SCALE, OFFSET1];
                names.extend_from_slice(pose_names);
                names.extend_from_slice(focal_names);
                register(&names, &mut used);
                problem.add_residual_block(
                    2,
                    &names,
                    Box::new(factor),
                    compile_loss(self.config.reprojection_loss),
                );
                num_blocks += 1;
            }
        }

        // A calibrated Sampson residual under a constant pose has nothing to move.
        let sampson_free = !pose_names.is_empty() || !focal_names.is_empty();
        if self.config.use_sampson && self.config.weight_sampson > 0.0 && sampson_free {
            for &i in self.pools.sampson {
                let factor = SampsonFactor {
                    x0: [self.data.x0(i).x, self.data.x0(i).y],
                    x1: [self.data.x1(i).x, self.data.x1(i).y],
                    sqrt_weight: (self.config.weight_sampson * self.data.weight(i)).sqrt(),
                    variant,
                    pose,
                };
                let mut names = pose_names.to_vec();
                names.extend_from_slice(focal_names);
                register(&names, &mut used);
                problem.add_residual_block(
                    1,
                    &names,
                    Box::new(factor),
                    compile_loss(self.config.sampson_loss),
                );
                num_blocks += 1;
            }
        }

        let min_depth = self.data.min_depth();
        let mut initial = HashMap::new();
        for &name in &used {
            let value = match name {
                ROTATION => DVector::from_row_slice(&self.model.quaternion()),
                TRANSLATION => DVector::from_row_slice(self.model.translation().as_slice()),
                SCALE => DVector::from_element(1, self.model.scale()),
                OFFSET0 => DVector::from_element(1, self.model.offset0()),
                OFFSET1 => DVector::from_element(1, self.model.offset1()),
                FOCAL | FOCAL0 => DVector::from_element(1, self.model.focal0()),
                _ => DVector::from_element(1, self.model.focal1()),
            };
            initial.insert(name.to_string(), value);

            match name {
                ROTATION => {
                    problem.set_variable_manifold(ROTATION, Arc::new(QuaternionManifold));
                }
                SCALE => {
                    problem.set_variable_bounds(SCALE, 0, BOUND_MARGIN, f64::MAX);
                }
                OFFSET0 => {
                    problem.set_variable_bounds(OFFSET0, 0, -min_depth.x + BOUND_MARGIN, f64::MAX);
                }
                OFFSET1 => {
                    problem.set_variable_bounds(OFFSET1, 0, -min_depth.y + BOUND_MARGIN, f64::MAX);
                }
                _ => {}
            }
        }

        AssembledRefinement {
            source: self,
            problem,
            initial,
            num_blocks,
        }
    }

    /// Weighted sum of squared residuals of `model`, without robust losses.
    pub fn squared_residual_sum(&self, model: &PoseScaleOffset) -> f64 {
        self.cost_with(model, |_| None)
    }

    /// Objective minimised by the solver: the weighted squared residual of
    /// every block passed through its family's loss. Points behind a camera
    /// make it infinite.
    pub fn cost(&self, model: &PoseScaleOffset) -> f64 {
        self.cost_with(model, compile_loss)
    }

    fn cost_with(
        &self,
        model: &PoseScaleOffset,
        loss_of: impl Fn(LossFunction) -> Option<Box<dyn Loss + Send>>,
    ) -> f64 {
        let robust = |loss: &Option<Box<dyn Loss + Send>>, squared: f64| match loss {
            Some(loss) if squared.is_finite() => loss.evaluate(squared)[0],
            _ => squared,
        };
        let mut total = 0.0;
        if self.config.use_reprojection {
            let loss = loss_of(self.config.reprojection_loss);
            for &i in self.pools.reprojection0 {
                let squared = self.data.weight(i) * reprojection0(self.data, model, i, false);
                total += robust(&loss, squared);
            }
            for &i in self.pools.reprojection1 {
                let squared = self.data.weight(i) * reprojection1(self.data, model, i, false);
                total += robust(&loss, squared);
            }
        }
        if self.config.use_sampson {
            let loss = loss_of(self.config.sampson_loss);
            for &i in self.pools.sampson {
                let squared =
                    self.config.weight_sampson * self.data.weight(i) * sampson(self.data, model, i);
                total += robust(&loss, squared);
            }
        }
        total
    }
}

/// A problem with its residual blocks in place.
pub struct AssembledRefinement<'a> {
    source: RefinementProblem<'a>,
    problem: Problem,
    initial: HashMap<String, DVector<f64>>,
    num_blocks: usize,
}

impl<'a> AssembledRefinement<'a> {
    pub fn num_residual_blocks(&self) -> usize {
        self.num_blocks
    }

    /// Run Levenberg-Marquardt on the damped normal equations.
    pub fn solve(self) -> SolvedRefinement<'a> {
        if self.num_blocks == 0 {
            debug!("refinement skipped: no residual blocks");
            return SolvedRefinement {
                source: self.source,
                solution: None,
                status: RefinementStatus::NotPerformed,
            };
        }

        let optimizer = LevenbergMarquardtOptimizer::default();
        let options = to_optimizer_options(&self.source.config.solver);
        match optimizer.optimize(&self.problem, &self.initial, Some(options)) {
            Some(solution) => SolvedRefinement {
                source: self.source,
                solution: Some(solution),
                status: RefinementStatus::Converged,
            },
            None => {
                warn!(
                    "nonlinear refinement over {} residual blocks returned no solution",
                    self.num_blocks
                );
                SolvedRefinement {
                    source: self.source,
                    solution: None,
                    status: RefinementStatus::Failed,
                }
            }
        }
    }
}

/// Result of the solve, ready for extraction.
pub struct SolvedRefinement<'a> {
    source: RefinementProblem<'a>,
    solution: Option<HashMap<String, DVector<f64>>>,
    status: RefinementStatus,
}

impl SolvedRefinement<'_> {
    pub fn status(&self) -> RefinementStatus {
        self.status
    }

    /// Read the solution back into a model. The input model is returned
    /// unless the solve produced a valid model whose cost is finite and no
    /// higher than the input's.
    pub fn into_solution(self) -> (PoseScaleOffset, RefinementStatus) {
        let input = self.source.model.clone();
        let Some(solution) = self.solution else {
            return (input, self.status);
        };
        let scalar = |name: &str, fallback: f64| solution.get(name).map_or(fallback, |v| v[0]);

        let (rotation, translation) = if self.source.config.constant_pose {
            (*input.rotation(), *input.translation())
        } else {
            let rotation = solution
                .get(ROTATION)
                .map_or(*input.rotation(), |q| quaternion_to_rotation_matrix(q.as_slice()));
            let translation = solution
                .get(TRANSLATION)
                .map_or(*input.translation(), |t| Vector3::new(t[0], t[1], t[2]));
            (rotation, translation)
        };
        let focal = match input.focal() {
            Focal::Calibrated => Focal::Calibrated,
            Focal::Shared(f) => Focal::Shared(scalar(FOCAL, f)),
            Focal::Two { focal0, focal1 } => Focal::Two {
                focal0: scalar(FOCAL0, focal0),
                focal1: scalar(FOCAL1, focal1),
            },
        };
        let refined = PoseScaleOffset::new(
            rotation,
            translation,
            scalar(SCALE, input.scale()),
            scalar(OFFSET0, input.offset0()),
            scalar(OFFSET1, input.offset1()),
            focal,
        );

        if !refined.is_valid(&self.source.data.min_depth()) {
            warn!("nonlinear refinement produced an invalid model, keeping the input");
            return (input, RefinementStatus::Failed);
        }
        let before = self.source.cost(&input);
        let after = self.source.cost(&refined);
        if !after.is_finite() || after > before + COST_SLACK * before.max(1.0) {
            warn!("nonlinear refinement raised the cost from {before:e} to {after:e}, keeping the input");
            return (input, RefinementStatus::Failed);
        }
        debug!("nonlinear refinement lowered the cost from {before:e} to {after:e}");
        (refined, self.status)
    }
}

/// Record parameter block names in first-use order.
fn register(names: &[&'static str], used: &mut Vec<&'static str>) {
    for &name in names {
        if !used.contains(&name) {
            used.push(name);
        }
    }
}

fn to_optimizer_options(opts: &SolverOptions) -> OptimizerOptions {
    OptimizerOptions {
        max_iteration: opts.max_iterations,
        verbosity_level: opts.verbosity,
        linear_solver_type: LinearSolverType::SparseCholesky,
        min_abs_error_decrease_threshold: opts.min_abs_error_decrease,
        min_rel_error_decrease_threshold: opts.min_rel_error_decrease,
        min_error_threshold: opts.min_error,
        ..OptimizerOptions::default()
    }
}

fn compile_loss(loss: LossFunction) -> Option<Box<dyn Loss + Send>> {
    match loss {
        LossFunction::Trivial => None,
        LossFunction::Huber { scale } => Some(Box::new(HuberLoss::new(scale))),
        LossFunction::Cauchy { scale } => Some(Box::new(CauchyLoss::new(scale))),
        LossFunction::Arctan { scale } => Some(Box::new(ArctanLoss::new(scale))),
    }
}

fn constant<T: RealField>(v: f64) -> T {
    nalgebra::convert(v)
}

/// Rotation and translation held fixed inside the factors.
#[derive(Debug, Clone, Copy)]
struct FixedPose {
    rotation: Matrix3<f64>,
    translation: Vector3<f64>,
}

/// Pose of a factor plus the number of parameter blocks it consumed.
fn pose_from<T: RealField>(
    fixed: Option<FixedPose>,
    params: &[DVector<T>],
) -> (Matrix3<T>, Vector3<T>, usize) {
    match fixed {
        Some(pose) => (
            pose.rotation.map(constant::<T>),
            pose.translation.map(constant::<T>),
            0,
        ),
        None => (
            quaternion_to_rotation_matrix(params[0].as_slice()),
            vector3(&params[1]),
            2,
        ),
    }
}

/// Focal lengths `(f0, f1)` from the trailing focal blocks.
fn focal_pair<T: RealField>(variant: FocalVariant, blocks: &[DVector<T>]) -> (T, T) {
    match variant {
        FocalVariant::Calibrated => (T::one(), T::one()),
        FocalVariant::Shared => (blocks[0][0].clone(), blocks[0][0].clone()),
        FocalVariant::Two => (blocks[0][0].clone(), blocks[1][0].clone()),
    }
}

fn vector3<T: RealField>(block: &DVector<T>) -> Vector3<T> {
    Vector3::new(block[0].clone(), block[1].clone(), block[2].clone())
}

/// `sqrt(w) * (f * p.xy / p.z - observed)`
fn projection_residual<T: RealField>(
    p: Vector3<T>,
    focal: T,
    observed: [f64; 2],
    sqrt_weight: f64,
) -> DVector<T> {
    let sw = constant::<T>(sqrt_weight);
    let u = focal.clone() * p.x.clone() / p.z.clone() - constant::<T>(observed[0]);
    let v = focal * p.y.clone() / p.z.clone() - constant::<T>(observed[1]);
    DVector::from_vec(vec![u * sw.clone(), v * sw])
}

/// View-0 point lifted with its corrected depth and projected into view 1.
#[derive(Debug, Clone)]
struct Reprojection0Factor {
    x0: [f64; 2],
    x1: [f64; 2],
    depth0: f64,
    sqrt_weight: f64,
    variant: FocalVariant,
    pose: Option<FixedPose>,
}

impl<T: RealField> Factor<T> for Reprojection0Factor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        // [offset0, (rotation, translation), focal...]
        let offset0 = params[0][0].clone();
        let (r, t, used) = pose_from(self.pose, &params[1..]);
        let (f0, f1) = focal_pair(self.variant, &params[1 + used..]);

        let ray = Vector3::new(
            constant::<T>(self.x0[0]) / f0.clone(),
            constant::<T>(self.x0[1]) / f0,
            T::one(),
        );
        let p = r * ray * (constant::<T>(self.depth0) + offset0) + t;
        projection_residual(p, f1, self.x1, self.sqrt_weight)
    }
}

/// View-1 point lifted with its scaled depth and projected into view 0.
#[derive(Debug, Clone)]
struct Reprojection1Factor {
    x0: [f64; 2],
    x1: [f64; 2],
    depth1: f64,
    sqrt_weight: f64,
    variant: FocalVariant,
    pose: Option<FixedPose>,
}

impl<T: RealField> Factor<T> for Reprojection1Factor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        // [scale, offset1, (rotation, translation), focal...]
        let scale = params[0][0].clone();
        let offset1 = params[1][0].clone();
        let (r, t, used) = pose_from(self.pose, &params[2..]);
        let (f0, f1) = focal_pair(self.variant, &params[2 + used..]);

        let ray = Vector3::new(
            constant::<T>(self.x1[0]) / f1.clone(),
            constant::<T>(self.x1[1]) / f1,
            T::one(),
        );
        let lifted = ray * (scale * (constant::<T>(self.depth1) + offset1));
        let p = r.transpose() * (lifted - t);
        projection_residual(p, f0, self.x0, self.sqrt_weight)
    }
}

/// Signed Sampson distance of one correspondence.
#[derive(Debug, Clone)]
struct SampsonFactor {
    x0: [f64; 2],
    x1: [f64; 2],
    sqrt_weight: f64,
    variant: FocalVariant,
    pose: Option<FixedPose>,
}

impl<T: RealField> Factor<T> for SampsonFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        // [(rotation, translation), focal...]
        let (r, t, used) = pose_from(self.pose, params);
        let (f0, f1) = focal_pair(self.variant, &params[used..]);

        let f = fundamental_from_pose(&r, &t, f0, f1);
        let x0 = Vector3::new(constant::<T>(self.x0[0]), constant::<T>(self.x0[1]), T::one());
        let x1 = Vector3::new(constant::<T>(self.x1[0]), constant::<T>(self.x1[1]), T::one());
        let residual = signed_sampson(&f, &x0, &x1) * constant::<T>(self.sqrt_weight);
        DVector::from_vec(vec![residual])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{close_to, ground_truth, observe, points};
    use nalgebra::{Rotation3, Unit};

    fn all(n: usize) -> Vec<usize> {
        (0..n).collect()
    }

    fn perturbed(model: &PoseScaleOffset) -> PoseScaleOffset {
        let axis = Unit::new_normalize(Vector3::new(1.0, -0.5, 0.3));
        let dr = *Rotation3::from_axis_angle(&axis, 0.01).matrix();
        PoseScaleOffset::new(
            dr * model.rotation(),
            model.translation() + Vector3::new(0.02, -0.01, 0.015),
            model.scale() * 1.03,
            model.offset0() + 0.05,
            model.offset1() - 0.04,
            model.focal().scaled(1.02),
        )
    }

    #[test]
    fn empty_problem_is_not_performed() {
        let truth = ground_truth(Focal::Shared(1.2));
        let data = observe(&truth, &points(10));
        let start = perturbed(&truth);
        let assembled =
            RefinementProblem::new(&data, &start, &RefinerConfig::default(), RefinementPools::default())
                .assemble();
        assert_eq!(assembled.num_residual_blocks(), 0);
        let solved = assembled.solve();
        assert_eq!(solved.status(), RefinementStatus::NotPerformed);
        let (model, status) = solved.into_solution();
        assert_eq!(status, RefinementStatus::NotPerformed);
        assert_eq!(model, start);

        // Both families disabled.
        let idx = all(10);
        let config = RefinerConfig {
            use_reprojection: false,
            use_sampson: false,
            ..Default::default()
        };
        let pools = RefinementPools {
            reprojection0: &idx,
            reprojection1: &idx,
            sampson: &idx,
        };
        let assembled = RefinementProblem::new(&data, &start, &config, pools).assemble();
        assert_eq!(assembled.num_residual_blocks(), 0);
    }

    fn refine_from(
        data: &CorrespondenceSet,
        start: &PoseScaleOffset,
        config: &RefinerConfig,
    ) -> (PoseScaleOffset, RefinementStatus, f64, f64) {
        let idx = all(data.len());
        let pools = RefinementPools {
            reprojection0: &idx,
            reprojection1: &idx,
            sampson: &idx,
        };
        let problem = RefinementProblem::new(data, start, config, pools);
        let before = problem.squared_residual_sum(start);
        let assembled = problem.assemble();
        assert_eq!(assembled.num_residual_blocks(), 3 * data.len());
        let (model, status) = assembled.solve().into_solution();
        let after = RefinementProblem::new(data, &model, config, pools).squared_residual_sum(&model);
        (model, status, before, after)
    }

    #[test]
    fn refinement_converges_from_a_perturbed_start() {
        let focals = [
            Focal::Calibrated,
            Focal::Shared(1.2),
            Focal::Two {
                focal0: 1.2,
                focal1: 0.8,
            },
        ];
        for focal in focals {
            let truth = ground_truth(focal);
            let data = observe(&truth, &points(30));
            let start = perturbed(&truth);
            let (model, status, before, after) = refine_from(&data, &start, &RefinerConfig::default());

            assert_eq!(status, RefinementStatus::Converged, "{focal:?}");
            assert!(after.is_finite() && after <= before, "{focal:?}: {after} > {before}");
            assert!(after < 1e-4 * before, "{focal:?}: {after} vs {before}");
            assert!(model.is_valid(&data.min_depth()));
            assert!(close_to(&model, &truth, 1e-4), "{focal:?}: {model:?}");
        }
    }

    #[test]
    fn constant_pose_keeps_rotation_and_translation() {
        let truth = ground_truth(Focal::Shared(1.2));
        let data = observe(&truth, &points(20));
        let start = PoseScaleOffset::new(
            *truth.rotation(),
            *truth.translation(),
            truth.scale() * 1.05,
            truth.offset0() + 0.1,
            truth.offset1() - 0.05,
            truth.focal().scaled(1.02),
        );
        let config = RefinerConfig {
            constant_pose: true,
            ..Default::default()
        };
        let (model, status, before, after) = refine_from(&data, &start, &config);

        assert_eq!(status, RefinementStatus::Converged);
        assert_eq!(model.rotation(), start.rotation());
        assert_eq!(model.translation(), start.translation());
        assert_ne!(model.scale(), start.scale());
        assert!(after < before, "{after} >= {before}");
        assert!((model.scale() - truth.scale()).abs() < 1e-4);
        assert!((model.focal0() - truth.focal0()).abs() < 1e-4);
    }

    #[test]
    fn constant_pose_without_focal_skips_sampson_blocks() {
        let truth = ground_truth(Focal::Calibrated);
        let data = observe(&truth, &points(10));
        let idx = all(10);
        let pools = RefinementPools {
            reprojection0: &idx,
            reprojection1: &idx,
            sampson: &idx,
        };
        let config = RefinerConfig {
            constant_pose: true,
            ..Default::default()
        };
        let assembled = RefinementProblem::new(&data, &truth, &config, pools).assemble();
        assert_eq!(assembled.num_residual_blocks(), 20);
    }

    #[test]
    fn a_worse_solution_falls_back_to_the_input() {
        let truth = ground_truth(Focal::Shared(1.2));
        let data = observe(&truth, &points(20));
        let idx = all(20);
        let pools = RefinementPools {
            reprojection0: &idx,
            reprojection1: &idx,
            sampson: &idx,
        };
        let config = RefinerConfig::default();
        let start = perturbed(&truth);

        // Valid but far off: a diverged solve must not replace the input.
        let mut solution = HashMap::new();
        solution.insert(SCALE.to_string(), DVector::from_element(1, 40.0));
        solution.insert(OFFSET0.to_string(), DVector::from_element(1, 30.0));
        let solved = SolvedRefinement {
            source: RefinementProblem::new(&data, &start, &config, pools),
            solution: Some(solution),
            status: RefinementStatus::Converged,
        };
        let (model, status) = solved.into_solution();
        assert_eq!(status, RefinementStatus::Failed);
        assert_eq!(model, start);

        // Non-finite values fail the validity check first.
        let mut solution = HashMap::new();
        solution.insert(SCALE.to_string(), DVector::from_element(1, f64::INFINITY));
        let solved = SolvedRefinement {
            source: RefinementProblem::new(&data, &start, &config, pools),
            solution: Some(solution),
            status: RefinementStatus::Converged,
        };
        assert_eq!(solved.into_solution(), (start, RefinementStatus::Failed));
    }

    #[test]
    fn robust_cost_never_exceeds_the_squared_sum() {
        let truth = ground_truth(Focal::Shared(1.2));
        let data = observe(&truth, &points(20));
        let idx = all(20);
        let pools = RefinementPools {
            reprojection0: &idx,
            reprojection1: &idx,
            sampson: &idx,
        };
        let config = RefinerConfig {
            reprojection_loss: LossFunction::Huber { scale: 1e-3 },
            sampson_loss: LossFunction::Cauchy { scale: 1e-3 },
            ..Default::default()
        };
        let problem = RefinementProblem::new(&data, &truth, &config, pools);
        let start = perturbed(&truth);
        assert!(problem.cost(&start) < problem.squared_residual_sum(&start));
        assert!(problem.cost(&truth) < 1e-20);
    }
}
