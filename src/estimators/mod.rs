//! Estimators for relative pose with depth scale and offsets.
//!
//! - [`depth_anchored`]: minimal solvers on lifted depth points
//! - [`epipolar`]: seven-point solver with focal recovery and depth alignment
//! - [`non_minimal`]: least-squares fit used by local optimisation
//! - [`evaluator`]: per-pool residuals
//! - [`rigid_transform`]: point-set alignment shared by the solvers
//!
//! [`HybridPoseEstimator`] ties them together behind
//! [`HybridEstimator`](crate::core::HybridEstimator).

pub mod depth_anchored;
pub mod epipolar;
pub mod evaluator;
pub mod non_minimal;
pub mod rigid_transform;

pub use evaluator::ModelEvaluator;
pub use non_minimal::NonMinimalProblem;

use log::trace;

use crate::core::HybridEstimator;
use crate::models::{FocalVariant, PoseScaleOffset};
use crate::optimisers::refiner::{RefinementPools, RefinementProblem, RefinementStatus};
use crate::settings::{EstimatorSettings, PoolLayout, RefinerConfig};
use crate::types::CorrespondenceSet;

/// Index of the depth-anchored minimal solver.
pub const DEPTH_SOLVER: usize = 0;
/// Index of the epipolar minimal solver.
pub const EPIPOLAR_SOLVER: usize = 1;

/// Hybrid estimator over depth-augmented correspondences.
///
/// Every correspondence appears in every pool; the pools only differ in the
/// residual they score. Solver 0 samples depth-anchored points from the
/// reprojection pool(s), solver 1 samples seven points from the Sampson pool.
#[derive(Debug, Clone)]
pub struct HybridPoseEstimator {
    data: CorrespondenceSet,
    variant: FocalVariant,
    layout: PoolLayout,
    evaluator: ModelEvaluator,
    sampson_weight: f64,
    refiner: RefinerConfig,
    non_minimal_sample_size: usize,
}

impl HybridPoseEstimator {
    pub fn new(
        data: CorrespondenceSet,
        variant: FocalVariant,
        settings: &EstimatorSettings,
        non_minimal_sample_size: usize,
    ) -> Self {
        Self {
            data,
            variant,
            layout: settings.layout,
            evaluator: ModelEvaluator::new(settings.layout),
            sampson_weight: settings.sampson_weight,
            refiner: settings.refiner,
            non_minimal_sample_size,
        }
    }

    pub fn data(&self) -> &CorrespondenceSet {
        &self.data
    }

    pub fn variant(&self) -> FocalVariant {
        self.variant
    }

    pub fn layout(&self) -> PoolLayout {
        self.layout
    }

    /// Points whose depth equations enter a fit on `sample`.
    ///
    /// With three pools a point counts if it is in either reprojection pool.
    fn depth_rows(&self, sample: &[Vec<usize>]) -> Vec<usize> {
        match self.layout {
            PoolLayout::TwoPool => sample.first().cloned().unwrap_or_default(),
            PoolLayout::ThreePool { .. } => {
                let mut rows: Vec<usize> = sample.iter().take(2).flatten().copied().collect();
                rows.sort_unstable();
                rows.dedup();
                rows
            }
        }
    }

    fn sampson_rows<'s>(&self, sample: &'s [Vec<usize>]) -> &'s [usize] {
        sample
            .get(self.layout.sampson_pool())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl HybridEstimator for HybridPoseEstimator {
    type Model = PoseScaleOffset;

    fn num_minimal_solvers(&self) -> usize {
        2
    }

    fn min_sample_sizes(&self) -> Vec<Vec<usize>> {
        let m = self.variant.depth_sample_size();
        match self.layout {
            PoolLayout::TwoPool => vec![vec![m, 0], vec![0, epipolar::SAMPLE_SIZE]],
            PoolLayout::ThreePool { .. } => {
                vec![vec![m, m, 0], vec![0, 0, epipolar::SAMPLE_SIZE]]
            }
        }
    }

    fn num_data_types(&self) -> usize {
        self.layout.num_pools()
    }

    fn num_data(&self) -> Vec<usize> {
        vec![self.data.len(); self.layout.num_pools()]
    }

    fn non_minimal_sample_size(&self) -> usize {
        self.non_minimal_sample_size
    }

    fn weight(&self, i: usize) -> f64 {
        self.data.weight(i)
    }

    fn minimal_solver(&self, sample: &[Vec<usize>], solver_idx: usize) -> Vec<PoseScaleOffset> {
        // The three-pool depth solver keeps the draw from pool 0 only.
        let models = match solver_idx {
            DEPTH_SOLVER => match sample.first() {
                Some(points) => depth_anchored::solve(&self.data, points, self.variant),
                None => Vec::new(),
            },
            EPIPOLAR_SOLVER => epipolar::solve(&self.data, self.sampson_rows(sample), self.variant),
            _ => Vec::new(),
        };
        let min_depth = self.data.min_depth();
        let valid: Vec<_> = models
            .into_iter()
            .filter(|model| model.is_valid(&min_depth))
            .collect();
        trace!("solver {solver_idx} produced {} valid models", valid.len());
        valid
    }

    fn non_minimal_solver(
        &self,
        sample: &[Vec<usize>],
        warm_start: Option<&PoseScaleOffset>,
        final_pass: bool,
    ) -> Option<PoseScaleOffset> {
        let depth_rows = self.depth_rows(sample);
        NonMinimalProblem {
            data: &self.data,
            variant: self.variant,
            depth_rows: &depth_rows,
            sampson_rows: self.sampson_rows(sample),
            sampson_weight: self.sampson_weight,
        }
        .solve(warm_start, final_pass)
    }

    fn evaluate_model_on_point(&self, model: &PoseScaleOffset, data_type: usize, i: usize) -> f64 {
        self.evaluator.evaluate(&self.data, model, data_type, i)
    }

    fn refine(
        &self,
        model: &PoseScaleOffset,
        inliers: &[Vec<usize>],
    ) -> (PoseScaleOffset, RefinementStatus) {
        let pool = |t: usize| inliers.get(t).map(Vec::as_slice).unwrap_or(&[]);
        let pools = match self.layout {
            PoolLayout::TwoPool => RefinementPools {
                reprojection0: pool(0),
                reprojection1: pool(0),
                sampson: pool(1),
            },
            PoolLayout::ThreePool { .. } => RefinementPools {
                reprojection0: pool(0),
                reprojection1: pool(1),
                sampson: pool(2),
            },
        };
        RefinementProblem::new(&self.data, model, &self.refiner, pools)
            .assemble()
            .solve()
            .into_solution()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Focal;
    use crate::testing::{close_to, ground_truth, observe, points};

    fn estimator(focal: Focal, layout: PoolLayout) -> (HybridPoseEstimator, PoseScaleOffset) {
        let truth = ground_truth(focal);
        let data = observe(&truth, &points(40));
        let settings = EstimatorSettings {
            layout,
            ..Default::default()
        };
        (
            HybridPoseEstimator::new(data, focal.variant(), &settings, 36),
            truth,
        )
    }

    #[test]
    fn sample_sizes_follow_layout_and_variant() {
        let cases = [
            (Focal::Calibrated, 3),
            (Focal::Shared(1.2), 4),
            (
                Focal::Two {
                    focal0: 1.2,
                    focal1: 0.8,
                },
                4,
            ),
        ];
        for (focal, m) in cases {
            let (two, _) = estimator(focal, PoolLayout::TwoPool);
            assert_eq!(two.min_sample_sizes(), vec![vec![m, 0], vec![0, 7]], "{focal:?}");
            assert_eq!(two.num_data(), vec![40, 40]);
            assert_eq!(two.num_minimal_solvers(), 2);

            let (three, _) = estimator(focal, PoolLayout::ThreePool { gradcut: true });
            assert_eq!(
                three.min_sample_sizes(),
                vec![vec![m, m, 0], vec![0, 0, 7]],
                "{focal:?}"
            );
            assert_eq!(three.num_data_types(), 3);
        }
    }

    #[test]
    fn both_solvers_recover_the_truth() {
        for layout in [PoolLayout::TwoPool, PoolLayout::ThreePool { gradcut: false }] {
            let (est, truth) = estimator(Focal::Shared(1.2), layout);
            let n_pools = layout.num_pools();

            let mut depth_sample = vec![Vec::new(); n_pools];
            depth_sample[0] = vec![0, 1, 2, 3];
            if n_pools == 3 {
                depth_sample[1] = vec![10, 11, 12, 13];
            }
            let models = est.minimal_solver(&depth_sample, DEPTH_SOLVER);
            assert!(models.iter().any(|m| close_to(m, &truth, 1e-6)));

            let mut epipolar_sample = vec![Vec::new(); n_pools];
            epipolar_sample[n_pools - 1] = (0..7).collect();
            let models = est.minimal_solver(&epipolar_sample, EPIPOLAR_SOLVER);
            assert!(models.iter().any(|m| close_to(m, &truth, 1e-6)));

            assert!(est.minimal_solver(&depth_sample, 5).is_empty());
        }
    }

    #[test]
    fn three_pool_depth_rows_are_a_sorted_union() {
        let (est, _) = estimator(Focal::Calibrated, PoolLayout::ThreePool { gradcut: true });
        let sample = vec![vec![5, 1, 3], vec![3, 2, 9], vec![7]];
        assert_eq!(est.depth_rows(&sample), vec![1, 2, 3, 5, 9]);
        assert_eq!(est.sampson_rows(&sample), &[7]);

        let (est, _) = estimator(Focal::Calibrated, PoolLayout::TwoPool);
        let sample = vec![vec![5, 1], vec![7, 8]];
        assert_eq!(est.depth_rows(&sample), vec![5, 1]);
        assert_eq!(est.sampson_rows(&sample), &[7, 8]);
    }

    #[test]
    fn non_minimal_fit_on_all_points() {
        let (est, truth) = estimator(
            Focal::Two {
                focal0: 1.2,
                focal1: 0.8,
            },
            PoolLayout::TwoPool,
        );
        let all: Vec<usize> = (0..40).collect();
        let model = est
            .non_minimal_solver(&[all.clone(), all], Some(&truth), true)
            .unwrap();
        assert!(close_to(&model, &truth, 1e-8));
    }

    #[test]
    fn refinement_keeps_an_exact_model() {
        let (est, truth) = estimator(Focal::Shared(1.2), PoolLayout::TwoPool);
        let all: Vec<usize> = (0..40).collect();
        let (model, status) = est.refine(&truth, &[all.clone(), all]);
        assert_ne!(status, RefinementStatus::NotPerformed);
        assert!(close_to(&model, &truth, 1e-6));

        let (model, status) = est.refine(&truth, &[Vec::new(), Vec::new()]);
        assert_eq!(status, RefinementStatus::NotPerformed);
        assert_eq!(model, truth);
    }
}
