//! Scoring for hybrid RANSAC.
//!
//! The score is a truncated quadratic (MSAC) cost summed over all pools:
//! `sum_t w_t * sum_i c_i * min(r_ti, thr_t)`, where `c_i` is the point's
//! confidence weight. Lower cost is better, so [`HybridScore`] orders
//! inversely to its cost and the driver can keep comparing with `>`.

use std::cmp::Ordering;

use serde::Serialize;

use crate::core::{HybridEstimator, HybridScoring};

#[derive(Debug, Clone, Serialize)]
pub struct HybridScore {
    pub cost: f64,
    pub num_inliers: Vec<usize>,
}

impl PartialEq for HybridScore {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost
    }
}

impl PartialOrd for HybridScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        other.cost.partial_cmp(&self.cost)
    }
}

/// MSAC scoring with one squared threshold and one weight per pool.
#[derive(Debug, Clone)]
pub struct HybridMsacScoring {
    squared_thresholds: Vec<f64>,
    weights: Vec<f64>,
}

impl HybridMsacScoring {
    pub fn new(squared_thresholds: Vec<f64>, weights: Vec<f64>) -> Self {
        Self {
            squared_thresholds,
            weights,
        }
    }

    pub fn squared_thresholds(&self) -> &[f64] {
        &self.squared_thresholds
    }
}

impl<E: HybridEstimator> HybridScoring<E> for HybridMsacScoring {
    type Score = HybridScore;

    fn score(&self, estimator: &E, model: &E::Model, inliers: &mut Vec<Vec<usize>>) -> HybridScore {
        let num_data = estimator.num_data();
        inliers.resize(num_data.len(), Vec::new());

        let mut cost = 0.0;
        for (t, &n) in num_data.iter().enumerate() {
            let thr = self.squared_thresholds[t];
            let w = self.weights[t];
            let pool = &mut inliers[t];
            pool.clear();
            for i in 0..n {
                let r = estimator.evaluate_model_on_point(model, t, i);
                if r <= thr {
                    pool.push(i);
                }
                cost += w * estimator.weight(i) * r.min(thr);
            }
        }

        HybridScore {
            cost,
            num_inliers: inliers.iter().map(Vec::len).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimisers::refiner::RefinementStatus;

    /// Two pools of scalar residuals stored directly in the estimator.
    struct Residuals(Vec<Vec<f64>>);

    impl HybridEstimator for Residuals {
        type Model = ();

        fn num_minimal_solvers(&self) -> usize {
            0
        }
        fn min_sample_sizes(&self) -> Vec<Vec<usize>> {
            Vec::new()
        }
        fn num_data_types(&self) -> usize {
            self.0.len()
        }
        fn num_data(&self) -> Vec<usize> {
            self.0.iter().map(Vec::len).collect()
        }
        fn non_minimal_sample_size(&self) -> usize {
            0
        }
        fn minimal_solver(&self, _sample: &[Vec<usize>], _solver_idx: usize) -> Vec<()> {
            Vec::new()
        }
        fn non_minimal_solver(
            &self,
            _sample: &[Vec<usize>],
            _warm_start: Option<&()>,
            _final_pass: bool,
        ) -> Option<()> {
            None
        }
        fn evaluate_model_on_point(&self, _model: &(), data_type: usize, i: usize) -> f64 {
            self.0[data_type][i]
        }
        fn refine(&self, _model: &(), _inliers: &[Vec<usize>]) -> ((), RefinementStatus) {
            ((), RefinementStatus::NotPerformed)
        }
    }

    #[test]
    fn truncated_cost_and_inliers() {
        let est = Residuals(vec![vec![0.1, 5.0, 0.3], vec![2.0, 0.5]]);
        let scoring = HybridMsacScoring::new(vec![1.0, 1.0], vec![1.0, 2.0]);
        let mut inliers = Vec::new();
        let score = scoring.score(&est, &(), &mut inliers);

        assert_eq!(inliers, vec![vec![0, 2], vec![1]]);
        assert_eq!(score.num_inliers, vec![2, 1]);
        // 0.1 + 1 + 0.3 + 2 * (1 + 0.5)
        assert!((score.cost - 4.4).abs() < 1e-12);
    }

    #[test]
    fn lower_cost_compares_greater() {
        let good = HybridScore {
            cost: 1.0,
            num_inliers: vec![3],
        };
        let bad = HybridScore {
            cost: 2.0,
            num_inliers: vec![5],
        };
        assert!(good > bad);
        assert!(bad < good);
        assert!(!(good < good.clone()));
    }
}
