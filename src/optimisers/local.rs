//! Local optimisation of the best model found so far.
//!
//! Runs inside the RANSAC loop after each improvement, from
//! `starting_iteration` on. Works on whatever pools the estimator declares
//! and never returns a model that scores worse than its input.

use log::debug;
use rand::prelude::*;
use rand::seq::index;

use crate::core::{HybridEstimator, HybridScoring};
use crate::settings::LocalOptimizationSettings;

use super::LocalOptimizer;

/// Local optimisation by repeated non-minimal fits on random inlier subsets.
///
/// Every step draws at most `non_minimal_sample_size` inliers per pool, fits
/// a model warm-started from the current best one and then refits on the
/// candidate's own inliers for as long as the score keeps improving. Only
/// improvements over the incoming model are kept. When no pool is large
/// enough to be subsampled every step would see the same data, so a single
/// step runs.
pub struct HybridLocalOptimizer {
    settings: LocalOptimizationSettings,
    rng: StdRng,
}

impl HybridLocalOptimizer {
    pub fn new(settings: LocalOptimizationSettings) -> Self {
        Self {
            settings,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn from_seed(settings: LocalOptimizationSettings, seed: u64) -> Self {
        Self {
            settings,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn settings(&self) -> &LocalOptimizationSettings {
        &self.settings
    }

    /// Write a random subset of every pool into `out`.
    ///
    /// Returns `true` if at least one pool was larger than `max_size`.
    fn draw_subset(
        &mut self,
        inliers: &[Vec<usize>],
        max_size: usize,
        out: &mut Vec<Vec<usize>>,
    ) -> bool {
        out.resize(inliers.len(), Vec::new());
        let mut subsampled = false;
        for (pool, subset) in inliers.iter().zip(out.iter_mut()) {
            subset.clear();
            if pool.len() <= max_size {
                subset.extend_from_slice(pool);
                continue;
            }
            subsampled = true;
            subset.extend(
                index::sample(&mut self.rng, pool.len(), max_size)
                    .into_iter()
                    .map(|k| pool[k]),
            );
            subset.sort_unstable();
        }
        subsampled
    }
}

impl<E, Sc> LocalOptimizer<E, Sc> for HybridLocalOptimizer
where
    E: HybridEstimator,
    Sc: HybridScoring<E>,
{
    fn run(
        &mut self,
        estimator: &E,
        scoring: &Sc,
        model: &E::Model,
        score: &Sc::Score,
        inliers: &[Vec<usize>],
    ) -> (E::Model, Sc::Score, Vec<Vec<usize>>) {
        let mut best_model = model.clone();
        let mut best_score = score.clone();
        let mut best_inliers = inliers.to_vec();
        if inliers.iter().all(Vec::is_empty) {
            return (best_model, best_score, best_inliers);
        }

        let max_size = self
            .settings
            .non_minimal_sample_size
            .min(estimator.non_minimal_sample_size())
            .max(1);
        let mut subset = Vec::new();
        let mut candidate_inliers = Vec::new();
        let mut refit_inliers = Vec::new();

        for step in 0..self.settings.num_steps {
            let subsampled = self.draw_subset(&best_inliers, max_size, &mut subset);

            if let Some(mut candidate) =
                estimator.non_minimal_solver(&subset, Some(&best_model), false)
            {
                let mut candidate_score =
                    scoring.score(estimator, &candidate, &mut candidate_inliers);

                for _ in 0..self.settings.num_lsq_iterations {
                    let Some(refit) =
                        estimator.non_minimal_solver(&candidate_inliers, Some(&candidate), false)
                    else {
                        break;
                    };
                    let refit_score = scoring.score(estimator, &refit, &mut refit_inliers);
                    if !(refit_score > candidate_score) {
                        break;
                    }
                    candidate = refit;
                    candidate_score = refit_score;
                    std::mem::swap(&mut candidate_inliers, &mut refit_inliers);
                }

                if candidate_score > best_score {
                    debug!("local optimisation step {step} improved the score to {candidate_score:?}");
                    best_model = candidate;
                    best_score = candidate_score;
                    std::mem::swap(&mut best_inliers, &mut candidate_inliers);
                }
            }

            if !subsampled {
                break;
            }
        }

        (best_model, best_score, best_inliers)
    }
}
