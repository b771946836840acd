//! Hybrid RANSAC traits and driver.
//!
//! A hybrid problem has several data pools (here: depth-anchored and
//! epipolar correspondences) and several minimal solvers, each drawing a
//! fixed number of points from every pool. The driver in this module picks a
//! solver per iteration, draws a sample, scores the candidates over all pools
//! and keeps the best one, with optional local optimisation on improvement
//! and a final refinement once sampling stops.
//!
//! The pieces are traits so the loop can be exercised with mocks:
//! - [`HybridEstimator`]: sample sizes, solvers, residuals, refinement.
//! - [`HybridSampler`]: per-pool index sampling.
//! - [`HybridScoring`]: model quality and inlier sets.
//! - [`TerminationCriterion`]: adaptive iteration budget.
//! - [`LocalOptimizer`](crate::optimisers::LocalOptimizer): improvement of the
//!   current best model.

use log::{debug, info};
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use serde::Serialize;

use crate::optimisers::refiner::RefinementStatus;
use crate::optimisers::LocalOptimizer;
use crate::settings::RansacSettings;

/// Contract between a hybrid problem and the RANSAC driver.
pub trait HybridEstimator {
    type Model: Clone;

    fn num_minimal_solvers(&self) -> usize;

    /// `sizes[s][t]`: points solver `s` draws from pool `t`.
    fn min_sample_sizes(&self) -> Vec<Vec<usize>>;

    fn num_data_types(&self) -> usize;

    /// Number of points in every pool.
    fn num_data(&self) -> Vec<usize>;

    /// Prior probability of picking each solver.
    fn solver_probabilities(&self) -> Vec<f64> {
        vec![1.0; self.num_minimal_solvers()]
    }

    /// Upper bound on the points per pool handed to the non-minimal solver
    /// during local optimisation.
    fn non_minimal_sample_size(&self) -> usize;

    /// Confidence weight of a point.
    fn weight(&self, _i: usize) -> f64 {
        1.0
    }

    /// Candidate models from a minimal sample. Invalid models are dropped.
    fn minimal_solver(&self, sample: &[Vec<usize>], solver_idx: usize) -> Vec<Self::Model>;

    /// One model fitted to a larger sample, or `None` when the fit fails.
    fn non_minimal_solver(
        &self,
        sample: &[Vec<usize>],
        warm_start: Option<&Self::Model>,
        final_pass: bool,
    ) -> Option<Self::Model>;

    /// Squared residual of point `i` of pool `data_type`.
    fn evaluate_model_on_point(&self, model: &Self::Model, data_type: usize, i: usize) -> f64;

    /// Nonlinear refinement on the final inlier sets.
    fn refine(&self, model: &Self::Model, inliers: &[Vec<usize>]) -> (Self::Model, RefinementStatus);
}

/// Sampler drawing indices from every pool.
pub trait HybridSampler {
    /// Fill `out[t]` with `sizes[t]` distinct indices below `num_data[t]`.
    ///
    /// Returns `false` if a sample could not be drawn.
    fn sample(&mut self, num_data: &[usize], sizes: &[usize], out: &mut [Vec<usize>]) -> bool;
}

/// Scoring strategy over all pools.
pub trait HybridScoring<E: HybridEstimator> {
    /// Greater is better.
    type Score: Clone + PartialOrd + std::fmt::Debug;

    /// Score `model` and write the inliers of every pool into `inliers`.
    fn score(&self, estimator: &E, model: &E::Model, inliers: &mut Vec<Vec<usize>>) -> Self::Score;
}

/// Decides how many iterations the loop needs.
pub trait TerminationCriterion {
    /// Update the budget after the best model changed.
    ///
    /// Returns `true` if the loop should stop immediately.
    fn check(
        &mut self,
        inlier_ratios: &[f64],
        sample_sizes: &[Vec<usize>],
        max_iterations: &mut usize,
    ) -> bool;
}

/// Budget from the standard RANSAC formula, taken per solver.
///
/// For solver `s` the probability of an all-inlier sample is
/// `p_s = prod_t eps_t^m_st`, and `N_s = log(1 - confidence) / log(1 - p_s)`.
/// The budget is the smallest `N_s`, clamped to the configured range.
#[derive(Debug, Clone)]
pub struct RansacTerminationCriterion {
    pub confidence: f64,
    pub min_iterations: usize,
    pub max_iterations: usize,
}

impl RansacTerminationCriterion {
    pub fn from_settings(settings: &RansacSettings) -> Self {
        Self {
            confidence: settings.confidence,
            min_iterations: settings.min_iterations,
            max_iterations: settings.max_iterations,
        }
    }

    fn required_iterations(&self, inlier_ratios: &[f64], sizes: &[usize]) -> Option<f64> {
        let p_good: f64 = sizes
            .iter()
            .zip(inlier_ratios)
            .map(|(&m, &eps)| eps.clamp(0.0, 1.0).powi(m as i32))
            .product();
        if p_good <= 0.0 {
            return None;
        }
        if p_good >= 1.0 {
            return Some(0.0);
        }
        let log_one_minus_conf = (1.0 - self.confidence).ln();
        let log_one_minus_p = (1.0 - p_good).ln();
        if !log_one_minus_conf.is_finite() || !log_one_minus_p.is_finite() || log_one_minus_p == 0.0
        {
            return None;
        }
        Some((log_one_minus_conf / log_one_minus_p).ceil())
    }
}

impl TerminationCriterion for RansacTerminationCriterion {
    fn check(
        &mut self,
        inlier_ratios: &[f64],
        sample_sizes: &[Vec<usize>],
        max_iterations: &mut usize,
    ) -> bool {
        let required = sample_sizes
            .iter()
            .filter_map(|sizes| self.required_iterations(inlier_ratios, sizes))
            .fold(f64::INFINITY, f64::min);
        if required.is_finite() {
            let clamped = required
                .max(self.min_iterations as f64)
                .min(self.max_iterations as f64);
            *max_iterations = clamped as usize;
        }
        false
    }
}

/// Run summary of [`HybridRansac`].
#[derive(Debug, Clone, Serialize)]
pub struct HybridRansacStatistics<S> {
    pub num_iterations: usize,
    pub num_lo_steps: usize,
    /// Calls per minimal solver.
    pub solver_invocations: Vec<usize>,
    pub best_score: Option<S>,
    pub num_inliers: Vec<usize>,
    pub inlier_ratios: Vec<f64>,
    pub inlier_indices: Vec<Vec<usize>>,
    /// Solver whose sample produced the best model.
    pub best_solver: Option<usize>,
    pub refinement: Option<RefinementStatus>,
}

impl<S> Default for HybridRansacStatistics<S> {
    fn default() -> Self {
        Self {
            num_iterations: 0,
            num_lo_steps: 0,
            solver_invocations: Vec::new(),
            best_score: None,
            num_inliers: Vec::new(),
            inlier_ratios: Vec::new(),
            inlier_indices: Vec::new(),
            best_solver: None,
            refinement: None,
        }
    }
}

/// Hybrid RANSAC pipeline orchestrating the components above.
pub struct HybridRansac<E, Sa, Sc, LO, T>
where
    E: HybridEstimator,
    Sa: HybridSampler,
    Sc: HybridScoring<E>,
    LO: LocalOptimizer<E, Sc>,
    T: TerminationCriterion,
{
    pub settings: RansacSettings,
    pub estimator: E,
    pub sampler: Sa,
    pub scoring: Sc,
    pub local_optimizer: Option<LO>,
    pub termination: T,
    rng: StdRng,

    // Outputs
    pub best_model: Option<E::Model>,
    pub best_inliers: Vec<Vec<usize>>,
    pub best_score: Option<Sc::Score>,
    pub statistics: HybridRansacStatistics<Sc::Score>,
}

impl<E, Sa, Sc, LO, T> HybridRansac<E, Sa, Sc, LO, T>
where
    E: HybridEstimator,
    Sa: HybridSampler,
    Sc: HybridScoring<E>,
    LO: LocalOptimizer<E, Sc>,
    T: TerminationCriterion,
{
    pub fn new(
        settings: RansacSettings,
        estimator: E,
        sampler: Sa,
        scoring: Sc,
        local_optimizer: Option<LO>,
        termination: T,
    ) -> Self {
        // Decorrelated from the sampler, which uses the seed itself.
        let rng = match settings.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ 0x9E37_79B9_7F4A_7C15),
            None => StdRng::from_entropy(),
        };
        Self {
            settings,
            estimator,
            sampler,
            scoring,
            local_optimizer,
            termination,
            rng,
            best_model: None,
            best_inliers: Vec::new(),
            best_score: None,
            statistics: HybridRansacStatistics::default(),
        }
    }

    fn inlier_ratios(&self, inliers: &[Vec<usize>]) -> Vec<f64> {
        self.estimator
            .num_data()
            .iter()
            .zip(inliers)
            .map(|(&n, set)| if n == 0 { 0.0 } else { set.len() as f64 / n as f64 })
            .collect()
    }

    /// Pick a solver, weighted by its prior and its chance of drawing an
    /// all-inlier sample under the current inlier ratios.
    fn choose_solver(&mut self, feasible: &[bool], sizes: &[Vec<usize>]) -> Option<usize> {
        let priors = self.estimator.solver_probabilities();
        let ratios = self.inlier_ratios(&self.best_inliers);
        let mut probs: Vec<f64> = (0..sizes.len())
            .map(|s| {
                if !feasible[s] {
                    return 0.0;
                }
                if self.best_model.is_none() {
                    return priors[s];
                }
                let p_good: f64 = sizes[s]
                    .iter()
                    .zip(&ratios)
                    .map(|(&m, &eps)| eps.powi(m as i32))
                    .product();
                priors[s] * p_good
            })
            .collect();
        if !(probs.iter().sum::<f64>() > 0.0) {
            probs = (0..sizes.len())
                .map(|s| if feasible[s] { priors[s] } else { 0.0 })
                .collect();
        }
        let dist = WeightedIndex::new(&probs).ok()?;
        Some(dist.sample(&mut self.rng))
    }

    fn try_local_optimization(&mut self, iteration: usize) {
        let lo_settings = &self.settings.local_optimization;
        if !lo_settings.enabled || iteration < lo_settings.starting_iteration {
            return;
        }
        let (Some(lo), Some(model), Some(score)) =
            (&mut self.local_optimizer, &self.best_model, &self.best_score)
        else {
            return;
        };
        let (lo_model, lo_score, lo_inliers) =
            lo.run(&self.estimator, &self.scoring, model, score, &self.best_inliers);
        self.statistics.num_lo_steps += 1;
        if lo_score > *score {
            debug!("local optimisation improved the score to {lo_score:?}");
            self.best_model = Some(lo_model);
            self.best_score = Some(lo_score);
            self.best_inliers = lo_inliers;
        }
    }

    fn record_empty_result(&mut self, n_pools: usize) {
        self.best_inliers = vec![Vec::new(); n_pools];
        self.statistics.num_inliers = vec![0; n_pools];
        self.statistics.inlier_ratios = vec![0.0; n_pools];
        self.statistics.inlier_indices = vec![Vec::new(); n_pools];
    }

    /// Run the loop until the adaptive budget is exhausted.
    ///
    /// Returns `true` if a model was found.
    pub fn run(&mut self) -> bool {
        let sizes = self.estimator.min_sample_sizes();
        let num_data = self.estimator.num_data();
        let n_pools = self.estimator.num_data_types();
        let n_solvers = self.estimator.num_minimal_solvers();

        self.best_model = None;
        self.best_score = None;
        self.best_inliers = vec![Vec::new(); n_pools];
        self.statistics = HybridRansacStatistics {
            solver_invocations: vec![0; n_solvers],
            ..Default::default()
        };

        let feasible: Vec<bool> = sizes
            .iter()
            .map(|s| s.iter().sum::<usize>() > 0 && s.iter().zip(&num_data).all(|(m, n)| m <= n))
            .collect();
        if !feasible.iter().any(|&f| f) {
            debug!("no minimal solver can draw a sample from {num_data:?}");
            self.record_empty_result(n_pools);
            return false;
        }

        let mut sample: Vec<Vec<usize>> = vec![Vec::new(); n_pools];
        let mut tmp_inliers: Vec<Vec<usize>> = vec![Vec::new(); n_pools];
        let mut max_iterations = self.settings.max_iterations;
        let mut iteration = 0;

        while iteration < max_iterations {
            iteration += 1;
            let Some(solver) = self.choose_solver(&feasible, &sizes) else {
                break;
            };
            if !self.sampler.sample(&num_data, &sizes[solver], &mut sample) {
                continue;
            }

            let models = self.estimator.minimal_solver(&sample, solver);
            self.statistics.solver_invocations[solver] += 1;

            let mut improved = false;
            for model in &models {
                let score = self.scoring.score(&self.estimator, model, &mut tmp_inliers);
                let better = match &self.best_score {
                    None => true,
                    Some(best) => score > *best,
                };
                if better {
                    debug!("iteration {iteration}: solver {solver} improved the score to {score:?}");
                    self.best_score = Some(score);
                    self.best_model = Some(model.clone());
                    std::mem::swap(&mut self.best_inliers, &mut tmp_inliers);
                    self.statistics.best_solver = Some(solver);
                    improved = true;
                }
            }

            if improved {
                self.try_local_optimization(iteration);
                let ratios = self.inlier_ratios(&self.best_inliers);
                if self.termination.check(&ratios, &sizes, &mut max_iterations) {
                    break;
                }
            }
        }
        self.statistics.num_iterations = iteration;

        let Some(mut model) = self.best_model.take() else {
            info!("no model found after {iteration} iterations");
            self.record_empty_result(n_pools);
            return false;
        };

        if self.settings.local_optimization.final_least_squares {
            if let Some(candidate) =
                self.estimator
                    .non_minimal_solver(&self.best_inliers, Some(&model), true)
            {
                let score = self.scoring.score(&self.estimator, &candidate, &mut tmp_inliers);
                let not_worse = self.best_score.as_ref().map_or(true, |best| !(score < *best));
                if not_worse {
                    model = candidate;
                    self.best_score = Some(score);
                    std::mem::swap(&mut self.best_inliers, &mut tmp_inliers);
                }
            }
        }

        let (refined, status) = self.estimator.refine(&model, &self.best_inliers);
        let score = self.scoring.score(&self.estimator, &refined, &mut tmp_inliers);
        self.best_score = Some(score);
        std::mem::swap(&mut self.best_inliers, &mut tmp_inliers);
        self.best_model = Some(refined);

        self.statistics.refinement = Some(status);
        self.statistics.best_score = self.best_score.clone();
        self.statistics.num_inliers = self.best_inliers.iter().map(Vec::len).collect();
        self.statistics.inlier_ratios = self.inlier_ratios(&self.best_inliers);
        self.statistics.inlier_indices = self.best_inliers.clone();
        info!(
            "hybrid RANSAC finished after {} iterations ({} LO steps), inliers per pool {:?}",
            iteration, self.statistics.num_lo_steps, self.statistics.num_inliers
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samplers::UniformRandomSampler;

    /// Points on the number line; a model is a single value and the residual
    /// is the squared distance to it.
    struct MockEstimator {
        values: Vec<f64>,
    }

    impl HybridEstimator for MockEstimator {
        type Model = f64;

        fn num_minimal_solvers(&self) -> usize {
            1
        }

        fn min_sample_sizes(&self) -> Vec<Vec<usize>> {
            vec![vec![1]]
        }

        fn num_data_types(&self) -> usize {
            1
        }

        fn num_data(&self) -> Vec<usize> {
            vec![self.values.len()]
        }

        fn non_minimal_sample_size(&self) -> usize {
            5
        }

        fn minimal_solver(&self, sample: &[Vec<usize>], _solver_idx: usize) -> Vec<f64> {
            vec![self.values[sample[0][0]]]
        }

        fn non_minimal_solver(
            &self,
            sample: &[Vec<usize>],
            _warm_start: Option<&f64>,
            _final_pass: bool,
        ) -> Option<f64> {
            let pts = &sample[0];
            if pts.is_empty() {
                return None;
            }
            Some(pts.iter().map(|&i| self.values[i]).sum::<f64>() / pts.len() as f64)
        }

        fn evaluate_model_on_point(&self, model: &f64, _data_type: usize, i: usize) -> f64 {
            (self.values[i] - model).powi(2)
        }

        fn refine(&self, model: &f64, _inliers: &[Vec<usize>]) -> (f64, RefinementStatus) {
            (*model, RefinementStatus::NotPerformed)
        }
    }

    #[derive(Debug, Clone, PartialEq, PartialOrd)]
    struct Count(usize);

    struct CountScoring;

    impl HybridScoring<MockEstimator> for CountScoring {
        type Score = Count;

        fn score(&self, est: &MockEstimator, model: &f64, inliers: &mut Vec<Vec<usize>>) -> Count {
            inliers.resize(1, Vec::new());
            inliers[0].clear();
            inliers[0].extend(
                (0..est.values.len()).filter(|&i| est.evaluate_model_on_point(model, 0, i) <= 0.01),
            );
            Count(inliers[0].len())
        }
    }

    struct NoLocalOptimization;

    impl LocalOptimizer<MockEstimator, CountScoring> for NoLocalOptimization {
        fn run(
            &mut self,
            _estimator: &MockEstimator,
            _scoring: &CountScoring,
            model: &f64,
            score: &Count,
            inliers: &[Vec<usize>],
        ) -> (f64, Count, Vec<Vec<usize>>) {
            (*model, score.clone(), inliers.to_vec())
        }
    }

    fn settings() -> RansacSettings {
        RansacSettings {
            min_iterations: 5,
            max_iterations: 200,
            random_seed: Some(7),
            squared_inlier_thresholds: vec![0.01],
            data_type_weights: vec![1.0],
            ..Default::default()
        }
    }

    #[test]
    fn finds_the_dominant_cluster() {
        let mut values: Vec<f64> = (0..12).map(|i| 3.0 + 0.01 * i as f64).collect();
        values.extend([10.0, -4.0, 25.0, 0.5]);
        let settings = settings();
        let termination = RansacTerminationCriterion::from_settings(&settings);
        let mut ransac = HybridRansac::new(
            settings,
            MockEstimator { values },
            UniformRandomSampler::from_seed(7),
            CountScoring,
            Some(NoLocalOptimization),
            termination,
        );

        assert!(ransac.run());
        let model = ransac.best_model.unwrap();
        assert!((model - 3.055).abs() < 0.1);
        // Final least squares averages the cluster.
        assert!(ransac.best_inliers[0].iter().all(|&i| i < 12));
        assert!(ransac.statistics.num_iterations < 200);
        assert_eq!(ransac.statistics.best_solver, Some(0));
        assert_eq!(ransac.statistics.refinement, Some(RefinementStatus::NotPerformed));
        assert_eq!(ransac.statistics.num_inliers, vec![ransac.best_inliers[0].len()]);
    }

    #[test]
    fn empty_pool_yields_no_model() {
        let settings = settings();
        let termination = RansacTerminationCriterion::from_settings(&settings);
        let mut ransac = HybridRansac::new(
            settings,
            MockEstimator { values: Vec::new() },
            UniformRandomSampler::from_seed(7),
            CountScoring,
            None::<NoLocalOptimization>,
            termination,
        );
        assert!(!ransac.run());
        assert!(ransac.best_model.is_none());
        assert_eq!(ransac.statistics.num_iterations, 0);
        assert_eq!(ransac.statistics.num_inliers, vec![0]);
        assert_eq!(ransac.statistics.inlier_ratios, vec![0.0]);
    }

    #[test]
    fn termination_budget_follows_inlier_ratio() {
        let mut criterion = RansacTerminationCriterion {
            confidence: 0.99,
            min_iterations: 10,
            max_iterations: 10_000,
        };
        let sizes = vec![vec![4, 0], vec![0, 7]];

        let mut budget = 10_000;
        criterion.check(&[0.5, 0.5], &sizes, &mut budget);
        // 0.5^4 = 1/16 -> ceil(ln 0.01 / ln(15/16)) = 72
        assert_eq!(budget, 72);

        criterion.check(&[1.0, 1.0], &sizes, &mut budget);
        assert_eq!(budget, 10);

        let mut untouched = 500;
        criterion.check(&[0.0, 0.0], &sizes, &mut untouched);
        assert_eq!(untouched, 500);
    }
}
