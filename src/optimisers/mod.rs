use crate::core::{HybridEstimator, HybridScoring};

/// Local optimization strategy, refining the current best model using its
/// inliers.
///
/// ## Example: custom refinement
///
/// ```rust
/// use hybrid_pose::core::{HybridEstimator, HybridScoring};
/// use hybrid_pose::optimisers::LocalOptimizer;
///
/// /// Hands back its inputs.
/// struct Passthrough;
///
/// impl<E, Sc> LocalOptimizer<E, Sc> for Passthrough
/// where
///     E: HybridEstimator,
///     Sc: HybridScoring<E>,
/// {
///     fn run(
///         &mut self,
///         _estimator: &E,
///         _scoring: &Sc,
///         model: &E::Model,
///         score: &Sc::Score,
///         inliers: &[Vec<usize>],
///     ) -> (E::Model, Sc::Score, Vec<Vec<usize>>) {
///         (model.clone(), score.clone(), inliers.to_vec())
///     }
/// }
/// ```
pub trait LocalOptimizer<E: HybridEstimator, Sc: HybridScoring<E>> {
    /// Run local optimization on the current model and its per-pool inliers.
    ///
    /// Returns `(model, score, inliers)`; the driver keeps the result only if
    /// the score improved.
    fn run(
        &mut self,
        estimator: &E,
        scoring: &Sc,
        model: &E::Model,
        score: &Sc::Score,
        inliers: &[Vec<usize>],
    ) -> (E::Model, Sc::Score, Vec<Vec<usize>>);
}

pub mod local;
pub mod refiner;

pub use local::HybridLocalOptimizer;
pub use refiner::{RefinementProblem, RefinementStatus};
