//! Configuration for the hybrid RANSAC estimator.
//!
//! Every struct derives `serde` traits with `#[serde(default)]`, so partial
//! documents pick up the defaults below. [`HybridRansacOptions::validate`] is
//! run by every entry point before any work happens.

use serde::{Deserialize, Serialize};

use crate::error::{HybridPoseError, Result};

/// How the correspondences are split into residual pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolLayout {
    /// Pool 0: symmetric depth reprojection. Pool 1: Sampson error.
    TwoPool,
    /// Pool 0: view-0 reprojection. Pool 1: view-1 reprojection.
    /// Pool 2: Sampson error. `gradcut` rejects points whose corrected depth
    /// is not strictly positive.
    ThreePool { gradcut: bool },
}

impl Default for PoolLayout {
    fn default() -> Self {
        PoolLayout::TwoPool
    }
}

impl PoolLayout {
    pub fn num_pools(&self) -> usize {
        match self {
            PoolLayout::TwoPool => 2,
            PoolLayout::ThreePool { .. } => 3,
        }
    }

    /// Index of the Sampson pool.
    pub fn sampson_pool(&self) -> usize {
        self.num_pools() - 1
    }

    /// Default squared thresholds in pixel^2: 16 px for reprojection pools,
    /// 1 px for the Sampson pool.
    ///
    /// Every entry point divides the thresholds by `norm_scale^2`. The focal
    /// variants derive that scale from the principal points; the calibrated
    /// variant only has it when [`EstimatorSettings::norm_scale`] is set (a
    /// focal length in pixels), and reads the thresholds in normalised units
    /// otherwise.
    pub fn default_squared_thresholds(&self) -> Vec<f64> {
        let mut thresholds = vec![256.0; self.num_pools() - 1];
        thresholds.push(1.0);
        thresholds
    }
}

/// Robust loss applied to one residual family in the refiner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LossFunction {
    /// Plain squared loss.
    #[default]
    Trivial,
    Huber { scale: f64 },
    Cauchy { scale: f64 },
    Arctan { scale: f64 },
}

impl LossFunction {
    fn validate(&self, what: &str) -> Result<()> {
        match *self {
            LossFunction::Trivial => Ok(()),
            LossFunction::Huber { scale }
            | LossFunction::Cauchy { scale }
            | LossFunction::Arctan { scale } => {
                if scale > 0.0 && scale.is_finite() {
                    Ok(())
                } else {
                    Err(HybridPoseError::InvalidConfig(format!(
                        "{what} loss scale must be positive, got {scale}"
                    )))
                }
            }
        }
    }
}

/// Termination settings of the nonlinear solve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub max_iterations: usize,
    pub min_abs_error_decrease: f64,
    pub min_rel_error_decrease: f64,
    pub min_error: f64,
    pub verbosity: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            min_abs_error_decrease: 1e-10,
            min_rel_error_decrease: 1e-10,
            min_error: 1e-14,
            verbosity: 0,
        }
    }
}

/// Settings of the final nonlinear refinement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinerConfig {
    pub use_reprojection: bool,
    pub use_sampson: bool,
    /// Weight of the Sampson family relative to the reprojection family.
    pub weight_sampson: f64,
    /// Hold rotation and translation fixed.
    pub constant_pose: bool,
    pub reprojection_loss: LossFunction,
    pub sampson_loss: LossFunction,
    pub solver: SolverOptions,
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            use_reprojection: true,
            use_sampson: true,
            weight_sampson: 1.0,
            constant_pose: false,
            reprojection_loss: LossFunction::Trivial,
            sampson_loss: LossFunction::Trivial,
            solver: SolverOptions::default(),
        }
    }
}

impl RefinerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.weight_sampson >= 0.0 && self.weight_sampson.is_finite()) {
            return Err(HybridPoseError::InvalidConfig(format!(
                "weight_sampson must be non-negative, got {}",
                self.weight_sampson
            )));
        }
        if self.solver.max_iterations == 0 {
            return Err(HybridPoseError::InvalidConfig(
                "solver max_iterations must be positive".into(),
            ));
        }
        self.reprojection_loss.validate("reprojection")?;
        self.sampson_loss.validate("sampson")
    }
}

/// Settings controlling local optimisation inside the RANSAC loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalOptimizationSettings {
    pub enabled: bool,
    /// Local optimisation only runs from this iteration on.
    pub starting_iteration: usize,
    /// Random inlier subsets fitted per local optimisation.
    pub num_steps: usize,
    /// Refits on the full inlier set after each subset fit.
    pub num_lsq_iterations: usize,
    /// Upper bound on the subset size per pool.
    pub non_minimal_sample_size: usize,
    /// Run a last non-minimal fit with every residual family once the loop ends.
    pub final_least_squares: bool,
}

impl Default for LocalOptimizationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            starting_iteration: 50,
            num_steps: 10,
            num_lsq_iterations: 4,
            non_minimal_sample_size: 36,
            final_least_squares: true,
        }
    }
}

/// Sampling, scoring and termination settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacSettings {
    pub min_iterations: usize,
    pub max_iterations: usize,
    /// Desired confidence in (0, 1).
    pub confidence: f64,
    /// Squared inlier threshold per pool, in pixel^2.
    pub squared_inlier_thresholds: Vec<f64>,
    /// Weight of each pool in the score.
    pub data_type_weights: Vec<f64>,
    /// Seed for reproducible runs.
    pub random_seed: Option<u64>,
    pub local_optimization: LocalOptimizationSettings,
}

impl Default for RansacSettings {
    fn default() -> Self {
        Self {
            min_iterations: 100,
            max_iterations: 10_000,
            confidence: 0.9999,
            squared_inlier_thresholds: PoolLayout::TwoPool.default_squared_thresholds(),
            data_type_weights: vec![1.0, 1.0],
            random_seed: None,
            local_optimization: LocalOptimizationSettings::default(),
        }
    }
}

impl RansacSettings {
    /// Check the settings against a number of pools.
    pub fn validate(&self, num_pools: usize) -> Result<()> {
        if self.min_iterations > self.max_iterations {
            return Err(HybridPoseError::InvalidConfig(format!(
                "min_iterations ({}) exceeds max_iterations ({})",
                self.min_iterations, self.max_iterations
            )));
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(HybridPoseError::InvalidConfig(format!(
                "confidence must lie in (0, 1), got {}",
                self.confidence
            )));
        }
        if self.squared_inlier_thresholds.len() != num_pools {
            return Err(HybridPoseError::InvalidConfig(format!(
                "expected {num_pools} squared inlier thresholds, got {}",
                self.squared_inlier_thresholds.len()
            )));
        }
        if self.data_type_weights.len() != num_pools {
            return Err(HybridPoseError::InvalidConfig(format!(
                "expected {num_pools} data type weights, got {}",
                self.data_type_weights.len()
            )));
        }
        if let Some(t) = self
            .squared_inlier_thresholds
            .iter()
            .find(|t| !(**t > 0.0 && t.is_finite()))
        {
            return Err(HybridPoseError::InvalidConfig(format!(
                "squared inlier thresholds must be positive, got {t}"
            )));
        }
        if let Some(w) = self
            .data_type_weights
            .iter()
            .find(|w| !(**w >= 0.0 && w.is_finite()))
        {
            return Err(HybridPoseError::InvalidConfig(format!(
                "data type weights must be non-negative, got {w}"
            )));
        }
        Ok(())
    }
}

/// Estimator-side settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorSettings {
    pub layout: PoolLayout,
    /// Overrides the coordinate normalisation scale derived from the
    /// principal points. For calibrated input it only converts the pixel
    /// thresholds, since the coordinates are already normalised.
    pub norm_scale: Option<f64>,
    /// Weight of the Sampson rows in the final non-minimal fit.
    pub sampson_weight: f64,
    pub refiner: RefinerConfig,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            layout: PoolLayout::TwoPool,
            norm_scale: None,
            sampson_weight: 1.0,
            refiner: RefinerConfig::default(),
        }
    }
}

impl EstimatorSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.sampson_weight >= 0.0 && self.sampson_weight.is_finite()) {
            return Err(HybridPoseError::InvalidConfig(format!(
                "sampson_weight must be non-negative, got {}",
                self.sampson_weight
            )));
        }
        if let Some(s) = self.norm_scale {
            if !(s > 0.0 && s.is_finite()) {
                return Err(HybridPoseError::InvalidConfig(format!(
                    "norm_scale must be positive, got {s}"
                )));
            }
        }
        self.refiner.validate()
    }
}

/// Complete option set accepted by the entry points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HybridRansacOptions {
    pub ransac: RansacSettings,
    pub estimator: EstimatorSettings,
}

impl HybridRansacOptions {
    /// Options for a given pool layout with the layout's default thresholds
    /// and unit pool weights.
    pub fn with_layout(layout: PoolLayout) -> Self {
        let mut options = Self::default();
        options.estimator.layout = layout;
        options.ransac.squared_inlier_thresholds = layout.default_squared_thresholds();
        options.ransac.data_type_weights = vec![1.0; layout.num_pools()];
        options
    }

    pub fn validate(&self) -> Result<()> {
        self.ransac.validate(self.estimator.layout.num_pools())?;
        self.estimator.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let options = HybridRansacOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.ransac.squared_inlier_thresholds, vec![256.0, 1.0]);
        assert_eq!(options.ransac.local_optimization.non_minimal_sample_size, 36);
        assert_eq!(options.estimator.layout, PoolLayout::TwoPool);
        assert_eq!(options.estimator.refiner.reprojection_loss, LossFunction::Trivial);
        assert!(!options.estimator.refiner.constant_pose);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{
            "ransac": { "max_iterations": 500, "random_seed": 7 },
            "estimator": {
                "layout": { "three_pool": { "gradcut": true } },
                "refiner": { "sampson_loss": { "type": "cauchy", "scale": 0.5 } }
            }
        }"#;
        let options: HybridRansacOptions = serde_json::from_str(json).unwrap();
        assert_eq!(options.ransac.max_iterations, 500);
        assert_eq!(options.ransac.min_iterations, 100);
        assert_eq!(options.ransac.random_seed, Some(7));
        assert_eq!(
            options.estimator.layout,
            PoolLayout::ThreePool { gradcut: true }
        );
        assert_eq!(
            options.estimator.refiner.sampson_loss,
            LossFunction::Cauchy { scale: 0.5 }
        );
        assert!(options.estimator.refiner.use_reprojection);

        // Two thresholds do not fit three pools.
        assert!(matches!(
            options.validate(),
            Err(HybridPoseError::InvalidConfig(_))
        ));
        let fixed = HybridRansacOptions {
            ransac: RansacSettings {
                squared_inlier_thresholds: vec![256.0, 256.0, 1.0],
                data_type_weights: vec![1.0; 3],
                ..options.ransac.clone()
            },
            ..options
        };
        assert!(fixed.validate().is_ok());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut options = HybridRansacOptions::default();
        options.ransac.confidence = 1.0;
        assert!(options.validate().is_err());

        let mut options = HybridRansacOptions::default();
        options.ransac.min_iterations = 20_000;
        assert!(options.validate().is_err());

        let mut options = HybridRansacOptions::default();
        options.ransac.squared_inlier_thresholds = vec![256.0, 0.0];
        assert!(options.validate().is_err());

        let mut options = HybridRansacOptions::default();
        options.estimator.refiner.reprojection_loss = LossFunction::Huber { scale: -1.0 };
        assert!(options.validate().is_err());

        let mut options = HybridRansacOptions::default();
        options.estimator.norm_scale = Some(0.0);
        assert!(options.validate().is_err());
    }

    #[test]
    fn layout_defaults() {
        let options = HybridRansacOptions::with_layout(PoolLayout::ThreePool { gradcut: false });
        assert_eq!(
            options.ransac.squared_inlier_thresholds,
            vec![256.0, 256.0, 1.0]
        );
        assert_eq!(PoolLayout::TwoPool.sampson_pool(), 1);
        assert!(options.validate().is_ok());
    }
}
