//! Input container shared by the solvers, the evaluator and the refiner.
//!
//! A [`CorrespondenceSet`] stores, per correspondence, the normalised image
//! coordinates in both views, the two depth values and a confidence weight.
//! Construction validates the invariants once, so the estimation core can
//! index into the set without further checks.

use nalgebra::{Vector2, Vector3};

use crate::error::{HybridPoseError, Result};

/// Two-view correspondences augmented with per-view depth.
#[derive(Debug, Clone)]
pub struct CorrespondenceSet {
    x0: Vec<Vector2<f64>>,
    x1: Vec<Vector2<f64>>,
    depth0: Vec<f64>,
    depth1: Vec<f64>,
    weights: Vec<f64>,
    min_depth: Vector2<f64>,
}

impl CorrespondenceSet {
    /// Build a validated set.
    ///
    /// `weights` defaults to one per correspondence when `None`.
    pub fn new(
        x0: Vec<Vector2<f64>>,
        x1: Vec<Vector2<f64>>,
        depth0: Vec<f64>,
        depth1: Vec<f64>,
        min_depth: Vector2<f64>,
        weights: Option<Vec<f64>>,
    ) -> Result<Self> {
        let n = x0.len();
        check_len("x1", n, x1.len())?;
        check_len("depth0", n, depth0.len())?;
        check_len("depth1", n, depth1.len())?;

        let weights = match weights {
            Some(w) => {
                check_len("weights", n, w.len())?;
                w
            }
            None => vec![1.0; n],
        };

        check_points("x0", &x0)?;
        check_points("x1", &x1)?;
        check_finite("depth0", &depth0)?;
        check_finite("depth1", &depth1)?;
        check_finite("weights", &weights)?;
        if let Some((index, &value)) = weights.iter().enumerate().find(|(_, w)| **w < 0.0) {
            return Err(HybridPoseError::NegativeWeight { index, value });
        }
        if !min_depth.iter().all(|d| d.is_finite()) {
            return Err(HybridPoseError::NonFinite {
                what: "min_depth",
                index: 0,
            });
        }

        Ok(Self {
            x0,
            x1,
            depth0,
            depth1,
            weights,
            min_depth,
        })
    }

    pub fn len(&self) -> usize {
        self.x0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x0.is_empty()
    }

    #[inline]
    pub fn x0(&self, i: usize) -> Vector2<f64> {
        self.x0[i]
    }

    #[inline]
    pub fn x1(&self, i: usize) -> Vector2<f64> {
        self.x1[i]
    }

    /// Homogeneous coordinate `(u, v, 1)` of point `i` in view 0.
    #[inline]
    pub fn x0_homogeneous(&self, i: usize) -> Vector3<f64> {
        Vector3::new(self.x0[i].x, self.x0[i].y, 1.0)
    }

    #[inline]
    pub fn x1_homogeneous(&self, i: usize) -> Vector3<f64> {
        Vector3::new(self.x1[i].x, self.x1[i].y, 1.0)
    }

    #[inline]
    pub fn depth0(&self, i: usize) -> f64 {
        self.depth0[i]
    }

    #[inline]
    pub fn depth1(&self, i: usize) -> f64 {
        self.depth1[i]
    }

    #[inline]
    pub fn weight(&self, i: usize) -> f64 {
        self.weights[i]
    }

    /// Minimum admissible depth of view 0 and view 1.
    pub fn min_depth(&self) -> Vector2<f64> {
        self.min_depth
    }
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(HybridPoseError::LengthMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

fn check_finite(what: &'static str, values: &[f64]) -> Result<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(HybridPoseError::NonFinite { what, index }),
        None => Ok(()),
    }
}

fn check_points(what: &'static str, points: &[Vector2<f64>]) -> Result<()> {
    match points
        .iter()
        .position(|p| !(p.x.is_finite() && p.y.is_finite()))
    {
        Some(index) => Err(HybridPoseError::NonFinite { what, index }),
        None => Ok(()),
    }
}
