//! Session objective: how well a joint selection tracks the target curve.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Scores a cluster schedule against a target curve under a per-interval
/// weight vector. Bigger scores mean better plans (-1 beats -10), so the
/// weighted deviation is negated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    target: Array1<f64>,
    weights: Array1<f64>,
}

impl Objective {
    /// Build an objective from a target curve and its weight vector.
    /// Both must have one entry per interval.
    pub fn new(target: Array1<f64>, weights: Array1<f64>) -> Self {
        assert_eq!(
            target.len(),
            weights.len(),
            "target and weights must cover the same intervals"
        );
        Self { target, weights }
    }

    pub fn intervals(&self) -> usize {
        self.target.len()
    }

    pub fn target(&self) -> &Array1<f64> {
        &self.target
    }

    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    /// Score a `k x intervals` cluster schedule.
    ///
    /// Rows are accumulated in matrix order before the deviation is taken,
    /// so equal inputs score bit-identically everywhere.
    pub fn perf(&self, cs: &Array2<f64>) -> f64 {
        let summed = cs.sum_axis(Axis(0));
        let deviation = (&self.target - &summed).mapv(f64::abs);
        -(deviation * &self.weights).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn zero_matrix_scores_the_weighted_target_sum() {
        let objective = Objective::new(array![1.0, 2.0, 3.0], array![1.0, 0.5, 0.0]);
        let cs = Array2::zeros((2, 3));
        assert_relative_eq!(objective.perf(&cs), -(1.0 + 1.0));
    }

    #[test]
    fn exact_tracking_scores_zero() {
        let objective = Objective::new(array![2.0, 2.0], array![1.0, 1.0]);
        let cs = array![[2.0, 0.0], [0.0, 2.0]];
        assert_relative_eq!(objective.perf(&cs), 0.0);
    }

    #[test]
    fn deviations_are_weighted() {
        let objective = Objective::new(array![1.0, 1.0], array![0.25, 1.0]);
        let cs = array![[0.0, 0.0]];
        assert_relative_eq!(objective.perf(&cs), -1.25);
    }
}
