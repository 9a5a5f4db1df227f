//! Learning rate schedulers.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};

/// Trait for learning rate schedulers.
pub trait Scheduler: Send + Sync {
    /// Get the learning rate for the current step.
    fn get_lr(&self, step: usize) -> f64;

    /// Get the scheduler name.
    fn name(&self) -> &str;

    /// Learning rate of the previous step when `step` changes it.
    fn drop_at(&self, step: usize) -> Option<f64> {
        if step == 0 {
            return None;
        }
        let previous = self.get_lr(step - 1);
        (self.get_lr(step) != previous).then_some(previous)
    }
}

/// Piecewise constant learning rate.
///
/// `values[k]` applies from `boundaries[k - 1]` (inclusive) up to
/// `boundaries[k]`; `values[0]` applies from step 0. Without boundaries the
/// rate is constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiecewiseConstantLR {
    boundaries: Vec<usize>,
    values: Vec<f64>,
}

impl PiecewiseConstantLR {
    /// Create a schedule from explicit boundaries and values.
    ///
    /// # Errors
    ///
    /// Needs exactly one more value than boundaries and strictly increasing
    /// boundaries.
    pub fn new(boundaries: Vec<usize>, values: Vec<f64>) -> Result<Self> {
        if values.len() != boundaries.len() + 1 {
            return Err(TrainError::InvalidLearningRate(format!(
                "{} boundaries need {} values, got {}",
                boundaries.len(),
                boundaries.len() + 1,
                values.len()
            )));
        }
        if boundaries.windows(2).any(|w| w[0] >= w[1]) {
            return Err(TrainError::InvalidLearningRate(format!(
                "boundaries must increase: {:?}",
                boundaries
            )));
        }
        if let Some(lr) = values.iter().find(|lr| !(lr.is_finite() && **lr > 0.0)) {
            return Err(TrainError::InvalidLearningRate(lr.to_string()));
        }
        Ok(Self { boundaries, values })
    }

    /// `base_lr` multiplied by `decay` at each boundary, given in epochs.
    pub fn from_epochs(
        base_lr: f64,
        decay: f64,
        boundary_epochs: &[usize],
        iterations_per_epoch: usize,
    ) -> Result<Self> {
        let boundaries = boundary_epochs
            .iter()
            .map(|epoch| epoch * iterations_per_epoch)
            .collect();
        let values = (0..=boundary_epochs.len())
            .map(|k| base_lr * decay.powi(k as i32))
            .collect();
        Self::new(boundaries, values)
    }

    /// Boundaries in steps.
    pub fn boundaries(&self) -> &[usize] {
        &self.boundaries
    }
}

impl Scheduler for PiecewiseConstantLR {
    fn get_lr(&self, step: usize) -> f64 {
        let k = self.boundaries.partition_point(|&b| b <= step);
        self.values[k]
    }

    fn name(&self) -> &str {
        "PiecewiseConstantLR"
    }
}
