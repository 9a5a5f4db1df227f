//! Learning-rate groups attached to every trainable parameter.

use std::fmt;

use burn::module::ParamId;
use serde::{Deserialize, Serialize};

/// Gradient multiplier class of a parameter.
///
/// Follows the usual VGG fine-tuning convention: biases learn twice as fast as
/// weights and the freshly initialized classifier four (weight) or eight
/// (bias) times as fast. Batch-norm scale and shift learn at the base rate
/// and are not penalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LrGroup {
    /// Backbone weights, ×1.
    Weight,
    /// Backbone biases, ×2.
    Bias,
    /// Classifier weight, ×4.
    ClassifierWeight,
    /// Classifier bias, ×8.
    ClassifierBias,
    /// Batch-norm scale and shift, ×1.
    Norm,
}

impl LrGroup {
    /// Gradient multiplier of the group.
    pub fn multiplier(&self) -> f32 {
        match self {
            Self::Weight => 1.0,
            Self::Bias => 2.0,
            Self::ClassifierWeight => 4.0,
            Self::ClassifierBias => 8.0,
            Self::Norm => 1.0,
        }
    }

    /// Whether parameters of this group enter the L2 penalty.
    pub fn is_weight(&self) -> bool {
        matches!(self, Self::Weight | Self::ClassifierWeight)
    }
}

impl fmt::Display for LrGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.multiplier())
    }
}

/// Metadata of one trainable tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamTag {
    /// Identifier of the parameter inside the module.
    pub id: ParamId,
    /// `<layer>_w`, `<layer>_b`, `<layer>_gamma` or `<layer>_beta`.
    pub name: String,
    /// Multiplier group.
    pub group: LrGroup,
    /// Tensor rank: 4 for conv weights, 2 for the classifier weight, 1 for biases
    /// and batch-norm parameters.
    pub rank: usize,
}
