//! Loss functions.
//!
//! GAIN trains on two terms plus weight decay:
//!
//! - the multi-label classification loss on the input images, and
//! - the attention-mining loss, which rewards the network when a class can
//!   no longer be recognised once its attended region has been erased.

use burn::prelude::*;
use burn::tensor::activation::sigmoid;
use serde::{Deserialize, Serialize};

use gain_models::GainOutput;

/// Binary cross-entropy on logits, averaged over images and classes.
///
/// Uses `max(x, 0) - x * z + ln(1 + e^-|x|)`, which never exponentiates a
/// positive number.
#[derive(Debug, Default, Clone, Copy)]
pub struct BceWithLogitsLoss;

impl BceWithLogitsLoss {
    /// Create a new loss.
    pub fn new() -> Self {
        Self
    }

    /// Compute the loss of `logits` against multi-hot `targets`.
    pub fn forward<B: Backend>(&self, logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
        let positive = logits.clone().clamp_min(0.0);
        let softplus = logits.clone().abs().neg().exp().log1p();
        (positive - logits * targets + softplus).mean()
    }
}

/// Attention-mining loss.
///
/// For image `b` and class `c`, `S[b, c, c]` is the score of class `c` on the
/// image with class `c`'s attention erased. The loss is
/// `Σ_c y[b, c] σ(S[b, c, c]) / Σ_c y[b, c]`, averaged over the batch. Images
/// without labels contribute zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct AttentionMiningLoss;

impl AttentionMiningLoss {
    /// Create a new loss.
    pub fn new() -> Self {
        Self
    }

    /// Compute the loss from complement scores (batch, classes, classes) and
    /// labels (batch, classes).
    pub fn forward<B: Backend>(
        &self,
        complement_logits: Tensor<B, 3>,
        targets: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        let [batch, classes, _] = complement_logits.dims();
        let device = complement_logits.device();

        let own_scores = (complement_logits * diagonal_mask::<B>(classes, &device))
            .sum_dim(2)
            .reshape([batch, classes]);
        let present = targets.clone().sum_dim(1).clamp_min(1.0);
        let per_image = (sigmoid(own_scores) * targets).sum_dim(1) / present;
        per_image.mean()
    }
}

/// (1, n, n) identity used to pick `S[b, c, c]`.
fn diagonal_mask<B: Backend>(n: usize, device: &B::Device) -> Tensor<B, 3> {
    let mut values = vec![0.0f32; n * n];
    for i in 0..n {
        values[i * n + i] = 1.0;
    }
    Tensor::<B, 1>::from_floats(values.as_slice(), device).reshape([1, n, n])
}

/// The loss terms of one step, still attached to the graph.
#[derive(Debug, Clone)]
pub struct GainLoss<B: Backend> {
    /// Classification loss.
    pub cl: Tensor<B, 1>,
    /// Attention-mining loss.
    pub am: Tensor<B, 1>,
    /// Unscaled weight penalty `Σ ½‖W‖²`.
    pub l2: Tensor<B, 1>,
    /// `cl + am + weight_decay * l2`.
    pub total: Tensor<B, 1>,
}

impl<B: Backend> GainLoss<B> {
    /// Combine the terms for a network output.
    pub fn new(
        output: &GainOutput<B>,
        targets: Tensor<B, 2>,
        l2: Tensor<B, 1>,
        weight_decay: f64,
    ) -> Self {
        let cl = BceWithLogitsLoss::new().forward(output.logits.clone(), targets.clone());
        let am = AttentionMiningLoss::new().forward(output.complement_logits.clone(), targets);
        let total = cl.clone() + am.clone() + l2.clone() * weight_decay;
        Self { cl, am, l2, total }
    }

    /// Read the current values.
    pub fn values(&self) -> LossValues {
        LossValues {
            loss_cl: scalar(&self.cl),
            loss_am: scalar(&self.am),
            l2: scalar(&self.l2),
            total: scalar(&self.total),
        }
    }
}

fn scalar<B: Backend>(tensor: &Tensor<B, 1>) -> f32 {
    tensor.clone().into_scalar().elem::<f32>()
}

/// Loss values read back from the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossValues {
    /// Classification loss.
    pub loss_cl: f32,
    /// Attention-mining loss.
    pub loss_am: f32,
    /// Unscaled weight penalty.
    pub l2: f32,
    /// Total loss.
    pub total: f32,
}

impl LossValues {
    /// Whether every term is finite.
    pub fn is_finite(&self) -> bool {
        [self.loss_cl, self.loss_am, self.l2, self.total]
            .iter()
            .all(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use gain_core::backend::NdArray;

    type TestBackend = NdArray;

    fn tensor2(values: &[f32], shape: [usize; 2]) -> Tensor<TestBackend, 2> {
        Tensor::<TestBackend, 1>::from_floats(values, &Default::default()).reshape(shape)
    }

    fn sigmoid_f(x: f32) -> f32 {
        1.0 / (1.0 + (-x).exp())
    }

    #[test]
    fn test_bce_matches_definition() {
        let logits = [2.0, -1.0, 0.0, 0.5];
        let targets = [1.0, 0.0, 1.0, 0.0];
        let expected: f32 = logits
            .iter()
            .zip(targets.iter())
            .map(|(&x, &z)| {
                let p = sigmoid_f(x);
                -(z * p.ln() + (1.0 - z) * (1.0 - p).ln())
            })
            .sum::<f32>()
            / 4.0;

        let loss = BceWithLogitsLoss::new()
            .forward(tensor2(&logits, [2, 2]), tensor2(&targets, [2, 2]))
            .into_scalar();
        assert_relative_eq!(loss, expected, epsilon = 1e-5);
    }

    #[test]
    fn test_bce_is_stable_for_large_logits() {
        let loss = BceWithLogitsLoss::new()
            .forward(tensor2(&[500.0, -500.0], [1, 2]), tensor2(&[0.0, 1.0], [1, 2]))
            .into_scalar();
        assert!(loss.is_finite());
        assert_relative_eq!(loss, 500.0, epsilon = 1e-3);
    }

    #[test]
    fn test_attention_mining_uses_own_class_scores() {
        // batch 1, 2 classes: only S[0,0,0] = 2 and S[0,1,1] = -1 matter
        let scores = Tensor::<TestBackend, 1>::from_floats(
            [2.0, 100.0, 100.0, -1.0].as_slice(),
            &Default::default(),
        )
        .reshape([1, 2, 2]);

        let both = AttentionMiningLoss::new()
            .forward(scores.clone(), tensor2(&[1.0, 1.0], [1, 2]))
            .into_scalar();
        assert_relative_eq!(both, (sigmoid_f(2.0) + sigmoid_f(-1.0)) / 2.0, epsilon = 1e-6);

        let second = AttentionMiningLoss::new()
            .forward(scores, tensor2(&[0.0, 1.0], [1, 2]))
            .into_scalar();
        assert_relative_eq!(second, sigmoid_f(-1.0), epsilon = 1e-6);
    }

    #[test]
    fn test_attention_mining_unlabelled_image_contributes_zero() {
        let scores = Tensor::<TestBackend, 3>::zeros([2, 2, 2], &Default::default());
        let loss = AttentionMiningLoss::new()
            .forward(scores, tensor2(&[1.0, 0.0, 0.0, 0.0], [2, 2]))
            .into_scalar();
        // first image: σ(0) = 0.5, second: 0, batch mean 0.25
        assert_relative_eq!(loss, 0.25, epsilon = 1e-6);
    }

    #[test]
    fn test_loss_values_finite() {
        let values = LossValues {
            loss_cl: 0.5,
            loss_am: 0.2,
            l2: 10.0,
            total: 0.7005,
        };
        assert!(values.is_finite());
        assert!(!LossValues { total: f32::NAN, ..values }.is_finite());
    }
}
