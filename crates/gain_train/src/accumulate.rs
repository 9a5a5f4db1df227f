//! Gradient accumulation with per-group learning-rate multipliers.
//!
//! Each mini-batch contributes `grad * multiplier / accum_num` for every
//! tagged parameter. After `accum_num` contributions the sum is handed to
//! the optimizer and the accumulator starts again from zero. Windows are
//! counted from the first contribution, so a resumed run applies full windows
//! whatever iteration it restarts at.

use burn::optim::GradientsParams;
use burn::prelude::*;

use crate::error::{Result, TrainError};
use gain_models::ParamTag;

/// Sums scaled gradients over several mini-batches.
pub struct GradientAccumulator {
    tags: Vec<ParamTag>,
    accum_num: usize,
    grads: GradientsParams,
    count: usize,
}

impl GradientAccumulator {
    /// Accumulate over `accum_num` mini-batches for the tagged parameters.
    pub fn new(tags: Vec<ParamTag>, accum_num: usize) -> Result<Self> {
        if accum_num == 0 {
            return Err(TrainError::InvalidConfig(
                "accum_num must be positive".to_string(),
            ));
        }
        Ok(Self {
            tags,
            accum_num,
            grads: GradientsParams::new(),
            count: 0,
        })
    }

    /// Number of mini-batches summed into a step.
    pub fn accum_num(&self) -> usize {
        self.accum_num
    }

    /// Contributions since the last [`take`](Self::take).
    pub fn count(&self) -> usize {
        self.count
    }

    /// Whether the current window holds `accum_num` contributions.
    pub fn ready(&self) -> bool {
        self.count == self.accum_num
    }

    /// Add one mini-batch worth of gradients.
    ///
    /// `B` is the backend the gradients live on, the inner backend when they
    /// come from an autodiff pass. Parameters without a gradient are skipped.
    pub fn add<B: Backend>(&mut self, mut grads: GradientsParams) {
        let scale = 1.0 / self.accum_num as f32;
        for tag in &self.tags {
            let factor = tag.group.multiplier() * scale;
            match tag.rank {
                1 => accumulate::<B, 1>(&mut self.grads, &mut grads, tag, factor),
                2 => accumulate::<B, 2>(&mut self.grads, &mut grads, tag, factor),
                4 => accumulate::<B, 4>(&mut self.grads, &mut grads, tag, factor),
                rank => tracing::warn!("Skipping {} with unsupported rank {}", tag.name, rank),
            }
        }
        self.count += 1;
    }

    /// Hand out the accumulated gradients and reset to zero.
    pub fn take(&mut self) -> GradientsParams {
        self.count = 0;
        std::mem::replace(&mut self.grads, GradientsParams::new())
    }
}

fn accumulate<B: Backend, const D: usize>(
    sum: &mut GradientsParams,
    grads: &mut GradientsParams,
    tag: &ParamTag,
    factor: f32,
) {
    let Some(grad) = grads.remove::<B, D>(tag.id) else {
        return;
    };
    let scaled = grad.mul_scalar(factor);
    let total = match sum.remove::<B, D>(tag.id) {
        Some(previous) => previous + scaled,
        None => scaled,
    };
    sum.register::<B, D>(tag.id, total);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use burn::module::ParamId;
    use gain_core::backend::NdArray;
    use gain_models::LrGroup;

    type TestBackend = NdArray;

    fn tag(group: LrGroup, rank: usize) -> ParamTag {
        ParamTag {
            id: ParamId::new(),
            name: format!("p_{}", group),
            group,
            rank,
        }
    }

    fn grads_for(weight: &ParamTag, bias: &ParamTag, value: f32) -> GradientsParams {
        let device = Default::default();
        let mut grads = GradientsParams::new();
        grads.register::<TestBackend, 4>(
            weight.id,
            Tensor::<TestBackend, 4>::ones([2, 1, 1, 1], &device) * value,
        );
        grads.register::<TestBackend, 1>(bias.id, Tensor::<TestBackend, 1>::ones([2], &device) * value);
        grads
    }

    #[test]
    fn test_accumulated_gradient_is_scaled_mean() {
        let weight = tag(LrGroup::Weight, 4);
        let bias = tag(LrGroup::Bias, 1);
        let mut acc = GradientAccumulator::new(vec![weight.clone(), bias.clone()], 4).unwrap();

        for value in [1.0, 2.0, 3.0, 6.0] {
            acc.add::<TestBackend>(grads_for(&weight, &bias, value));
        }
        assert_eq!(acc.count(), 4);

        let grads = acc.take();
        let w: f32 = grads
            .get::<TestBackend, 4>(weight.id)
            .unwrap()
            .sum()
            .into_scalar();
        let b: f32 = grads.get::<TestBackend, 1>(bias.id).unwrap().sum().into_scalar();

        // mean gradient 3.0, two elements each, bias multiplier 2
        assert_relative_eq!(w, 6.0, epsilon = 1e-6);
        assert_relative_eq!(b, 12.0, epsilon = 1e-6);
    }

    #[test]
    fn test_take_resets() {
        let weight = tag(LrGroup::ClassifierWeight, 4);
        let bias = tag(LrGroup::ClassifierBias, 1);
        let mut acc = GradientAccumulator::new(vec![weight.clone(), bias.clone()], 2).unwrap();

        acc.add::<TestBackend>(grads_for(&weight, &bias, 1.0));
        let first = acc.take();
        assert_eq!(acc.count(), 0);
        assert!(acc.take().get::<TestBackend, 4>(weight.id).is_none());

        let w: f32 = first.get::<TestBackend, 4>(weight.id).unwrap().sum().into_scalar();
        assert_relative_eq!(w, 2.0 * 4.0 / 2.0, epsilon = 1e-6);

        acc.add::<TestBackend>(grads_for(&weight, &bias, 3.0));
        let b: f32 = acc.take().get::<TestBackend, 1>(bias.id).unwrap().sum().into_scalar();
        assert_relative_eq!(b, 2.0 * 3.0 * 8.0 / 2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_ready_after_accum_num_contributions() {
        let weight = tag(LrGroup::Weight, 4);
        let bias = tag(LrGroup::Bias, 1);
        let mut acc = GradientAccumulator::new(vec![weight.clone(), bias.clone()], 4).unwrap();

        // windows start wherever the first contribution lands
        let mut steps = Vec::new();
        for iteration in 3..16 {
            acc.add::<TestBackend>(grads_for(&weight, &bias, 1.0));
            if acc.ready() {
                steps.push(iteration);
                acc.take();
            }
        }
        assert_eq!(steps, vec![6, 10, 14]);
        assert_eq!(acc.count(), 1);

        let mut every = GradientAccumulator::new(Vec::new(), 1).unwrap();
        assert!(!every.ready());
        every.add::<TestBackend>(GradientsParams::new());
        assert!(every.ready());
    }

    #[test]
    fn test_zero_accum_num() {
        assert!(matches!(
            GradientAccumulator::new(Vec::new(), 0),
            Err(TrainError::InvalidConfig(_))
        ));
    }
}
