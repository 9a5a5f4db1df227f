//! Integration tests for the training and inference pipeline.
//!
//! These tests run the whole pipeline on synthetic images with a tiny network.

use approx::assert_relative_eq;
use burn::module::AutodiffModule;
use burn::optim::GradientsParams;
use burn::prelude::*;
use ndarray::Array3;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use gain_core::backend::{Autodiff, NdArray};
use gain_core::ImageSize;
use gain_data::{multi_hot, read_mask, ImageSample, InMemoryDataset};
use gain_models::ChannelWidths;
use gain_train::{GainConfig, GainLoss, GainTrainer, ModelSource, Predictor};

type InferenceBackend = NdArray;
type TrainBackend = Autodiff<NdArray>;

const CLASSES: usize = 21;
const SIZE: usize = 24;

fn tiny_config(saver: std::path::PathBuf) -> GainConfig {
    GainConfig {
        input_size: ImageSize::new(SIZE, SIZE),
        complement_size: ImageSize::new(SIZE, SIZE),
        category_num: CLASSES,
        widths: ChannelWidths {
            input: 3,
            base: 2,
            max: 16,
            fc: 8,
        },
        accum_num: 1,
        batch_size: 1,
        epochs: 1,
        saver_path: saver.join("saver"),
        pred_path: saver.join("preds"),
        ..Default::default()
    }
}

/// Random images, each labelled with `class`.
fn synthetic_dataset(n: usize, class: usize) -> InMemoryDataset {
    synthetic_dataset_of_size(n, class, SIZE)
}

fn synthetic_dataset_of_size(n: usize, class: usize, size: usize) -> InMemoryDataset {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let samples = (0..n)
        .map(|i| {
            let image = Array3::from_shape_fn((3, size, size), |_| rng.gen::<f32>() * 255.0 - 120.0);
            ImageSample::new(format!("synthetic_{}", i), image, multi_hot(&[class], CLASSES).unwrap())
        })
        .collect();
    InMemoryDataset::from_samples(samples, CLASSES).unwrap()
}

fn reference_logits(model: &gain_models::GainNet<InferenceBackend>) -> Vec<f32> {
    let device = Default::default();
    let images = Tensor::<InferenceBackend, 4>::ones([1, 3, SIZE, SIZE], &device) * 10.0;
    model
        .backbone()
        .classify(images)
        .into_data()
        .to_vec()
        .unwrap()
}

fn classifier_bias(model: &gain_models::GainNet<InferenceBackend>) -> Vec<f32> {
    model
        .backbone()
        .classifier()
        .bias
        .as_ref()
        .unwrap()
        .val()
        .into_data()
        .to_vec()
        .unwrap()
}

#[test]
fn test_every_parameter_receives_a_gradient() {
    let dir = tempfile::tempdir().unwrap();
    let config = tiny_config(dir.path().to_path_buf());
    let device = Default::default();
    let (model, _) = ModelSource::Random
        .load::<TrainBackend>(&config, &device)
        .unwrap();

    let batch = gain_data::BatchLoader::single_pass::<TrainBackend>(&synthetic_dataset(1, 5), 1, &device)
        .next()
        .unwrap()
        .unwrap();
    let output = model.forward(batch.images);
    assert_eq!(output.complement_logits.dims(), [1, CLASSES, CLASSES]);

    let loss = GainLoss::new(&output, batch.labels, model.l2_penalty(), config.weight_decay);
    let values = loss.values();
    assert!(values.is_finite(), "Loss is not finite: {:?}", values);
    assert!(values.loss_am > 0.0 && values.loss_am < 1.0);

    let grads = GradientsParams::from_grads(loss.total.backward(), &model);
    for tag in model.param_tags() {
        let present = match tag.rank {
            1 => grads.get::<InferenceBackend, 1>(tag.id).is_some(),
            2 => grads.get::<InferenceBackend, 2>(tag.id).is_some(),
            4 => grads.get::<InferenceBackend, 4>(tag.id).is_some(),
            _ => false,
        };
        assert!(present, "No gradient for {}", tag.name);
    }
}

#[test]
fn test_one_step_changes_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let config = tiny_config(dir.path().to_path_buf());
    let device = Default::default();
    let (model, start) = ModelSource::Random
        .load::<TrainBackend>(&config, &device)
        .unwrap();
    let before = reference_logits(&model.valid());

    let trainer = GainTrainer::<TrainBackend>::new(config, device);
    let result = trainer.fit(model, synthetic_dataset(1, 5), start);
    assert!(result.is_ok(), "Training failed: {:?}", result.err());
    let output = result.unwrap();

    assert_eq!(output.iterations, 1);
    assert_eq!(output.optimizer_steps, 1);
    let losses = output.last_losses.unwrap();
    assert!(losses.is_finite(), "Loss is not finite: {:?}", losses);

    let after = reference_logits(&output.model.valid());
    assert_ne!(before, after);
}

#[test]
fn test_first_step_scales_with_learning_rate() {
    let dir = tempfile::tempdir().unwrap();
    let config = GainConfig {
        dropout: 0.0,
        ..tiny_config(dir.path().to_path_buf())
    };
    let device = Default::default();
    let (model, start) = ModelSource::Random
        .load::<TrainBackend>(&config, &device)
        .unwrap();
    let before = classifier_bias(&model.valid());

    let rates = [1e-4, 1e-3];
    let deltas: Vec<Vec<f32>> = rates
        .iter()
        .map(|&lr| {
            let config = GainConfig {
                base_lr: lr,
                saver_path: dir.path().join(format!("saver-{}", lr)),
                ..config.clone()
            };
            let output = GainTrainer::<TrainBackend>::new(config, device)
                .fit(model.clone(), synthetic_dataset(1, 5), start)
                .unwrap();
            assert_eq!(output.optimizer_steps, 1);
            classifier_bias(&output.model.valid())
                .iter()
                .zip(&before)
                .map(|(after, initial)| after - initial)
                .collect()
        })
        .collect();

    // Adam's first step moves every parameter with a non-vanishing gradient by lr
    for (delta, &lr) in deltas.iter().zip(&rates) {
        assert_eq!(delta.len(), CLASSES);
        for d in delta {
            assert_relative_eq!(d.abs(), lr as f32, max_relative = 1e-2);
        }
    }
    for (small, large) in deltas[0].iter().zip(&deltas[1]) {
        assert_relative_eq!(*large, 10.0 * small, max_relative = 1e-2);
    }
}

#[test]
fn test_full_resolution_step() {
    let dir = tempfile::tempdir().unwrap();
    let config = GainConfig {
        input_size: ImageSize::new(321, 321),
        complement_size: ImageSize::new(321, 321),
        ..tiny_config(dir.path().to_path_buf())
    };
    let device = Default::default();
    let (model, start) = ModelSource::Random
        .load::<TrainBackend>(&config, &device)
        .unwrap();

    let output = GainTrainer::<TrainBackend>::new(config, device)
        .fit(model, synthetic_dataset_of_size(1, 5, 321), start)
        .unwrap();

    assert_eq!(output.optimizer_steps, 1);
    let losses = output.last_losses.unwrap();
    assert!(losses.loss_cl.is_finite(), "Classification loss: {}", losses.loss_cl);
    assert!(losses.loss_am.is_finite(), "Attention-mining loss: {}", losses.loss_am);
}

#[test]
fn test_train_then_predict() {
    let dir = tempfile::tempdir().unwrap();
    let config = GainConfig {
        checkpoint_every: 4,
        epochs: 1,
        ..tiny_config(dir.path().to_path_buf())
    };
    let device = Default::default();
    let (model, start) = ModelSource::Random
        .load::<TrainBackend>(&config, &device)
        .unwrap();
    GainTrainer::<TrainBackend>::new(config.clone(), device)
        .fit(model, synthetic_dataset(4, 5), start)
        .unwrap();

    let (model, start) = ModelSource::Checkpoint(3)
        .load::<InferenceBackend>(&config, &Default::default())
        .unwrap();
    assert_eq!(start, 4);

    let dataset = synthetic_dataset(2, 5);
    let summary = Predictor::new(model, &config, Default::default())
        .run(&dataset, &config.pred_path)
        .unwrap();
    assert_eq!(summary.images, 2);

    let mask = read_mask(config.pred_path.join("synthetic_1.npy")).unwrap();
    assert_eq!(mask.dim(), (SIZE, SIZE));
    assert!(mask.iter().all(|&c| (c as usize) < CLASSES));
}
