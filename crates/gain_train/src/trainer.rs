//! The GAIN training loop.
//!
//! ```text
//! Initializing -> Iterating <-> Checkpointing -> Terminal
//! ```
//!
//! Each iteration draws one mini-batch from the cyclic loader and adds its
//! gradients to the accumulator; once `accum_num` mini-batches are summed an
//! Adam step is applied. Summaries are written every `summary_every` iterations and
//! a `norm-<i>` checkpoint whenever `i % checkpoint_every` is the last slot
//! of a window. Accumulated gradients are never checkpointed.

use std::path::PathBuf;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use gain_data::{BatchLoader, SegmentationDataset};
use gain_models::{
    load_checkpoint, prune_checkpoints, save_checkpoint, CheckpointMetadata, CheckpointName,
    GainNet, PretrainedArchive,
};

use crate::accumulate::GradientAccumulator;
use crate::config::GainConfig;
use crate::error::{Result, TrainError};
use crate::losses::{GainLoss, LossValues};
use crate::scheduler::Scheduler;
use crate::summary::{SummaryRecord, SummaryWriter};

const CONFIG_FILE: &str = "config.json";
const ADAM_EPSILON: f32 = 1e-8;

/// Where the initial parameters come from.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelSource {
    /// N(0, 0.01) weights, zero biases.
    Random,
    /// A `.npz` archive of pretrained weights.
    Pretrained(PathBuf),
    /// The `norm-<iteration>` checkpoint in the saver directory.
    Checkpoint(usize),
}

impl ModelSource {
    /// Build the network and return the iteration to start from.
    pub fn load<B: Backend>(
        &self,
        config: &GainConfig,
        device: &B::Device,
    ) -> Result<(GainNet<B>, usize)> {
        let model_config = config.model_config();
        match self {
            Self::Random => {
                tracing::info!("Initializing model randomly");
                Ok((model_config.init(device)?, 0))
            }
            Self::Pretrained(path) => {
                tracing::info!("Initializing model from {}", path.display());
                let archive = PretrainedArchive::open(path)?;
                Ok((model_config.init_pretrained(&archive, device)?, 0))
            }
            Self::Checkpoint(iteration) => {
                let model = model_config.init::<B>(device)?;
                let name = CheckpointName::Norm {
                    iteration: *iteration,
                };
                let (model, _) =
                    load_checkpoint::<B, GainNet<B>>(model, &config.saver_path, &name, device)?;
                Ok((model, iteration + 1))
            }
        }
    }
}

/// Phase of the training driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    /// Building or restoring the model.
    Initializing,
    /// About to run `iteration`.
    Iterating {
        /// Next iteration to run.
        iteration: usize,
    },
    /// `iteration` finished and its checkpoint is due.
    Checkpointing {
        /// Iteration just finished.
        iteration: usize,
    },
    /// The iteration budget is spent.
    Terminal {
        /// Value of the iteration counter at the end.
        iteration: usize,
    },
}

impl TrainerState {
    /// Leave `Initializing` at `start`.
    pub fn begin(start: usize, total: usize) -> Self {
        Self::next(start, total)
    }

    fn next(iteration: usize, total: usize) -> Self {
        if iteration >= total {
            Self::Terminal { iteration }
        } else {
            Self::Iterating { iteration }
        }
    }

    /// State after the current one completes.
    #[must_use]
    pub fn advance(self, total: usize, checkpoint_every: usize) -> Self {
        match self {
            Self::Initializing => Self::begin(0, total),
            Self::Iterating { iteration } => {
                if iteration % checkpoint_every == checkpoint_every - 1 {
                    Self::Checkpointing { iteration }
                } else {
                    Self::next(iteration + 1, total)
                }
            }
            Self::Checkpointing { iteration } => Self::next(iteration + 1, total),
            Self::Terminal { .. } => self,
        }
    }

    /// Whether training is over.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. })
    }
}

/// Result of a training run.
#[derive(Debug)]
pub struct TrainingOutput<M> {
    /// Trained model.
    pub model: M,
    /// Iteration counter at the end of the run.
    pub iterations: usize,
    /// Optimizer steps applied.
    pub optimizer_steps: usize,
    /// Losses of the last iteration that ran.
    pub last_losses: Option<LossValues>,
    /// Total training time in seconds.
    pub training_time_secs: f64,
}

/// Trainer for [`GainNet`].
pub struct GainTrainer<B: AutodiffBackend> {
    config: GainConfig,
    device: B::Device,
}

impl<B: AutodiffBackend> GainTrainer<B> {
    /// Create a new trainer.
    pub fn new(config: GainConfig, device: B::Device) -> Self {
        Self { config, device }
    }

    /// Run configuration.
    pub fn config(&self) -> &GainConfig {
        &self.config
    }

    /// Train `model` on `dataset`, starting at `start_iteration`.
    ///
    /// The loader is fast-forwarded so a resumed run sees the batches an
    /// uninterrupted run would have seen.
    pub fn fit<D: SegmentationDataset>(
        &self,
        model: GainNet<B>,
        dataset: D,
        start_iteration: usize,
    ) -> Result<TrainingOutput<GainNet<B>>> {
        self.config.validate()?;
        let dataset_len = dataset.len();
        let mut loader = BatchLoader::new(
            dataset,
            self.config.batch_size,
            self.config.shuffle,
            self.config.seed(),
        )?;

        let iterations_per_epoch = loader.iterations_per_epoch();
        if iterations_per_epoch == 0 {
            return Err(TrainError::InvalidConfig(format!(
                "dataset of {} images is smaller than batch size {}",
                dataset_len, self.config.batch_size
            )));
        }
        let schedule = self.config.schedule(iterations_per_epoch)?;
        let optim = AdamConfig::new()
            .with_beta_1(self.config.momentum as f32)
            .with_epsilon(ADAM_EPSILON)
            .init::<B, GainNet<B>>();

        loader.skip(start_iteration);
        self.config
            .save(self.config.saver_path.join(CONFIG_FILE))?;

        self.run(model, &mut loader, &schedule, optim, start_iteration)
    }

    fn run<D, O, S>(
        &self,
        mut model: GainNet<B>,
        loader: &mut BatchLoader<D>,
        schedule: &S,
        mut optim: O,
        start_iteration: usize,
    ) -> Result<TrainingOutput<GainNet<B>>>
    where
        D: SegmentationDataset,
        O: Optimizer<GainNet<B>, B>,
        S: Scheduler,
    {
        let config = &self.config;
        let iterations_per_epoch = loader.iterations_per_epoch();
        let total = config.epochs * iterations_per_epoch;

        let mut accumulator = GradientAccumulator::new(model.param_tags(), config.accum_num)?;
        let mut summary = SummaryWriter::create(&config.saver_path)?;
        let mut last_losses = None;
        let mut optimizer_steps = 0;

        let start_time = Instant::now();
        tracing::info!(
            "Training started at {}: iterations {}..{}, lr={}, weight_decay={}, momentum={}, batch_size={}, accum_num={}, epochs={}",
            unix_time(),
            start_iteration,
            total,
            schedule.get_lr(start_iteration),
            config.weight_decay,
            config.momentum,
            config.batch_size,
            config.accum_num,
            config.epochs
        );

        let mut state = TrainerState::Initializing;
        tracing::debug!("{:?}", state);
        state = TrainerState::begin(start_iteration, total);

        loop {
            match state {
                TrainerState::Iterating { iteration } => {
                    let lr = schedule.get_lr(iteration);
                    if let Some(previous) = schedule.drop_at(iteration) {
                        let name = CheckpointName::LrDrop {
                            lr: previous,
                            iteration,
                        };
                        self.save(&model, &name, iteration, iterations_per_epoch, previous)?;
                        tracing::info!(
                            "Learning rate {} -> {} at iteration {}",
                            previous,
                            lr,
                            iteration
                        );
                    }

                    let batch = loader.next_batch::<B>(&self.device)?;
                    let output = model.forward(batch.images);
                    let loss =
                        GainLoss::new(&output, batch.labels, model.l2_penalty(), config.weight_decay);
                    let values = loss.values();

                    let grads = GradientsParams::from_grads(loss.total.backward(), &model);
                    accumulator.add::<B::InnerBackend>(grads);
                    if accumulator.ready() {
                        model = optim.step(lr, model, accumulator.take());
                        optimizer_steps += 1;
                    }

                    if iteration % config.summary_every == 0 {
                        let epoch = iteration as f64 / iterations_per_epoch as f64;
                        tracing::info!(
                            "{:.1}th epoch, {} iters, lr={:.5}, loss={:.5}+{:.5}+{:.5}={:.5}",
                            epoch,
                            iteration,
                            lr,
                            values.loss_cl,
                            values.loss_am,
                            config.weight_decay as f32 * values.l2,
                            values.total
                        );
                        summary.write(&SummaryRecord {
                            iteration,
                            epoch,
                            lr,
                            losses: values,
                        })?;
                    }

                    last_losses = Some(values);
                }
                TrainerState::Checkpointing { iteration } => {
                    let name = CheckpointName::Norm { iteration };
                    self.save(&model, &name, iteration, iterations_per_epoch, schedule.get_lr(iteration))?;
                    let removed = prune_checkpoints(&config.saver_path, config.max_to_keep)?;
                    if !removed.is_empty() {
                        tracing::debug!("Pruned checkpoints {:?}", removed);
                    }
                }
                TrainerState::Initializing => {}
                TrainerState::Terminal { .. } => break,
            }
            state = state.advance(total, config.checkpoint_every);
        }

        let iterations = match state {
            TrainerState::Terminal { iteration } => iteration,
            _ => total,
        };
        if accumulator.count() > 0 {
            tracing::debug!(
                "Dropping {} accumulated mini-batches at shutdown",
                accumulator.count()
            );
        }

        let training_time_secs = start_time.elapsed().as_secs_f64();
        tracing::info!(
            "Training finished at {}: {} iterations, {} optimizer steps, duration {:.1}s",
            unix_time(),
            iterations,
            optimizer_steps,
            training_time_secs
        );

        Ok(TrainingOutput {
            model,
            iterations,
            optimizer_steps,
            last_losses,
            training_time_secs,
        })
    }

    fn save(
        &self,
        model: &GainNet<B>,
        name: &CheckpointName,
        iteration: usize,
        iterations_per_epoch: usize,
        lr: f64,
    ) -> Result<()> {
        let metadata = CheckpointMetadata {
            iteration,
            epoch: iteration / iterations_per_epoch,
            lr,
            saved_at: unix_time(),
        };
        save_checkpoint::<B, GainNet<B>>(model, &self.config.saver_path, name, &metadata)?;
        Ok(())
    }
}

fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
