//! GAIN command line: train the network or write predicted masks.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gain_core::backend::Autodiff;
use gain_data::VocDataset;
use gain_train::{GainConfig, GainTrainer, ModelSource, Predictor};

#[cfg(feature = "backend-tch")]
mod backend {
    pub use gain_core::backend::LibTorch as Backend;
    use gain_core::backend::LibTorchDevice;

    pub fn device(gpu: usize) -> LibTorchDevice {
        LibTorchDevice::Cuda(gpu)
    }
}

#[cfg(all(feature = "backend-wgpu", not(feature = "backend-tch")))]
mod backend {
    pub use gain_core::backend::Wgpu as Backend;
    use gain_core::backend::WgpuDevice;

    pub fn device(gpu: usize) -> WgpuDevice {
        WgpuDevice::DiscreteGpu(gpu)
    }
}

#[cfg(not(any(feature = "backend-wgpu", feature = "backend-tch")))]
mod backend {
    pub use gain_core::backend::NdArray as Backend;
    use gain_core::backend::NdArrayDevice;

    pub fn device(_gpu: usize) -> NdArrayDevice {
        NdArrayDevice::Cpu
    }
}

type InferenceBackend = backend::Backend;
type TrainBackend = Autodiff<InferenceBackend>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Action {
    Train,
    Inference,
}

#[derive(Parser)]
#[command(name = "gain")]
#[command(author, version)]
#[command(about = "Guided attention inference network: weakly-supervised segmentation from image labels")]
#[command(long_about = "Guided attention inference network: weakly-supervised segmentation from image labels.

EXAMPLES:
  # Train from an ImageNet-pretrained VGG16 archive
  gain -a train --data-root data/VOC2012 --init-model model/init.npz

  # Resume from the checkpoint written after iteration 5999
  gain -a train --data-root data/VOC2012 -r 5999

  # Write predicted masks with that checkpoint
  gain -a inference --data-root data/VOC2012 -r 5999")]
struct Cli {
    /// Device ordinal (GPU backends only)
    #[arg(short = 'g', long = "gpu", default_value = "0", value_name = "ID")]
    gpu: usize,

    /// Fraction of device memory to use (logged, not enforced)
    #[arg(short = 'f', long = "gpu-frac", default_value = "0.49", value_name = "FRAC")]
    gpu_frac: f64,

    /// Restore from the norm checkpoint of this iteration
    #[arg(short = 'r', long = "restore", value_name = "ITER")]
    restore: Option<usize>,

    /// What to do
    #[arg(short = 'a', long = "action", value_enum, default_value = "train")]
    action: Action,

    /// JSON run configuration; omitted fields take their defaults
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Dataset root holding <split>.txt and JPEGImages/
    #[arg(long, default_value = "data/VOC2012", value_name = "DIR")]
    data_root: PathBuf,

    /// Image list to read, without the .txt extension
    #[arg(long, default_value = "train", value_name = "NAME")]
    split: String,

    /// Checkpoint and summary directory (overrides the config)
    #[arg(long, value_name = "DIR")]
    saver: Option<PathBuf>,

    /// Output directory for predicted masks (overrides the config)
    #[arg(long, value_name = "DIR")]
    preds: Option<PathBuf>,

    /// Pretrained .npz archive used when not restoring
    #[arg(long, value_name = "FILE")]
    init_model: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::filter::LevelFilter::from_level(log_level))
        .init();

    if !(cli.gpu_frac > 0.0 && cli.gpu_frac <= 1.0) {
        bail!("--gpu-frac must be in (0, 1], got {}", cli.gpu_frac);
    }

    let mut config = match &cli.config {
        Some(path) => GainConfig::load(path)
            .with_context(|| format!("Failed to load config '{}'", path.display()))?,
        None => GainConfig::default(),
    };
    if let Some(saver) = &cli.saver {
        config.saver_path = saver.clone();
    }
    if let Some(preds) = &cli.preds {
        config.pred_path = preds.clone();
    }

    let source = match (cli.restore, &cli.init_model) {
        (Some(iteration), _) => ModelSource::Checkpoint(iteration),
        (None, Some(path)) => ModelSource::Pretrained(path.clone()),
        (None, None) => ModelSource::Random,
    };

    tracing::info!(
        "Device {} with memory fraction {} (not enforced)",
        cli.gpu,
        cli.gpu_frac
    );

    let dataset = VocDataset::open(&cli.data_root, &cli.split, config.voc_config())
        .with_context(|| {
            format!(
                "Failed to load split '{}' from '{}'",
                cli.split,
                cli.data_root.display()
            )
        })?;

    match cli.action {
        Action::Train => handle_train(config, source, dataset, cli.gpu),
        Action::Inference => handle_inference(config, source, dataset, cli.gpu),
    }
}

fn handle_train(
    config: GainConfig,
    source: ModelSource,
    dataset: VocDataset,
    gpu: usize,
) -> Result<()> {
    let device = backend::device(gpu);
    let (model, start) = source
        .load::<TrainBackend>(&config, &device)
        .context("Failed to initialize model")?;

    let trainer = GainTrainer::<TrainBackend>::new(config, device);
    let output = trainer
        .fit(model, dataset, start)
        .context("Training failed")?;

    println!(
        "Trained {} iterations ({} optimizer steps) in {:.1}s",
        output.iterations, output.optimizer_steps, output.training_time_secs
    );
    if let Some(losses) = output.last_losses {
        println!(
            "Last loss: cl={:.5} am={:.5} l2={:.5} total={:.5}",
            losses.loss_cl, losses.loss_am, losses.l2, losses.total
        );
    }
    Ok(())
}

fn handle_inference(
    config: GainConfig,
    source: ModelSource,
    dataset: VocDataset,
    gpu: usize,
) -> Result<()> {
    if source == ModelSource::Random {
        tracing::warn!("No checkpoint or pretrained archive given, predicting with random weights");
    }

    let device = backend::device(gpu);
    let (model, _) = source
        .load::<InferenceBackend>(&config, &device)
        .context("Failed to initialize model")?;

    let predictor = Predictor::new(model, &config, device);
    let summary = predictor
        .run(&dataset, &config.pred_path)
        .context("Inference failed")?;

    println!(
        "Wrote {} masks to {} in {:.1}s",
        summary.images,
        summary.output_dir.display(),
        summary.duration_secs
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["gain"]).unwrap();
        assert_eq!(cli.gpu, 0);
        assert_eq!(cli.gpu_frac, 0.49);
        assert_eq!(cli.action, Action::Train);
        assert_eq!(cli.restore, None);
        assert_eq!(cli.split, "train");
    }

    #[test]
    fn test_inference_with_restore() {
        let cli = Cli::try_parse_from(["gain", "-a", "inference", "-r", "5999", "-f", "0.3"]).unwrap();
        assert_eq!(cli.action, Action::Inference);
        assert_eq!(cli.restore, Some(5999));
        assert_eq!(cli.gpu_frac, 0.3);
    }
}
