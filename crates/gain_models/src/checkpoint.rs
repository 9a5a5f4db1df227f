//! Model checkpointing.
//!
//! Checkpoints are burn records written with
//! [`NamedMpkFileRecorder`](burn::record::NamedMpkFileRecorder) at full
//! precision. A run directory holds two kinds:
//!
//! - `norm-<iter>.mpk`: periodic snapshots, of which only the newest few are kept
//! - `lr-<lr>-<iter>.mpk`: written right before each learning-rate drop, never pruned
//!
//! Every checkpoint has a `.json` sidecar with [`CheckpointMetadata`].

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Extension the recorder appends.
const RECORD_EXTENSION: &str = "mpk";

/// Name of a checkpoint inside a run directory, without extension.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointName {
    /// Periodic snapshot after `iteration`.
    Norm {
        /// Iteration the snapshot was taken at.
        iteration: usize,
    },
    /// Snapshot taken before the learning rate drops from `lr`.
    LrDrop {
        /// Learning rate in effect up to this point.
        lr: f64,
        /// Iteration the snapshot was taken at.
        iteration: usize,
    },
}

impl CheckpointName {
    /// Iteration the checkpoint was written at.
    pub fn iteration(&self) -> usize {
        match self {
            Self::Norm { iteration } | Self::LrDrop { iteration, .. } => *iteration,
        }
    }

    /// Parse a file stem such as `norm-2999` or `lr-0.0001-4999`.
    pub fn parse(stem: &str) -> Option<Self> {
        if let Some(iter) = stem.strip_prefix("norm-") {
            return iter.parse().ok().map(|iteration| Self::Norm { iteration });
        }
        let rest = stem.strip_prefix("lr-")?;
        let (lr, iter) = rest.rsplit_once('-')?;
        Some(Self::LrDrop {
            lr: lr.parse().ok()?,
            iteration: iter.parse().ok()?,
        })
    }

    /// Record path inside `dir`, extension included.
    pub fn path_in(&self, dir: impl AsRef<Path>) -> PathBuf {
        dir.as_ref().join(format!("{}.{}", self, RECORD_EXTENSION))
    }
}

impl fmt::Display for CheckpointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Norm { iteration } => write!(f, "norm-{}", iteration),
            Self::LrDrop { lr, iteration } => write!(f, "lr-{}-{}", lr, iteration),
        }
    }
}

/// Metadata stored beside a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Iteration the checkpoint was written at.
    pub iteration: usize,
    /// Epoch of that iteration.
    pub epoch: usize,
    /// Learning rate in effect.
    pub lr: f64,
    /// Unix timestamp in seconds.
    pub saved_at: u64,
}

impl CheckpointMetadata {
    /// Save metadata to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).map_err(|e| ModelError::Checkpoint(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load metadata from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| ModelError::Checkpoint(e.to_string()))
    }
}

fn metadata_path(record_path: &Path) -> PathBuf {
    record_path.with_extension("json")
}

/// Save `model` as checkpoint `name` in `dir`, creating the directory.
///
/// Returns the path of the written record.
pub fn save_checkpoint<B, M>(
    model: &M,
    dir: impl AsRef<Path>,
    name: &CheckpointName,
    metadata: &CheckpointMetadata,
) -> Result<PathBuf>
where
    B: Backend,
    M: Module<B>,
{
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let path = name.path_in(dir);
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    recorder
        .record(model.clone().into_record(), path.clone())
        .map_err(|e| ModelError::Checkpoint(format!("{}: {}", path.display(), e)))?;
    metadata.save(metadata_path(&path))?;

    tracing::info!("Saved checkpoint {}", path.display());
    Ok(path)
}

/// Load checkpoint `name` from `dir` into `model`.
pub fn load_checkpoint<B, M>(
    model: M,
    dir: impl AsRef<Path>,
    name: &CheckpointName,
    device: &B::Device,
) -> Result<(M, Option<CheckpointMetadata>)>
where
    B: Backend,
    M: Module<B>,
{
    let path = name.path_in(dir);
    if !path.exists() {
        return Err(ModelError::Checkpoint(format!(
            "{} does not exist",
            path.display()
        )));
    }

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let record = recorder
        .load(path.clone(), device)
        .map_err(|e| ModelError::Checkpoint(format!("{}: {}", path.display(), e)))?;

    let meta_path = metadata_path(&path);
    let metadata = if meta_path.exists() {
        Some(CheckpointMetadata::load(meta_path)?)
    } else {
        None
    };

    tracing::info!("Restored checkpoint {}", path.display());
    Ok((model.load_record(record), metadata))
}

/// Periodic checkpoints in `dir`, oldest first.
pub fn list_norm_checkpoints(dir: impl AsRef<Path>) -> Result<Vec<usize>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut iterations = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
            continue;
        }
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        if let Some(CheckpointName::Norm { iteration }) = CheckpointName::parse(stem) {
            iterations.push(iteration);
        }
    }
    iterations.sort_unstable();
    Ok(iterations)
}

/// Delete all but the `keep` newest periodic checkpoints.
///
/// Returns the iterations that were removed.
pub fn prune_checkpoints(dir: impl AsRef<Path>, keep: usize) -> Result<Vec<usize>> {
    let dir = dir.as_ref();
    let iterations = list_norm_checkpoints(dir)?;
    let excess = iterations.len().saturating_sub(keep);

    let removed: Vec<usize> = iterations.into_iter().take(excess).collect();
    for &iteration in &removed {
        let path = CheckpointName::Norm { iteration }.path_in(dir);
        fs::remove_file(&path)?;
        let meta = metadata_path(&path);
        if meta.exists() {
            fs::remove_file(meta)?;
        }
        tracing::debug!("Pruned checkpoint {}", path.display());
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{ChannelWidths, VGG16_HEAD};
    use crate::vgg::Vgg16Config;
    use burn::module::AutodiffModule;
    use burn::tensor::Distribution;
    use gain_core::backend::{Autodiff, NdArray};

    type TestBackend = NdArray;

    fn metadata(iteration: usize) -> CheckpointMetadata {
        CheckpointMetadata {
            iteration,
            epoch: 0,
            lr: 1e-4,
            saved_at: 0,
        }
    }

    fn tiny_config() -> Vgg16Config {
        Vgg16Config::new(3).with_widths(ChannelWidths {
            input: 3,
            base: 2,
            max: 16,
            fc: 4,
        })
    }

    #[test]
    fn test_checkpoint_names() {
        let norm = CheckpointName::Norm { iteration: 2999 };
        assert_eq!(norm.to_string(), "norm-2999");
        assert_eq!(CheckpointName::parse("norm-2999"), Some(norm));

        let lr = CheckpointName::LrDrop {
            lr: 0.0001,
            iteration: 14639,
        };
        assert_eq!(lr.to_string(), "lr-0.0001-14639");
        assert_eq!(CheckpointName::parse("lr-0.0001-14639"), Some(lr.clone()));
        assert_eq!(lr.iteration(), 14639);

        assert_eq!(CheckpointName::parse("best-10"), None);
        assert_eq!(CheckpointName::parse("norm-x"), None);
    }

    #[test]
    fn test_path_has_record_extension() {
        let path = CheckpointName::Norm { iteration: 5 }.path_in("/tmp/saver");
        assert_eq!(path, PathBuf::from("/tmp/saver/norm-5.mpk"));

        let lr = CheckpointName::LrDrop {
            lr: 0.0001,
            iteration: 7,
        };
        assert_eq!(lr.path_in("/tmp/saver"), PathBuf::from("/tmp/saver/lr-0.0001-7.mpk"));
    }

    #[test]
    fn test_save_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let config = tiny_config();
        let model = config.init::<TestBackend>(&device).unwrap();
        let name = CheckpointName::Norm { iteration: 2999 };

        let path = save_checkpoint(&model, dir.path(), &name, &metadata(2999)).unwrap();
        assert!(path.exists());

        let fresh = config.init::<TestBackend>(&device).unwrap();
        let (restored, meta) = load_checkpoint(fresh, dir.path(), &name, &device).unwrap();
        assert_eq!(meta, Some(metadata(2999)));

        let x = Tensor::<TestBackend, 4>::ones([1, 3, 16, 16], &device);
        let a = model.classify(x.clone());
        let b = restored.classify(x);
        let diff: f32 = (a - b).abs().max().into_scalar();
        assert!(diff < 1e-6);
    }

    #[test]
    fn test_batch_norm_statistics_are_restored() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let config = tiny_config().with_layers(
            vec!["conv1_1".into(), "batch_norm1_1".into(), "relu1_1".into()],
            VGG16_HEAD.iter().map(|s| s.to_string()).collect(),
        );

        // a training-mode pass moves the running statistics away from their init
        let model = config.init::<Autodiff<TestBackend>>(&device).unwrap();
        let x = Tensor::<Autodiff<TestBackend>, 4>::random(
            [2, 3, 8, 8],
            Distribution::Normal(5.0, 2.0),
            &device,
        );
        let _ = model.classify(x);
        let trained = model.valid();

        let name = CheckpointName::Norm { iteration: 0 };
        save_checkpoint(&trained, dir.path(), &name, &metadata(0)).unwrap();
        let fresh = config.init::<TestBackend>(&device).unwrap();
        let (restored, _) = load_checkpoint(fresh.clone(), dir.path(), &name, &device).unwrap();

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 8, 8], &device) * 3.0;
        let expected = trained.classify(input.clone());
        let diff: f32 = (restored.classify(input.clone()) - expected.clone())
            .abs()
            .max()
            .into_scalar();
        assert!(diff < 1e-6);

        let untouched: f32 = (fresh.classify(input) - expected).abs().max().into_scalar();
        assert!(untouched > 0.0);
    }

    #[test]
    fn test_missing_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let model = tiny_config().init::<TestBackend>(&device).unwrap();
        let err = load_checkpoint(model, dir.path(), &CheckpointName::Norm { iteration: 1 }, &device)
            .unwrap_err();
        assert!(matches!(err, ModelError::Checkpoint(_)));
    }

    #[test]
    fn test_prune_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        for iteration in [2999, 5999, 8999, 11999] {
            let path = CheckpointName::Norm { iteration }.path_in(dir.path());
            fs::write(&path, b"").unwrap();
            metadata(iteration).save(metadata_path(&path)).unwrap();
        }
        let lr = CheckpointName::LrDrop {
            lr: 1e-4,
            iteration: 100,
        }
        .path_in(dir.path());
        fs::write(&lr, b"").unwrap();

        let removed = prune_checkpoints(dir.path(), 2).unwrap();
        assert_eq!(removed, vec![2999, 5999]);
        assert_eq!(list_norm_checkpoints(dir.path()).unwrap(), vec![8999, 11999]);
        assert!(lr.exists());
        assert!(!dir.path().join("norm-2999.json").exists());
    }
}
