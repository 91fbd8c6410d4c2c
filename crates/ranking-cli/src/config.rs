//! TOML config loading for the ranking CLI.
//!
//! Deserializes `configs/train.toml`, which has a `[task]` section (the
//! training task descriptor) and an optional `[store]` section, then merges
//! with CLI overrides.

use std::path::{Path, PathBuf};

use ab_ranking::{ProbabilityTransform, TrainingTask};
use anyhow::Context;
use serde::Deserialize;

/// Top-level structure matching `configs/train.toml`.
#[derive(Debug, Deserialize)]
pub struct TrainToml {
    /// Training task descriptor.
    pub task: TrainingTask,
    /// Where the object store lives.
    #[serde(default)]
    pub store: StoreSection,
}

/// Local object store location.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StoreSection {
    /// Root directory; buckets are its subdirectories.
    #[serde(default = "default_store_root")]
    pub root: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            root: default_store_root(),
        }
    }
}

fn default_store_root() -> PathBuf {
    PathBuf::from("data")
}

/// Load and deserialize a `TrainToml` from a TOML file.
pub fn load_train_toml(path: &Path) -> anyhow::Result<TrainToml> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: TrainToml =
        toml::from_str(&contents).with_context(|| format!("Invalid config {}", path.display()))?;
    tracing::info!(path = %path.display(), dataset = %config.task.dataset_name, "Loaded training config");
    Ok(config)
}

/// Task fields settable from the command line.
///
/// Every field is optional; set fields replace the config file's values.
#[derive(Debug, Clone, Default)]
pub struct TaskOverrides {
    pub dataset_name: Option<String>,
    pub epochs: Option<usize>,
    pub learning_rate: Option<f64>,
    pub buffer_size: Option<usize>,
    pub train_percent: Option<f64>,
    pub training_batch_size: Option<usize>,
    pub weight_decay: Option<f64>,
    pub transform: Option<ProbabilityTransform>,
    pub num_workers: Option<usize>,
    pub seed: Option<u64>,
    /// Flags can only switch these on.
    pub load_to_ram: bool,
    pub debug_asserts: bool,
}

/// Build the task from an optional config file task and CLI overrides.
///
/// Priority chain: `TrainingTask` defaults < TOML values < CLI flags. Without
/// a config file the five required fields must all come from flags.
pub fn build_training_task(
    file_task: Option<TrainingTask>,
    overrides: &TaskOverrides,
) -> anyhow::Result<TrainingTask> {
    let mut task = match file_task {
        Some(task) => task,
        None => {
            let missing = |flag: &str| anyhow::anyhow!("--{flag} is required when no --config is given");
            TrainingTask::new(
                overrides.dataset_name.clone().ok_or_else(|| missing("dataset"))?,
                overrides.epochs.ok_or_else(|| missing("epochs"))?,
                overrides.learning_rate.ok_or_else(|| missing("learning-rate"))?,
                overrides.buffer_size.ok_or_else(|| missing("buffer-size"))?,
                overrides.train_percent.ok_or_else(|| missing("train-percent"))?,
            )
        }
    };

    if let Some(name) = &overrides.dataset_name {
        task.dataset_name = name.clone();
    }
    if let Some(n) = overrides.epochs {
        task.epochs = n;
    }
    if let Some(lr) = overrides.learning_rate {
        task.learning_rate = lr;
    }
    if let Some(n) = overrides.buffer_size {
        task.buffer_size = n;
    }
    if let Some(p) = overrides.train_percent {
        task.train_percent = p;
    }
    if let Some(n) = overrides.training_batch_size {
        task.training_batch_size = n;
    }
    if let Some(wd) = overrides.weight_decay {
        task.weight_decay = wd;
    }
    if let Some(t) = overrides.transform {
        task.transform = t;
    }
    if let Some(n) = overrides.num_workers {
        task.num_workers = n;
    }
    if let Some(seed) = overrides.seed {
        task.seed = Some(seed);
    }
    task.load_to_ram |= overrides.load_to_ram;
    task.debug_asserts |= overrides.debug_asserts;

    task.validate().context("Invalid training task")?;
    Ok(task)
}
